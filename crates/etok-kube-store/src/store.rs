use std::{fmt::Debug, marker::PhantomData};

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    core::{ClusterResourceScope, NamespaceResourceScope},
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};

use etok_core::ObjectStore;

/// Namespaced objects held by the Kubernetes API server.
pub struct KubeStore<K> {
    client: Client,
    kind: PhantomData<K>,
}

/// Cluster scoped objects held by the Kubernetes API server.
pub struct ClusterKubeStore<K> {
    client: Client,
    kind: PhantomData<K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            kind: PhantomData,
        }
    }
}

impl<K> ClusterKubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

fn object_name<K: Resource>(object: &K) -> anyhow::Result<String> {
    match &object.meta().name {
        Some(name) => Ok(name.clone()),
        None => Err(anyhow::anyhow!("object has no name")),
    }
}

async fn get_opt<K>(api: Api<K>, name: &str) -> anyhow::Result<Option<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?)
}

async fn replace_status<K>(api: Api<K>, object: &K) -> anyhow::Result<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = object_name(object)?;
    let data = serde_json::to_vec(object)?;

    Ok(api.replace_status(&name, &PostParams::default(), data).await?)
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> anyhow::Result<Option<K>> {
        get_opt(self.api(namespace), name).await
    }

    async fn list(&self, namespace: &str) -> anyhow::Result<Vec<K>> {
        Ok(self.api(namespace).list(&ListParams::default()).await?.items)
    }

    async fn create(&self, object: &K) -> anyhow::Result<K> {
        let api = self.api(&object.namespace().unwrap_or_default());

        Ok(api.create(&PostParams::default(), object).await?)
    }

    async fn replace(&self, object: &K) -> anyhow::Result<K> {
        let api = self.api(&object.namespace().unwrap_or_default());
        let name = object_name(object)?;

        Ok(api.replace(&name, &PostParams::default(), object).await?)
    }

    async fn replace_status(&self, object: &K) -> anyhow::Result<K> {
        replace_status(self.api(&object.namespace().unwrap_or_default()), object).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await?;

        Ok(())
    }
}

#[async_trait]
impl<K> ObjectStore<K> for ClusterKubeStore<K>
where
    K: Resource<DynamicType = (), Scope = ClusterResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, _namespace: &str, name: &str) -> anyhow::Result<Option<K>> {
        get_opt(Api::all(self.client.clone()), name).await
    }

    async fn list(&self, _namespace: &str) -> anyhow::Result<Vec<K>> {
        let api: Api<K> = Api::all(self.client.clone());

        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create(&self, object: &K) -> anyhow::Result<K> {
        let api: Api<K> = Api::all(self.client.clone());

        Ok(api.create(&PostParams::default(), object).await?)
    }

    async fn replace(&self, object: &K) -> anyhow::Result<K> {
        let api: Api<K> = Api::all(self.client.clone());
        let name = object_name(object)?;

        Ok(api.replace(&name, &PostParams::default(), object).await?)
    }

    async fn replace_status(&self, object: &K) -> anyhow::Result<K> {
        replace_status(Api::all(self.client.clone()), object).await
    }

    async fn delete(&self, _namespace: &str, name: &str) -> anyhow::Result<()> {
        let api: Api<K> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;

        Ok(())
    }
}
