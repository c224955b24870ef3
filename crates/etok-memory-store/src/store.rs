use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};

use etok_core::ObjectStore;

type ObjectKey = (String, String);

/// Holds objects of one kind in memory, mimicking the API server closely
/// enough for reconcilers: uids and creation timestamps are assigned on
/// create, stale resource versions are rejected, and `replace` and
/// `replace_status` each touch only their half of the object.
#[derive(Debug)]
pub struct MemoryStore<K> {
    objects: Arc<Mutex<BTreeMap<ObjectKey, K>>>,
    version: AtomicU64,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            version: AtomicU64::new(0),
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    fn get_objects_locked(&self) -> anyhow::Result<MutexGuard<BTreeMap<ObjectKey, K>>> {
        match self.objects.lock() {
            Ok(locked_objects) => Ok(locked_objects),
            Err(_) => Err(anyhow::anyhow!("failed to acquire lock")),
        }
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn key(object: &K) -> anyhow::Result<ObjectKey> {
        match &object.meta().name {
            Some(name) => Ok((object.namespace().unwrap_or_default(), name.clone())),
            None => Err(anyhow::anyhow!("{} has no name", K::kind(&()))),
        }
    }

    fn not_found(key: &ObjectKey) -> anyhow::Error {
        anyhow::anyhow!("{} {:?} not found", K::kind(&()), key.1)
    }

    fn check_version(existing: &K, object: &K) -> anyhow::Result<()> {
        match object.resource_version() {
            Some(version) if Some(&version) != existing.meta().resource_version.as_ref() => {
                Err(anyhow::anyhow!(
                    "conflict: {} {:?} has been modified",
                    K::kind(&()),
                    existing.name_any()
                ))
            }
            _ => Ok(()),
        }
    }

    /// Copies the status of `source` onto `target`.
    fn with_status_of(target: &K, source: &K) -> anyhow::Result<K> {
        let mut target_value = serde_json::to_value(target)?;
        let source_value = serde_json::to_value(source)?;

        if let Some(target_map) = target_value.as_object_mut() {
            match source_value.get("status") {
                Some(status) => {
                    target_map.insert("status".to_string(), status.clone());
                }
                None => {
                    target_map.remove("status");
                }
            }
        }

        Ok(serde_json::from_value(target_value)?)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> anyhow::Result<Option<K>> {
        let locked_objects = self.get_objects_locked()?;

        Ok(locked_objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(&self, namespace: &str) -> anyhow::Result<Vec<K>> {
        let locked_objects = self.get_objects_locked()?;

        let objects = locked_objects
            .iter()
            .filter(|((object_namespace, _), _)| namespace.is_empty() || object_namespace == namespace)
            .map(|(_, object)| object.clone())
            .collect();

        Ok(objects)
    }

    async fn create(&self, object: &K) -> anyhow::Result<K> {
        let key = Self::key(object)?;
        let mut locked_objects = self.get_objects_locked()?;

        if locked_objects.contains_key(&key) {
            return Err(anyhow::anyhow!(
                "{} {:?} already exists",
                K::kind(&()),
                key.1
            ));
        }

        let mut created = object.clone();
        let meta = created.meta_mut();
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.creation_timestamp = Some(Time(Utc::now()));
        meta.resource_version = Some(self.next_version());

        locked_objects.insert(key, created.clone());

        Ok(created)
    }

    async fn replace(&self, object: &K) -> anyhow::Result<K> {
        let key = Self::key(object)?;
        let mut locked_objects = self.get_objects_locked()?;

        let existing = match locked_objects.get(&key) {
            Some(existing) => existing,
            None => return Err(Self::not_found(&key)),
        };
        Self::check_version(existing, object)?;

        let mut replaced = Self::with_status_of(object, existing)?;
        let meta = replaced.meta_mut();
        meta.uid = existing.meta().uid.clone();
        meta.creation_timestamp = existing.meta().creation_timestamp.clone();
        meta.resource_version = Some(self.next_version());

        locked_objects.insert(key, replaced.clone());

        Ok(replaced)
    }

    async fn replace_status(&self, object: &K) -> anyhow::Result<K> {
        let key = Self::key(object)?;
        let mut locked_objects = self.get_objects_locked()?;

        let existing = match locked_objects.get(&key) {
            Some(existing) => existing,
            None => return Err(Self::not_found(&key)),
        };
        Self::check_version(existing, object)?;

        let mut replaced = Self::with_status_of(existing, object)?;
        replaced.meta_mut().resource_version = Some(self.next_version());

        locked_objects.insert(key, replaced.clone());

        Ok(replaced)
    }

    async fn delete(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut locked_objects = self.get_objects_locked()?;

        match locked_objects.remove(&key) {
            Some(_) => Ok(()),
            None => Err(Self::not_found(&key)),
        }
    }
}
