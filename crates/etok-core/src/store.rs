use async_trait::async_trait;

/// Access to one kind of object held by the cluster.
///
/// An empty `namespace` addresses cluster scoped objects, and lists across
/// every namespace.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// Returns `None` if the object does not exist.
    async fn get(&self, namespace: &str, name: &str) -> anyhow::Result<Option<K>>;
    async fn list(&self, namespace: &str) -> anyhow::Result<Vec<K>>;
    async fn create(&self, object: &K) -> anyhow::Result<K>;
    /// Replaces everything but the status.
    async fn replace(&self, object: &K) -> anyhow::Result<K>;
    /// Replaces only the status.
    async fn replace_status(&self, object: &K) -> anyhow::Result<K>;
    async fn delete(&self, namespace: &str, name: &str) -> anyhow::Result<()>;
}
