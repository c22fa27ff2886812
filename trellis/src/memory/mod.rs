//! Memory namespaces: a four-scope keyed-value overlay with TTL, list/set
//! operations, prefix isolation, and statistics, over a pluggable KV driver.
//!
//! A [`Namespace`] reads and writes only keys carrying its `{space}:{id}:`
//! prefix; `keys` and `len` take patterns relative to the namespace, never
//! the global store. Per-scope default TTLs: user/team never expire, chat
//! expires in 24h, context in 30m. Passing `ttl: None` at a call site means
//! "use the namespace default".

pub mod kv;
pub mod manager;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

pub use kv::{InMemoryKv, KvStore, MemoryError, ValueLoader};
pub use manager::{global_manager, Manager};

/// Default TTL for chat-scoped memory.
const CHAT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default TTL for context-scoped memory.
const CONTEXT_TTL: Duration = Duration::from_secs(30 * 60);

/// The four memory scopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    User,
    Team,
    Chat,
    Context,
}

impl MemorySpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySpace::User => "user",
            MemorySpace::Team => "team",
            MemorySpace::Chat => "chat",
            MemorySpace::Context => "context",
        }
    }

    /// Scope default TTL; `None` means entries never expire.
    pub fn default_ttl(&self) -> Option<Duration> {
        match self {
            MemorySpace::User | MemorySpace::Team => None,
            MemorySpace::Chat => Some(CHAT_TTL),
            MemorySpace::Context => Some(CONTEXT_TTL),
        }
    }
}

/// Statistics for one namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct NamespaceStats {
    pub space: String,
    pub id: String,
    pub key_count: usize,
    pub store_id: String,
}

/// A prefix-isolated view of a KV store scoped to a `(space, id)` pair.
pub struct Namespace {
    space: MemorySpace,
    id: String,
    prefix: String,
    default_ttl: Option<Duration>,
    store: Arc<dyn KvStore>,
}

impl Namespace {
    pub fn new(space: MemorySpace, id: impl Into<String>, store: Arc<dyn KvStore>) -> Self {
        let id = id.into();
        let prefix = format!("{}:{}:", space.as_str(), id);
        Self {
            space,
            id,
            prefix,
            default_ttl: space.default_ttl(),
            store,
        }
    }

    pub fn space(&self) -> MemorySpace {
        self.space
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn strip<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.prefix).unwrap_or(key)
    }

    fn ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.or(self.default_ttl)
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, MemoryError> {
        self.store.get(&self.key(key)).await
    }

    pub async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), MemoryError> {
        self.store.set(&self.key(key), value, self.ttl(ttl)).await
    }

    pub async fn has(&self, key: &str) -> Result<bool, MemoryError> {
        self.store.has(&self.key(key)).await
    }

    pub async fn del(&self, key: &str) -> Result<(), MemoryError> {
        self.store.del(&self.key(key)).await
    }

    /// Keys matching `{prefix}{pattern}`, returned without the prefix.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, MemoryError> {
        let keys = self.store.keys(&self.key(pattern)).await?;
        Ok(keys.iter().map(|k| self.strip(k).to_string()).collect())
    }

    /// Number of keys matching `{prefix}{pattern}`.
    pub async fn len(&self, pattern: &str) -> Result<usize, MemoryError> {
        Ok(self.store.keys(&self.key(pattern)).await?.len())
    }

    /// Deletes keys matching `{prefix}{pattern}`.
    pub async fn clear(&self, pattern: &str) -> Result<usize, MemoryError> {
        self.store.clear(&self.key(pattern)).await
    }

    /// Returns the current value or atomically computes and stores one.
    pub async fn get_set<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<Value, MemoryError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<Value, MemoryError>> + Send + 'static,
    {
        self.store
            .get_set(&self.key(key), self.ttl(ttl), Box::pin(loader()))
            .await
    }

    pub async fn get_del(&self, key: &str) -> Result<Option<Value>, MemoryError> {
        self.store.get_del(&self.key(key)).await
    }

    pub async fn get_multi(&self, keys: &[&str]) -> Result<Vec<Option<Value>>, MemoryError> {
        let keys = keys.iter().map(|k| self.key(k)).collect();
        self.store.get_multi(keys).await
    }

    pub async fn set_multi(
        &self,
        entries: Vec<(String, Value)>,
        ttl: Option<Duration>,
    ) -> Result<(), MemoryError> {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (self.key(&k), v))
            .collect();
        self.store.set_multi(entries, self.ttl(ttl)).await
    }

    pub async fn del_multi(&self, keys: &[&str]) -> Result<(), MemoryError> {
        let keys = keys.iter().map(|k| self.key(k)).collect();
        self.store.del_multi(keys).await
    }

    /// Batch get-or-load: resolves each key, loading and storing the missing
    /// ones through `loader(key)`.
    pub async fn get_set_multi<F>(
        &self,
        keys: &[&str],
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<Vec<Value>, MemoryError>
    where
        F: Fn(&str) -> Result<Value, MemoryError> + Send + Sync,
    {
        let current = self.get_multi(keys).await?;
        let mut out = Vec::with_capacity(keys.len());
        let mut to_store = Vec::new();
        for (key, value) in keys.iter().zip(current) {
            match value {
                Some(v) => out.push(v),
                None => {
                    let v = loader(key)?;
                    to_store.push((key.to_string(), v.clone()));
                    out.push(v);
                }
            }
        }
        if !to_store.is_empty() {
            self.set_multi(to_store, ttl).await?;
        }
        Ok(out)
    }

    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64, MemoryError> {
        self.store.incr(&self.key(key), delta).await
    }

    pub async fn decr(&self, key: &str, delta: i64) -> Result<i64, MemoryError> {
        self.store.incr(&self.key(key), -delta).await
    }

    pub async fn push(&self, key: &str, values: Vec<Value>) -> Result<usize, MemoryError> {
        self.store
            .push(&self.key(key), values, self.default_ttl)
            .await
    }

    pub async fn pop(&self, key: &str, at: i64) -> Result<Option<Value>, MemoryError> {
        self.store.pop(&self.key(key), at).await
    }

    pub async fn pull(&self, key: &str, value: &Value) -> Result<usize, MemoryError> {
        self.store.pull(&self.key(key), value).await
    }

    pub async fn pull_all(&self, key: &str, values: &[Value]) -> Result<usize, MemoryError> {
        self.store.pull_all(&self.key(key), values).await
    }

    pub async fn add_to_set(&self, key: &str, values: Vec<Value>) -> Result<usize, MemoryError> {
        self.store
            .add_to_set(&self.key(key), values, self.default_ttl)
            .await
    }

    pub async fn array_len(&self, key: &str) -> Result<usize, MemoryError> {
        self.store.array_len(&self.key(key)).await
    }

    pub async fn array_get(&self, key: &str, index: i64) -> Result<Option<Value>, MemoryError> {
        self.store.array_get(&self.key(key), index).await
    }

    pub async fn array_set(
        &self,
        key: &str,
        index: i64,
        value: Value,
    ) -> Result<(), MemoryError> {
        self.store.array_set(&self.key(key), index, value).await
    }

    pub async fn array_slice(
        &self,
        key: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Value>, MemoryError> {
        self.store.array_slice(&self.key(key), skip, limit).await
    }

    /// 1-based page over a list.
    pub async fn array_page(
        &self,
        key: &str,
        page: usize,
        size: usize,
    ) -> Result<Vec<Value>, MemoryError> {
        let page = page.max(1);
        self.array_slice(key, (page - 1) * size, size).await
    }

    pub async fn array_all(&self, key: &str) -> Result<Vec<Value>, MemoryError> {
        self.store.array_all(&self.key(key)).await
    }

    /// Every key→value pair in the namespace, keys unprefixed.
    pub async fn snapshot(&self) -> Result<HashMap<String, Value>, MemoryError> {
        let keys = self.store.keys(&self.key("*")).await?;
        let values = self.store.get_multi(keys.clone()).await?;
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(k, v)| v.map(|v| (self.strip(&k).to_string(), v)))
            .collect())
    }

    /// Writes a snapshot back into the namespace.
    pub async fn restore(&self, snapshot: HashMap<String, Value>) -> Result<(), MemoryError> {
        self.set_multi(snapshot.into_iter().collect(), None).await
    }

    pub async fn stats(&self) -> Result<NamespaceStats, MemoryError> {
        Ok(NamespaceStats {
            space: self.space.as_str().to_string(),
            id: self.id.clone(),
            key_count: self.len("*").await?,
            store_id: self.store.store_id().to_string(),
        })
    }
}

/// The four namespaces for one identity tuple.
pub struct Memory {
    pub user: Namespace,
    pub team: Namespace,
    pub chat: Namespace,
    pub context: Namespace,
}

impl Memory {
    pub fn new(
        user_id: &str,
        team_id: &str,
        chat_id: &str,
        context_id: &str,
        store: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            user: Namespace::new(MemorySpace::User, user_id, Arc::clone(&store)),
            team: Namespace::new(MemorySpace::Team, team_id, Arc::clone(&store)),
            chat: Namespace::new(MemorySpace::Chat, chat_id, Arc::clone(&store)),
            context: Namespace::new(MemorySpace::Context, context_id, store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns(space: MemorySpace) -> Namespace {
        Namespace::new(space, "id1", Arc::new(InMemoryKv::new()))
    }

    /// **Scenario**: set then get returns the value; set, del, has is false.
    #[tokio::test]
    async fn set_get_del_roundtrip() {
        let memory = ns(MemorySpace::User);
        memory.set("k", json!("v"), None).await.unwrap();
        assert_eq!(memory.get("k").await.unwrap(), Some(json!("v")));
        memory.del("k").await.unwrap();
        assert!(!memory.has("k").await.unwrap());
    }

    /// **Scenario**: namespaces with different ids on one store are isolated.
    #[tokio::test]
    async fn prefix_isolates_namespaces() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let a = Namespace::new(MemorySpace::Chat, "c1", Arc::clone(&store));
        let b = Namespace::new(MemorySpace::Chat, "c2", Arc::clone(&store));
        let c = Namespace::new(MemorySpace::User, "c1", store);

        a.set("k", json!(1), None).await.unwrap();
        assert!(b.get("k").await.unwrap().is_none());
        assert!(c.get("k").await.unwrap().is_none());
        assert_eq!(a.get("k").await.unwrap(), Some(json!(1)));
    }

    /// **Scenario**: keys/len patterns are namespace-relative.
    #[tokio::test]
    async fn keys_and_len_are_relative() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let memory = Namespace::new(MemorySpace::User, "u1", Arc::clone(&store));
        let other = Namespace::new(MemorySpace::User, "u2", store);

        memory.set("pref:a", json!(1), None).await.unwrap();
        memory.set("pref:b", json!(2), None).await.unwrap();
        memory.set("misc", json!(3), None).await.unwrap();
        other.set("pref:x", json!(4), None).await.unwrap();

        assert_eq!(memory.keys("pref:*").await.unwrap(), vec!["pref:a", "pref:b"]);
        assert_eq!(memory.len("pref:*").await.unwrap(), 2);
        assert_eq!(memory.len("*").await.unwrap(), 3);

        memory.clear("pref:*").await.unwrap();
        assert_eq!(memory.len("*").await.unwrap(), 1);
        assert_eq!(other.len("*").await.unwrap(), 1);
    }

    /// **Scenario**: get_set computes once, then serves the stored value.
    #[tokio::test]
    async fn get_set_loads_on_miss() {
        let memory = ns(MemorySpace::User);
        let value = memory
            .get_set("k", None, || async { Ok(json!(7)) })
            .await
            .unwrap();
        assert_eq!(value, json!(7));
        let value = memory
            .get_set("k", None, || async { Ok(json!(8)) })
            .await
            .unwrap();
        assert_eq!(value, json!(7));
    }

    #[tokio::test]
    async fn multi_ops_rewrite_prefixes() {
        let memory = ns(MemorySpace::Team);
        memory
            .set_multi(vec![("a".into(), json!(1)), ("b".into(), json!(2))], None)
            .await
            .unwrap();
        let values = memory.get_multi(&["a", "b", "c"]).await.unwrap();
        assert_eq!(values, vec![Some(json!(1)), Some(json!(2)), None]);

        let loaded = memory
            .get_set_multi(&["b", "c"], None, |_| Ok(json!("loaded")))
            .await
            .unwrap();
        assert_eq!(loaded, vec![json!(2), json!("loaded")]);
        assert_eq!(memory.get("c").await.unwrap(), Some(json!("loaded")));

        memory.del_multi(&["a", "b", "c"]).await.unwrap();
        assert_eq!(memory.len("*").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counters_and_lists() {
        let memory = ns(MemorySpace::Chat);
        assert_eq!(memory.incr("n", 5).await.unwrap(), 5);
        assert_eq!(memory.decr("n", 2).await.unwrap(), 3);

        memory.push("l", vec![json!("a"), json!("b")]).await.unwrap();
        memory.add_to_set("l", vec![json!("a"), json!("c")]).await.unwrap();
        assert_eq!(memory.array_len("l").await.unwrap(), 3);
        assert_eq!(
            memory.array_page("l", 2, 2).await.unwrap(),
            vec![json!("c")]
        );
        assert_eq!(memory.pop("l", 0).await.unwrap(), Some(json!("a")));
        memory.pull("l", &json!("b")).await.unwrap();
        assert_eq!(memory.array_all("l").await.unwrap(), vec![json!("c")]);
    }

    /// **Scenario**: snapshot then restore preserves all pairs.
    #[tokio::test]
    async fn snapshot_restore_roundtrip() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let memory = Namespace::new(MemorySpace::Context, "ctx1", Arc::clone(&store));
        memory.set("a", json!(1), None).await.unwrap();
        memory.set("b", json!({"x": true}), None).await.unwrap();

        let snap = memory.snapshot().await.unwrap();
        assert_eq!(snap.len(), 2);

        memory.clear("*").await.unwrap();
        assert_eq!(memory.len("*").await.unwrap(), 0);

        memory.restore(snap).await.unwrap();
        assert_eq!(memory.get("a").await.unwrap(), Some(json!(1)));
        assert_eq!(memory.get("b").await.unwrap(), Some(json!({"x": true})));
    }

    #[tokio::test]
    async fn stats_reports_space_and_count() {
        let memory = ns(MemorySpace::User);
        memory.set("a", json!(1), None).await.unwrap();
        let stats = memory.stats().await.unwrap();
        assert_eq!(stats.space, "user");
        assert_eq!(stats.id, "id1");
        assert_eq!(stats.key_count, 1);
        assert_eq!(stats.store_id, "inmemory");
    }

    #[test]
    fn scope_ttls() {
        assert!(MemorySpace::User.default_ttl().is_none());
        assert!(MemorySpace::Team.default_ttl().is_none());
        assert_eq!(
            MemorySpace::Chat.default_ttl(),
            Some(Duration::from_secs(86400))
        );
        assert_eq!(
            MemorySpace::Context.default_ttl(),
            Some(Duration::from_secs(1800))
        );
    }
}
