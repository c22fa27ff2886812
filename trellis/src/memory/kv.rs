//! Pluggable key-value driver behind the memory namespaces.
//!
//! The driver carries the full operation surface; namespaces only rewrite
//! keys through their prefix and fill in default TTLs. [`InMemoryKv`] is the
//! default driver: a concurrent map with lazy per-key expiry.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Errors from memory operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("not a list: {0}")]
    NotAList(String),
    #[error("not a number: {0}")]
    NotANumber(String),
    #[error("index out of range: {0}")]
    OutOfRange(String),
    #[error("storage: {0}")]
    Storage(String),
}

/// Boxed async loader for [`KvStore::get_set`].
pub type ValueLoader = Pin<Box<dyn Future<Output = Result<Value, MemoryError>> + Send>>;

/// Matches a key against a glob-style pattern (`*` matches any run).
pub fn pattern_match(pattern: &str, key: &str) -> bool {
    static CACHE: Lazy<DashMap<String, Regex>> = Lazy::new(DashMap::new);
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == key;
    }
    if let Some(re) = CACHE.get(pattern) {
        return re.is_match(key);
    }
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    match Regex::new(&format!("^{}$", escaped)) {
        Ok(re) => {
            let matched = re.is_match(key);
            CACHE.insert(pattern.to_string(), re);
            matched
        }
        Err(_) => false,
    }
}

/// Key-value store driver. Values are JSON; TTL `None` means no expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Stable identifier reported by namespace stats.
    fn store_id(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Value>, MemoryError>;
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>)
        -> Result<(), MemoryError>;
    async fn has(&self, key: &str) -> Result<bool, MemoryError>;
    async fn del(&self, key: &str) -> Result<(), MemoryError>;
    /// Keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, MemoryError>;
    /// Deletes keys matching a glob pattern; returns how many were removed.
    async fn clear(&self, pattern: &str) -> Result<usize, MemoryError>;

    /// Returns the current value or atomically computes and stores one.
    async fn get_set(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: ValueLoader,
    ) -> Result<Value, MemoryError>;
    /// Atomic read-and-delete.
    async fn get_del(&self, key: &str) -> Result<Option<Value>, MemoryError>;

    async fn get_multi(&self, keys: Vec<String>) -> Result<Vec<Option<Value>>, MemoryError>;
    async fn set_multi(
        &self,
        entries: Vec<(String, Value)>,
        ttl: Option<Duration>,
    ) -> Result<(), MemoryError>;
    async fn del_multi(&self, keys: Vec<String>) -> Result<(), MemoryError>;

    /// Adds `delta` to a numeric counter (missing counts start at zero).
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, MemoryError>;

    /// Appends values to a list; returns the new length.
    async fn push(
        &self,
        key: &str,
        values: Vec<Value>,
        ttl: Option<Duration>,
    ) -> Result<usize, MemoryError>;
    /// Removes and returns the element at `at` (negative counts from the end).
    async fn pop(&self, key: &str, at: i64) -> Result<Option<Value>, MemoryError>;
    /// Removes every element equal to `value`; returns how many were removed.
    async fn pull(&self, key: &str, value: &Value) -> Result<usize, MemoryError>;
    /// Removes every element equal to any of `values`.
    async fn pull_all(&self, key: &str, values: &[Value]) -> Result<usize, MemoryError>;
    /// Appends only values not already present; returns the new length.
    async fn add_to_set(
        &self,
        key: &str,
        values: Vec<Value>,
        ttl: Option<Duration>,
    ) -> Result<usize, MemoryError>;
    async fn array_len(&self, key: &str) -> Result<usize, MemoryError>;
    async fn array_get(&self, key: &str, index: i64) -> Result<Option<Value>, MemoryError>;
    async fn array_set(&self, key: &str, index: i64, value: Value) -> Result<(), MemoryError>;
    async fn array_slice(
        &self,
        key: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Value>, MemoryError>;
    async fn array_all(&self, key: &str) -> Result<Vec<Value>, MemoryError>;
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|t| Instant::now() < t).unwrap_or(true)
    }
}

/// In-memory driver. Not persistent; expiry is lazy (checked on access).
pub struct InMemoryKv {
    id: String,
    inner: DashMap<String, Entry>,
    /// Serializes get_set loaders so racing callers observe one computation.
    load_lock: tokio::sync::Mutex<()>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::with_id("inmemory")
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: DashMap::new(),
            load_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn read(&self, key: &str) -> Option<Value> {
        // The guard must drop before the expired-entry removal below.
        let (value, expired) = match self.inner.get(key) {
            Some(entry) if entry.live() => (Some(entry.value.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            self.inner.remove(key);
        }
        value
    }

    fn write(&self, key: &str, value: Value, ttl: Option<Duration>) {
        self.inner.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
    }

    fn read_list(&self, key: &str) -> Result<Vec<Value>, MemoryError> {
        match self.read(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(MemoryError::NotAList(key.to_string())),
        }
    }

    /// Preserves an existing entry's expiry when rewriting its value.
    fn rewrite(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let expires_at = self
            .inner
            .get(key)
            .filter(|e| e.live())
            .and_then(|e| e.expires_at)
            .or_else(|| ttl.map(|d| Instant::now() + d));
        self.inner.insert(key.to_string(), Entry { value, expires_at });
    }
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    if index >= 0 {
        let i = index as usize;
        (i < len).then_some(i)
    } else {
        let back = (-index) as usize;
        (back <= len).then(|| len - back)
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    fn store_id(&self) -> &str {
        &self.id
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, MemoryError> {
        Ok(self.read(key))
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), MemoryError> {
        self.write(key, value, ttl);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, MemoryError> {
        Ok(self.read(key).is_some())
    }

    async fn del(&self, key: &str) -> Result<(), MemoryError> {
        self.inner.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, MemoryError> {
        let mut keys: Vec<String> = self
            .inner
            .iter()
            .filter(|e| e.value().live() && pattern_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self, pattern: &str) -> Result<usize, MemoryError> {
        let keys = self.keys(pattern).await?;
        let count = keys.len();
        for key in keys {
            self.inner.remove(&key);
        }
        Ok(count)
    }

    async fn get_set(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: ValueLoader,
    ) -> Result<Value, MemoryError> {
        if let Some(value) = self.read(key) {
            return Ok(value);
        }
        let _guard = self.load_lock.lock().await;
        if let Some(value) = self.read(key) {
            return Ok(value);
        }
        let value = loader.await?;
        self.write(key, value.clone(), ttl);
        Ok(value)
    }

    async fn get_del(&self, key: &str) -> Result<Option<Value>, MemoryError> {
        match self.inner.remove(key) {
            Some((_, entry)) if entry.live() => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    async fn get_multi(&self, keys: Vec<String>) -> Result<Vec<Option<Value>>, MemoryError> {
        Ok(keys.iter().map(|k| self.read(k)).collect())
    }

    async fn set_multi(
        &self,
        entries: Vec<(String, Value)>,
        ttl: Option<Duration>,
    ) -> Result<(), MemoryError> {
        for (key, value) in entries {
            self.write(&key, value, ttl);
        }
        Ok(())
    }

    async fn del_multi(&self, keys: Vec<String>) -> Result<(), MemoryError> {
        for key in keys {
            self.inner.remove(&key);
        }
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, MemoryError> {
        use dashmap::mapref::entry::Entry as MapEntry;
        // Entry API keeps racing increments atomic.
        match self.inner.entry(key.to_string()) {
            MapEntry::Vacant(slot) => {
                slot.insert(Entry {
                    value: Value::from(delta),
                    expires_at: None,
                });
                Ok(delta)
            }
            MapEntry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if !entry.live() {
                    entry.value = Value::from(delta);
                    entry.expires_at = None;
                    return Ok(delta);
                }
                let current = entry
                    .value
                    .as_i64()
                    .ok_or_else(|| MemoryError::NotANumber(key.to_string()))?;
                let next = current + delta;
                entry.value = Value::from(next);
                Ok(next)
            }
        }
    }

    async fn push(
        &self,
        key: &str,
        values: Vec<Value>,
        ttl: Option<Duration>,
    ) -> Result<usize, MemoryError> {
        let mut list = self.read_list(key)?;
        list.extend(values);
        let len = list.len();
        self.rewrite(key, Value::Array(list), ttl);
        Ok(len)
    }

    async fn pop(&self, key: &str, at: i64) -> Result<Option<Value>, MemoryError> {
        let mut list = self.read_list(key)?;
        let Some(index) = normalize_index(at, list.len()) else {
            return Ok(None);
        };
        let value = list.remove(index);
        self.rewrite(key, Value::Array(list), None);
        Ok(Some(value))
    }

    async fn pull(&self, key: &str, value: &Value) -> Result<usize, MemoryError> {
        let mut list = self.read_list(key)?;
        let before = list.len();
        list.retain(|v| v != value);
        let removed = before - list.len();
        self.rewrite(key, Value::Array(list), None);
        Ok(removed)
    }

    async fn pull_all(&self, key: &str, values: &[Value]) -> Result<usize, MemoryError> {
        let mut list = self.read_list(key)?;
        let before = list.len();
        list.retain(|v| !values.contains(v));
        let removed = before - list.len();
        self.rewrite(key, Value::Array(list), None);
        Ok(removed)
    }

    async fn add_to_set(
        &self,
        key: &str,
        values: Vec<Value>,
        ttl: Option<Duration>,
    ) -> Result<usize, MemoryError> {
        let mut list = self.read_list(key)?;
        for value in values {
            if !list.contains(&value) {
                list.push(value);
            }
        }
        let len = list.len();
        self.rewrite(key, Value::Array(list), ttl);
        Ok(len)
    }

    async fn array_len(&self, key: &str) -> Result<usize, MemoryError> {
        Ok(self.read_list(key)?.len())
    }

    async fn array_get(&self, key: &str, index: i64) -> Result<Option<Value>, MemoryError> {
        let list = self.read_list(key)?;
        Ok(normalize_index(index, list.len()).map(|i| list[i].clone()))
    }

    async fn array_set(&self, key: &str, index: i64, value: Value) -> Result<(), MemoryError> {
        let mut list = self.read_list(key)?;
        let i = normalize_index(index, list.len())
            .ok_or_else(|| MemoryError::OutOfRange(format!("{}[{}]", key, index)))?;
        list[i] = value;
        self.rewrite(key, Value::Array(list), None);
        Ok(())
    }

    async fn array_slice(
        &self,
        key: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Value>, MemoryError> {
        let list = self.read_list(key)?;
        Ok(list.into_iter().skip(skip).take(limit).collect())
    }

    async fn array_all(&self, key: &str) -> Result<Vec<Value>, MemoryError> {
        self.read_list(key)
    }
}
