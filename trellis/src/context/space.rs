//! Shared Space: a concurrent keyed scratchpad bound to one root request.
//!
//! Forked calls share the same Space. An agent's workspace is namespaced by
//! the `{agent_id}:` prefix so fan-out calls cannot collide on keys. The
//! `files_info` list append is serialized by a mutex; single-key writes rely
//! on the map's own concurrency guarantees.

use std::collections::HashMap;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

/// Key suffix for the file currently handed to a vision/audio sub-agent.
pub const CURRENT_FILE_KEY: &str = "current_file";
/// Key suffix for the list of file descriptors handed to a sub-agent.
pub const FILES_INFO_KEY: &str = "files_info";

/// Builds the agent-prefixed key `{agent_id}:{key}`.
pub fn agent_key(agent_id: &str, key: &str) -> String {
    format!("{}:{}", agent_id, key)
}

/// Concurrent keyed store associated with a request context.
#[derive(Debug, Default)]
pub struct Space {
    items: DashMap<String, Value>,
    files_lock: Mutex<()>,
}

impl Space {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.items.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.items.insert(key.into(), value);
    }

    pub fn delete(&self, key: &str) -> Option<Value> {
        self.items.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copies every key-value pair out of the space.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.items
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Replaces the space contents with a previously taken snapshot.
    pub fn restore(&self, snapshot: HashMap<String, Value>) {
        self.items.clear();
        for (k, v) in snapshot {
            self.items.insert(k, v);
        }
    }

    /// Appends a file descriptor to `{agent_id}:files_info`. Concurrent
    /// appends from forked calls are serialized.
    pub async fn push_file_info(&self, agent_id: &str, descriptor: Value) {
        let _guard = self.files_lock.lock().await;
        let key = agent_key(agent_id, FILES_INFO_KEY);
        let mut list = match self.items.get(&key).map(|v| v.clone()) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        list.push(descriptor);
        self.items.insert(key, Value::Array(list));
    }

    /// Removes the sub-agent file keys for one agent (both the current file
    /// and the accumulated list).
    pub fn clear_agent_files(&self, agent_id: &str) {
        self.items.remove(&agent_key(agent_id, CURRENT_FILE_KEY));
        self.items.remove(&agent_key(agent_id, FILES_INFO_KEY));
    }
}
