//! Process-wide memory manager.
//!
//! Caches one [`Memory`] per `user:team:chat:context` composite key and
//! returns the same instance on subsequent requests with the same tuple.
//! Creation uses compare-and-set semantics: two requests racing on the same
//! tuple both receive the first instance created.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::memory::{InMemoryKv, KvStore, Memory};

/// Cache of memory bundles keyed by identity tuple.
pub struct Manager {
    store: Arc<dyn KvStore>,
    cache: DashMap<String, Arc<Memory>>,
}

impl Manager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    fn composite_key(user_id: &str, team_id: &str, chat_id: &str, context_id: &str) -> String {
        format!("{}:{}:{}:{}", user_id, team_id, chat_id, context_id)
    }

    /// Returns the memory bundle for the tuple, creating it on first use.
    pub fn get(
        &self,
        user_id: &str,
        team_id: &str,
        chat_id: &str,
        context_id: &str,
    ) -> Arc<Memory> {
        let key = Self::composite_key(user_id, team_id, chat_id, context_id);
        self.cache
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Memory::new(
                    user_id,
                    team_id,
                    chat_id,
                    context_id,
                    Arc::clone(&self.store),
                ))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drops every cached instance. Test hook.
    pub fn reset(&self) {
        self.cache.clear();
    }
}

static GLOBAL: Lazy<Manager> = Lazy::new(|| Manager::new(Arc::new(InMemoryKv::new())));

/// The lazily created process-wide manager.
pub fn global_manager() -> &'static Manager {
    &GLOBAL
}
