//! Request context: identity, capability, shared space, streaming sink,
//! stack path, and cancellation.
//!
//! One [`Context`] is created per external request and exclusively owned by
//! the root call. [`Context::fork`] produces the context for a peer-agent
//! call: identity, capability, space, and cancellation are shared; the stack
//! and the streaming sink are independent, and the referer is stamped
//! [`Referer::AgentFork`].

pub mod space;

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::llm::{AgentCaller, ModelCapabilities};
use crate::stream::{EventSink, LogSink, NullSink};

pub use space::Space;

/// Identity of the request: who is talking, in which chat, for which tenant.
#[derive(Clone, Debug, Default)]
pub struct Identity {
    pub chat_id: Option<String>,
    pub user_id: Option<String>,
    pub team_id: Option<String>,
    pub tenant_id: Option<String>,
    pub assistant_id: Option<String>,
}

/// Marker distinguishing how a context came to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Referer {
    /// Root external request.
    #[default]
    Api,
    /// Forked for an orchestrated peer-agent call.
    AgentFork,
    /// Created for a delegate call.
    Delegate,
}

/// Response format the client asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AcceptFormat {
    #[default]
    Json,
    Sse,
    Text,
}

/// Capability descriptor: the agent-caller handle registered by the runtime
/// at startup, plus the selected model's multimodal capabilities.
#[derive(Clone, Default)]
pub struct Capability {
    pub caller: Option<Arc<dyn AgentCaller>>,
    pub model: ModelCapabilities,
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("caller", &self.caller.as_ref().map(|_| "<dyn AgentCaller>"))
            .field("model", &self.model)
            .finish()
    }
}

/// Per-request execution context.
pub struct Context {
    pub identity: Identity,
    pub request_id: String,
    pub locale: String,
    /// Client metadata (user agent, ip, app version).
    pub client: HashMap<String, String>,
    pub referer: Referer,
    pub accept: AcceptFormat,
    metadata: DashMap<String, Value>,
    space: Arc<Space>,
    sink: Arc<dyn EventSink>,
    capability: Capability,
    stack: Vec<String>,
    cancel: CancellationToken,
}

impl Context {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            request_id: uuid::Uuid::new_v4().to_string(),
            locale: "en-us".to_string(),
            client: HashMap::new(),
            referer: Referer::Api,
            accept: AcceptFormat::Json,
            metadata: DashMap::new(),
            space: Arc::new(Space::new()),
            sink: Arc::new(NullSink),
            capability: Capability::default(),
            stack: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_accept(mut self, accept: AcceptFormat) -> Self {
        self.accept = accept;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    pub fn with_client(mut self, client: HashMap<String, String>) -> Self {
        self.client = client;
        self
    }

    pub fn space(&self) -> &Arc<Space> {
        &self.space
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Mutable metadata bag.
    pub fn metadata_set(&self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn metadata_get(&self, key: &str) -> Option<Value> {
        self.metadata.get(key).map(|v| v.clone())
    }

    /// Pushes a call identifier onto the stack path.
    pub fn push_stack(&mut self, stack_id: impl Into<String>) {
        self.stack.push(stack_id.into());
    }

    /// Stack path of call identifiers, root first.
    pub fn stack_path(&self) -> &[String] {
        &self.stack
    }

    /// Forks this context for a peer-agent call.
    ///
    /// Identity, capability, space, and cancellation are shared; the fork
    /// owns a fresh stack and an independent logging sink, and carries the
    /// `AgentFork` referer so downstream bookkeeping can tell fan-out from
    /// delegate calls.
    pub fn fork(&self) -> Context {
        Context {
            identity: self.identity.clone(),
            request_id: self.request_id.clone(),
            locale: self.locale.clone(),
            client: self.client.clone(),
            referer: Referer::AgentFork,
            accept: self.accept,
            metadata: self
                .metadata
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            space: Arc::clone(&self.space),
            sink: Arc::new(LogSink::new(self.request_id.clone())),
            capability: self.capability.clone(),
            stack: Vec::new(),
            cancel: self.cancel.clone(),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("identity", &self.identity)
            .field("referer", &self.referer)
            .field("stack", &self.stack)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fork_shares_space_but_not_stack() {
        let mut ctx = Context::new(Identity {
            user_id: Some("u1".into()),
            ..Identity::default()
        });
        ctx.push_stack("root-1");

        let fork = ctx.fork();
        assert_eq!(fork.referer, Referer::AgentFork);
        assert!(fork.stack_path().is_empty());
        assert_eq!(ctx.stack_path(), &["root-1".to_string()]);

        // Writes through the fork are visible on the root space.
        fork.space().set("shared", json!(1));
        assert_eq!(ctx.space().get("shared"), Some(json!(1)));
    }

    #[test]
    fn fork_inherits_identity_and_capability() {
        let ctx = Context::new(Identity {
            chat_id: Some("c1".into()),
            ..Identity::default()
        })
        .with_capability(Capability {
            caller: None,
            model: ModelCapabilities {
                vision: crate::llm::VisionFormat::OpenAI,
                audio: crate::llm::AudioFormat::None,
            },
        });

        let fork = ctx.fork();
        assert_eq!(fork.identity.chat_id.as_deref(), Some("c1"));
        assert!(fork.capability().model.supports_vision());
    }

    #[test]
    fn cancel_propagates_to_forks() {
        let ctx = Context::new(Identity::default());
        let fork = ctx.fork();
        assert!(!fork.is_canceled());
        ctx.cancel_token().cancel();
        assert!(fork.is_canceled());
    }

    #[test]
    fn metadata_is_copied_not_shared_on_fork() {
        let ctx = Context::new(Identity::default());
        ctx.metadata_set("k", json!("v"));
        let fork = ctx.fork();
        fork.metadata_set("k", json!("changed"));
        assert_eq!(ctx.metadata_get("k"), Some(json!("v")));
        assert_eq!(fork.metadata_get("k"), Some(json!("changed")));
    }
}
