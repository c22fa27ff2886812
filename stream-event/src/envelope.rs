//! Envelope (request_id, agent_id, event_id) stamped onto each event.
//! EnvelopeState tracks the current agent span and injects the envelope.

use crate::event::AgentEvent;
use serde_json::Value;

/// Envelope fields recommended for each message.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Request ID; constant within a request.
    pub request_id: Option<String>,
    /// Agent span for the current event (root assistant or a forked peer).
    pub agent_id: Option<String>,
    /// Per-message sequence number; monotonically increasing within a stream.
    pub event_id: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    pub fn with_event_id(mut self, id: u64) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.request_id {
            obj.entry("request_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref id) = self.agent_id {
            obj.entry("agent_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(id) = self.event_id {
            obj.entry("event_id")
                .or_insert_with(|| Value::Number(serde_json::Number::from(id)));
        }
    }
}

/// Envelope state for one stream: request_id, current agent span, next event_id.
pub struct EnvelopeState {
    pub request_id: String,
    pub current_agent_id: String,
    pub next_event_id: u64,
}

impl EnvelopeState {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            current_agent_id: String::new(),
            next_event_id: 1,
        }
    }

    /// Injects the envelope into the event value and advances state.
    /// On `type == "agent_call"`, updates current_agent_id from the event's `agent_id`.
    pub fn inject_into(&mut self, value: &mut Value) {
        if let Some(t) = value.get("type").and_then(|v| v.as_str()) {
            if t == "agent_call" {
                let id = value.get("agent_id").and_then(|v| v.as_str()).unwrap_or("");
                self.current_agent_id = id.to_string();
            }
        }
        let mut env = Envelope::new()
            .with_request_id(&self.request_id)
            .with_event_id(self.next_event_id);
        if !self.current_agent_id.is_empty() {
            env = env.with_agent_id(self.current_agent_id.as_str());
        }
        self.next_event_id += 1;
        env.inject_into(value);
    }
}

/// Converts an agent event to JSON and injects the envelope using the given state.
/// Returns the final value (type + payload + request_id, agent_id, event_id).
pub fn to_json(event: &AgentEvent, state: &mut EnvelopeState) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}
