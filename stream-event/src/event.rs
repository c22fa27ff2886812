//! Protocol-level event types (type + payload).
//! Payload-carrying variants use `serde_json::Value` where the shape is open.

use serde::Serialize;
use serde_json::Value;

/// Protocol event: wire shape for one stream event (type + payload).
/// The envelope (request_id, agent_id, event_id) is applied separately.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental assistant output.
    MessageChunk { content: String, id: String },
    /// A file is being fetched or converted by the content pipeline.
    Loading {
        file: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        done: bool,
    },
    /// An external tool-server call is in flight.
    ToolCall { server: String, tool: String },
    /// A peer-agent call started (orchestrated fan-out).
    AgentCall { agent_id: String },
    /// Terminal error for the stream; everything before was best-effort.
    Error { message: String },
    /// Stream finished for the given request.
    Done { request_id: String },
    /// Open payload for runtime-specific events.
    Custom { value: Value },
}

impl AgentEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
