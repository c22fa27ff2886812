//! LLM collaborator seam: capability descriptor, the [`AgentCaller`] trait,
//! and the response shape consulted by the runtime.
//!
//! The wire protocol (chunk decoding, tool-call deltas) lives outside this
//! crate; the runtime only consumes `completion.content` and the optional
//! `next` override, and only consults the vision/audio format selectors when
//! rewriting content parts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::Context;
use crate::message::Message;

/// Vision wire-format selector for a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionFormat {
    #[serde(rename = "openai")]
    OpenAI,
    Claude,
    Default,
    #[default]
    None,
}

impl VisionFormat {
    pub fn supported(&self) -> bool {
        !matches!(self, VisionFormat::None)
    }
}

/// Audio wire-format selector for a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Default,
    #[default]
    None,
}

impl AudioFormat {
    pub fn supported(&self) -> bool {
        !matches!(self, AudioFormat::None)
    }
}

/// Declared multimodal capabilities of the selected model.
///
/// **Interaction**: The content pipeline consults only these selectors when
/// deciding whether an image or audio part can pass through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    #[serde(default)]
    pub vision: VisionFormat,
    #[serde(default)]
    pub audio: AudioFormat,
}

impl ModelCapabilities {
    pub fn supports_vision(&self) -> bool {
        self.vision.supported()
    }

    pub fn supports_audio(&self) -> bool {
        self.audio.supported()
    }
}

/// Options for one streamed call.
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    /// Connector identifier; `None` selects the assistant's default.
    pub connector: Option<String>,
    /// Do not load or persist chat history for this call.
    pub skip_history: bool,
    /// Do not emit output events for this call.
    pub skip_output: bool,
}

/// One typed part of a completion content sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Completion content: either a bare string or a sequence of typed parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionContent {
    Text(String),
    Parts(Vec<CompletionPart>),
}

impl CompletionContent {
    /// Plain text: the string itself, or text-typed entries concatenated.
    pub fn text(&self) -> String {
        match self {
            CompletionContent::Text(s) => s.clone(),
            CompletionContent::Parts(parts) => parts
                .iter()
                .filter(|p| p.kind == "text")
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Standard LLM completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: CompletionContent,
}

/// Response from a peer-agent call.
///
/// `next` is a custom hook override of any shape; when present it wins over
/// the standard completion.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CallResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Value>,
}

impl CallResponse {
    /// Extracts the textual output of a call.
    ///
    /// Prefers `next` (serialized verbatim when it is not a string) over
    /// `completion.content`.
    pub fn output_text(&self) -> Option<String> {
        if let Some(next) = &self.next {
            return Some(match next {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        self.completion.as_ref().map(|c| c.content.text())
    }
}

/// Errors from the agent caller.
#[derive(Debug, Error)]
pub enum CallerError {
    #[error("agent not found: {0}")]
    NotFound(String),
    #[error("call canceled")]
    Canceled,
    #[error("transport: {0}")]
    Transport(String),
    #[error("caller: {0}")]
    Other(String),
}

/// The capability handle the agent runtime registers at startup: stream one
/// call to a peer agent and return its response.
///
/// **Interaction**: Carried on the request [`Context`]; invoked by the
/// orchestrator for fan-out and by the content pipeline for vision/audio
/// sub-agents.
#[async_trait]
pub trait AgentCaller: Send + Sync {
    async fn stream(
        &self,
        ctx: &Context,
        agent_id: &str,
        messages: Vec<Message>,
        options: StreamOptions,
    ) -> Result<CallResponse, CallerError>;
}

/// Fixed-response caller for tests: returns canned responses per agent id
/// and records every call it receives.
pub struct MockCaller {
    responses: std::sync::Mutex<std::collections::HashMap<String, CallResponse>>,
    calls: std::sync::Mutex<Vec<(String, Vec<Message>)>>,
    default_text: String,
}

impl MockCaller {
    pub fn new(default_text: impl Into<String>) -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::HashMap::new()),
            calls: std::sync::Mutex::new(Vec::new()),
            default_text: default_text.into(),
        }
    }

    /// Sets a canned response for one agent id.
    pub fn respond(&self, agent_id: impl Into<String>, response: CallResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(agent_id.into(), response);
    }

    /// Calls recorded so far: (agent_id, messages).
    pub fn calls(&self) -> Vec<(String, Vec<Message>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentCaller for MockCaller {
    async fn stream(
        &self,
        _ctx: &Context,
        agent_id: &str,
        messages: Vec<Message>,
        _options: StreamOptions,
    ) -> Result<CallResponse, CallerError> {
        self.calls
            .lock()
            .unwrap()
            .push((agent_id.to_string(), messages));
        if let Some(resp) = self.responses.lock().unwrap().get(agent_id) {
            return Ok(resp.clone());
        }
        Ok(CallResponse {
            completion: Some(Completion {
                content: CompletionContent::Text(self.default_text.clone()),
            }),
            next: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_text_prefers_next_over_completion() {
        let resp = CallResponse {
            completion: Some(Completion {
                content: CompletionContent::Text("standard".into()),
            }),
            next: Some(json!("override")),
        };
        assert_eq!(resp.output_text().unwrap(), "override");
    }

    #[test]
    fn output_text_serializes_non_string_next_verbatim() {
        let resp = CallResponse {
            completion: None,
            next: Some(json!({"answer": 42})),
        };
        assert_eq!(resp.output_text().unwrap(), r#"{"answer":42}"#);
    }

    #[test]
    fn output_text_concatenates_text_typed_parts() {
        let resp = CallResponse {
            completion: Some(Completion {
                content: CompletionContent::Parts(vec![
                    CompletionPart {
                        kind: "text".into(),
                        text: Some("a".into()),
                    },
                    CompletionPart {
                        kind: "image".into(),
                        text: Some("skipped".into()),
                    },
                    CompletionPart {
                        kind: "text".into(),
                        text: Some("b".into()),
                    },
                ]),
            }),
            next: None,
        };
        assert_eq!(resp.output_text().unwrap(), "ab");
    }

    #[test]
    fn completion_content_accepts_string_or_parts_json() {
        let text: CompletionContent = serde_json::from_value(json!("hi")).unwrap();
        assert_eq!(text.text(), "hi");

        let parts: CompletionContent =
            serde_json::from_value(json!([{"type": "text", "text": "yo"}])).unwrap();
        assert_eq!(parts.text(), "yo");
    }

    #[test]
    fn capabilities_default_to_unsupported() {
        let caps = ModelCapabilities::default();
        assert!(!caps.supports_vision());
        assert!(!caps.supports_audio());
        let caps = ModelCapabilities {
            vision: VisionFormat::OpenAI,
            audio: AudioFormat::Default,
        };
        assert!(caps.supports_vision());
        assert!(caps.supports_audio());
    }
}
