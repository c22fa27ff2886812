//! Message and content-part types.
//!
//! A [`Message`] is the currency of the content pipeline and the agent caller:
//! a role plus a list of [`Part`]s. Parts are a tagged five-variant enum; the
//! first three (`text`, `image_url`, `input_audio`) are model-compatible, the
//! last two (`file`, `data`) are extended shapes the pipeline rewrites before
//! dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// Image payload: a URL (remote, wrapper, or data URI).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Audio payload: base64 data plus detected format (e.g. "mp3", "wav").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputAudio {
    pub data: String,
    pub format: String,
}

/// Extended file payload: points at an attachment by URL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// One content part. Tag and payload field are mutually exclusive per variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    InputAudio { input_audio: InputAudio },
    File { file: FileRef },
    Data { data: Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        Part::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: None,
            },
        }
    }

    pub fn input_audio(data: impl Into<String>, format: impl Into<String>) -> Self {
        Part::InputAudio {
            input_audio: InputAudio {
                data: data.into(),
                format: format.into(),
            },
        }
    }

    pub fn file(url: impl Into<String>) -> Self {
        Part::File {
            file: FileRef {
                url: url.into(),
                name: None,
                content_type: None,
            },
        }
    }

    pub fn data(data: Value) -> Self {
        Part::Data { data }
    }

    /// True for the three part shapes an LLM can consume directly.
    pub fn is_model_compatible(&self) -> bool {
        matches!(
            self,
            Part::Text { .. } | Part::ImageUrl { .. } | Part::InputAudio { .. }
        )
    }

    /// Text body when this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// One message: role, optional speaker name, content parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            name: None,
            parts,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(text)])
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_serializes_with_type_tag() {
        let part = Part::text("hello");
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["text"], "hello");

        let part = Part::image_url("data:image/png;base64,AA==");
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "image_url");
        assert_eq!(value["image_url"]["url"], "data:image/png;base64,AA==");
    }

    #[test]
    fn part_roundtrips_all_variants() {
        let parts = vec![
            Part::text("t"),
            Part::image_url("__u://f1"),
            Part::input_audio("AAA=", "mp3"),
            Part::file("__u://f2"),
            Part::data(serde_json::json!({"source": "kb", "id": 3})),
        ];
        for part in parts {
            let json = serde_json::to_string(&part).unwrap();
            let back: Part = serde_json::from_str(&json).unwrap();
            assert_eq!(back, part);
        }
    }

    #[test]
    fn model_compatible_covers_first_three_variants() {
        assert!(Part::text("x").is_model_compatible());
        assert!(Part::image_url("u").is_model_compatible());
        assert!(Part::input_audio("d", "wav").is_model_compatible());
        assert!(!Part::file("u").is_model_compatible());
        assert!(!Part::data(Value::Null).is_model_compatible());
    }

    #[test]
    fn message_text_joins_text_parts() {
        let msg = Message::new(
            Role::User,
            vec![Part::text("a"), Part::image_url("u"), Part::text("b")],
        );
        assert_eq!(msg.text(), "ab");
    }
}
