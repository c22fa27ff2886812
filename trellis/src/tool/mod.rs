//! External tool-server seam: the [`ToolClient`] contract, the process-wide
//! server registry, and the MCP server binding config used by the assistant
//! catalog.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Errors from tool-server calls.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool server not found: {0}")]
    ServerNotFound(String),
    #[error("tool failed: {0}")]
    CallFailed(String),
    #[error("transport: {0}")]
    Transport(String),
}

/// One content part returned by a tool call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            data: None,
        }
    }
}

/// Concatenates the text-typed entries of a tool result.
pub fn content_text(parts: &[ToolContent]) -> String {
    parts
        .iter()
        .filter(|p| p.kind == "text")
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Client for one tool server.
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Calls a tool; returns content parts and an error flag.
    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<(Vec<ToolContent>, bool), ToolError>;
}

static SERVERS: Lazy<RwLock<HashMap<String, Arc<dyn ToolClient>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a tool server. Registration happens at startup, before the
/// first request.
pub fn register_tool_server(server_id: impl Into<String>, client: Arc<dyn ToolClient>) {
    SERVERS.write().unwrap().insert(server_id.into(), client);
}

/// Selects a registered tool server by id.
pub fn select(server_id: &str) -> Result<Arc<dyn ToolClient>, ToolError> {
    SERVERS
        .read()
        .unwrap()
        .get(server_id)
        .cloned()
        .ok_or_else(|| ToolError::ServerNotFound(server_id.to_string()))
}

/// Clears the registry. Test hook.
pub fn reset_tool_servers() {
    SERVERS.write().unwrap().clear();
}

/// MCP server binding on an assistant.
///
/// Serializes as a bare server-id string when only the id is set, otherwise
/// as an object carrying the tool/resource filters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct McpServerConfig {
    pub server_id: String,
    pub tools: Option<Vec<String>>,
    pub resources: Option<Vec<String>>,
}

impl McpServerConfig {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            tools: None,
            resources: None,
        }
    }
}

impl Serialize for McpServerConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.tools.is_none() && self.resources.is_none() {
            return serializer.serialize_str(&self.server_id);
        }
        let mut map = serde_json::Map::new();
        map.insert("server_id".into(), Value::String(self.server_id.clone()));
        if let Some(tools) = &self.tools {
            map.insert(
                "tools".into(),
                Value::Array(tools.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(resources) = &self.resources {
            map.insert(
                "resources".into(),
                Value::Array(resources.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(map).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for McpServerConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(server_id) => Ok(McpServerConfig::new(server_id)),
            Value::Object(map) => {
                let server_id = map
                    .get("server_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| D::Error::custom("mcp config object missing server_id"))?
                    .to_string();
                let list = |key: &str| -> Option<Vec<String>> {
                    map.get(key).and_then(|v| v.as_array()).map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                };
                Ok(McpServerConfig {
                    server_id,
                    tools: list("tools"),
                    resources: list("resources"),
                })
            }
            other => Err(D::Error::custom(format!(
                "mcp config must be string or object, got {}",
                other
            ))),
        }
    }
}

/// Scripted tool client for tests: maps tool name to a fixed text reply.
pub struct MockToolClient {
    replies: RwLock<HashMap<String, String>>,
    pub fail: bool,
}

impl MockToolClient {
    pub fn new() -> Self {
        Self {
            replies: RwLock::new(HashMap::new()),
            fail: false,
        }
    }

    pub fn reply(self, tool: impl Into<String>, text: impl Into<String>) -> Self {
        self.replies.write().unwrap().insert(tool.into(), text.into());
        self
    }
}

impl Default for MockToolClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolClient for MockToolClient {
    async fn call_tool(
        &self,
        tool_name: &str,
        _arguments: Value,
    ) -> Result<(Vec<ToolContent>, bool), ToolError> {
        if self.fail {
            return Ok((vec![ToolContent::text("tool failed")], true));
        }
        let reply = self
            .replies
            .read()
            .unwrap()
            .get(tool_name)
            .cloned()
            .unwrap_or_else(|| format!("{}: ok", tool_name));
        Ok((vec![ToolContent::text(reply)], false))
    }
}
