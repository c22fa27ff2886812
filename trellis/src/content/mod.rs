//! Content pipeline: rewrites extended message parts into model-compatible
//! ones, honoring the model's declared multimodal capabilities.
//!
//! Every part is processed independently; a failing part degrades to a
//! textual placeholder (images) or passes through unchanged (everything
//! else), and the message list shape is preserved. [`vision`] never fails a
//! request because of one bad part.
//!
//! Extracted text goes through a three-tier cache: an in-memory map scoped
//! to the call, the attachment gateway's text store, and the full conversion
//! with a best-effort write-back.

pub mod pdf;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::attachment::{
    file_manager, filetype, resolve_source, AttachmentError, ContentSource, FileType,
};
use crate::context::space::{agent_key, CURRENT_FILE_KEY};
use crate::context::Context;
use crate::llm::{CallerError, ModelCapabilities, StreamOptions};
use crate::message::{FileRef, Message, Part, Role};
use crate::tool::{self, content_text, ToolError};
use stream_event::AgentEvent;

/// Placeholder substituted for an image part that could not be processed.
pub const IMAGE_FAILED_PLACEHOLDER: &str = "[image could not be processed]";

/// Tool names invoked on an `mcp:` delegate.
const DESCRIBE_IMAGE_TOOL: &str = "describe_image";
const TRANSCRIBE_AUDIO_TOOL: &str = "transcribe_audio";

/// Errors from the content pipeline. Callers degrade these per part; they
/// never abort a whole `vision` call.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no vision tool specified")]
    NoVisionTool,
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("unknown content type: {0}")]
    UnknownContentType(String),
    #[error("fetch: {0}")]
    Fetch(String),
    #[error("convert: {0}")]
    Convert(String),
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Caller(#[from] CallerError),
}

/// Per-request mapping selecting which sub-agent or tool handles vision and
/// audio delegation. Values are an agent id, or `mcp:<server_id>` for an
/// external tool server.
#[derive(Clone, Debug, Default)]
pub struct Uses {
    pub vision: Option<String>,
    pub audio: Option<String>,
}

enum Delegate {
    Agent(String),
    Tool(String),
}

fn parse_use(value: &str) -> Delegate {
    match value.strip_prefix("mcp:") {
        Some(server) => Delegate::Tool(server.to_string()),
        None => Delegate::Agent(value.to_string()),
    }
}

enum MediaKind {
    Image,
    Audio,
}

/// Resolved bytes and metadata for one content URL.
#[derive(Clone, Debug)]
pub struct ContentInfo {
    pub source: ContentSource,
    pub file_type: FileType,
    pub content_type: String,
    pub url: String,
    pub data: Vec<u8>,
    pub uploader_name: Option<String>,
    pub file_id: Option<String>,
    pub filename: String,
}

/// Extension point for `data`-typed parts: resolve a data reference to text.
#[async_trait::async_trait]
pub trait DataResolver: Send + Sync {
    async fn resolve(&self, ctx: &Context, data: &Value) -> Result<String, PipelineError>;
}

static DATA_RESOLVER: Lazy<RwLock<Option<Arc<dyn DataResolver>>>> =
    Lazy::new(|| RwLock::new(None));

/// Registers the data resolver. Registration happens at startup.
pub fn register_data_resolver(resolver: Arc<dyn DataResolver>) {
    *DATA_RESOLVER.write().unwrap() = Some(resolver);
}

/// Clears the data resolver. Test hook.
pub fn reset_data_resolver() {
    *DATA_RESOLVER.write().unwrap() = None;
}

/// Rewrites messages so every content part is model-compatible.
pub async fn vision(
    ctx: &Context,
    caps: ModelCapabilities,
    messages: Vec<Message>,
    uses: &Uses,
    force_uses: bool,
) -> Vec<Message> {
    let mut run = Run {
        ctx,
        caps,
        uses: uses.clone(),
        force_uses,
        suppress_loading: false,
        infos: HashMap::new(),
        texts: HashMap::new(),
        images: HashMap::new(),
    };
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        out.push(run.process_message(message).await);
    }
    out
}

/// One `vision` call: per-call caches plus the routing configuration.
struct Run<'a> {
    ctx: &'a Context,
    caps: ModelCapabilities,
    uses: Uses,
    force_uses: bool,
    /// Set while rendering PDF pages so per-page fetches stay silent.
    suppress_loading: bool,
    /// Tier 1: resolved content per URL within this call.
    infos: HashMap<String, ContentInfo>,
    /// Tier 1: extracted text per URL within this call.
    texts: HashMap<String, String>,
    /// Encoded data URI per URL within this call.
    images: HashMap<String, String>,
}

impl<'a> Run<'a> {
    async fn process_message(&mut self, message: Message) -> Message {
        let mut parts = Vec::with_capacity(message.parts.len());
        for part in &message.parts {
            match self.process_part(part).await {
                Ok(mut converted) => parts.append(&mut converted),
                Err(e) => {
                    warn!(request_id = %self.ctx.request_id, "content part failed: {}", e);
                    parts.push(degraded(part));
                }
            }
        }
        Message {
            role: message.role,
            name: message.name,
            parts,
        }
    }

    async fn process_part(&mut self, part: &Part) -> Result<Vec<Part>, PipelineError> {
        match part {
            Part::Text { .. } => Ok(vec![part.clone()]),
            Part::ImageUrl { image_url } => {
                if image_url.url.starts_with("data:") {
                    return Ok(vec![part.clone()]);
                }
                let info = self.fetch(&image_url.url).await?;
                Ok(vec![self.route_image(&info).await?])
            }
            Part::InputAudio { input_audio } => {
                if self.caps.supports_audio() {
                    return Ok(vec![part.clone()]);
                }
                match self.uses.audio.clone() {
                    Some(target) => {
                        let data = BASE64.decode(&input_audio.data).map_err(|e| {
                            PipelineError::Convert(format!("invalid audio base64: {}", e))
                        })?;
                        let info = inline_info(
                            data,
                            format!("audio/{}", input_audio.format),
                            "inline-audio".to_string(),
                        );
                        let text = self.describe(&info, &target, MediaKind::Audio).await?;
                        Ok(vec![Part::text(text)])
                    }
                    None => {
                        // Audio on a non-audio model without a delegate passes
                        // through unchanged.
                        warn!("audio part kept as-is: model lacks audio support and no audio tool is set");
                        Ok(vec![part.clone()])
                    }
                }
            }
            Part::File { file } => self.handle_file(file).await,
            Part::Data { data } => {
                let text = self.resolve_data(data).await?;
                Ok(vec![Part::text(text)])
            }
        }
    }

    async fn handle_file(&mut self, file: &FileRef) -> Result<Vec<Part>, PipelineError> {
        let info = self.fetch(&file.url).await?;
        match info.file_type {
            FileType::Image => Ok(vec![self.route_image(&info).await?]),
            FileType::Audio => self.route_audio(&info).await,
            FileType::Pdf => self.handle_pdf(&info).await,
            FileType::Word | FileType::Excel | FileType::Ppt => {
                let text = self.office_text(&info).await?;
                Ok(vec![Part::text(text)])
            }
            FileType::Csv | FileType::Json | FileType::Xml | FileType::Text => {
                let text = self.plain_text(&info).await?;
                Ok(vec![Part::text(text)])
            }
            FileType::Binary | FileType::Unknown => Err(PipelineError::UnknownContentType(
                format!("{} ({})", info.filename, info.content_type),
            )),
        }
    }

    /// Capability-aware image routing: pass through as a data URI when the
    /// model has vision (unless forced to a delegate), otherwise describe via
    /// the configured sub-agent or tool.
    async fn route_image(&mut self, info: &ContentInfo) -> Result<Part, PipelineError> {
        let delegate = match (self.caps.supports_vision(), self.uses.vision.clone()) {
            (true, Some(target)) if self.force_uses => Some(target),
            (true, _) => None,
            (false, Some(target)) => Some(target),
            (false, None) => return Err(PipelineError::NoVisionTool),
        };
        match delegate {
            Some(target) => {
                let text = self.described_text(info, &target, MediaKind::Image).await?;
                Ok(Part::text(text))
            }
            None => Ok(Part::image_url(self.data_uri(info))),
        }
    }

    async fn route_audio(&mut self, info: &ContentInfo) -> Result<Vec<Part>, PipelineError> {
        if self.caps.supports_audio() {
            let format = audio_format(&info.content_type, &info.filename);
            return Ok(vec![Part::input_audio(BASE64.encode(&info.data), format)]);
        }
        match self.uses.audio.clone() {
            Some(target) => {
                let text = self.described_text(info, &target, MediaKind::Audio).await?;
                Ok(vec![Part::text(text)])
            }
            None => {
                // Passthrough as encoded audio; the model may still reject it.
                warn!("audio kept as input_audio: model lacks audio support and no audio tool is set");
                let format = audio_format(&info.content_type, &info.filename);
                Ok(vec![Part::input_audio(BASE64.encode(&info.data), format)])
            }
        }
    }

    async fn handle_pdf(&mut self, info: &ContentInfo) -> Result<Vec<Part>, PipelineError> {
        if self.caps.supports_vision() && self.uses.vision.is_some() && !self.force_uses {
            match pdf::render_pages(&info.data).await {
                Ok(pages) => {
                    let was_suppressed = self.suppress_loading;
                    self.suppress_loading = true;
                    let mut parts = Vec::with_capacity(pages.len());
                    for (i, page) in pages.into_iter().enumerate() {
                        let page_info = inline_info(
                            page,
                            "image/png".to_string(),
                            format!("{}#page-{}", info.filename, i + 1),
                        );
                        parts.push(self.route_image(&page_info).await?);
                    }
                    self.suppress_loading = was_suppressed;
                    return Ok(parts);
                }
                Err(e) => {
                    warn!("pdf page rendering unavailable, extracting text: {}", e);
                }
            }
        }

        if let Some(text) = self.text_tiers_get(info).await {
            return Ok(vec![Part::text(text)]);
        }
        let pages = pdf::extract_text(&info.data)
            .await
            .map_err(|e| PipelineError::Convert(e.to_string()))?;
        let text = pdf::join_pages(&pages);
        self.text_tiers_put(info, &text).await;
        Ok(vec![Part::text(text)])
    }

    /// Office formats carry no native extractor here; the gateway's cached
    /// extracted text is the source of record.
    async fn office_text(&mut self, info: &ContentInfo) -> Result<String, PipelineError> {
        match self.text_tiers_get(info).await {
            Some(text) => Ok(text),
            None => Err(PipelineError::Convert(format!(
                "no extracted text available for {}",
                info.filename
            ))),
        }
    }

    async fn plain_text(&mut self, info: &ContentInfo) -> Result<String, PipelineError> {
        if let Some(text) = self.text_tiers_get(info).await {
            return Ok(text);
        }
        let body = String::from_utf8_lossy(&info.data).into_owned();
        let text = match info.file_type {
            FileType::Json => serde_json::from_str::<Value>(&body)
                .and_then(|v| serde_json::to_string_pretty(&v))
                .unwrap_or(body),
            _ => body,
        };
        self.text_tiers_put(info, &text).await;
        Ok(text)
    }

    /// Description with text-tier caching (in-memory, then gateway, then the
    /// actual delegate call with write-back).
    async fn described_text(
        &mut self,
        info: &ContentInfo,
        target: &str,
        kind: MediaKind,
    ) -> Result<String, PipelineError> {
        if let Some(text) = self.text_tiers_get(info).await {
            return Ok(text);
        }
        let text = self.describe(info, target, kind).await?;
        self.text_tiers_put(info, &text).await;
        Ok(text)
    }

    /// Invokes the configured delegate: an `mcp:` tool server, or a
    /// vision/audio sub-agent reached through the agent caller.
    async fn describe(
        &mut self,
        info: &ContentInfo,
        target: &str,
        kind: MediaKind,
    ) -> Result<String, PipelineError> {
        match parse_use(target) {
            Delegate::Tool(server_id) => {
                let client = tool::select(&server_id)?;
                let tool_name = match kind {
                    MediaKind::Image => DESCRIBE_IMAGE_TOOL,
                    MediaKind::Audio => TRANSCRIBE_AUDIO_TOOL,
                };
                self.ctx.sink().emit(AgentEvent::ToolCall {
                    server: server_id.clone(),
                    tool: tool_name.to_string(),
                });
                let payload_key = match kind {
                    MediaKind::Image => "image",
                    MediaKind::Audio => "audio",
                };
                let mut args = serde_json::Map::new();
                args.insert(payload_key.to_string(), Value::String(self.data_uri(info)));
                args.insert(
                    "content_type".to_string(),
                    Value::String(info.content_type.clone()),
                );
                let args = Value::Object(args);
                let (parts, is_error) = client.call_tool(tool_name, args).await?;
                let text = content_text(&parts);
                if is_error {
                    return Err(PipelineError::Tool(ToolError::CallFailed(text)));
                }
                Ok(text)
            }
            Delegate::Agent(agent_id) => self.describe_with_agent(&agent_id, info, kind).await,
        }
    }

    /// Sub-agent invocation: publishes the file descriptor into the shared
    /// space under `{agent_id}:current_file` and appends it to
    /// `{agent_id}:files_info`; both keys are removed after the call returns
    /// or fails.
    async fn describe_with_agent(
        &mut self,
        agent_id: &str,
        info: &ContentInfo,
        kind: MediaKind,
    ) -> Result<String, PipelineError> {
        let space = self.ctx.space();
        let descriptor = json!({
            "file_id": info.file_id,
            "url": info.url,
            "content_type": info.content_type,
            "filename": info.filename,
        });
        space.set(agent_key(agent_id, CURRENT_FILE_KEY), descriptor.clone());
        space.push_file_info(agent_id, descriptor).await;

        let result = self.call_agent(agent_id, info, kind).await;

        space.clear_agent_files(agent_id);
        result
    }

    async fn call_agent(
        &mut self,
        agent_id: &str,
        info: &ContentInfo,
        kind: MediaKind,
    ) -> Result<String, PipelineError> {
        let caller = self
            .ctx
            .capability()
            .caller
            .clone()
            .ok_or_else(|| CallerError::Other("no agent caller registered".to_string()))?;

        let (prompt, media) = match kind {
            MediaKind::Image => (
                "Describe this image in detail.",
                Part::image_url(self.data_uri(info)),
            ),
            MediaKind::Audio => (
                "Transcribe this audio.",
                Part::input_audio(
                    BASE64.encode(&info.data),
                    audio_format(&info.content_type, &info.filename),
                ),
            ),
        };
        let messages = vec![Message::new(Role::User, vec![Part::text(prompt), media])];
        let options = StreamOptions {
            connector: None,
            skip_history: true,
            skip_output: true,
        };

        let fork = self.ctx.fork();
        let response = caller.stream(&fork, agent_id, messages, options).await?;
        response
            .output_text()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PipelineError::Convert(format!("empty response from {}", agent_id)))
    }

    async fn resolve_data(&mut self, data: &Value) -> Result<String, PipelineError> {
        let resolver = DATA_RESOLVER.read().unwrap().clone();
        match resolver {
            Some(resolver) => resolver.resolve(self.ctx, data).await,
            // Default rendition until a source-of-record resolver is registered.
            None => Ok(format!(
                "```json\n{}\n```",
                serde_json::to_string_pretty(data)
                    .map_err(|e| PipelineError::Convert(e.to_string()))?
            )),
        }
    }

    /// Resolves a URL to bytes and metadata, once per call.
    async fn fetch(&mut self, url: &str) -> Result<ContentInfo, PipelineError> {
        if let Some(info) = self.infos.get(url) {
            return Ok(info.clone());
        }
        let source = resolve_source(url);
        let emit = !self.suppress_loading
            && matches!(
                source,
                ContentSource::Http(_) | ContentSource::Uploader { .. }
            );
        if emit {
            self.ctx.sink().emit(AgentEvent::Loading {
                file: url.to_string(),
                done: false,
            });
        }
        let result = self.fetch_source(url, &source).await;
        if emit {
            self.ctx.sink().emit(AgentEvent::Loading {
                file: url.to_string(),
                done: true,
            });
        }
        let info = result?;
        self.infos.insert(url.to_string(), info.clone());
        Ok(info)
    }

    async fn fetch_source(
        &self,
        url: &str,
        source: &ContentSource,
    ) -> Result<ContentInfo, PipelineError> {
        match source {
            ContentSource::Http(http_url) => {
                let response = reqwest::get(http_url)
                    .await
                    .map_err(|e| PipelineError::Fetch(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(PipelineError::Fetch(format!(
                        "{} fetching {}",
                        response.status(),
                        http_url
                    )));
                }
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let filename = url::Url::parse(http_url)
                    .ok()
                    .and_then(|u| {
                        u.path_segments()
                            .and_then(|s| s.last().map(|p| p.to_string()))
                    })
                    .unwrap_or_default();
                let data = response
                    .bytes()
                    .await
                    .map_err(|e| PipelineError::Fetch(e.to_string()))?
                    .to_vec();
                Ok(build_info(
                    ContentSource::Http(http_url.clone()),
                    url,
                    content_type,
                    filename,
                    data,
                    None,
                    None,
                ))
            }
            ContentSource::Uploader { uploader, file_id } => {
                let manager = file_manager(uploader)?;
                let file_info = manager.info(file_id).await?;
                let data = manager.read(file_id).await?;
                Ok(build_info(
                    source.clone(),
                    url,
                    file_info.content_type,
                    file_info.filename,
                    data,
                    Some(uploader.clone()),
                    Some(file_id.clone()),
                ))
            }
            ContentSource::Base64(uri) => {
                let (content_type, data) = parse_data_uri(uri)?;
                Ok(build_info(
                    source.clone(),
                    url,
                    content_type,
                    String::new(),
                    data,
                    None,
                    None,
                ))
            }
            ContentSource::Local(path) => {
                let data = tokio::fs::read(path)
                    .await
                    .map_err(|e| PipelineError::Fetch(format!("{}: {}", path, e)))?;
                let filename = std::path::Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(build_info(
                    source.clone(),
                    url,
                    String::new(),
                    filename,
                    data,
                    None,
                    None,
                ))
            }
        }
    }

    /// Tier 1 then tier 2 of the text cache; a tier-2 hit is promoted to
    /// tier 1.
    async fn text_tiers_get(&mut self, info: &ContentInfo) -> Option<String> {
        if let Some(text) = self.texts.get(&info.url) {
            return Some(text.clone());
        }
        let (uploader, file_id) = (info.uploader_name.as_ref()?, info.file_id.as_ref()?);
        let manager = file_manager(uploader).ok()?;
        match manager.get_text(file_id, true).await {
            Ok(Some(text)) => {
                self.texts.insert(info.url.clone(), text.clone());
                Some(text)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("text preview lookup failed for {}: {}", info.url, e);
                None
            }
        }
    }

    /// Stores freshly extracted text into tier 1 and, best-effort, the
    /// gateway. A write failure is logged, not fatal.
    async fn text_tiers_put(&mut self, info: &ContentInfo, text: &str) {
        self.texts.insert(info.url.clone(), text.to_string());
        if let (Some(uploader), Some(file_id)) = (&info.uploader_name, &info.file_id) {
            if let Ok(manager) = file_manager(uploader) {
                if let Err(e) = manager.save_text(file_id, text).await {
                    warn!("failed to cache extracted text for {}: {}", info.url, e);
                }
            }
        }
    }

    fn data_uri(&mut self, info: &ContentInfo) -> String {
        if let Some(uri) = self.images.get(&info.url) {
            return uri.clone();
        }
        let content_type = if info.content_type.is_empty() {
            "application/octet-stream"
        } else {
            &info.content_type
        };
        let uri = format!("data:{};base64,{}", content_type, BASE64.encode(&info.data));
        self.images.insert(info.url.clone(), uri.clone());
        uri
    }
}

/// Fallback for a failed part: textual placeholder for images, the original
/// part otherwise.
fn degraded(part: &Part) -> Part {
    match part {
        Part::ImageUrl { .. } => Part::text(IMAGE_FAILED_PLACEHOLDER),
        other => other.clone(),
    }
}

fn build_info(
    source: ContentSource,
    url: &str,
    content_type: String,
    filename: String,
    data: Vec<u8>,
    uploader_name: Option<String>,
    file_id: Option<String>,
) -> ContentInfo {
    let file_type = filetype::detect(&content_type, &filename, Some(&data));
    ContentInfo {
        source,
        file_type,
        content_type,
        url: url.to_string(),
        data,
        uploader_name,
        file_id,
        filename,
    }
}

/// Info for bytes that never came from a URL (rendered PDF pages, inline
/// audio).
fn inline_info(data: Vec<u8>, content_type: String, name: String) -> ContentInfo {
    let file_type = filetype::detect(&content_type, &name, Some(&data));
    ContentInfo {
        source: ContentSource::Base64(name.clone()),
        file_type,
        content_type,
        url: name.clone(),
        data,
        uploader_name: None,
        file_id: None,
        filename: name,
    }
}

fn parse_data_uri(uri: &str) -> Result<(String, Vec<u8>), PipelineError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| PipelineError::UnsupportedSource(uri.to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| PipelineError::UnsupportedSource("data uri missing payload".to_string()))?;
    let (content_type, base64_encoded) = match meta.strip_suffix(";base64") {
        Some(ct) => (ct.to_string(), true),
        None => (meta.to_string(), false),
    };
    let data = if base64_encoded {
        BASE64
            .decode(payload)
            .map_err(|e| PipelineError::Fetch(format!("invalid data uri base64: {}", e)))?
    } else {
        payload.as_bytes().to_vec()
    };
    Ok((content_type, data))
}

/// Short audio format token from MIME type or filename.
fn audio_format(content_type: &str, filename: &str) -> String {
    let ct = content_type.split(';').next().unwrap_or("").trim();
    match ct {
        "audio/mpeg" | "audio/mp3" => return "mp3".to_string(),
        "audio/wav" | "audio/x-wav" | "audio/wave" => return "wav".to_string(),
        "audio/ogg" => return "ogg".to_string(),
        "audio/flac" | "audio/x-flac" => return "flac".to_string(),
        "audio/aac" => return "aac".to_string(),
        "audio/mp4" | "audio/x-m4a" => return "m4a".to_string(),
        _ => {}
    }
    let ext = filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    if ext.is_empty() || ext == filename.to_ascii_lowercase() {
        "mp3".to_string()
    } else {
        ext
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{register_file_manager, wrapper_uri, FileManager, MemoryFileManager};
    use crate::context::{Capability, Context, Identity};
    use crate::llm::{AudioFormat, MockCaller, VisionFormat};
    use crate::tool::{register_tool_server, MockToolClient};
    use std::sync::Arc;

    // A 1x1 transparent PNG.
    const PNG_BYTES: &[u8] = &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48,
        0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
        0x00, 0x1f, 0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78,
        0x9c, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00,
        0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
    ];

    fn setup_manager(name: &str) -> Arc<MemoryFileManager> {
        let manager = Arc::new(MemoryFileManager::new());
        register_file_manager(name, manager.clone());
        manager
    }

    fn vision_caps() -> ModelCapabilities {
        ModelCapabilities {
            vision: VisionFormat::OpenAI,
            audio: AudioFormat::None,
        }
    }

    fn ctx() -> Context {
        Context::new(Identity::default())
    }

    /// **Scenario**: a text file via uploader becomes one text part whose
    /// body contains the file body, under empty capabilities.
    #[tokio::test]
    async fn text_file_via_uploader_becomes_text_part() {
        let manager = setup_manager("cp-text");
        manager.put("f1", "main.go", "text/x-go", b"package main\n\nfunc main() {}\n".to_vec());

        let messages = vec![Message::new(
            Role::User,
            vec![Part::file(wrapper_uri("cp-text", "f1"))],
        )];
        let out = vision(
            &ctx(),
            ModelCapabilities::default(),
            messages,
            &Uses::default(),
            false,
        )
        .await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].parts.len(), 1);
        let text = out[0].parts[0].as_text().unwrap();
        assert!(text.contains("package main"));
    }

    /// **Scenario**: a PNG via uploader on a vision-capable model becomes an
    /// image_url part with a base64 PNG data URI.
    #[tokio::test]
    async fn image_on_vision_model_becomes_data_uri() {
        let manager = setup_manager("cp-img");
        manager.put("p1", "dot.png", "image/png", PNG_BYTES.to_vec());

        let messages = vec![Message::new(
            Role::User,
            vec![Part::image_url(wrapper_uri("cp-img", "p1"))],
        )];
        let out = vision(&ctx(), vision_caps(), messages, &Uses::default(), false).await;

        match &out[0].parts[0] {
            Part::ImageUrl { image_url } => {
                assert!(image_url.url.starts_with("data:image/png;base64,"));
            }
            other => panic!("expected image_url, got {:?}", other),
        }
    }

    /// **Scenario**: non-vision model with a vision sub-agent produces a text
    /// part from the sub-agent, and the space keys are cleaned up.
    #[tokio::test]
    async fn image_on_non_vision_model_uses_sub_agent() {
        let manager = setup_manager("cp-sub");
        manager.put("p1", "dot.png", "image/png", PNG_BYTES.to_vec());

        let caller = Arc::new(MockCaller::new("a small transparent dot"));
        let ctx = Context::new(Identity::default()).with_capability(Capability {
            caller: Some(caller.clone()),
            model: ModelCapabilities::default(),
        });

        let uses = Uses {
            vision: Some("tests.vision-helper".to_string()),
            audio: None,
        };
        let messages = vec![Message::new(
            Role::User,
            vec![Part::image_url(wrapper_uri("cp-sub", "p1"))],
        )];
        let out = vision(&ctx, ModelCapabilities::default(), messages, &uses, false).await;

        assert_eq!(
            out[0].parts[0].as_text().unwrap(),
            "a small transparent dot"
        );
        let calls = caller.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "tests.vision-helper");
        // Space keys removed after the call returned.
        assert!(ctx.space().is_empty());
    }

    /// **Scenario**: non-vision model without a vision delegate degrades the
    /// image to the failure placeholder.
    #[tokio::test]
    async fn image_without_vision_tool_degrades_to_placeholder() {
        let manager = setup_manager("cp-novis");
        manager.put("p1", "dot.png", "image/png", PNG_BYTES.to_vec());

        let messages = vec![Message::new(
            Role::User,
            vec![
                Part::text("look:"),
                Part::image_url(wrapper_uri("cp-novis", "p1")),
            ],
        )];
        let out = vision(
            &ctx(),
            ModelCapabilities::default(),
            messages,
            &Uses::default(),
            false,
        )
        .await;

        assert_eq!(out[0].parts.len(), 2);
        assert_eq!(out[0].parts[0].as_text().unwrap(), "look:");
        assert_eq!(out[0].parts[1].as_text().unwrap(), IMAGE_FAILED_PLACEHOLDER);
    }

    /// **Scenario**: vision routed to an mcp tool server extracts text from
    /// the tool's content parts.
    #[tokio::test]
    async fn image_via_mcp_tool_server() {
        let manager = setup_manager("cp-mcp");
        manager.put("p1", "dot.png", "image/png", PNG_BYTES.to_vec());
        register_tool_server(
            "cp-mcp-vision",
            Arc::new(MockToolClient::new().reply(DESCRIBE_IMAGE_TOOL, "a described image")),
        );

        let uses = Uses {
            vision: Some("mcp:cp-mcp-vision".to_string()),
            audio: None,
        };
        let messages = vec![Message::new(
            Role::User,
            vec![Part::image_url(wrapper_uri("cp-mcp", "p1"))],
        )];
        let out = vision(&ctx(), ModelCapabilities::default(), messages, &uses, false).await;

        assert_eq!(out[0].parts[0].as_text().unwrap(), "a described image");
    }

    /// **Scenario**: force_uses routes to the delegate even on a
    /// vision-capable model.
    #[tokio::test]
    async fn force_uses_overrides_vision_capability() {
        let manager = setup_manager("cp-force");
        manager.put("p1", "dot.png", "image/png", PNG_BYTES.to_vec());
        register_tool_server(
            "cp-force-vision",
            Arc::new(MockToolClient::new().reply(DESCRIBE_IMAGE_TOOL, "forced description")),
        );

        let uses = Uses {
            vision: Some("mcp:cp-force-vision".to_string()),
            audio: None,
        };
        let messages = vec![Message::new(
            Role::User,
            vec![Part::image_url(wrapper_uri("cp-force", "p1"))],
        )];
        let out = vision(&ctx(), vision_caps(), messages, &uses, true).await;

        assert_eq!(out[0].parts[0].as_text().unwrap(), "forced description");
    }

    /// **Scenario**: two file parts with the same uploader URL yield two
    /// identical text parts, one gateway write, and one byte read.
    #[tokio::test]
    async fn duplicate_file_reference_hits_in_memory_cache() {
        let manager = setup_manager("cp-dup");
        manager.put("f1", "note.txt", "text/plain", b"the body".to_vec());

        let url = wrapper_uri("cp-dup", "f1");
        let messages = vec![Message::new(
            Role::User,
            vec![Part::file(&url), Part::file(&url)],
        )];
        let out = vision(
            &ctx(),
            ModelCapabilities::default(),
            messages,
            &Uses::default(),
            false,
        )
        .await;

        assert_eq!(out[0].parts.len(), 2);
        assert_eq!(out[0].parts[0], out[0].parts[1]);
        assert_eq!(out[0].parts[0].as_text().unwrap(), "the body");
        assert_eq!(manager.text_writes(), 1);
        assert_eq!(manager.reads(), 1);
    }

    /// **Scenario**: the gateway's cached text short-circuits extraction.
    #[tokio::test]
    async fn gateway_preview_is_tier_two() {
        let manager = setup_manager("cp-tier2");
        manager.put(
            "doc1",
            "report.docx",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            b"binary-office-bytes".to_vec(),
        );
        manager.save_text("doc1", "Cached extraction.").await.unwrap();

        let messages = vec![Message::new(
            Role::User,
            vec![Part::file(wrapper_uri("cp-tier2", "doc1"))],
        )];
        let out = vision(
            &ctx(),
            ModelCapabilities::default(),
            messages,
            &Uses::default(),
            false,
        )
        .await;

        assert_eq!(out[0].parts[0].as_text().unwrap(), "Cached extraction.");
        // Only the seeding write; the pipeline read from the cache.
        assert_eq!(manager.text_writes(), 1);
    }

    /// **Scenario**: an office file with no cached extraction passes through
    /// unchanged (degraded), keeping the message shape.
    #[tokio::test]
    async fn office_without_extraction_passes_through() {
        let manager = setup_manager("cp-office");
        manager.put(
            "doc1",
            "deck.pptx",
            "application/vnd.ms-powerpoint",
            b"raw".to_vec(),
        );

        let original = Part::file(wrapper_uri("cp-office", "doc1"));
        let messages = vec![Message::new(Role::User, vec![original.clone()])];
        let out = vision(
            &ctx(),
            ModelCapabilities::default(),
            messages,
            &Uses::default(),
            false,
        )
        .await;
        assert_eq!(out[0].parts[0], original);
    }

    /// **Scenario**: every part type in, only model-compatible parts out.
    #[tokio::test]
    async fn output_parts_are_model_compatible() {
        let manager = setup_manager("cp-compat");
        manager.put("f1", "a.json", "application/json", br#"{"k":1}"#.to_vec());
        manager.put("p1", "dot.png", "image/png", PNG_BYTES.to_vec());

        let messages = vec![Message::new(
            Role::User,
            vec![
                Part::text("hi"),
                Part::file(wrapper_uri("cp-compat", "f1")),
                Part::image_url(wrapper_uri("cp-compat", "p1")),
                Part::data(json!({"ref": "dataset-7"})),
            ],
        )];
        let out = vision(&ctx(), vision_caps(), messages, &Uses::default(), false).await;

        for part in &out[0].parts {
            assert!(part.is_model_compatible(), "not compatible: {:?}", part);
        }
        // The data part rendered through the default resolver.
        let rendered = out[0].parts[3].as_text().unwrap();
        assert!(rendered.contains("dataset-7"));
    }

    /// **Scenario**: json bodies are pretty-printed.
    #[tokio::test]
    async fn json_file_is_pretty_printed() {
        let manager = setup_manager("cp-json");
        manager.put("f1", "cfg.json", "application/json", br#"{"a":{"b":1}}"#.to_vec());

        let messages = vec![Message::new(
            Role::User,
            vec![Part::file(wrapper_uri("cp-json", "f1"))],
        )];
        let out = vision(
            &ctx(),
            ModelCapabilities::default(),
            messages,
            &Uses::default(),
            false,
        )
        .await;
        let text = out[0].parts[0].as_text().unwrap();
        assert!(text.contains("\"b\": 1"));
    }

    /// **Scenario**: audio passes through on an audio-capable model, and on
    /// an incapable model with a transcription tool becomes text.
    #[tokio::test]
    async fn audio_routing() {
        let part = Part::input_audio(BASE64.encode(b"fake-audio"), "mp3");

        // Capable model: passthrough.
        let caps = ModelCapabilities {
            vision: VisionFormat::None,
            audio: AudioFormat::Default,
        };
        let out = vision(
            &ctx(),
            caps,
            vec![Message::new(Role::User, vec![part.clone()])],
            &Uses::default(),
            false,
        )
        .await;
        assert_eq!(out[0].parts[0], part);

        // Incapable model + tool: transcription text.
        register_tool_server(
            "cp-audio-srv",
            Arc::new(MockToolClient::new().reply(TRANSCRIBE_AUDIO_TOOL, "hello from audio")),
        );
        let uses = Uses {
            vision: None,
            audio: Some("mcp:cp-audio-srv".to_string()),
        };
        let out = vision(
            &ctx(),
            ModelCapabilities::default(),
            vec![Message::new(Role::User, vec![part.clone()])],
            &uses,
            false,
        )
        .await;
        assert_eq!(out[0].parts[0].as_text().unwrap(), "hello from audio");

        // Incapable model, no tool: unchanged.
        let out = vision(
            &ctx(),
            ModelCapabilities::default(),
            vec![Message::new(Role::User, vec![part.clone()])],
            &Uses::default(),
            false,
        )
        .await;
        assert_eq!(out[0].parts[0], part);
    }

    /// **Scenario**: data-uri image parts pass through untouched.
    #[tokio::test]
    async fn data_uri_image_passthrough() {
        let part = Part::image_url("data:image/png;base64,AA==");
        let out = vision(
            &ctx(),
            ModelCapabilities::default(),
            vec![Message::new(Role::User, vec![part.clone()])],
            &Uses::default(),
            false,
        )
        .await;
        assert_eq!(out[0].parts[0], part);
    }

    /// **Scenario**: a missing uploader degrades the part instead of failing
    /// the call.
    #[tokio::test]
    async fn missing_manager_degrades_not_fails() {
        let messages = vec![Message::new(
            Role::User,
            vec![
                Part::file("__no-such-uploader://f1"),
                Part::text("still here"),
            ],
        )];
        let out = vision(
            &ctx(),
            ModelCapabilities::default(),
            messages,
            &Uses::default(),
            false,
        )
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].parts.len(), 2);
        // File part passed through unchanged; text untouched.
        assert!(matches!(out[0].parts[0], Part::File { .. }));
        assert_eq!(out[0].parts[1].as_text().unwrap(), "still here");
    }

    #[test]
    fn parse_data_uri_variants() {
        let (ct, data) = parse_data_uri("data:image/png;base64,AAECAw==").unwrap();
        assert_eq!(ct, "image/png");
        assert_eq!(data, vec![0, 1, 2, 3]);

        let (ct, data) = parse_data_uri("data:text/plain,hello").unwrap();
        assert_eq!(ct, "text/plain");
        assert_eq!(data, b"hello");

        assert!(parse_data_uri("not-a-data-uri").is_err());
    }

    #[test]
    fn audio_format_from_mime_and_extension() {
        assert_eq!(audio_format("audio/mpeg", ""), "mp3");
        assert_eq!(audio_format("audio/x-wav", "x"), "wav");
        assert_eq!(audio_format("", "voice.ogg"), "ogg");
        assert_eq!(audio_format("", "noext"), "mp3");
    }
}
