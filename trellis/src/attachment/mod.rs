//! Attachment gateway seam: wrapper URIs, the [`FileManager`] contract, and
//! the process-wide manager registry.
//!
//! Wrapper URIs use the form `__uploader_name://file_id`; the mandatory
//! double-underscore prefix distinguishes them from real schemes. Managers
//! are registered before first use; the registry is read-only on the hot
//! path.

pub mod filetype;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use thiserror::Error;

pub use filetype::FileType;

/// Errors from attachment operations.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("uploader not found: {0}")]
    ManagerNotFound(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("malformed wrapper uri: {0}")]
    MalformedUri(String),
    #[error("storage: {0}")]
    Storage(String),
}

/// Metadata and bytes for one stored file.
#[derive(Clone, Debug, Default)]
pub struct FileInfo {
    pub file_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

/// One registered uploader backend.
///
/// `get_text`/`save_text` form the cross-request extracted-text cache the
/// content pipeline reads before running a full conversion.
#[async_trait]
pub trait FileManager: Send + Sync {
    async fn info(&self, file_id: &str) -> Result<FileInfo, AttachmentError>;
    async fn read(&self, file_id: &str) -> Result<Vec<u8>, AttachmentError>;
    /// Previously extracted text for the file, if cached. `full` requests the
    /// complete body instead of a preview.
    async fn get_text(&self, file_id: &str, full: bool)
        -> Result<Option<String>, AttachmentError>;
    async fn save_text(&self, file_id: &str, text: &str) -> Result<(), AttachmentError>;
    /// Stores a new file and returns its id.
    async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String, AttachmentError>;
}

/// Parses a wrapper URI `__name://id` into `(uploader_name, file_id)`.
/// The double-underscore prefix is mandatory.
pub fn parse_wrapper_uri(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("__")?;
    let (name, id) = rest.split_once("://")?;
    if name.is_empty() || id.is_empty() {
        return None;
    }
    Some((name.to_string(), id.to_string()))
}

/// Builds the wrapper URI for an uploader name and file id.
pub fn wrapper_uri(name: &str, file_id: &str) -> String {
    format!("__{}://{}", name, file_id)
}

/// Where the bytes of a content URL come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentSource {
    Http(String),
    Uploader { uploader: String, file_id: String },
    Base64(String),
    Local(String),
}

/// Disambiguates a part URL into its source.
///
/// `http(s)` and `data:` are literal; `file://` reads the local filesystem;
/// wrapper URIs name a registered manager; anything else is treated as a
/// file id on the default uploader.
pub fn resolve_source(url: &str) -> ContentSource {
    if url.starts_with("http://") || url.starts_with("https://") {
        return ContentSource::Http(url.to_string());
    }
    if url.starts_with("data:") {
        return ContentSource::Base64(url.to_string());
    }
    if let Some(path) = url.strip_prefix("file://") {
        return ContentSource::Local(path.to_string());
    }
    if let Some((uploader, file_id)) = parse_wrapper_uri(url) {
        return ContentSource::Uploader { uploader, file_id };
    }
    ContentSource::Uploader {
        uploader: DEFAULT_UPLOADER.to_string(),
        file_id: url.to_string(),
    }
}

/// Name bare file ids resolve to.
pub const DEFAULT_UPLOADER: &str = "default";

static MANAGERS: Lazy<RwLock<HashMap<String, Arc<dyn FileManager>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers a file manager under an uploader name. Registration happens at
/// startup, before the first request.
pub fn register_file_manager(name: impl Into<String>, manager: Arc<dyn FileManager>) {
    MANAGERS.write().unwrap().insert(name.into(), manager);
}

/// Looks up a registered manager by uploader name.
pub fn file_manager(name: &str) -> Result<Arc<dyn FileManager>, AttachmentError> {
    MANAGERS
        .read()
        .unwrap()
        .get(name)
        .cloned()
        .ok_or_else(|| AttachmentError::ManagerNotFound(name.to_string()))
}

/// Clears the registry. Test hook.
pub fn reset_file_managers() {
    MANAGERS.write().unwrap().clear();
}

/// In-memory file manager backed by a map. Used in tests and as a reference
/// implementation of the gateway contract.
#[derive(Default)]
pub struct MemoryFileManager {
    files: RwLock<HashMap<String, (FileInfo, Vec<u8>)>>,
    texts: RwLock<HashMap<String, String>>,
    text_writes: std::sync::atomic::AtomicUsize,
    reads: std::sync::atomic::AtomicUsize,
}

impl MemoryFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a file directly with a chosen id.
    pub fn put(&self, file_id: &str, filename: &str, content_type: &str, data: Vec<u8>) {
        let info = FileInfo {
            file_id: file_id.to_string(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size: data.len() as u64,
        };
        self.files
            .write()
            .unwrap()
            .insert(file_id.to_string(), (info, data));
    }

    /// Number of `save_text` calls observed.
    pub fn text_writes(&self) -> usize {
        self.text_writes.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Number of `read` calls observed.
    pub fn reads(&self) -> usize {
        self.reads.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl FileManager for MemoryFileManager {
    async fn info(&self, file_id: &str) -> Result<FileInfo, AttachmentError> {
        self.files
            .read()
            .unwrap()
            .get(file_id)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| AttachmentError::FileNotFound(file_id.to_string()))
    }

    async fn read(&self, file_id: &str) -> Result<Vec<u8>, AttachmentError> {
        self.reads
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.files
            .read()
            .unwrap()
            .get(file_id)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| AttachmentError::FileNotFound(file_id.to_string()))
    }

    async fn get_text(
        &self,
        file_id: &str,
        _full: bool,
    ) -> Result<Option<String>, AttachmentError> {
        Ok(self.texts.read().unwrap().get(file_id).cloned())
    }

    async fn save_text(&self, file_id: &str, text: &str) -> Result<(), AttachmentError> {
        self.text_writes
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.texts
            .write()
            .unwrap()
            .insert(file_id.to_string(), text.to_string());
        Ok(())
    }

    async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String, AttachmentError> {
        let file_id = uuid::Uuid::new_v4().to_string();
        self.put(&file_id, filename, content_type, data);
        Ok(file_id)
    }
}
