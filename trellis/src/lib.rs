//! # Trellis
//!
//! Core runtime for a multimodal LLM agent platform: the subsystems that
//! turn a sequence of user messages plus attached files into a stream of
//! structured events produced by one or more cooperating agents, with
//! durable history, multi-scope memory, and orchestrated fan-out calls to
//! peer agents.
//!
//! ## Subsystems
//!
//! - **Content pipeline** ([`content::vision`]): rewrites extended message
//!   parts (files, data references, images, audio) into parts an LLM can
//!   consume, with a three-tier text cache and capability-aware routing to
//!   the model, a vision/audio sub-agent, or an external tool server.
//! - **Agent orchestrator** ([`orchestrator`]): fans out calls to peer
//!   agents with wait-all ([`call_all`]), first-success ([`call_any`]), and
//!   first-completion ([`call_race`]) semantics, forking an independent
//!   context per call.
//! - **Memory namespaces** ([`memory`]): a four-scope (user / team / chat /
//!   context) keyed-value overlay with TTL, list/set operations, prefix
//!   isolation, and statistics over a pluggable [`KvStore`] driver.
//! - **Chat store** ([`store::ChatStore`]): SQLite persistence for chats,
//!   messages, history (with a TTL sweeper), resume records, and search
//!   references, plus the i18n-aware assistant catalog.
//! - **i18n resolver** ([`i18n::I18n`]): key → localized string with
//!   recursive and embedded `{{…}}` templates.
//! - **Request context** ([`context::Context`]): identity, capabilities,
//!   shared [`Space`], streaming sink, and cancellation; [`Context::fork`]
//!   produces the context for orchestrated peer-agent calls.
//!
//! ## Main modules
//!
//! - [`message`]: [`Message`], [`Part`] — the five-variant tagged part enum.
//! - [`context`]: [`Context`], [`Identity`], [`Space`], [`Capability`].
//! - [`llm`]: [`AgentCaller`], [`ModelCapabilities`], [`CallResponse`].
//! - [`attachment`]: [`FileManager`], wrapper URIs, file-type detection.
//! - [`content`]: the pipeline ([`content::vision`], [`content::Uses`]).
//! - [`orchestrator`]: [`CallRequest`], [`CallResult`], the three verbs.
//! - [`memory`]: [`Namespace`], [`Memory`], [`Manager`], [`InMemoryKv`].
//! - [`tool`]: [`ToolClient`], the tool-server registry,
//!   [`McpServerConfig`].
//! - [`i18n`]: [`I18n`].
//! - [`store`]: [`ChatStore`] and its record types.
//! - [`stream`]: [`EventSink`] implementations over `stream-event`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trellis::{vision, Context, Identity, Message, ModelCapabilities, Part, Uses};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ctx = Context::new(Identity::default());
//! let messages = vec![Message::new(
//!     trellis::Role::User,
//!     vec![Part::text("what is in this file?"), Part::file("__local://f1")],
//! )];
//! let rewritten = vision(&ctx, ModelCapabilities::default(), messages, &Uses::default(), false).await;
//! for message in &rewritten {
//!     for part in &message.parts {
//!         assert!(part.is_model_compatible());
//!     }
//! }
//! # }
//! ```

pub mod attachment;
pub mod content;
pub mod context;
pub mod i18n;
pub mod llm;
pub mod memory;
pub mod message;
pub mod orchestrator;
pub mod store;
pub mod stream;
pub mod tool;

pub use attachment::{
    file_manager, parse_wrapper_uri, register_file_manager, resolve_source, wrapper_uri,
    AttachmentError, ContentSource, FileInfo, FileManager, FileType, MemoryFileManager,
};
pub use content::{
    register_data_resolver, vision, ContentInfo, DataResolver, PipelineError, Uses,
    IMAGE_FAILED_PLACEHOLDER,
};
pub use context::{AcceptFormat, Capability, Context, Identity, Referer, Space};
pub use i18n::{I18n, GLOBAL_ASSISTANT};
pub use llm::{
    AgentCaller, AudioFormat, CallResponse, CallerError, Completion, CompletionContent,
    MockCaller, ModelCapabilities, StreamOptions, VisionFormat,
};
pub use memory::{
    global_manager, InMemoryKv, KvStore, Manager, Memory, MemoryError, MemorySpace, Namespace,
    NamespaceStats,
};
pub use message::{FileRef, ImageUrl, InputAudio, Message, Part, Role};
pub use orchestrator::{call_all, call_any, call_race, CallRequest, CallResult};
pub use store::{
    model_id, parse_model_id, Assistant, AssistantFilter, Chat, ChatFilter, ChatGroup,
    ChatStatus, ChatStore, HistoryRecord, MessageFilter, MessageRecord, ResumeRecord,
    ResumeStatus, ResumeType, SearchRecord, SearchReference, StoreError,
};
pub use stream::{channel_sink, ChannelSink, CollectSink, EventSink, LogSink, NullSink};
pub use tool::{
    register_tool_server, select, McpServerConfig, ToolClient, ToolContent, ToolError,
};

/// When running `cargo test -p trellis`, initializes tracing from `RUST_LOG`
/// so unit tests in `src/**` can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
