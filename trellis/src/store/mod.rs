//! Chat store: transactional persistence for chats, messages, history,
//! resume records, search references, and the assistant catalog over SQLite.
//!
//! Every operation opens its own connection inside `spawn_blocking`; tables
//! are created at startup if absent and their column sets validated. The
//! history subsystem owns an hourly TTL sweeper, started only when a TTL is
//! configured and stopped on [`ChatStore::close`].

pub mod assistant;
pub mod chat;
pub mod history;
pub mod message;
pub mod resume;
pub mod search;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use assistant::{model_id, parse_model_id, Assistant, AssistantFilter};
pub use chat::{Chat, ChatFilter, ChatGroup, ChatStatus};
pub use history::HistoryRecord;
pub use message::{MessageFilter, MessageRecord};
pub use resume::{ResumeRecord, ResumeStatus, ResumeType};
pub use search::{SearchRecord, SearchReference};

pub(crate) const CHAT_TABLE: &str = "__yao.agent.chat";
pub(crate) const MESSAGE_TABLE: &str = "__yao.agent.message";
pub(crate) const HISTORY_TABLE: &str = "__yao.agent.history";
pub(crate) const RESUME_TABLE: &str = "__yao.agent.resume";
pub(crate) const SEARCH_TABLE: &str = "__yao.agent.search";
pub(crate) const ASSISTANT_TABLE: &str = "__yao.agent.assistant";

const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Errors from the chat store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub(crate) fn storage_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// Milliseconds since the epoch.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SQLite-backed chat store.
pub struct ChatStore {
    db_path: PathBuf,
    history_ttl: Option<Duration>,
    sweeper: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ChatStore {
    /// Creates the store, its tables, and validates column presence. Does
    /// not start the history sweeper; see [`ChatStore::open`].
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_history_ttl(path, None)
    }

    /// Like [`ChatStore::new`] with a TTL applied to saved history rows.
    pub fn with_history_ttl(
        path: impl AsRef<Path>,
        history_ttl: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path).map_err(storage_err)?;
        create_schema(&conn)?;
        validate_schema(&conn)?;
        Ok(Self {
            db_path,
            history_ttl,
            sweeper: tokio::sync::Mutex::new(None),
        })
    }

    /// Creates the store and starts the hourly TTL sweeper when a history
    /// TTL is configured.
    pub async fn open(
        path: impl AsRef<Path>,
        history_ttl: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let store = Self::with_history_ttl(path, history_ttl)?;
        store.start_sweeper().await;
        Ok(store)
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.db_path.clone()
    }

    pub(crate) fn history_ttl(&self) -> Option<Duration> {
        self.history_ttl
    }

    /// Starts the sweeper if configured and not already running.
    pub async fn start_sweeper(&self) {
        if self.history_ttl.is_none() {
            return;
        }
        let mut guard = self.sweeper.lock().await;
        if guard.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let child = token.clone();
        let db_path = self.db_path.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {
                        match history::sweep_expired(db_path.clone()).await {
                            Ok(0) => {}
                            Ok(n) => tracing::debug!("history sweeper removed {} expired rows", n),
                            Err(e) => tracing::warn!("history sweep failed: {}", e),
                        }
                    }
                }
            }
        });
        *guard = Some((token, handle));
    }

    /// Stops the sweeper and releases its timer and stop channel.
    pub async fn close(&self) {
        let mut guard = self.sweeper.lock().await;
        if let Some((token, handle)) = guard.take() {
            token.cancel();
            let _ = handle.await;
        }
    }
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    let statements = [
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{CHAT_TABLE}" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL UNIQUE,
                title TEXT,
                assistant_id TEXT,
                sid TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                share TEXT NOT NULL DEFAULT 'private',
                public INTEGER NOT NULL DEFAULT 0,
                silent INTEGER NOT NULL DEFAULT 0,
                last_connector TEXT,
                last_mode TEXT,
                last_message_at INTEGER,
                metadata TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER
            )
            "#
        ),
        format!(r#"CREATE INDEX IF NOT EXISTS idx_chat_sid ON "{CHAT_TABLE}"(sid)"#),
        format!(
            r#"CREATE INDEX IF NOT EXISTS idx_chat_assistant ON "{CHAT_TABLE}"(assistant_id)"#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{MESSAGE_TABLE}" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                role TEXT NOT NULL,
                type TEXT NOT NULL,
                props TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                request_id TEXT,
                block_id TEXT,
                thread_id TEXT,
                assistant_id TEXT,
                connector TEXT,
                mode TEXT,
                metadata TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER,
                UNIQUE (chat_id, sequence)
            )
            "#
        ),
        format!(
            r#"CREATE INDEX IF NOT EXISTS idx_message_chat ON "{MESSAGE_TABLE}"(chat_id)"#
        ),
        format!(
            r#"CREATE INDEX IF NOT EXISTS idx_message_request ON "{MESSAGE_TABLE}"(request_id)"#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{HISTORY_TABLE}" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sid TEXT NOT NULL,
                cid TEXT,
                uid TEXT,
                role TEXT NOT NULL,
                name TEXT,
                content TEXT NOT NULL,
                context TEXT,
                assistant_id TEXT,
                assistant_name TEXT,
                assistant_avatar TEXT,
                mentions TEXT,
                silent INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER,
                expired_at INTEGER
            )
            "#
        ),
        format!(r#"CREATE INDEX IF NOT EXISTS idx_history_sid ON "{HISTORY_TABLE}"(sid)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS idx_history_cid ON "{HISTORY_TABLE}"(cid)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS idx_history_uid ON "{HISTORY_TABLE}"(uid)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS idx_history_role ON "{HISTORY_TABLE}"(role)"#),
        format!(
            r#"CREATE INDEX IF NOT EXISTS idx_history_assistant ON "{HISTORY_TABLE}"(assistant_id)"#
        ),
        format!(
            r#"CREATE INDEX IF NOT EXISTS idx_history_silent ON "{HISTORY_TABLE}"(silent)"#
        ),
        format!(
            r#"CREATE INDEX IF NOT EXISTS idx_history_created ON "{HISTORY_TABLE}"(created_at)"#
        ),
        format!(
            r#"CREATE INDEX IF NOT EXISTS idx_history_expired ON "{HISTORY_TABLE}"(expired_at)"#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{RESUME_TABLE}" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resume_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                request_id TEXT NOT NULL,
                stack_id TEXT NOT NULL,
                stack_parent_id TEXT,
                stack_depth INTEGER NOT NULL DEFAULT 0,
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT,
                output TEXT,
                space_snapshot TEXT,
                error TEXT,
                sequence INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#
        ),
        format!(r#"CREATE INDEX IF NOT EXISTS idx_resume_chat ON "{RESUME_TABLE}"(chat_id)"#),
        format!(
            r#"CREATE INDEX IF NOT EXISTS idx_resume_stack ON "{RESUME_TABLE}"(stack_id)"#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{SEARCH_TABLE}" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                query TEXT,
                source TEXT,
                refs TEXT,
                graph_nodes TEXT,
                xml TEXT,
                prompt TEXT,
                duration INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at INTEGER NOT NULL
            )
            "#
        ),
        format!(
            r#"CREATE INDEX IF NOT EXISTS idx_search_request ON "{SEARCH_TABLE}"(request_id)"#
        ),
        format!(r#"CREATE INDEX IF NOT EXISTS idx_search_chat ON "{SEARCH_TABLE}"(chat_id)"#),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{ASSISTANT_TABLE}" (
                assistant_id TEXT PRIMARY KEY,
                type TEXT NOT NULL DEFAULT 'assistant',
                name TEXT NOT NULL,
                avatar TEXT,
                connector TEXT NOT NULL,
                description TEXT,
                tags TEXT,
                options TEXT,
                connector_options TEXT,
                prompts TEXT,
                prompt_presets TEXT,
                modes TEXT,
                disable_global_prompts INTEGER NOT NULL DEFAULT 0,
                kb TEXT,
                db TEXT,
                mcp TEXT,
                workflow TEXT,
                placeholder TEXT,
                locales TEXT,
                uses TEXT,
                search TEXT,
                readonly INTEGER NOT NULL DEFAULT 0,
                public INTEGER NOT NULL DEFAULT 0,
                share TEXT,
                mentionable INTEGER NOT NULL DEFAULT 1,
                automated INTEGER NOT NULL DEFAULT 0,
                built_in INTEGER NOT NULL DEFAULT 0,
                sort INTEGER NOT NULL DEFAULT 9999,
                permissions TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#
        ),
        format!(r#"CREATE INDEX IF NOT EXISTS idx_assistant_type ON "{ASSISTANT_TABLE}"(type)"#),
        format!(
            r#"CREATE INDEX IF NOT EXISTS idx_assistant_connector ON "{ASSISTANT_TABLE}"(connector)"#
        ),
    ];
    for sql in statements {
        conn.execute(&sql, []).map_err(storage_err)?;
    }
    Ok(())
}

fn validate_schema(conn: &Connection) -> Result<(), StoreError> {
    validate_columns(
        conn,
        MESSAGE_TABLE,
        &[
            "message_id",
            "chat_id",
            "role",
            "type",
            "props",
            "sequence",
            "request_id",
            "block_id",
            "thread_id",
            "assistant_id",
            "connector",
            "mode",
            "metadata",
            "created_at",
            "updated_at",
            "deleted_at",
        ],
    )?;
    validate_columns(
        conn,
        ASSISTANT_TABLE,
        &[
            "assistant_id",
            "type",
            "name",
            "connector",
            "tags",
            "options",
            "prompts",
            "locales",
            "sort",
            "updated_at",
        ],
    )?;
    Ok(())
}

fn validate_columns(
    conn: &Connection,
    table: &str,
    expected: &[&str],
) -> Result<(), StoreError> {
    let sql = format!(r#"PRAGMA table_info("{}")"#, table);
    let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(storage_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(storage_err)?;
    for col in expected {
        if !columns.iter().any(|c| c == col) {
            return Err(StoreError::Validation(format!(
                "table {} is missing column {}",
                table, col
            )));
        }
    }
    Ok(())
}
