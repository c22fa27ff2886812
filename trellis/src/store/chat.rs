//! Chat CRUD and time-grouped listing.
//!
//! Grouping buckets chats into Today / Yesterday / This Week / Last Week /
//! Even Earlier relative to the wall clock, placing each chat by
//! `updated_at` falling back to `created_at`. Pagination applies before
//! grouping; silent chats are excluded unless asked for.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, TimeZone};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

use crate::i18n::{I18n, GLOBAL_ASSISTANT};
use crate::store::{
    now_millis, storage_err, ChatStore, StoreError, CHAT_TABLE, MESSAGE_TABLE, SEARCH_TABLE,
};

/// Chat lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChatStatus {
    #[default]
    Active,
    Archived,
}

impl ChatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatStatus::Active => "active",
            ChatStatus::Archived => "archived",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "archived" => ChatStatus::Archived,
            _ => ChatStatus::Active,
        }
    }
}

/// One chat row.
#[derive(Clone, Debug, Default)]
pub struct Chat {
    pub chat_id: String,
    pub title: Option<String>,
    pub assistant_id: Option<String>,
    /// Owning user.
    pub sid: Option<String>,
    pub status: ChatStatus,
    /// "private" or "team".
    pub share: String,
    pub public: bool,
    pub silent: bool,
    pub last_connector: Option<String>,
    pub last_mode: Option<String>,
    pub last_message_at: Option<i64>,
    pub metadata: Option<Value>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

impl Chat {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            share: "private".to_string(),
            ..Self::default()
        }
    }
}

/// Listing filter. Pagination applies before grouping.
#[derive(Clone, Debug)]
pub struct ChatFilter {
    pub sid: Option<String>,
    pub assistant_id: Option<String>,
    pub keywords: Option<String>,
    /// Include silent chats; excluded by default.
    pub silent: Option<bool>,
    pub page: usize,
    pub page_size: usize,
}

impl Default for ChatFilter {
    fn default() -> Self {
        Self {
            sid: None,
            assistant_id: None,
            keywords: None,
            silent: None,
            page: 1,
            page_size: 50,
        }
    }
}

/// One time bucket of the grouped listing.
#[derive(Clone, Debug)]
pub struct ChatGroup {
    /// Stable key: today, yesterday, this_week, last_week, earlier.
    pub key: &'static str,
    /// Localized label.
    pub label: String,
    pub chats: Vec<Chat>,
}

const GROUPS: [(&str, &str, &str); 5] = [
    ("today", "chat.groups.today", "Today"),
    ("yesterday", "chat.groups.yesterday", "Yesterday"),
    ("this_week", "chat.groups.this_week", "This Week"),
    ("last_week", "chat.groups.last_week", "Last Week"),
    ("earlier", "chat.groups.earlier", "Even Earlier"),
];

impl ChatStore {
    /// Inserts or updates a chat by `chat_id`.
    pub async fn save_chat(&self, chat: &Chat) -> Result<(), StoreError> {
        if chat.chat_id.is_empty() {
            return Err(StoreError::Validation("chat_id is required".to_string()));
        }
        let chat = chat.clone();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let now = now_millis();
            let created_at = if chat.created_at > 0 { chat.created_at } else { now };
            conn.execute(
                &format!(
                    r#"
                    INSERT INTO "{CHAT_TABLE}"
                        (chat_id, title, assistant_id, sid, status, share, public, silent,
                         last_connector, last_mode, last_message_at, metadata, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                    ON CONFLICT (chat_id) DO UPDATE SET
                        title = excluded.title,
                        assistant_id = excluded.assistant_id,
                        status = excluded.status,
                        share = excluded.share,
                        public = excluded.public,
                        silent = excluded.silent,
                        last_connector = excluded.last_connector,
                        last_mode = excluded.last_mode,
                        metadata = excluded.metadata,
                        updated_at = excluded.updated_at
                    "#
                ),
                params![
                    chat.chat_id,
                    chat.title,
                    chat.assistant_id,
                    chat.sid,
                    chat.status.as_str(),
                    chat.share,
                    chat.public as i64,
                    chat.silent as i64,
                    chat.last_connector,
                    chat.last_mode,
                    chat.last_message_at,
                    chat.metadata.as_ref().map(|m| m.to_string()),
                    created_at,
                    now,
                ],
            )
            .map_err(storage_err)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage_err)?
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Chat, StoreError> {
        let chat_id = chat_id.to_string();
        let db_path = self.path();
        let found = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    r#"SELECT {} FROM "{CHAT_TABLE}" WHERE chat_id = ?1"#,
                    CHAT_COLUMNS
                ))
                .map_err(storage_err)?;
            stmt.query_row(params![chat_id], row_to_chat)
                .optional()
                .map_err(storage_err)
        })
        .await
        .map_err(storage_err)??;
        found.ok_or_else(|| StoreError::NotFound("chat".to_string()))
    }

    /// Deletes a chat; cascades to its messages and search records.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path).map_err(storage_err)?;
            let tx = conn.transaction().map_err(storage_err)?;
            tx.execute(
                &format!(r#"DELETE FROM "{SEARCH_TABLE}" WHERE chat_id = ?1"#),
                params![chat_id],
            )
            .map_err(storage_err)?;
            tx.execute(
                &format!(r#"DELETE FROM "{MESSAGE_TABLE}" WHERE chat_id = ?1"#),
                params![chat_id],
            )
            .map_err(storage_err)?;
            tx.execute(
                &format!(r#"DELETE FROM "{CHAT_TABLE}" WHERE chat_id = ?1"#),
                params![chat_id],
            )
            .map_err(storage_err)?;
            tx.commit().map_err(storage_err)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage_err)?
    }

    /// Flat listing, newest activity first, paginated.
    pub async fn list_chats(&self, filter: &ChatFilter) -> Result<Vec<Chat>, StoreError> {
        let filter = filter.clone();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let mut sql = format!(r#"SELECT {} FROM "{CHAT_TABLE}" WHERE 1 = 1"#, CHAT_COLUMNS);
            let mut values: Vec<rusqlite::types::Value> = Vec::new();
            if let Some(sid) = &filter.sid {
                sql.push_str(" AND sid = ?");
                values.push(sid.clone().into());
            }
            if let Some(assistant_id) = &filter.assistant_id {
                sql.push_str(" AND assistant_id = ?");
                values.push(assistant_id.clone().into());
            }
            if let Some(keywords) = &filter.keywords {
                sql.push_str(" AND title LIKE ?");
                values.push(format!("%{}%", keywords).into());
            }
            if !filter.silent.unwrap_or(false) {
                sql.push_str(" AND silent = 0");
            }
            sql.push_str(" ORDER BY COALESCE(updated_at, created_at) DESC");
            let page = filter.page.max(1);
            sql.push_str(&format!(
                " LIMIT {} OFFSET {}",
                filter.page_size,
                (page - 1) * filter.page_size
            ));

            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(params_from_iter(values), row_to_chat)
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
        .await
        .map_err(storage_err)?
    }

    /// Listing grouped into the five time buckets, in bucket order, empty
    /// buckets omitted. Labels go through the i18n resolver when provided.
    pub async fn list_chats_grouped(
        &self,
        filter: &ChatFilter,
        i18n: Option<&I18n>,
        locale: Option<&str>,
    ) -> Result<Vec<ChatGroup>, StoreError> {
        let chats = self.list_chats(filter).await?;
        Ok(group_chats_at(chats, Local::now(), i18n, locale))
    }
}

const CHAT_COLUMNS: &str = "chat_id, title, assistant_id, sid, status, share, public, silent, \
     last_connector, last_mode, last_message_at, metadata, created_at, updated_at";

fn row_to_chat(row: &rusqlite::Row<'_>) -> Result<Chat, rusqlite::Error> {
    let status: String = row.get(4)?;
    let metadata: Option<String> = row.get(11)?;
    Ok(Chat {
        chat_id: row.get(0)?,
        title: row.get(1)?,
        assistant_id: row.get(2)?,
        sid: row.get(3)?,
        status: ChatStatus::parse(&status),
        share: row.get(5)?,
        public: row.get::<_, i64>(6)? != 0,
        silent: row.get::<_, i64>(7)? != 0,
        last_connector: row.get(8)?,
        last_mode: row.get(9)?,
        last_message_at: row.get(10)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

/// Buckets chats relative to `now`. Placement uses `updated_at` when set,
/// otherwise `created_at`. Split out for deterministic tests.
pub fn group_chats_at(
    chats: Vec<Chat>,
    now: DateTime<Local>,
    i18n: Option<&I18n>,
    locale: Option<&str>,
) -> Vec<ChatGroup> {
    let today = now.date_naive();
    let yesterday = today - ChronoDuration::days(1);
    let week = today.iso_week();
    let last_week = (today - ChronoDuration::weeks(1)).iso_week();

    let mut buckets: Vec<Vec<Chat>> = (0..GROUPS.len()).map(|_| Vec::new()).collect();
    for chat in chats {
        let at = chat.updated_at.unwrap_or(chat.created_at);
        let date = Local
            .timestamp_millis_opt(at)
            .single()
            .map(|dt| dt.date_naive())
            .unwrap_or(today);
        let index = if date == today {
            0
        } else if date == yesterday {
            1
        } else if date.iso_week() == week {
            2
        } else if date.iso_week() == last_week {
            3
        } else {
            4
        };
        buckets[index].push(chat);
    }

    GROUPS
        .iter()
        .zip(buckets)
        .filter(|(_, chats)| !chats.is_empty())
        .map(|(&(key, label_key, fallback), chats)| ChatGroup {
            key,
            label: group_label(i18n, locale, label_key, fallback),
            chats,
        })
        .collect()
}

fn group_label(
    i18n: Option<&I18n>,
    locale: Option<&str>,
    label_key: &str,
    fallback: &str,
) -> String {
    if let (Some(i18n), Some(locale)) = (i18n, locale) {
        let translated = i18n.translate_text(GLOBAL_ASSISTANT, locale, label_key);
        if translated != label_key {
            return translated;
        }
    }
    fallback.to_string()
}
