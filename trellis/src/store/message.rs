//! Message write/read path. Saves are a single batch insert with every
//! column present on every row; reads exclude soft-deleted rows and order by
//! `(created_at asc, sequence asc)`.

use rusqlite::{params_from_iter, Connection};
use serde_json::Value;

use crate::store::{now_millis, storage_err, ChatStore, StoreError, CHAT_TABLE, MESSAGE_TABLE};

/// Rows per INSERT statement; SQLite bounds host parameters per statement.
const INSERT_CHUNK: usize = 50;

const COLUMNS: &str = "message_id, chat_id, role, type, props, sequence, request_id, \
     block_id, thread_id, assistant_id, connector, mode, metadata, created_at, updated_at, \
     deleted_at";
const COLUMN_COUNT: usize = 16;

/// One persisted message row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageRecord {
    /// Generated when empty.
    pub message_id: String,
    pub chat_id: String,
    pub role: String,
    /// The `type` column.
    pub kind: String,
    pub props: Value,
    pub sequence: i64,
    pub request_id: Option<String>,
    pub block_id: Option<String>,
    pub thread_id: Option<String>,
    pub assistant_id: Option<String>,
    pub connector: Option<String>,
    pub mode: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl MessageRecord {
    pub fn new(role: impl Into<String>, kind: impl Into<String>, props: Value) -> Self {
        Self {
            role: role.into(),
            kind: kind.into(),
            props,
            ..Self::default()
        }
    }

    pub fn with_sequence(mut self, sequence: i64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Read filter for [`ChatStore::get_messages`].
#[derive(Clone, Debug, Default)]
pub struct MessageFilter {
    pub request_id: Option<String>,
    pub role: Option<String>,
    pub block_id: Option<String>,
    pub thread_id: Option<String>,
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ChatStore {
    /// Persists a batch of messages for one chat in a single insert. Every
    /// message needs role, type, and props; a missing field fails the whole
    /// batch. Also bumps the chat's `last_message_at`.
    pub async fn save_messages(
        &self,
        chat_id: &str,
        mut messages: Vec<MessageRecord>,
    ) -> Result<Vec<String>, StoreError> {
        if chat_id.is_empty() {
            return Err(StoreError::Validation("chat_id is required".to_string()));
        }
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let now = now_millis();
        for (i, message) in messages.iter_mut().enumerate() {
            if message.role.is_empty() {
                return Err(StoreError::Validation(format!("message {}: role is required", i)));
            }
            if message.kind.is_empty() {
                return Err(StoreError::Validation(format!("message {}: type is required", i)));
            }
            if message.props.is_null() {
                return Err(StoreError::Validation(format!(
                    "message {}: props is required",
                    i
                )));
            }
            if message.message_id.is_empty() {
                message.message_id = uuid::Uuid::new_v4().to_string();
            }
            message.chat_id = chat_id.to_string();
            if message.created_at == 0 {
                message.created_at = now;
            }
            if message.updated_at == 0 {
                message.updated_at = now;
            }
        }
        let ids: Vec<String> = messages.iter().map(|m| m.message_id.clone()).collect();

        let chat_id = chat_id.to_string();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path).map_err(storage_err)?;
            let tx = conn.transaction().map_err(storage_err)?;
            for chunk in messages.chunks(INSERT_CHUNK) {
                let placeholders = vec![
                    format!("({})", vec!["?"; COLUMN_COUNT].join(", "));
                    chunk.len()
                ]
                .join(", ");
                let sql = format!(
                    r#"INSERT INTO "{}" ({}) VALUES {}"#,
                    MESSAGE_TABLE, COLUMNS, placeholders
                );
                let mut values: Vec<rusqlite::types::Value> =
                    Vec::with_capacity(chunk.len() * COLUMN_COUNT);
                for m in chunk {
                    values.push(m.message_id.clone().into());
                    values.push(m.chat_id.clone().into());
                    values.push(m.role.clone().into());
                    values.push(m.kind.clone().into());
                    values.push(m.props.to_string().into());
                    values.push(m.sequence.into());
                    values.push(opt_text(&m.request_id));
                    values.push(opt_text(&m.block_id));
                    values.push(opt_text(&m.thread_id));
                    values.push(opt_text(&m.assistant_id));
                    values.push(opt_text(&m.connector));
                    values.push(opt_text(&m.mode));
                    values.push(
                        m.metadata
                            .as_ref()
                            .map(|v| rusqlite::types::Value::from(v.to_string()))
                            .unwrap_or(rusqlite::types::Value::Null),
                    );
                    values.push(m.created_at.into());
                    values.push(m.updated_at.into());
                    values.push(
                        m.deleted_at
                            .map(rusqlite::types::Value::from)
                            .unwrap_or(rusqlite::types::Value::Null),
                    );
                }
                tx.execute(&sql, params_from_iter(values)).map_err(storage_err)?;
            }
            tx.execute(
                &format!(
                    r#"UPDATE "{}" SET last_message_at = ?1, updated_at = ?1 WHERE chat_id = ?2"#,
                    CHAT_TABLE
                ),
                rusqlite::params![now, chat_id],
            )
            .map_err(storage_err)?;
            tx.commit().map_err(storage_err)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage_err)??;

        Ok(ids)
    }

    /// Non-deleted messages for a chat, filtered and ordered by
    /// `(created_at asc, sequence asc)`. With only an offset, an implicit
    /// large limit keeps the query valid on strict dialects.
    pub async fn get_messages(
        &self,
        chat_id: &str,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let chat_id = chat_id.to_string();
        let filter = filter.clone();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let mut sql = format!(
                r#"SELECT {} FROM "{}" WHERE chat_id = ? AND deleted_at IS NULL"#,
                COLUMNS, MESSAGE_TABLE
            );
            let mut values: Vec<rusqlite::types::Value> = vec![chat_id.into()];
            for (column, value) in [
                ("request_id", &filter.request_id),
                ("role", &filter.role),
                ("block_id", &filter.block_id),
                ("thread_id", &filter.thread_id),
                ("type", &filter.kind),
            ] {
                if let Some(v) = value {
                    sql.push_str(&format!(" AND {} = ?", column));
                    values.push(v.clone().into());
                }
            }
            sql.push_str(" ORDER BY created_at ASC, sequence ASC");
            match (filter.limit, filter.offset) {
                (Some(limit), Some(offset)) => {
                    sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
                }
                (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
                (None, Some(offset)) => {
                    sql.push_str(&format!(" LIMIT 999999999 OFFSET {}", offset));
                }
                (None, None) => {}
            }

            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(params_from_iter(values), row_to_message)
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
        .await
        .map_err(storage_err)?
    }

    /// Soft delete: stamps `deleted_at` and `updated_at`. Unknown or already
    /// deleted ids are silently skipped.
    pub async fn delete_messages(
        &self,
        chat_id: &str,
        message_ids: &[String],
    ) -> Result<(), StoreError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let chat_id = chat_id.to_string();
        let message_ids = message_ids.to_vec();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let now = now_millis();
            let placeholders = vec!["?"; message_ids.len()].join(", ");
            let sql = format!(
                r#"UPDATE "{}" SET deleted_at = ?, updated_at = ?
                   WHERE chat_id = ? AND deleted_at IS NULL AND message_id IN ({})"#,
                MESSAGE_TABLE, placeholders
            );
            let mut values: Vec<rusqlite::types::Value> =
                vec![now.into(), now.into(), chat_id.into()];
            values.extend(message_ids.into_iter().map(rusqlite::types::Value::from));
            conn.execute(&sql, params_from_iter(values)).map_err(storage_err)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage_err)?
    }
}

fn opt_text(value: &Option<String>) -> rusqlite::types::Value {
    value
        .as_ref()
        .map(|v| rusqlite::types::Value::from(v.clone()))
        .unwrap_or(rusqlite::types::Value::Null)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRecord, rusqlite::Error> {
    let props: String = row.get(4)?;
    let metadata: Option<String> = row.get(12)?;
    Ok(MessageRecord {
        message_id: row.get(0)?,
        chat_id: row.get(1)?,
        role: row.get(2)?,
        kind: row.get(3)?,
        props: serde_json::from_str(&props).unwrap_or(Value::Null),
        sequence: row.get(5)?,
        request_id: row.get(6)?,
        block_id: row.get(7)?,
        thread_id: row.get(8)?,
        assistant_id: row.get(9)?,
        connector: row.get(10)?,
        mode: row.get(11)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        deleted_at: row.get(15)?,
    })
}
