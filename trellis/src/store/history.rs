//! Conversation history rows with TTL.
//!
//! History rows carry `expired_at`; the hourly sweeper owned by
//! [`ChatStore`] deletes rows whose deadline has passed. Saving applies the
//! store's configured TTL.

use std::path::PathBuf;

use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;

use crate::store::{now_millis, storage_err, ChatStore, StoreError, HISTORY_TABLE};

/// One conversation history row.
#[derive(Clone, Debug, Default)]
pub struct HistoryRecord {
    /// Session id.
    pub sid: String,
    /// Chat id.
    pub cid: Option<String>,
    /// User id.
    pub uid: Option<String>,
    pub role: String,
    pub name: Option<String>,
    pub content: String,
    pub context: Option<Value>,
    pub assistant_id: Option<String>,
    pub assistant_name: Option<String>,
    pub assistant_avatar: Option<String>,
    pub mentions: Option<Value>,
    pub silent: bool,
    pub created_at: i64,
    pub updated_at: Option<i64>,
    pub expired_at: Option<i64>,
}

impl HistoryRecord {
    pub fn new(sid: impl Into<String>, role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            role: role.into(),
            content: content.into(),
            ..Self::default()
        }
    }
}

impl ChatStore {
    /// Saves history rows, stamping `expired_at` from the configured TTL.
    pub async fn save_history(&self, records: Vec<HistoryRecord>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        for (i, record) in records.iter().enumerate() {
            if record.sid.is_empty() {
                return Err(StoreError::Validation(format!("history {}: sid is required", i)));
            }
            if record.role.is_empty() {
                return Err(StoreError::Validation(format!(
                    "history {}: role is required",
                    i
                )));
            }
        }
        let ttl_millis = self.history_ttl().map(|d| d.as_millis() as i64);
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path).map_err(storage_err)?;
            let tx = conn.transaction().map_err(storage_err)?;
            let now = now_millis();
            for record in records {
                let created_at = if record.created_at > 0 { record.created_at } else { now };
                let expired_at = record
                    .expired_at
                    .or_else(|| ttl_millis.map(|ttl| created_at + ttl));
                tx.execute(
                    &format!(
                        r#"
                        INSERT INTO "{HISTORY_TABLE}"
                            (sid, cid, uid, role, name, content, context, assistant_id,
                             assistant_name, assistant_avatar, mentions, silent,
                             created_at, updated_at, expired_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                        "#
                    ),
                    params![
                        record.sid,
                        record.cid,
                        record.uid,
                        record.role,
                        record.name,
                        record.content,
                        record.context.as_ref().map(|v| v.to_string()),
                        record.assistant_id,
                        record.assistant_name,
                        record.assistant_avatar,
                        record.mentions.as_ref().map(|v| v.to_string()),
                        record.silent as i64,
                        created_at,
                        record.updated_at.unwrap_or(now),
                        expired_at,
                    ],
                )
                .map_err(storage_err)?;
            }
            tx.commit().map_err(storage_err)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage_err)?
    }

    /// History for a session, oldest first, optionally narrowed to one chat.
    /// Excludes silent rows unless `silent` is set.
    pub async fn get_history(
        &self,
        sid: &str,
        cid: Option<&str>,
        silent: bool,
        limit: Option<u32>,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        let sid = sid.to_string();
        let cid = cid.map(String::from);
        let limit = limit.unwrap_or(100).min(1000);
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let mut sql = format!(
                r#"
                SELECT sid, cid, uid, role, name, content, context, assistant_id,
                       assistant_name, assistant_avatar, mentions, silent,
                       created_at, updated_at, expired_at
                FROM "{HISTORY_TABLE}"
                WHERE sid = ? AND (expired_at IS NULL OR expired_at > ?)
                "#
            );
            let now = now_millis();
            let mut values: Vec<rusqlite::types::Value> = vec![sid.into(), now.into()];
            if let Some(cid) = cid {
                sql.push_str(" AND cid = ?");
                values.push(cid.into());
            }
            if !silent {
                sql.push_str(" AND silent = 0");
            }
            sql.push_str(&format!(" ORDER BY id ASC LIMIT {}", limit));

            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(params_from_iter(values), row_to_history)
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
        .await
        .map_err(storage_err)?
    }

    /// Deletes expired history rows immediately. The hourly sweeper calls
    /// the same deletion.
    pub async fn sweep_history(&self) -> Result<usize, StoreError> {
        sweep_expired(self.path()).await
    }
}

/// Deletes rows whose `expired_at` has passed. Used by the sweeper task.
pub(crate) async fn sweep_expired(db_path: PathBuf) -> Result<usize, StoreError> {
    tokio::task::spawn_blocking(move || {
        let conn = Connection::open(&db_path).map_err(storage_err)?;
        let removed = conn
            .execute(
                &format!(
                    r#"DELETE FROM "{HISTORY_TABLE}" WHERE expired_at IS NOT NULL AND expired_at <= ?1"#
                ),
                params![now_millis()],
            )
            .map_err(storage_err)?;
        Ok::<usize, StoreError>(removed)
    })
    .await
    .map_err(storage_err)?
}

fn row_to_history(row: &rusqlite::Row<'_>) -> Result<HistoryRecord, rusqlite::Error> {
    let context: Option<String> = row.get(6)?;
    let mentions: Option<String> = row.get(10)?;
    Ok(HistoryRecord {
        sid: row.get(0)?,
        cid: row.get(1)?,
        uid: row.get(2)?,
        role: row.get(3)?,
        name: row.get(4)?,
        content: row.get(5)?,
        context: context.and_then(|v| serde_json::from_str(&v).ok()),
        assistant_id: row.get(7)?,
        assistant_name: row.get(8)?,
        assistant_avatar: row.get(9)?,
        mentions: mentions.and_then(|v| serde_json::from_str(&v).ok()),
        silent: row.get::<_, i64>(11)? != 0,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        expired_at: row.get(14)?,
    })
}
