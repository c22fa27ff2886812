//! Resume records: on-failure snapshots of execution stack frames.
//!
//! Records form a tree by `stack_parent_id`; the root frame has depth 0 and
//! no parent. They are written only on failure or interrupt and deleted
//! after a successful recovery.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::store::{now_millis, storage_err, ChatStore, StoreError, RESUME_TABLE};

/// Which step of the execution stack the record snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResumeType {
    #[default]
    Input,
    HookCreate,
    Llm,
    Tool,
    HookNext,
    Delegate,
}

impl ResumeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeType::Input => "input",
            ResumeType::HookCreate => "hook_create",
            ResumeType::Llm => "llm",
            ResumeType::Tool => "tool",
            ResumeType::HookNext => "hook_next",
            ResumeType::Delegate => "delegate",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "hook_create" => ResumeType::HookCreate,
            "llm" => ResumeType::Llm,
            "tool" => ResumeType::Tool,
            "hook_next" => ResumeType::HookNext,
            "delegate" => ResumeType::Delegate,
            _ => ResumeType::Input,
        }
    }
}

/// Why the record was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResumeStatus {
    #[default]
    Failed,
    Interrupted,
}

impl ResumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeStatus::Failed => "failed",
            ResumeStatus::Interrupted => "interrupted",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "interrupted" => ResumeStatus::Interrupted,
            _ => ResumeStatus::Failed,
        }
    }
}

/// One stack-frame snapshot.
#[derive(Clone, Debug, Default)]
pub struct ResumeRecord {
    pub resume_id: String,
    pub chat_id: String,
    pub request_id: String,
    pub stack_id: String,
    pub stack_parent_id: Option<String>,
    pub stack_depth: i64,
    pub kind: ResumeType,
    pub status: ResumeStatus,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub space_snapshot: Option<Value>,
    pub error: Option<String>,
    pub sequence: i64,
    pub created_at: i64,
}

impl ResumeRecord {
    pub fn new(
        chat_id: impl Into<String>,
        request_id: impl Into<String>,
        stack_id: impl Into<String>,
        kind: ResumeType,
        status: ResumeStatus,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            request_id: request_id.into(),
            stack_id: stack_id.into(),
            kind,
            status,
            ..Self::default()
        }
    }
}

impl ChatStore {
    /// Batched insert of resume records.
    pub async fn save_resume(&self, mut records: Vec<ResumeRecord>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        for (i, record) in records.iter_mut().enumerate() {
            if record.chat_id.is_empty() || record.stack_id.is_empty() {
                return Err(StoreError::Validation(format!(
                    "resume {}: chat_id and stack_id are required",
                    i
                )));
            }
            if record.resume_id.is_empty() {
                record.resume_id = uuid::Uuid::new_v4().to_string();
            }
            if record.created_at == 0 {
                record.created_at = now_millis();
            }
        }
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path).map_err(storage_err)?;
            let tx = conn.transaction().map_err(storage_err)?;
            for record in records {
                tx.execute(
                    &format!(
                        r#"
                        INSERT INTO "{RESUME_TABLE}"
                            (resume_id, chat_id, request_id, stack_id, stack_parent_id,
                             stack_depth, type, status, input, output, space_snapshot,
                             error, sequence, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                        "#
                    ),
                    params![
                        record.resume_id,
                        record.chat_id,
                        record.request_id,
                        record.stack_id,
                        record.stack_parent_id,
                        record.stack_depth,
                        record.kind.as_str(),
                        record.status.as_str(),
                        record.input.as_ref().map(|v| v.to_string()),
                        record.output.as_ref().map(|v| v.to_string()),
                        record.space_snapshot.as_ref().map(|v| v.to_string()),
                        record.error,
                        record.sequence,
                        record.created_at,
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

    /// All resume records for a chat, ordered by sequence.
    pub async fn get_resume(&self, chat_id: &str) -> Result<Vec<ResumeRecord>, StoreError> {
        let chat_id = chat_id.to_string();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    r#"SELECT {RESUME_COLUMNS} FROM "{RESUME_TABLE}"
                       WHERE chat_id = ?1 ORDER BY sequence ASC, id ASC"#
                ))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![chat_id], row_to_resume)
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
        .await
        .map_err(storage_err)?
    }

    /// The most recent resume record for a chat.
    pub async fn get_last_resume(
        &self,
        chat_id: &str,
    ) -> Result<Option<ResumeRecord>, StoreError> {
        let chat_id = chat_id.to_string();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    r#"SELECT {RESUME_COLUMNS} FROM "{RESUME_TABLE}"
                       WHERE chat_id = ?1 ORDER BY sequence DESC, id DESC LIMIT 1"#
                ))
                .map_err(storage_err)?;
            stmt.query_row(params![chat_id], row_to_resume)
                .optional()
                .map_err(storage_err)
        })
        .await
        .map_err(storage_err)?
    }

    pub async fn get_resume_by_stack_id(
        &self,
        chat_id: &str,
        stack_id: &str,
    ) -> Result<Option<ResumeRecord>, StoreError> {
        let chat_id = chat_id.to_string();
        let stack_id = stack_id.to_string();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    r#"SELECT {RESUME_COLUMNS} FROM "{RESUME_TABLE}"
                       WHERE chat_id = ?1 AND stack_id = ?2 LIMIT 1"#
                ))
                .map_err(storage_err)?;
            stmt.query_row(params![chat_id, stack_id], row_to_resume)
                .optional()
                .map_err(storage_err)
        })
        .await
        .map_err(storage_err)?
    }

    /// Walks parent pointers from a frame to the root; returns the path
    /// ordered root → leaf.
    pub async fn get_stack_path(
        &self,
        chat_id: &str,
        stack_id: &str,
    ) -> Result<Vec<ResumeRecord>, StoreError> {
        let mut path = Vec::new();
        let mut cursor = Some(stack_id.to_string());
        while let Some(stack_id) = cursor {
            let Some(record) = self.get_resume_by_stack_id(chat_id, &stack_id).await? else {
                break;
            };
            cursor = record.stack_parent_id.clone();
            path.push(record);
            if path.len() > 1024 {
                return Err(StoreError::Storage(
                    "resume stack parent chain does not terminate".to_string(),
                ));
            }
        }
        if path.is_empty() {
            return Err(StoreError::NotFound("resume stack".to_string()));
        }
        path.reverse();
        Ok(path)
    }

    /// Clears all resume records for a chat (after a successful recovery).
    pub async fn delete_resume(&self, chat_id: &str) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            conn.execute(
                &format!(r#"DELETE FROM "{RESUME_TABLE}" WHERE chat_id = ?1"#),
                params![chat_id],
            )
            .map_err(storage_err)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage_err)?
    }
}

const RESUME_COLUMNS: &str = "resume_id, chat_id, request_id, stack_id, stack_parent_id, \
     stack_depth, type, status, input, output, space_snapshot, error, sequence, created_at";

fn row_to_resume(row: &rusqlite::Row<'_>) -> Result<ResumeRecord, rusqlite::Error> {
    let kind: String = row.get(6)?;
    let status: String = row.get(7)?;
    let parse = |s: Option<String>| s.and_then(|v| serde_json::from_str(&v).ok());
    Ok(ResumeRecord {
        resume_id: row.get(0)?,
        chat_id: row.get(1)?,
        request_id: row.get(2)?,
        stack_id: row.get(3)?,
        stack_parent_id: row.get(4)?,
        stack_depth: row.get(5)?,
        kind: ResumeType::parse(&kind),
        status: ResumeStatus::parse(&status),
        input: parse(row.get(8)?),
        output: parse(row.get(9)?),
        space_snapshot: parse(row.get(10)?),
        error: row.get(11)?,
        sequence: row.get(12)?,
        created_at: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> (ChatStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatStore::new(dir.path().join("chat.db")).unwrap();
        (store, dir)
    }

    fn frame(
        stack_id: &str,
        parent: Option<&str>,
        depth: i64,
        seq: i64,
        kind: ResumeType,
    ) -> ResumeRecord {
        let mut record = ResumeRecord::new("c1", "r1", stack_id, kind, ResumeStatus::Failed);
        record.stack_parent_id = parent.map(String::from);
        record.stack_depth = depth;
        record.sequence = seq;
        record
    }

    /// **Scenario**: save, read back in sequence order, last-resume lookup.
    #[tokio::test]
    async fn save_and_lookups() {
        let (store, _dir) = store().await;
        let mut root = frame("s-root", None, 0, 1, ResumeType::Input);
        root.input = Some(json!({"messages": ["hi"]}));
        root.space_snapshot = Some(json!({"k": "v"}));
        let llm = frame("s-llm", Some("s-root"), 1, 2, ResumeType::Llm);
        let mut tool = frame("s-tool", Some("s-llm"), 2, 3, ResumeType::Tool);
        tool.error = Some("tool timeout".into());

        store.save_resume(vec![root, llm, tool]).await.unwrap();

        let all = store.get_resume("c1").await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].stack_id, "s-root");
        assert_eq!(all[0].input, Some(json!({"messages": ["hi"]})));
        assert_eq!(all[0].space_snapshot, Some(json!({"k": "v"})));

        let last = store.get_last_resume("c1").await.unwrap().unwrap();
        assert_eq!(last.stack_id, "s-tool");
        assert_eq!(last.kind, ResumeType::Tool);
        assert_eq!(last.error.as_deref(), Some("tool timeout"));

        let by_stack = store
            .get_resume_by_stack_id("c1", "s-llm")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_stack.kind, ResumeType::Llm);
    }

    /// **Scenario**: the stack path walks parents root → leaf.
    #[tokio::test]
    async fn stack_path_root_to_leaf() {
        let (store, _dir) = store().await;
        store
            .save_resume(vec![
                frame("s-root", None, 0, 1, ResumeType::Input),
                frame("s-mid", Some("s-root"), 1, 2, ResumeType::HookCreate),
                frame("s-leaf", Some("s-mid"), 2, 3, ResumeType::Delegate),
            ])
            .await
            .unwrap();

        let path = store.get_stack_path("c1", "s-leaf").await.unwrap();
        let ids: Vec<&str> = path.iter().map(|r| r.stack_id.as_str()).collect();
        assert_eq!(ids, vec!["s-root", "s-mid", "s-leaf"]);
        assert_eq!(path[0].stack_depth, 0);
        assert!(path[0].stack_parent_id.is_none());
    }

    #[tokio::test]
    async fn stack_path_for_unknown_frame_is_not_found() {
        let (store, _dir) = store().await;
        assert!(matches!(
            store.get_stack_path("c1", "nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    /// **Scenario**: delete_resume clears the chat's records after recovery.
    #[tokio::test]
    async fn delete_clears_chat_records() {
        let (store, _dir) = store().await;
        store
            .save_resume(vec![frame("s1", None, 0, 1, ResumeType::Input)])
            .await
            .unwrap();
        store.delete_resume("c1").await.unwrap();
        assert!(store.get_resume("c1").await.unwrap().is_empty());
        assert!(store.get_last_resume("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_stack_id_fails_validation() {
        let (store, _dir) = store().await;
        let bad = ResumeRecord::new("c1", "r1", "", ResumeType::Input, ResumeStatus::Interrupted);
        assert!(matches!(
            store.save_resume(vec![bad]).await,
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn resume_ids_are_generated() {
        let (store, _dir) = store().await;
        store
            .save_resume(vec![frame("s1", None, 0, 1, ResumeType::Input)])
            .await
            .unwrap();
        let record = store
            .get_resume_by_stack_id("c1", "s1")
            .await
            .unwrap()
            .unwrap();
        assert!(!record.resume_id.is_empty());
        assert_eq!(record.status, ResumeStatus::Failed);
    }
}
