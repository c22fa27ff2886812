//! Search records and reference addressing.
//!
//! A search blob is stored per request with its references; a reference
//! carries a 1-based global index unique within the request, so citation
//! clicks can address it directly. Deleting a chat cascades to its searches.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{now_millis, storage_err, ChatStore, StoreError, SEARCH_TABLE};

/// One citation reference inside a search result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchReference {
    /// 1-based global index, unique within the request.
    pub index: u32,
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// One stored search execution.
#[derive(Clone, Debug, Default)]
pub struct SearchRecord {
    pub request_id: String,
    pub chat_id: String,
    pub query: String,
    pub source: Option<String>,
    pub references: Vec<SearchReference>,
    pub graph_nodes: Option<Value>,
    pub xml: Option<String>,
    pub prompt: Option<String>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

impl ChatStore {
    /// Stores the full search blob including references.
    pub async fn save_search(&self, record: &SearchRecord) -> Result<(), StoreError> {
        if record.request_id.is_empty() || record.chat_id.is_empty() {
            return Err(StoreError::Validation(
                "request_id and chat_id are required".to_string(),
            ));
        }
        let record = record.clone();
        let refs = serde_json::to_string(&record.references)?;
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            conn.execute(
                &format!(
                    r#"
                    INSERT INTO "{SEARCH_TABLE}"
                        (request_id, chat_id, query, source, refs, graph_nodes, xml,
                         prompt, duration, error, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    "#
                ),
                params![
                    record.request_id,
                    record.chat_id,
                    record.query,
                    record.source,
                    refs,
                    record.graph_nodes.as_ref().map(|v| v.to_string()),
                    record.xml,
                    record.prompt,
                    record.duration_ms,
                    record.error,
                    now_millis(),
                ],
            )
            .map_err(storage_err)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage_err)?
    }

    /// All searches stored for one request, oldest first.
    pub async fn get_searches(&self, request_id: &str) -> Result<Vec<SearchRecord>, StoreError> {
        let request_id = request_id.to_string();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    r#"
                    SELECT request_id, chat_id, query, source, refs, graph_nodes, xml,
                           prompt, duration, error
                    FROM "{SEARCH_TABLE}" WHERE request_id = ?1 ORDER BY id ASC
                    "#
                ))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![request_id], row_to_search)
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
        .await
        .map_err(storage_err)?
    }

    /// Direct reference addressing by 1-based global index within a request.
    pub async fn get_reference(
        &self,
        request_id: &str,
        index: u32,
    ) -> Result<SearchReference, StoreError> {
        let searches = self.get_searches(request_id).await?;
        searches
            .iter()
            .flat_map(|s| s.references.iter())
            .find(|r| r.index == index)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("reference {}", index)))
    }

    /// Number of search rows stored for a chat.
    pub async fn count_searches(&self, chat_id: &str) -> Result<i64, StoreError> {
        let chat_id = chat_id.to_string();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            conn.query_row(
                &format!(r#"SELECT COUNT(*) FROM "{SEARCH_TABLE}" WHERE chat_id = ?1"#),
                params![chat_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(storage_err)
            .map(|v| v.unwrap_or(0))
        })
        .await
        .map_err(storage_err)?
    }
}

fn row_to_search(row: &rusqlite::Row<'_>) -> Result<SearchRecord, rusqlite::Error> {
    let refs: Option<String> = row.get(4)?;
    let graph_nodes: Option<String> = row.get(5)?;
    Ok(SearchRecord {
        request_id: row.get(0)?,
        chat_id: row.get(1)?,
        query: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        source: row.get(3)?,
        references: refs
            .and_then(|r| serde_json::from_str(&r).ok())
            .unwrap_or_default(),
        graph_nodes: graph_nodes.and_then(|v| serde_json::from_str(&v).ok()),
        xml: row.get(6)?,
        prompt: row.get(7)?,
        duration_ms: row.get(8)?,
        error: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (ChatStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatStore::new(dir.path().join("chat.db")).unwrap();
        (store, dir)
    }

    fn record(request_id: &str, indices: &[u32]) -> SearchRecord {
        SearchRecord {
            request_id: request_id.to_string(),
            chat_id: "c1".to_string(),
            query: "rust agents".to_string(),
            source: Some("web".to_string()),
            references: indices
                .iter()
                .map(|i| SearchReference {
                    index: *i,
                    title: format!("result {}", i),
                    url: format!("https://example.com/{}", i),
                    snippet: None,
                })
                .collect(),
            duration_ms: 42,
            ..SearchRecord::default()
        }
    }

    /// **Scenario**: saved references are addressable by their 1-based
    /// global index across multiple search rows of one request.
    #[tokio::test]
    async fn reference_addressing_spans_searches() {
        let (store, _dir) = store().await;
        store.save_search(&record("r1", &[1, 2])).await.unwrap();
        store.save_search(&record("r1", &[3, 4])).await.unwrap();

        let third = store.get_reference("r1", 3).await.unwrap();
        assert_eq!(third.title, "result 3");

        assert!(matches!(
            store.get_reference("r1", 9).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn save_and_read_full_blob() {
        let (store, _dir) = store().await;
        let mut rec = record("r1", &[1]);
        rec.xml = Some("<results/>".to_string());
        rec.prompt = Some("cite your sources".to_string());
        rec.graph_nodes = Some(serde_json::json!([{"id": "n1"}]));
        store.save_search(&rec).await.unwrap();

        let loaded = store.get_searches("r1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].query, "rust agents");
        assert_eq!(loaded[0].xml.as_deref(), Some("<results/>"));
        assert_eq!(loaded[0].references, rec.references);
        assert_eq!(loaded[0].duration_ms, 42);
    }

    /// **Scenario**: deleting a chat cascades to its searches.
    #[tokio::test]
    async fn chat_delete_cascades() {
        let (store, _dir) = store().await;
        store.save_search(&record("r1", &[1])).await.unwrap();
        assert_eq!(store.count_searches("c1").await.unwrap(), 1);

        store.delete_chat("c1").await.unwrap();
        assert_eq!(store.count_searches("c1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_ids_fail_validation() {
        let (store, _dir) = store().await;
        let mut rec = record("", &[]);
        rec.chat_id = String::new();
        assert!(matches!(
            store.save_search(&rec).await,
            Err(StoreError::Validation(_))
        ));
    }
}
