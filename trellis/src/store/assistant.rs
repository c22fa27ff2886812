//! Assistant catalog: upsert with generated 6-digit ids, filtered listing
//! with whitelisted field projection, locale overrides, tag aggregation, and
//! the model-id codec.
//!
//! Nested fields (tags, options, prompts, mcp, locales, …) are serialized to
//! JSON strings at the write boundary and decoded tolerantly on read: a
//! value may arrive already typed or as a JSON string.

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use tracing::warn;

use crate::i18n::I18n;
use crate::store::{now_millis, storage_err, ChatStore, StoreError, ASSISTANT_TABLE};
use crate::tool::McpServerConfig;

/// Marker separating the model slug from the assistant id in a model id.
const MODEL_ID_MARKER: &str = "-yao_";

/// Attempts at generating a unique 6-digit id before giving up.
const ID_GENERATION_ATTEMPTS: usize = 10;

/// One catalog entry.
#[derive(Clone, Debug, Default)]
pub struct Assistant {
    pub assistant_id: String,
    /// The `type` column.
    pub kind: String,
    pub name: String,
    pub avatar: Option<String>,
    pub connector: String,
    pub description: Option<String>,
    pub tags: Option<Value>,
    pub options: Option<Value>,
    pub connector_options: Option<Value>,
    pub prompts: Option<Value>,
    /// Prompt presets keyed by mode.
    pub prompt_presets: Option<Value>,
    pub modes: Option<Value>,
    pub disable_global_prompts: bool,
    pub kb: Option<Value>,
    pub database: Option<Value>,
    pub mcp: Option<Vec<McpServerConfig>>,
    pub workflow: Option<Value>,
    pub placeholder: Option<Value>,
    pub locales: Option<Value>,
    pub uses: Option<Value>,
    pub search: Option<Value>,
    pub readonly: bool,
    pub public: bool,
    pub share: Option<String>,
    pub mentionable: bool,
    pub automated: bool,
    pub built_in: bool,
    pub sort: i64,
    pub permissions: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Assistant {
    pub fn new(name: impl Into<String>, connector: impl Into<String>) -> Self {
        Self {
            kind: "assistant".to_string(),
            name: name.into(),
            connector: connector.into(),
            mentionable: true,
            sort: 9999,
            ..Self::default()
        }
    }
}

/// Listing filter with whitelisted field projection.
#[derive(Clone, Debug)]
pub struct AssistantFilter {
    pub tags: Vec<String>,
    /// Keyword search over name and description.
    pub keywords: Option<String>,
    pub kind: Option<String>,
    pub connector: Option<String>,
    pub assistant_ids: Vec<String>,
    pub mentionable: Option<bool>,
    pub automated: Option<bool>,
    pub built_in: Option<bool>,
    /// Field projection; unknown selectors are logged and dropped.
    pub select: Vec<String>,
    pub page: usize,
    pub page_size: usize,
}

impl Default for AssistantFilter {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            keywords: None,
            kind: None,
            connector: None,
            assistant_ids: Vec::new(),
            mentionable: None,
            automated: None,
            built_in: None,
            select: Vec::new(),
            page: 1,
            page_size: 20,
        }
    }
}

/// One aggregated tag with its translated label.
#[derive(Clone, Debug, PartialEq)]
pub struct AssistantTag {
    pub value: String,
    pub label: String,
}

const ALL_FIELDS: &[&str] = &[
    "assistant_id",
    "type",
    "name",
    "avatar",
    "connector",
    "description",
    "tags",
    "options",
    "connector_options",
    "prompts",
    "prompt_presets",
    "modes",
    "disable_global_prompts",
    "kb",
    "db",
    "mcp",
    "workflow",
    "placeholder",
    "locales",
    "uses",
    "search",
    "readonly",
    "public",
    "share",
    "mentionable",
    "automated",
    "built_in",
    "sort",
    "permissions",
    "created_at",
    "updated_at",
];

const DEFAULT_FIELDS: &[&str] = &[
    "assistant_id",
    "type",
    "name",
    "avatar",
    "connector",
    "description",
    "readonly",
    "built_in",
    "sort",
    "created_at",
    "updated_at",
];

/// Encodes `[prefix-]<name-lowercased-spaces-to-dashes>-<model>-yao_<assistant_id>`.
pub fn model_id(prefix: Option<&str>, name: &str, model: &str, assistant_id: &str) -> String {
    let slug = name.to_lowercase().replace(' ', "-");
    match prefix {
        Some(prefix) => format!(
            "{}-{}-{}{}{}",
            prefix, slug, model, MODEL_ID_MARKER, assistant_id
        ),
        None => format!("{}-{}{}{}", slug, model, MODEL_ID_MARKER, assistant_id),
    }
}

/// Recovers the assistant id by splitting on the last `-yao_` marker.
pub fn parse_model_id(model_id: &str) -> Option<String> {
    model_id
        .rsplit_once(MODEL_ID_MARKER)
        .map(|(_, id)| id.to_string())
        .filter(|id| !id.is_empty())
}

/// 6-digit id from the nanosecond clock, folded and shifted.
fn generate_assistant_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut h = nanos;
    h ^= h >> 33;
    h = h.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    h ^= h >> 29;
    format!("{:06}", h % 1_000_000)
}

/// Tolerant decode: accepts an already-typed value or a JSON string.
fn coerce_value(raw: Value) -> Option<Value> {
    match raw {
        Value::Null => None,
        Value::String(s) => {
            if s.is_empty() {
                None
            } else {
                serde_json::from_str(&s).ok().or(Some(Value::String(s)))
            }
        }
        other => Some(other),
    }
}

fn coerce_mcp(raw: Value) -> Option<Vec<McpServerConfig>> {
    let value = coerce_value(raw)?;
    serde_json::from_value(value).ok()
}

impl ChatStore {
    /// Upserts an assistant by id. When no id is present a 6-digit one is
    /// generated, retrying briefly on uniqueness collisions. Returns the id.
    pub async fn save_assistant(&self, assistant: Assistant) -> Result<String, StoreError> {
        if assistant.name.is_empty() {
            return Err(StoreError::Validation("name is required".to_string()));
        }
        if assistant.connector.is_empty() {
            return Err(StoreError::Validation("connector is required".to_string()));
        }

        if !assistant.assistant_id.is_empty() {
            let id = assistant.assistant_id.clone();
            self.write_assistant(assistant, true).await?;
            return Ok(id);
        }

        let mut last_err = None;
        for _ in 0..ID_GENERATION_ATTEMPTS {
            let mut candidate = assistant.clone();
            candidate.assistant_id = generate_assistant_id();
            let id = candidate.assistant_id.clone();
            match self.write_assistant(candidate, false).await {
                Ok(()) => return Ok(id),
                Err(StoreError::Validation(e)) => return Err(StoreError::Validation(e)),
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            StoreError::Storage("could not allocate an assistant id".to_string())
        }))
    }

    async fn write_assistant(&self, assistant: Assistant, upsert: bool) -> Result<(), StoreError> {
        let mcp = assistant
            .mcp
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let now = now_millis();
            let created_at = if assistant.created_at > 0 {
                assistant.created_at
            } else {
                now
            };
            let conflict_clause = if upsert {
                r#"
                ON CONFLICT (assistant_id) DO UPDATE SET
                    type = excluded.type,
                    name = excluded.name,
                    avatar = excluded.avatar,
                    connector = excluded.connector,
                    description = excluded.description,
                    tags = excluded.tags,
                    options = excluded.options,
                    connector_options = excluded.connector_options,
                    prompts = excluded.prompts,
                    prompt_presets = excluded.prompt_presets,
                    modes = excluded.modes,
                    disable_global_prompts = excluded.disable_global_prompts,
                    kb = excluded.kb,
                    db = excluded.db,
                    mcp = excluded.mcp,
                    workflow = excluded.workflow,
                    placeholder = excluded.placeholder,
                    locales = excluded.locales,
                    uses = excluded.uses,
                    search = excluded.search,
                    readonly = excluded.readonly,
                    public = excluded.public,
                    share = excluded.share,
                    mentionable = excluded.mentionable,
                    automated = excluded.automated,
                    built_in = excluded.built_in,
                    sort = excluded.sort,
                    permissions = excluded.permissions,
                    updated_at = excluded.updated_at
                "#
            } else {
                ""
            };
            let json_text = |v: &Option<Value>| v.as_ref().map(|v| v.to_string());
            conn.execute(
                &format!(
                    r#"
                    INSERT INTO "{ASSISTANT_TABLE}"
                        (assistant_id, type, name, avatar, connector, description, tags,
                         options, connector_options, prompts, prompt_presets, modes,
                         disable_global_prompts, kb, db, mcp, workflow, placeholder,
                         locales, uses, search, readonly, public, share, mentionable,
                         automated, built_in, sort, permissions, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                            ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                            ?27, ?28, ?29, ?30, ?31)
                    {conflict_clause}
                    "#
                ),
                params![
                    assistant.assistant_id,
                    assistant.kind,
                    assistant.name,
                    assistant.avatar,
                    assistant.connector,
                    assistant.description,
                    json_text(&assistant.tags),
                    json_text(&assistant.options),
                    json_text(&assistant.connector_options),
                    json_text(&assistant.prompts),
                    json_text(&assistant.prompt_presets),
                    json_text(&assistant.modes),
                    assistant.disable_global_prompts as i64,
                    json_text(&assistant.kb),
                    json_text(&assistant.database),
                    mcp,
                    json_text(&assistant.workflow),
                    json_text(&assistant.placeholder),
                    json_text(&assistant.locales),
                    json_text(&assistant.uses),
                    json_text(&assistant.search),
                    assistant.readonly as i64,
                    assistant.public as i64,
                    assistant.share,
                    assistant.mentionable as i64,
                    assistant.automated as i64,
                    assistant.built_in as i64,
                    assistant.sort,
                    json_text(&assistant.permissions),
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

    /// Filtered, projected, paginated listing ordered by
    /// `sort asc, updated_at desc`.
    pub async fn get_assistants(
        &self,
        filter: &AssistantFilter,
        locale: Option<&str>,
    ) -> Result<Vec<Assistant>, StoreError> {
        let fields = resolve_fields(&filter.select, locale.is_some());
        let filter = filter.clone();
        let locale = locale.map(String::from);
        let db_path = self.path();

        let mut assistants = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let mut sql = format!(
                r#"SELECT {} FROM "{ASSISTANT_TABLE}" WHERE 1 = 1"#,
                fields.join(", ")
            );
            let mut values: Vec<rusqlite::types::Value> = Vec::new();

            if !filter.tags.is_empty() {
                let clauses = vec!["tags LIKE ?"; filter.tags.len()].join(" OR ");
                sql.push_str(&format!(" AND ({})", clauses));
                for tag in &filter.tags {
                    values.push(format!("%\"{}\"%", tag).into());
                }
            }
            if let Some(keywords) = &filter.keywords {
                sql.push_str(" AND (name LIKE ? OR description LIKE ?)");
                let pattern = format!("%{}%", keywords);
                values.push(pattern.clone().into());
                values.push(pattern.into());
            }
            if let Some(kind) = &filter.kind {
                sql.push_str(" AND type = ?");
                values.push(kind.clone().into());
            }
            if let Some(connector) = &filter.connector {
                sql.push_str(" AND connector = ?");
                values.push(connector.clone().into());
            }
            if !filter.assistant_ids.is_empty() {
                let placeholders = vec!["?"; filter.assistant_ids.len()].join(", ");
                sql.push_str(&format!(" AND assistant_id IN ({})", placeholders));
                for id in &filter.assistant_ids {
                    values.push(id.clone().into());
                }
            }
            for (column, flag) in [
                ("mentionable", filter.mentionable),
                ("automated", filter.automated),
                ("built_in", filter.built_in),
            ] {
                if let Some(flag) = flag {
                    sql.push_str(&format!(" AND {} = ?", column));
                    values.push((flag as i64).into());
                }
            }

            sql.push_str(" ORDER BY sort ASC, updated_at DESC");
            let page = filter.page.max(1);
            sql.push_str(&format!(
                " LIMIT {} OFFSET {}",
                filter.page_size,
                (page - 1) * filter.page_size
            ));

            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| {
                    read_assistant_row(row, &fields)
                })
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
        .await
        .map_err(storage_err)??;

        if let Some(locale) = &locale {
            for assistant in &mut assistants {
                apply_locale(assistant, locale);
            }
        }
        Ok(assistants)
    }

    /// One catalog row, decoded; `NotFound` when absent.
    pub async fn get_assistant(
        &self,
        assistant_id: &str,
        fields: &[String],
        locale: Option<&str>,
    ) -> Result<Assistant, StoreError> {
        let fields = resolve_fields(fields, locale.is_some());
        let assistant_id = assistant_id.to_string();
        let locale = locale.map(String::from);
        let db_path = self.path();

        let found = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let sql = format!(
                r#"SELECT {} FROM "{ASSISTANT_TABLE}" WHERE assistant_id = ?1"#,
                fields.join(", ")
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            stmt.query_row(params![assistant_id], |row| read_assistant_row(row, &fields))
                .optional()
                .map_err(storage_err)
        })
        .await
        .map_err(storage_err)??;

        let mut assistant = found.ok_or_else(|| StoreError::NotFound("assistant".to_string()))?;
        if let Some(locale) = &locale {
            apply_locale(&mut assistant, locale);
        }
        Ok(assistant)
    }

    pub async fn delete_assistant(&self, assistant_id: &str) -> Result<(), StoreError> {
        let assistant_id = assistant_id.to_string();
        let db_path = self.path();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            conn.execute(
                &format!(r#"DELETE FROM "{ASSISTANT_TABLE}" WHERE assistant_id = ?1"#),
                params![assistant_id],
            )
            .map_err(storage_err)?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(storage_err)?
    }

    /// De-duplicated tag set across the catalog, with translated labels.
    pub async fn get_assistant_tags(
        &self,
        i18n: Option<&I18n>,
        locale: Option<&str>,
    ) -> Result<Vec<AssistantTag>, StoreError> {
        let db_path = self.path();
        let rows = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    r#"SELECT tags FROM "{ASSISTANT_TABLE}"
                       WHERE tags IS NOT NULL GROUP BY tags"#
                ))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })
        .await
        .map_err(storage_err)??;

        let mut seen = std::collections::BTreeSet::new();
        for raw in rows {
            if let Some(Value::Array(tags)) = coerce_value(Value::String(raw)) {
                for tag in tags {
                    if let Value::String(tag) = tag {
                        seen.insert(tag);
                    }
                }
            }
        }
        Ok(seen
            .into_iter()
            .map(|value| {
                let label = match (i18n, locale) {
                    (Some(i18n), Some(locale)) => {
                        i18n.translate_text(crate::i18n::GLOBAL_ASSISTANT, locale, &value)
                    }
                    _ => value.clone(),
                };
                AssistantTag { value, label }
            })
            .collect())
    }
}

/// Enforces the projection whitelist; unknown selectors are logged and
/// dropped; an empty valid set falls back to a conservative default. A
/// locale override forces name/description/locales into the query.
fn resolve_fields(select: &[String], with_locale: bool) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for field in select {
        if ALL_FIELDS.contains(&field.as_str()) {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        } else {
            warn!("unknown assistant field selector dropped: {}", field);
        }
    }
    if fields.is_empty() {
        fields = DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect();
    }
    if with_locale {
        for required in ["name", "description", "locales"] {
            if !fields.iter().any(|f| f == required) {
                fields.push(required.to_string());
            }
        }
    }
    fields
}

fn read_assistant_row(
    row: &rusqlite::Row<'_>,
    fields: &[String],
) -> Result<Assistant, rusqlite::Error> {
    let mut assistant = Assistant::default();
    for (i, field) in fields.iter().enumerate() {
        match field.as_str() {
            "assistant_id" => {
                assistant.assistant_id = row.get::<_, Option<String>>(i)?.unwrap_or_default()
            }
            "type" => assistant.kind = row.get::<_, Option<String>>(i)?.unwrap_or_default(),
            "name" => assistant.name = row.get::<_, Option<String>>(i)?.unwrap_or_default(),
            "avatar" => assistant.avatar = row.get(i)?,
            "connector" => {
                assistant.connector = row.get::<_, Option<String>>(i)?.unwrap_or_default()
            }
            "description" => assistant.description = row.get(i)?,
            "tags" => assistant.tags = json_column(row, i)?,
            "options" => assistant.options = json_column(row, i)?,
            "connector_options" => assistant.connector_options = json_column(row, i)?,
            "prompts" => assistant.prompts = json_column(row, i)?,
            "prompt_presets" => assistant.prompt_presets = json_column(row, i)?,
            "modes" => assistant.modes = json_column(row, i)?,
            "disable_global_prompts" => {
                assistant.disable_global_prompts = row.get::<_, i64>(i)? != 0
            }
            "kb" => assistant.kb = json_column(row, i)?,
            "db" => assistant.database = json_column(row, i)?,
            "mcp" => {
                assistant.mcp = row
                    .get::<_, Option<String>>(i)?
                    .and_then(|s| coerce_mcp(Value::String(s)))
            }
            "workflow" => assistant.workflow = json_column(row, i)?,
            "placeholder" => assistant.placeholder = json_column(row, i)?,
            "locales" => assistant.locales = json_column(row, i)?,
            "uses" => assistant.uses = json_column(row, i)?,
            "search" => assistant.search = json_column(row, i)?,
            "readonly" => assistant.readonly = row.get::<_, i64>(i)? != 0,
            "public" => assistant.public = row.get::<_, i64>(i)? != 0,
            "share" => assistant.share = row.get(i)?,
            "mentionable" => assistant.mentionable = row.get::<_, i64>(i)? != 0,
            "automated" => assistant.automated = row.get::<_, i64>(i)? != 0,
            "built_in" => assistant.built_in = row.get::<_, i64>(i)? != 0,
            "sort" => assistant.sort = row.get(i)?,
            "permissions" => assistant.permissions = json_column(row, i)?,
            "created_at" => assistant.created_at = row.get(i)?,
            "updated_at" => assistant.updated_at = row.get(i)?,
            _ => {}
        }
    }
    Ok(assistant)
}

fn json_column(row: &rusqlite::Row<'_>, i: usize) -> Result<Option<Value>, rusqlite::Error> {
    Ok(row
        .get::<_, Option<String>>(i)?
        .and_then(|s| coerce_value(Value::String(s))))
}

/// Overrides name/description from the assistant's own locale map when a
/// matching entry exists.
fn apply_locale(assistant: &mut Assistant, locale: &str) {
    let Some(Value::Object(locales)) = &assistant.locales else {
        return;
    };
    let locale = locale.to_ascii_lowercase();
    let Some(Value::Object(entry)) = locales.get(&locale) else {
        return;
    };
    if let Some(Value::String(name)) = entry.get("name") {
        if !name.is_empty() {
            assistant.name = name.clone();
        }
    }
    if let Some(Value::String(description)) = entry.get("description") {
        if !description.is_empty() {
            assistant.description = Some(description.clone());
        }
    }
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

    fn full_fields() -> Vec<String> {
        ALL_FIELDS.iter().map(|f| f.to_string()).collect()
    }

    /// **Scenario**: ModelID then ParseModelID recovers the assistant id.
    #[test]
    fn model_id_roundtrip() {
        let id = model_id(None, "Code Helper", "gpt-4o", "123456");
        assert_eq!(id, "code-helper-gpt-4o-yao_123456");
        assert_eq!(parse_model_id(&id).unwrap(), "123456");

        let prefixed = model_id(Some("team"), "Code Helper", "gpt-4o", "123456");
        assert_eq!(prefixed, "team-code-helper-gpt-4o-yao_123456");
        assert_eq!(parse_model_id(&prefixed).unwrap(), "123456");

        // Split happens at the LAST marker occurrence.
        let tricky = model_id(None, "x-yao_ y", "m", "777777");
        assert_eq!(parse_model_id(&tricky).unwrap(), "777777");

        assert!(parse_model_id("no-marker-here").is_none());
    }

    #[test]
    fn generated_ids_are_six_digits() {
        for _ in 0..20 {
            let id = generate_assistant_id();
            assert_eq!(id.len(), 6);
            assert!(id.chars().all(|c| c.is_ascii_digit()));
        }
    }

    /// **Scenario**: save generates an id when absent, and upserts by id
    /// when present.
    #[tokio::test]
    async fn save_generates_and_upserts() {
        let (store, _dir) = store().await;
        let id = store
            .save_assistant(Assistant::new("Helper", "openai"))
            .await
            .unwrap();
        assert_eq!(id.len(), 6);

        let mut loaded = store.get_assistant(&id, &full_fields(), None).await.unwrap();
        assert_eq!(loaded.name, "Helper");
        assert!(loaded.mentionable);

        loaded.name = "Renamed".to_string();
        let same_id = store.save_assistant(loaded).await.unwrap();
        assert_eq!(same_id, id);
        let loaded = store.get_assistant(&id, &full_fields(), None).await.unwrap();
        assert_eq!(loaded.name, "Renamed");
    }

    #[tokio::test]
    async fn validation_requires_name_and_connector() {
        let (store, _dir) = store().await;
        let no_name = Assistant::new("", "openai");
        assert!(matches!(
            store.save_assistant(no_name).await,
            Err(StoreError::Validation(_))
        ));
        let no_connector = Assistant::new("A", "");
        assert!(matches!(
            store.save_assistant(no_connector).await,
            Err(StoreError::Validation(_))
        ));
    }

    /// **Scenario**: nested fields round-trip through their JSON string
    /// columns, including string-or-object mcp bindings.
    #[tokio::test]
    async fn nested_fields_roundtrip() {
        let (store, _dir) = store().await;
        let mut assistant = Assistant::new("Nested", "openai");
        assistant.tags = Some(json!(["coding", "search"]));
        assistant.prompts = Some(json!([{"role": "system", "content": "be brief"}]));
        assistant.prompt_presets = Some(json!({"chat": [{"role": "system"}]}));
        assistant.mcp = Some(vec![
            McpServerConfig::new("plain"),
            McpServerConfig {
                server_id: "filtered".into(),
                tools: Some(vec!["web".into()]),
                resources: None,
            },
        ]);
        assistant.placeholder = Some(json!({"title": "Ask me"}));
        let id = store.save_assistant(assistant).await.unwrap();

        let loaded = store.get_assistant(&id, &full_fields(), None).await.unwrap();
        assert_eq!(loaded.tags, Some(json!(["coding", "search"])));
        assert_eq!(
            loaded.prompts,
            Some(json!([{"role": "system", "content": "be brief"}]))
        );
        let mcp = loaded.mcp.unwrap();
        assert_eq!(mcp[0], McpServerConfig::new("plain"));
        assert_eq!(mcp[1].tools.as_deref(), Some(&["web".to_string()][..]));
    }

    #[tokio::test]
    async fn tag_and_keyword_filters() {
        let (store, _dir) = store().await;
        let mut a = Assistant::new("Coder", "openai");
        a.tags = Some(json!(["coding"]));
        let mut b = Assistant::new("Writer", "openai");
        b.tags = Some(json!(["writing"]));
        b.description = Some("writes prose".into());
        store.save_assistant(a).await.unwrap();
        store.save_assistant(b).await.unwrap();

        let coding = store
            .get_assistants(
                &AssistantFilter {
                    tags: vec!["coding".into()],
                    ..AssistantFilter::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(coding.len(), 1);
        assert_eq!(coding[0].name, "Coder");

        let by_keyword = store
            .get_assistants(
                &AssistantFilter {
                    keywords: Some("prose".into()),
                    ..AssistantFilter::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(by_keyword.len(), 1);
        assert_eq!(by_keyword[0].name, "Writer");
    }

    #[tokio::test]
    async fn ordering_and_pagination() {
        let (store, _dir) = store().await;
        for (name, sort) in [("C", 3), ("A", 1), ("B", 2)] {
            let mut assistant = Assistant::new(name, "openai");
            assistant.sort = sort;
            store.save_assistant(assistant).await.unwrap();
        }
        let all = store
            .get_assistants(&AssistantFilter::default(), None)
            .await
            .unwrap();
        let names: Vec<&str> = all.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);

        let page2 = store
            .get_assistants(
                &AssistantFilter {
                    page: 2,
                    page_size: 2,
                    ..AssistantFilter::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].name, "C");
    }

    /// **Scenario**: unknown selectors are dropped; an empty valid set falls
    /// back to the default projection.
    #[tokio::test]
    async fn projection_whitelist() {
        let (store, _dir) = store().await;
        store
            .save_assistant(Assistant::new("P", "openai"))
            .await
            .unwrap();

        let projected = store
            .get_assistants(
                &AssistantFilter {
                    select: vec!["name".into(), "drop table".into()],
                    ..AssistantFilter::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(projected[0].name, "P");
        // Unselected columns keep their defaults.
        assert!(projected[0].connector.is_empty());

        let fallback = store
            .get_assistants(
                &AssistantFilter {
                    select: vec!["nonsense".into()],
                    ..AssistantFilter::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(fallback[0].connector, "openai");
    }

    /// **Scenario**: a locale overrides name/description from the
    /// assistant's own locale map.
    #[tokio::test]
    async fn locale_overrides_name_and_description() {
        let (store, _dir) = store().await;
        let mut assistant = Assistant::new("Helper", "openai");
        assistant.description = Some("helps".into());
        assistant.locales = Some(json!({
            "zh-cn": {"name": "助手", "description": "提供帮助"}
        }));
        let id = store.save_assistant(assistant).await.unwrap();

        let localized = store
            .get_assistant(&id, &full_fields(), Some("zh-cn"))
            .await
            .unwrap();
        assert_eq!(localized.name, "助手");
        assert_eq!(localized.description.as_deref(), Some("提供帮助"));

        // Unknown locale keeps the stored values.
        let plain = store
            .get_assistant(&id, &full_fields(), Some("fr-fr"))
            .await
            .unwrap();
        assert_eq!(plain.name, "Helper");
    }

    #[tokio::test]
    async fn tags_aggregate_deduplicated() {
        let (store, _dir) = store().await;
        for tags in [json!(["a", "b"]), json!(["b", "c"])] {
            let mut assistant = Assistant::new("T", "openai");
            assistant.tags = Some(tags);
            store.save_assistant(assistant).await.unwrap();
        }
        let tags = store.get_assistant_tags(None, None).await.unwrap();
        let values: Vec<&str> = tags.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, vec!["a", "b", "c"]);

        let mut i18n = I18n::new();
        i18n.load_global("en-us", &json!({"a": "Alpha"}));
        let tags = store
            .get_assistant_tags(Some(&i18n), Some("en-us"))
            .await
            .unwrap();
        assert_eq!(tags[0].label, "Alpha");
    }

    #[tokio::test]
    async fn get_missing_assistant_is_not_found() {
        let (store, _dir) = store().await;
        assert!(matches!(
            store.get_assistant("000000", &full_fields(), None).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
