use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
#[cfg(test)]
use std::{cell::RefCell, collections::HashMap};

/// Separator between the parts of a comment cache key.
pub const CACHE_KEY_DELIMITER: &str = "::";

/// Per-student report comments for one (school, grade, term).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    #[serde(default)]
    pub subject_comments: BTreeMap<String, String>,
    #[serde(default)]
    pub class_teacher_comment: String,
    #[serde(default)]
    pub head_teacher_comment: String,
}

impl CommentRecord {
    pub fn subject_comment(&self, subject_id: &str) -> &str {
        self.subject_comments
            .get(subject_id)
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

/// String key/value capability the comment cache is written through.
pub trait CommentStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

pub fn cache_key(school_id: &str, grade_id: &str, term_id: &str, registration_id: &str) -> String {
    [school_id, grade_id, term_id, registration_id].join(CACHE_KEY_DELIMITER)
}

/// Reads a cached record. A payload that does not parse is treated as absent.
pub fn load_comments(store: &dyn CommentStore, key: &str) -> anyhow::Result<Option<CommentRecord>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str::<CommentRecord>(&raw) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring malformed cached comments");
            Ok(None)
        }
    }
}

pub fn save_comments(
    store: &dyn CommentStore,
    key: &str,
    record: &CommentRecord,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(record)?;
    store.set(key, &raw)
}

pub struct SqliteCommentStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCommentStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl CommentStore for SqliteCommentStore<'_> {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let raw = self
            .conn
            .query_row(
                "SELECT payload FROM comment_cache WHERE cache_key = ?",
                [key],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(raw)
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO comment_cache(cache_key, payload, updated_at) VALUES(?, ?, ?)
             ON CONFLICT(cache_key) DO UPDATE SET
               payload = excluded.payload,
               updated_at = excluded.updated_at",
            (key, value, now),
        )?;
        Ok(())
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryCommentStore {
    entries: RefCell<HashMap<String, String>>,
}

#[cfg(test)]
impl CommentStore for MemoryCommentStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
