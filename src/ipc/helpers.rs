use crate::ipc::error::err;
use crate::ipc::types::Request;
use rusqlite::{Connection, OptionalExtension};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let v = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))?;
    if v.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(v)
}

/// Absent, null and blank strings all read as `None`.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must be string or null", key),
                    None,
                ));
            };
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
    }
}

/// Takes the connection field rather than the whole state, so callers can still write other
/// `AppState` fields while holding it.
pub fn db_conn<'a>(
    db: &'a Option<Connection>,
    req: &Request,
) -> Result<&'a Connection, serde_json::Value> {
    db.as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Fails with `not_found` unless `SELECT 1 FROM {table} WHERE id = ?` finds a row.
pub fn require_row(
    conn: &Connection,
    req: &Request,
    table: &str,
    id: &str,
) -> Result<(), serde_json::Value> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn
        .query_row(&sql, [id], |r| r.get(0))
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if found.is_none() {
        return Err(err(
            &req.id,
            "not_found",
            format!("{} not found", table.trim_end_matches('s')),
            Some(serde_json::json!({ "id": id })),
        ));
    }
    Ok(())
}
