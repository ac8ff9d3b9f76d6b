use serde_json::json;

use crate::report::ReportError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn report_err(id: &str, e: ReportError) -> serde_json::Value {
    if let ReportError::Query(_) | ReportError::Store(_) = e {
        tracing::error!(request = id, error = %e, "report load failed");
    }
    err(id, e.code(), e.to_string(), None)
}
