use crate::comments::{self, SqliteCommentStore};
use crate::ipc::error::{err, ok, report_err};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{db_conn, optional_str};
use crate::ipc::types::{AppState, Request};
use crate::remarks::RemarkRole;
use crate::report::{self, ReportAction, ReportError};
use serde_json::json;

fn no_report_open(req: &Request) -> serde_json::Value {
    err(
        &req.id,
        "no_report_open",
        "open a student report first",
        None,
    )
}

/// Reduces the open report with `action` and writes the resulting comments back to the cache.
fn apply(state: &mut AppState, req: &Request, action: ReportAction) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(selection) = state.report.selection.clone() else {
        return no_report_open(req);
    };
    let templates = match setup::remark_templates(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "setup_load_failed", e.to_string(), None),
    };

    let next = report::reduce(&state.report, action, &templates);
    let store = SqliteCommentStore::new(conn);
    if let Err(e) = comments::save_comments(&store, &selection.cache_key(), &next.comments) {
        return report_err(&req.id, ReportError::Store(e));
    }
    state.report = next;
    ok(&req.id, json!({ "comments": state.report.comments }))
}

fn handle_comments_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.report.selection.is_none() {
        return no_report_open(req);
    }
    ok(
        &req.id,
        json!({
            "selection": state.report.selection,
            "comments": state.report.comments
        }),
    )
}

fn handle_comments_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(text) = req.params.get("text").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing text", None);
    };
    let text = text.to_string();
    let (subject_id, role) = match (|| {
        Ok::<_, serde_json::Value>((optional_str(req, "subjectId")?, optional_str(req, "role")?))
    })() {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match role.as_deref() {
        None => RemarkRole::Subject,
        Some(raw) => match RemarkRole::parse(raw) {
            Some(r) => r,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "role must be one of: subject, classTeacher, headTeacher",
                    None,
                )
            }
        },
    };

    let action = match role {
        RemarkRole::ClassTeacher => ReportAction::SetClassTeacherComment(text),
        RemarkRole::HeadTeacher => ReportAction::SetHeadTeacherComment(text),
        RemarkRole::Subject => {
            let Some(subject_id) = subject_id else {
                return err(&req.id, "bad_params", "missing subjectId", None);
            };
            let Some(open) = state.report.report.as_ref() else {
                return no_report_open(req);
            };
            let known = open
                .graded
                .subjects
                .iter()
                .any(|s| s.performance.subject_id == subject_id);
            if !known {
                return err(
                    &req.id,
                    "not_found",
                    "subject not on this report",
                    Some(json!({ "subjectId": subject_id })),
                );
            }
            ReportAction::SetSubjectComment { subject_id, text }
        }
    };
    apply(state, req, action)
}

fn handle_comments_autofill_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.report.report.is_none() {
        return no_report_open(req);
    }
    apply(state, req, ReportAction::AutoFillAll)
}

fn handle_comments_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    apply(state, req, ReportAction::Clear)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "report.comments.get" => Some(handle_comments_get(state, req)),
        "report.comments.set" => Some(handle_comments_set(state, req)),
        "report.comments.autofillAll" => Some(handle_comments_autofill_all(state, req)),
        "report.comments.clear" => Some(handle_comments_clear(state, req)),
        _ => None,
    }
}
