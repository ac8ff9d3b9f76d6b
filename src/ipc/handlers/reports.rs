use crate::calc::DivisionPolicy;
use crate::comments::{self, SqliteCommentStore};
use crate::ipc::error::{err, ok, report_err};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::remarks::RemarkTemplates;
use crate::report::{self, LoadOutcome, ReportAction, ReportError, ReportSelection};
use rusqlite::Connection;
use serde_json::json;

/// Explicit `schoolId`, else the school linked in setup.
fn resolve_school_id(conn: &Connection, req: &Request) -> Result<String, serde_json::Value> {
    if let Some(id) = optional_str(req, "schoolId")? {
        return Ok(id);
    }
    match setup::active_school_id(conn) {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err(report_err(&req.id, ReportError::SchoolNotConfigured)),
        Err(e) => Err(err(&req.id, "setup_load_failed", e.to_string(), None)),
    }
}

struct OpenSettings {
    policy: DivisionPolicy,
    templates: RemarkTemplates,
    auto_fill: bool,
}

fn open_settings(conn: &Connection) -> anyhow::Result<OpenSettings> {
    Ok(OpenSettings {
        policy: setup::division_policy(conn)?,
        templates: setup::remark_templates(conn)?,
        auto_fill: setup::auto_fill_on_open(conn)?,
    })
}

fn handle_report_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match resolve_school_id(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let parsed = (|| {
        Ok::<_, serde_json::Value>((
            required_str(req, "gradeId")?,
            required_str(req, "termId")?,
            required_str(req, "registrationId")?,
        ))
    })();
    let (grade_id, term_id, registration_id) = match parsed {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match open_settings(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "setup_load_failed", e.to_string(), None),
    };

    let selection = ReportSelection {
        school_id,
        grade_id,
        term_id,
        registration_id,
    };
    let outcome = match report::load_student_report(conn, &selection, settings.policy) {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, e),
    };

    let store = SqliteCommentStore::new(conn);
    let key = selection.cache_key();
    let cached = match comments::load_comments(&store, &key) {
        Ok(v) => v,
        Err(e) => return report_err(&req.id, ReportError::Store(e)),
    };
    let baseline = cached.clone().unwrap_or_default();

    let (loaded, no_data) = match outcome {
        LoadOutcome::Ready(r) => (Some(r), None),
        LoadOutcome::NoData {
            student,
            grade,
            term,
        } => (
            None,
            Some(json!({ "student": student, "grade": grade, "term": term })),
        ),
    };
    let next = report::reduce(
        &state.report,
        ReportAction::Loaded {
            selection,
            report: loaded,
            cached,
            auto_fill: settings.auto_fill,
        },
        &settings.templates,
    );
    if next.comments != baseline {
        if let Err(e) = comments::save_comments(&store, &key, &next.comments) {
            return report_err(&req.id, ReportError::Store(e));
        }
    }
    state.report = next;

    match no_data {
        Some(scope) => ok(
            &req.id,
            json!({
                "status": "noData",
                "scope": scope,
                "comments": state.report.comments
            }),
        ),
        None => ok(
            &req.id,
            json!({
                "status": "ok",
                "selection": state.report.selection,
                "report": state.report.report,
                "comments": state.report.comments
            }),
        ),
    }
}

fn handle_class_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match resolve_school_id(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let parsed = (|| {
        Ok::<_, serde_json::Value>((required_str(req, "gradeId")?, required_str(req, "termId")?))
    })();
    let (grade_id, term_id) = match parsed {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match setup::division_policy(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "setup_load_failed", e.to_string(), None),
    };

    match report::load_class_summary(conn, &school_id, &grade_id, &term_id, policy) {
        Ok(Some(summary)) => ok(&req.id, json!({ "status": "ok", "summary": summary })),
        Ok(None) => ok(&req.id, json!({ "status": "noData" })),
        Err(e) => report_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "report.open" => Some(handle_report_open(state, req)),
        "report.classSummary" => Some(handle_class_summary(state, req)),
        _ => None,
    }
}
