use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, require_row, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

fn handle_questions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let parsed = (|| {
        Ok::<_, serde_json::Value>((
            optional_str(req, "subjectId")?,
            optional_str(req, "examSessionId")?,
            optional_str(req, "label")?,
        ))
    })();
    let (subject_id, session_id, label) = match parsed {
        Ok(v) => v,
        Err(e) => return e,
    };
    let max_score = match req.params.get("maxScore").and_then(|v| v.as_f64()) {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "maxScore must be a positive number",
                None,
            )
        }
    };

    if let Err(e) = require_row(conn, req, "grades", &grade_id) {
        return e;
    }
    if let Some(id) = &subject_id {
        if let Err(e) = require_row(conn, req, "subjects", id) {
            return e;
        }
    }
    if let Some(id) = &session_id {
        if let Err(e) = require_row(conn, req, "exam_sessions", id) {
            return e;
        }
    }

    let question_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO questions(id, grade_id, subject_id, exam_session_id, label, max_score)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &question_id,
            &grade_id,
            &subject_id,
            &session_id,
            &label,
            max_score,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "questions" })),
        );
    }
    ok(
        &req.id,
        json!({ "questionId": question_id, "maxScore": max_score }),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultInput {
    student_id: String,
    #[serde(default)]
    question_id: Option<String>,
    #[serde(default)]
    exam_session_id: Option<String>,
    score: f64,
}

fn parse_result_inputs(req: &Request) -> Result<Vec<ResultInput>, serde_json::Value> {
    let raw = match req.params.get("results") {
        Some(list) => list.clone(),
        None => json!([req.params.clone()]),
    };
    let inputs: Vec<ResultInput> = serde_json::from_value(raw).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("invalid result entry: {}", e),
            None,
        )
    })?;
    if inputs.is_empty() {
        return Err(err(&req.id, "bad_params", "results must not be empty", None));
    }
    for (i, input) in inputs.iter().enumerate() {
        if !input.score.is_finite() || input.score < 0.0 {
            return Err(err(
                &req.id,
                "bad_params",
                "score must be a non-negative number",
                Some(json!({ "index": i })),
            ));
        }
        if input.question_id.is_none() && input.exam_session_id.is_none() {
            return Err(err(
                &req.id,
                "bad_params",
                "questionId or examSessionId is required",
                Some(json!({ "index": i })),
            ));
        }
    }
    Ok(inputs)
}

/// Replaces any existing score for the same (student, question, session).
fn upsert_result(conn: &Connection, input: &ResultInput) -> rusqlite::Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM exam_results
             WHERE student_id = ?
               AND question_id IS ?
               AND exam_session_id IS ?",
            (&input.student_id, &input.question_id, &input.exam_session_id),
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(id) => conn.execute(
            "UPDATE exam_results SET score = ? WHERE id = ?",
            (input.score, &id),
        )?,
        None => conn.execute(
            "INSERT INTO exam_results(id, student_id, question_id, exam_session_id, score)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &input.student_id,
                &input.question_id,
                &input.exam_session_id,
                input.score,
            ),
        )?,
    };
    Ok(())
}

fn handle_results_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let inputs = match parse_result_inputs(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    for input in &inputs {
        if let Err(e) = require_row(conn, req, "students", &input.student_id) {
            return e;
        }
        if let Some(id) = &input.question_id {
            if let Err(e) = require_row(conn, req, "questions", id) {
                return e;
            }
        }
        if let Some(id) = &input.exam_session_id {
            if let Err(e) = require_row(conn, req, "exam_sessions", id) {
                return e;
            }
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for input in &inputs {
        if let Err(e) = upsert_result(&tx, input) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "exam_results" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "upserted": inputs.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "questions.create" => Some(handle_questions_create(state, req)),
        "results.upsert" => Some(handle_results_upsert(state, req)),
        _ => None,
    }
}
