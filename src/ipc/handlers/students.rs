use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_row, required_str};
use crate::ipc::types::{AppState, Request};
use crate::source;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let parsed = (|| {
        Ok::<_, serde_json::Value>((
            required_str(req, "schoolId")?,
            required_str(req, "gradeId")?,
            required_str(req, "registrationId")?,
            required_str(req, "firstName")?,
            required_str(req, "lastName")?,
        ))
    })();
    let (school_id, grade_id, registration_id, first_name, last_name) = match parsed {
        Ok(v) => v,
        Err(e) => return e,
    };

    let grade_school: Option<String> = match conn
        .query_row(
            "SELECT school_id FROM grades WHERE id = ?",
            [&grade_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match grade_school {
        None => {
            return err(
                &req.id,
                "not_found",
                "grade not found",
                Some(json!({ "id": grade_id })),
            )
        }
        Some(s) if s != school_id => {
            return err(
                &req.id,
                "bad_params",
                "grade does not belong to school",
                Some(json!({ "schoolId": school_id, "gradeId": grade_id })),
            )
        }
        Some(_) => {}
    }

    let taken = match source::student_by_registration(conn, &school_id, &registration_id) {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken {
        return err(
            &req.id,
            "duplicate_registration",
            "registration id already in use",
            Some(json!({ "registrationId": registration_id })),
        );
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, school_id, grade_id, registration_id, first_name, last_name)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &school_id,
            &grade_id,
            &registration_id,
            &first_name,
            &last_name,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "registrationId": registration_id,
            "displayName": format!("{}, {}", last_name, first_name)
        }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_row(conn, req, "grades", &grade_id) {
        return e;
    }
    match source::students_for_grade(conn, &grade_id) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        _ => None,
    }
}
