use crate::calc::SessionType;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, require_row, required_str};
use crate::ipc::types::{AppState, Request};
use crate::source;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn insert_failed(req: &Request, table: &str, e: rusqlite::Error) -> serde_json::Value {
    err(
        &req.id,
        "db_insert_failed",
        e.to_string(),
        Some(json!({ "table": table })),
    )
}

fn next_sort_order(conn: &Connection, sql: &str, parent_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(sql, [parent_id], |r| r.get::<_, i64>(0))
}

fn handle_schools_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT
           s.id,
           s.name,
           (SELECT COUNT(*) FROM grades g WHERE g.school_id = s.id) AS grade_count,
           (SELECT COUNT(*) FROM students st WHERE st.school_id = s.id) AS student_count
         FROM schools s
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "gradeCount": row.get::<_, i64>(2)?,
                "studentCount": row.get::<_, i64>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(schools) => ok(&req.id, json!({ "schools": schools })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_schools_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO schools(id, name) VALUES(?, ?)",
        (&school_id, &name),
    ) {
        return insert_failed(req, "schools", e);
    }
    ok(&req.id, json!({ "schoolId": school_id, "name": name }))
}

fn handle_grades_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (school_id, name, description) = match (|| {
        Ok::<_, serde_json::Value>((
            required_str(req, "schoolId")?,
            required_str(req, "name")?,
            optional_str(req, "description")?,
        ))
    })() {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_row(conn, req, "schools", &school_id) {
        return e;
    }
    let sort_order = match next_sort_order(
        conn,
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM grades WHERE school_id = ?",
        &school_id,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let grade_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grades(id, school_id, name, description, sort_order) VALUES(?, ?, ?, ?, ?)",
        (&grade_id, &school_id, &name, &description, sort_order),
    ) {
        return insert_failed(req, "grades", e);
    }
    ok(&req.id, json!({ "gradeId": grade_id, "name": name }))
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, description FROM grades WHERE school_id = ? ORDER BY sort_order, name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&school_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "description": row.get::<_, Option<String>>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (grade_id, name, code) = match (|| {
        Ok::<_, serde_json::Value>((
            required_str(req, "gradeId")?,
            required_str(req, "name")?,
            optional_str(req, "code")?,
        ))
    })() {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_row(conn, req, "grades", &grade_id) {
        return e;
    }
    let sort_order = match next_sort_order(
        conn,
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM subjects WHERE grade_id = ?",
        &grade_id,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, grade_id, name, code, sort_order) VALUES(?, ?, ?, ?, ?)",
        (&subject_id, &grade_id, &name, &code, sort_order),
    ) {
        return insert_failed(req, "subjects", e);
    }
    ok(&req.id, json!({ "subjectId": subject_id, "name": name }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match source::subjects_for_grade(conn, &grade_id) {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_name = match optional_str(req, "teacherName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_row(conn, req, "subjects", &subject_id) {
        return e;
    }
    let res = match &teacher_name {
        Some(name) => conn.execute(
            "INSERT INTO teacher_subjects(id, subject_id, teacher_name) VALUES(?, ?, ?)
             ON CONFLICT(subject_id) DO UPDATE SET teacher_name = excluded.teacher_name",
            (Uuid::new_v4().to_string(), &subject_id, name),
        ),
        // Clearing the name removes the assignment.
        None => conn.execute(
            "DELETE FROM teacher_subjects WHERE subject_id = ?",
            [&subject_id],
        ),
    };
    if let Err(e) = res {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "teacher_subjects" })),
        );
    }
    ok(
        &req.id,
        json!({ "subjectId": subject_id, "teacherName": teacher_name }),
    )
}

fn handle_terms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (school_id, name) = match (|| {
        Ok::<_, serde_json::Value>((required_str(req, "schoolId")?, required_str(req, "name")?))
    })() {
        Ok(v) => v,
        Err(e) => return e,
    };
    let year = match req.params.get("year") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_i64() {
            Some(y) if (1900..=2200).contains(&y) => Some(y),
            _ => return err(&req.id, "bad_params", "year must be an integer year", None),
        },
    };
    if let Err(e) = require_row(conn, req, "schools", &school_id) {
        return e;
    }
    let term_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO terms(id, school_id, name, year) VALUES(?, ?, ?, ?)",
        (&term_id, &school_id, &name, year),
    ) {
        return insert_failed(req, "terms", e);
    }
    ok(&req.id, json!({ "termId": term_id, "name": name }))
}

fn handle_terms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, year FROM terms WHERE school_id = ? ORDER BY year, name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&school_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "year": row.get::<_, Option<i64>>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(terms) => ok(&req.id, json!({ "terms": terms })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (term_id, name, raw_type) = match (|| {
        Ok::<_, serde_json::Value>((
            required_str(req, "termId")?,
            required_str(req, "name")?,
            required_str(req, "sessionType")?,
        ))
    })() {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(session_type) = SessionType::parse(&raw_type) else {
        return err(
            &req.id,
            "bad_params",
            "sessionType must be one of: BOT, MOT, EOT",
            Some(json!({ "sessionType": raw_type })),
        );
    };
    if let Err(e) = require_row(conn, req, "terms", &term_id) {
        return e;
    }
    let sort_order = match next_sort_order(
        conn,
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM exam_sessions WHERE term_id = ?",
        &term_id,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let session_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO exam_sessions(id, term_id, name, session_type, sort_order) VALUES(?, ?, ?, ?, ?)",
        (&session_id, &term_id, &name, session_type.as_str(), sort_order),
    ) {
        return insert_failed(req, "exam_sessions", e);
    }
    ok(
        &req.id,
        json!({ "examSessionId": session_id, "name": name, "sessionType": session_type }),
    )
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match source::sessions_for_term(conn, &term_id) {
        Ok(sessions) => ok(&req.id, json!({ "sessions": sessions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.list" => Some(handle_schools_list(state, req)),
        "schools.create" => Some(handle_schools_create(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.create" => Some(handle_grades_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "teachers.assign" => Some(handle_teachers_assign(state, req)),
        "terms.list" => Some(handle_terms_list(state, req)),
        "terms.create" => Some(handle_terms_create(state, req)),
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.create" => Some(handle_sessions_create(state, req)),
        _ => None,
    }
}
