//! Row loaders for the report engine.
//!
//! Every loader is scoped by school, grade, term or exam-session list the same way the report
//! pages read them. Nothing here writes.

use crate::calc::{ExamResult, ExamSession, Question, SessionType, Subject};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermRow {
    pub id: String,
    pub name: String,
    pub year: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub registration_id: String,
    pub grade_id: String,
    pub display_name: String,
}

pub fn school_exists(conn: &Connection, school_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM schools WHERE id = ?", [school_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn grade(conn: &Connection, school_id: &str, grade_id: &str) -> rusqlite::Result<Option<GradeRow>> {
    conn.query_row(
        "SELECT id, name, description FROM grades WHERE id = ? AND school_id = ?",
        (grade_id, school_id),
        |r| {
            Ok(GradeRow {
                id: r.get(0)?,
                name: r.get(1)?,
                description: r.get(2)?,
            })
        },
    )
    .optional()
}

pub fn term(conn: &Connection, school_id: &str, term_id: &str) -> rusqlite::Result<Option<TermRow>> {
    conn.query_row(
        "SELECT id, name, year FROM terms WHERE id = ? AND school_id = ?",
        (term_id, school_id),
        |r| {
            Ok(TermRow {
                id: r.get(0)?,
                name: r.get(1)?,
                year: r.get(2)?,
            })
        },
    )
    .optional()
}

/// Exam sessions of a term in BOT, MOT, EOT order, then creation order.
pub fn sessions_for_term(conn: &Connection, term_id: &str) -> rusqlite::Result<Vec<ExamSession>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, session_type
         FROM exam_sessions
         WHERE term_id = ?
         ORDER BY CASE session_type
                    WHEN 'BOT' THEN 0
                    WHEN 'MOT' THEN 1
                    WHEN 'EOT' THEN 2
                    ELSE 3
                  END,
                  sort_order",
    )?;
    let rows = stmt
        .query_map([term_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut sessions = Vec::with_capacity(rows.len());
    for (id, name, raw_type) in rows {
        let Some(session_type) = SessionType::parse(&raw_type) else {
            tracing::warn!(session_id = %id, session_type = %raw_type, "skipping session with unknown type");
            continue;
        };
        sessions.push(ExamSession {
            id,
            name,
            session_type,
        });
    }
    Ok(sessions)
}

pub fn subjects_for_grade(conn: &Connection, grade_id: &str) -> rusqlite::Result<Vec<Subject>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, t.teacher_name
         FROM subjects s
         LEFT JOIN teacher_subjects t ON t.subject_id = s.id
         WHERE s.grade_id = ?
         ORDER BY s.sort_order, s.name",
    )?;
    let subjects = stmt
        .query_map([grade_id], |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                teacher_name: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    subjects
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

pub fn questions_for_sessions(
    conn: &Connection,
    grade_id: &str,
    session_ids: &[String],
) -> rusqlite::Result<Vec<Question>> {
    if session_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, subject_id, exam_session_id, max_score
         FROM questions
         WHERE grade_id = ? AND exam_session_id IN ({})",
        placeholders(session_ids.len())
    );
    let mut bind_values: Vec<Value> = Vec::with_capacity(session_ids.len() + 1);
    bind_values.push(Value::Text(grade_id.to_string()));
    for id in session_ids {
        bind_values.push(Value::Text(id.clone()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let questions = stmt
        .query_map(params_from_iter(bind_values), |r| {
            Ok(Question {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                exam_session_id: r.get(2)?,
                max_score: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    questions
}

pub fn results_for_sessions(
    conn: &Connection,
    student_ids: &[String],
    session_ids: &[String],
) -> rusqlite::Result<Vec<ExamResult>> {
    if student_ids.is_empty() || session_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT student_id, question_id, exam_session_id, score
         FROM exam_results
         WHERE student_id IN ({}) AND exam_session_id IN ({})",
        placeholders(student_ids.len()),
        placeholders(session_ids.len())
    );
    let bind_values: Vec<Value> = student_ids
        .iter()
        .chain(session_ids.iter())
        .map(|id| Value::Text(id.clone()))
        .collect();

    let mut stmt = conn.prepare(&sql)?;
    let results = stmt
        .query_map(params_from_iter(bind_values), |r| {
            Ok(ExamResult {
                student_id: r.get(0)?,
                question_id: r.get(1)?,
                exam_session_id: r.get(2)?,
                score: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    results
}

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    let first: String = r.get(3)?;
    let last: String = r.get(4)?;
    Ok(StudentRow {
        id: r.get(0)?,
        registration_id: r.get(1)?,
        grade_id: r.get(2)?,
        display_name: format!("{}, {}", last, first),
    })
}

pub fn student_by_registration(
    conn: &Connection,
    school_id: &str,
    registration_id: &str,
) -> rusqlite::Result<Option<StudentRow>> {
    conn.query_row(
        "SELECT id, registration_id, grade_id, first_name, last_name
         FROM students
         WHERE school_id = ? AND registration_id = ?",
        (school_id, registration_id),
        student_from_row,
    )
    .optional()
}

pub fn students_for_grade(conn: &Connection, grade_id: &str) -> rusqlite::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, registration_id, grade_id, first_name, last_name
         FROM students
         WHERE grade_id = ?
         ORDER BY last_name, first_name",
    )?;
    let students = stmt
        .query_map([grade_id], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    students
}
