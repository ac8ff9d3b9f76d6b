use crate::calc::{
    self, Division, DivisionPolicy, DivisionResult, ExamResult, ExamSession, Question, Subject,
    SubjectPerformance,
};
use crate::comments::{self, CommentRecord};
use crate::remarks::{self, RemarkTemplates};
use crate::source::{self, GradeRow, StudentRow, TermRow};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("no school is linked to this workspace; complete setup first")]
    SchoolNotConfigured,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("comment store failed: {0}")]
    Store(#[from] anyhow::Error),
}

impl ReportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchoolNotConfigured => "school_not_configured",
            Self::NotFound(_) => "not_found",
            Self::Query(_) => "db_query_failed",
            Self::Store(_) => "comment_store_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSelection {
    pub school_id: String,
    pub grade_id: String,
    pub term_id: String,
    pub registration_id: String,
}

impl ReportSelection {
    pub fn cache_key(&self) -> String {
        comments::cache_key(
            &self.school_id,
            &self.grade_id,
            &self.term_id,
            &self.registration_id,
        )
    }
}

/// Everything the engine needs for one grade and term.
#[derive(Debug, Clone, Default)]
pub struct ReportRows {
    pub subjects: Vec<Subject>,
    pub sessions: Vec<ExamSession>,
    pub questions: Vec<Question>,
    pub results: Vec<ExamResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectReport {
    #[serde(flatten)]
    pub performance: SubjectPerformance,
    pub grade: u8,
    pub grade_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedTerm {
    pub subjects: Vec<SubjectReport>,
    pub overall_percentage: f64,
    pub division: DivisionResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student: StudentRow,
    pub grade: GradeRow,
    pub term: TermRow,
    #[serde(flatten)]
    pub graded: GradedTerm,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Ready(StudentReport),
    /// The term has no exam sessions; nothing was aggregated.
    NoData {
        student: StudentRow,
        grade: GradeRow,
        term: TermRow,
    },
}

/// Aggregate, classify and divide one student's term. Pure.
pub fn grade_term(student_id: &str, rows: &ReportRows, policy: DivisionPolicy) -> GradedTerm {
    let performance = calc::aggregate_subject_performance(
        student_id,
        &rows.subjects,
        &rows.sessions,
        &rows.questions,
        &rows.results,
    );
    let overall_percentage = calc::overall_percentage(&performance);

    let subjects: Vec<SubjectReport> = performance
        .into_iter()
        .map(|p| {
            let grade = calc::classify_subject_grade(p.term_percentage);
            SubjectReport {
                performance: p,
                grade,
                grade_code: calc::grade_code(grade),
            }
        })
        .collect();

    let named: Vec<(&str, u8)> = subjects
        .iter()
        .map(|s| (s.performance.subject_name.as_str(), s.grade))
        .collect();
    let division = calc::classify_division(&named, policy);

    GradedTerm {
        subjects,
        overall_percentage,
        division,
    }
}

fn load_scope(
    conn: &Connection,
    school_id: &str,
    grade_id: &str,
    term_id: &str,
) -> Result<(GradeRow, TermRow), ReportError> {
    if !source::school_exists(conn, school_id)? {
        return Err(ReportError::NotFound("school"));
    }
    let grade = source::grade(conn, school_id, grade_id)?.ok_or(ReportError::NotFound("grade"))?;
    let term = source::term(conn, school_id, term_id)?.ok_or(ReportError::NotFound("term"))?;
    Ok((grade, term))
}

fn load_rows(
    conn: &Connection,
    grade_id: &str,
    sessions: Vec<ExamSession>,
    student_ids: &[String],
) -> Result<ReportRows, ReportError> {
    let session_ids: Vec<String> = sessions.iter().map(|s| s.id.clone()).collect();
    Ok(ReportRows {
        subjects: source::subjects_for_grade(conn, grade_id)?,
        questions: source::questions_for_sessions(conn, grade_id, &session_ids)?,
        results: source::results_for_sessions(conn, student_ids, &session_ids)?,
        sessions,
    })
}

pub fn load_student_report(
    conn: &Connection,
    selection: &ReportSelection,
    policy: DivisionPolicy,
) -> Result<LoadOutcome, ReportError> {
    let (grade, term) = load_scope(
        conn,
        &selection.school_id,
        &selection.grade_id,
        &selection.term_id,
    )?;
    let student =
        source::student_by_registration(conn, &selection.school_id, &selection.registration_id)?
            .filter(|s| s.grade_id == grade.id)
            .ok_or(ReportError::NotFound("student"))?;

    let sessions = source::sessions_for_term(conn, &term.id)?;
    if sessions.is_empty() {
        return Ok(LoadOutcome::NoData {
            student,
            grade,
            term,
        });
    }

    let rows = load_rows(conn, &grade.id, sessions, &[student.id.clone()])?;
    let graded = grade_term(&student.id, &rows, policy);
    tracing::debug!(
        registration_id = %student.registration_id,
        subjects = graded.subjects.len(),
        aggregate = graded.division.aggregate,
        "graded student term"
    );
    Ok(LoadOutcome::Ready(StudentReport {
        student,
        grade,
        term,
        graded,
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStanding {
    pub student: StudentRow,
    pub overall_percentage: f64,
    pub aggregate: u32,
    pub division: Division,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub grade: GradeRow,
    pub term: TermRow,
    pub students: Vec<ClassStanding>,
}

fn standing_order(a: &ClassStanding, b: &ClassStanding) -> Ordering {
    a.division
        .cmp(&b.division)
        .then(a.aggregate.cmp(&b.aggregate))
        .then(
            b.overall_percentage
                .partial_cmp(&a.overall_percentage)
                .unwrap_or(Ordering::Equal),
        )
}

/// Orders by division, then aggregate, then overall percentage (higher first).
/// Equal keys share a position; the next distinct key skips ahead.
pub fn rank_standings(mut standings: Vec<ClassStanding>) -> Vec<ClassStanding> {
    standings.sort_by(|a, b| {
        standing_order(a, b).then_with(|| a.student.display_name.cmp(&b.student.display_name))
    });
    for i in 0..standings.len() {
        let position = match i.checked_sub(1).and_then(|p| standings.get(p)) {
            Some(prev) if standing_order(prev, &standings[i]) == Ordering::Equal => prev.position,
            _ => i + 1,
        };
        standings[i].position = position;
    }
    standings
}

pub fn load_class_summary(
    conn: &Connection,
    school_id: &str,
    grade_id: &str,
    term_id: &str,
    policy: DivisionPolicy,
) -> Result<Option<ClassSummary>, ReportError> {
    let (grade, term) = load_scope(conn, school_id, grade_id, term_id)?;
    let sessions = source::sessions_for_term(conn, &term.id)?;
    if sessions.is_empty() {
        return Ok(None);
    }
    let students = source::students_for_grade(conn, &grade.id)?;
    let student_ids: Vec<String> = students.iter().map(|s| s.id.clone()).collect();
    let rows = load_rows(conn, &grade.id, sessions, &student_ids)?;

    let standings = students
        .into_iter()
        .map(|student| {
            let graded = grade_term(&student.id, &rows, policy);
            ClassStanding {
                student,
                overall_percentage: calc::round_off_1_decimal(graded.overall_percentage),
                aggregate: graded.division.aggregate,
                division: graded.division.division,
                position: 0,
            }
        })
        .collect();

    Ok(Some(ClassSummary {
        grade,
        term,
        students: rank_standings(standings),
    }))
}

/// Report page state: the open selection, its computed report and its comments.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportContext {
    pub selection: Option<ReportSelection>,
    pub report: Option<StudentReport>,
    pub comments: CommentRecord,
}

#[derive(Debug, Clone)]
pub enum ReportAction {
    Loaded {
        selection: ReportSelection,
        report: Option<StudentReport>,
        cached: Option<CommentRecord>,
        auto_fill: bool,
    },
    SetSubjectComment {
        subject_id: String,
        text: String,
    },
    SetClassTeacherComment(String),
    SetHeadTeacherComment(String),
    AutoFillMissing,
    AutoFillAll,
    Clear,
}

pub fn reduce(
    ctx: &ReportContext,
    action: ReportAction,
    templates: &RemarkTemplates,
) -> ReportContext {
    let mut next = ctx.clone();
    match action {
        ReportAction::Loaded {
            selection,
            report,
            cached,
            auto_fill,
        } => {
            let comments = match cached {
                Some(record) => record,
                None if ctx.selection.as_ref() == Some(&selection) => ctx.comments.clone(),
                None => CommentRecord::default(),
            };
            next = ReportContext {
                selection: Some(selection),
                report,
                comments,
            };
            if auto_fill {
                fill_subject_comments(&mut next, templates, false);
            }
        }
        ReportAction::SetSubjectComment { subject_id, text } => {
            next.comments.subject_comments.insert(subject_id, text);
        }
        ReportAction::SetClassTeacherComment(text) => {
            next.comments.class_teacher_comment = text;
        }
        ReportAction::SetHeadTeacherComment(text) => {
            next.comments.head_teacher_comment = text;
        }
        ReportAction::AutoFillMissing => fill_subject_comments(&mut next, templates, false),
        ReportAction::AutoFillAll => {
            fill_subject_comments(&mut next, templates, true);
            fill_overall_comments(&mut next, templates);
        }
        ReportAction::Clear => {
            next.comments = CommentRecord::default();
        }
    }
    next
}

fn fill_subject_comments(ctx: &mut ReportContext, templates: &RemarkTemplates, overwrite: bool) {
    let (Some(selection), Some(report)) = (ctx.selection.as_ref(), ctx.report.as_ref()) else {
        return;
    };
    for subject in &report.graded.subjects {
        let p = &subject.performance;
        if !overwrite && !ctx.comments.subject_comment(&p.subject_id).is_empty() {
            continue;
        }
        let key =
            remarks::subject_stable_key(&selection.registration_id, &p.subject_id, p.term_percentage);
        let text =
            remarks::select_subject_comment(templates, &p.subject_name, p.term_percentage, &key);
        ctx.comments
            .subject_comments
            .insert(p.subject_id.clone(), text);
    }
}

fn fill_overall_comments(ctx: &mut ReportContext, templates: &RemarkTemplates) {
    let Some(report) = ctx.report.as_ref() else {
        return;
    };
    let division = report.graded.division.division;
    let pct = report.graded.overall_percentage;
    ctx.comments.class_teacher_comment =
        remarks::select_class_teacher_comment(templates, division, pct);
    ctx.comments.head_teacher_comment =
        remarks::select_head_teacher_comment(templates, division, pct);
}
