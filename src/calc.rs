use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of best (lowest-numbered) subject grades that make up the aggregate.
pub const BEST_SUBJECT_COUNT: usize = 4;

/// One-decimal display rounding: `floor(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionType {
    Bot,
    Mot,
    Eot,
}

impl SessionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BOT" => Some(Self::Bot),
            "MOT" => Some(Self::Mot),
            "EOT" => Some(Self::Eot),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bot => "BOT",
            Self::Mot => "MOT",
            Self::Eot => "EOT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExamResult {
    pub student_id: String,
    pub question_id: Option<String>,
    pub exam_session_id: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: String,
    pub subject_id: Option<String>,
    pub exam_session_id: Option<String>,
    pub max_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub teacher_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSession {
    pub id: String,
    pub name: String,
    pub session_type: SessionType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionScore {
    pub session_id: String,
    pub session_name: String,
    pub session_type: SessionType,
    pub achieved: f64,
    pub possible: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPerformance {
    pub subject_id: String,
    pub subject_name: String,
    pub teacher_name: Option<String>,
    pub sessions: Vec<SessionScore>,
    pub term_percentage: f64,
}

impl SubjectPerformance {
    /// True when at least one session had questions with a non-zero maximum.
    pub fn has_data(&self) -> bool {
        self.sessions.iter().any(|s| s.possible > 0.0)
    }
}

/// Reduces raw per-question results for one student into per-subject, per-session totals.
///
/// `sessions` must already be in precedence order; the output keeps that order. Questions
/// without a subject or session, and results without a question or session, are skipped.
pub fn aggregate_subject_performance(
    student_id: &str,
    subjects: &[Subject],
    sessions: &[ExamSession],
    questions: &[Question],
    results: &[ExamResult],
) -> Vec<SubjectPerformance> {
    let mut question_pair: HashMap<&str, (&str, &str)> = HashMap::new();
    let mut possible_by_pair: HashMap<(&str, &str), f64> = HashMap::new();
    for q in questions {
        let (Some(subject_id), Some(session_id)) =
            (q.subject_id.as_deref(), q.exam_session_id.as_deref())
        else {
            continue;
        };
        question_pair.insert(q.id.as_str(), (session_id, subject_id));
        *possible_by_pair.entry((session_id, subject_id)).or_insert(0.0) += q.max_score;
    }

    let mut achieved_by_pair: HashMap<(&str, &str), f64> = HashMap::new();
    for r in results {
        if r.student_id != student_id || r.exam_session_id.is_none() {
            continue;
        }
        let Some(question_id) = r.question_id.as_deref() else {
            continue;
        };
        let Some(pair) = question_pair.get(question_id) else {
            continue;
        };
        *achieved_by_pair.entry(*pair).or_insert(0.0) += r.score;
    }

    subjects
        .iter()
        .map(|subject| {
            let mut sum_achieved = 0.0_f64;
            let mut sum_possible = 0.0_f64;
            let per_session: Vec<SessionScore> = sessions
                .iter()
                .map(|session| {
                    let key = (session.id.as_str(), subject.id.as_str());
                    let achieved = achieved_by_pair.get(&key).copied().unwrap_or(0.0);
                    let possible = possible_by_pair.get(&key).copied().unwrap_or(0.0);
                    let percentage = if possible > 0.0 {
                        sum_achieved += achieved;
                        sum_possible += possible;
                        achieved / possible * 100.0
                    } else {
                        0.0
                    };
                    SessionScore {
                        session_id: session.id.clone(),
                        session_name: session.name.clone(),
                        session_type: session.session_type,
                        achieved,
                        possible,
                        percentage,
                    }
                })
                .collect();

            let term_percentage = if sum_possible > 0.0 {
                sum_achieved / sum_possible * 100.0
            } else {
                0.0
            };

            SubjectPerformance {
                subject_id: subject.id.clone(),
                subject_name: subject.name.clone(),
                teacher_name: subject.teacher_name.clone(),
                sessions: per_session,
                term_percentage,
            }
        })
        .collect()
}

/// Mean term percentage over subjects that have any data. Zero when none do.
pub fn overall_percentage(subjects: &[SubjectPerformance]) -> f64 {
    let with_data: Vec<f64> = subjects
        .iter()
        .filter(|s| s.has_data())
        .map(|s| s.term_percentage)
        .collect();
    if with_data.is_empty() {
        return 0.0;
    }
    with_data.iter().sum::<f64>() / (with_data.len() as f64)
}

/// Maps a percentage to a grade band 1 (best) through 9. NaN falls through to 9.
pub fn classify_subject_grade(pct: f64) -> u8 {
    match pct {
        p if p >= 80.0 => 1,
        p if p >= 70.0 => 2,
        p if p >= 60.0 => 3,
        p if p >= 50.0 => 4,
        p if p >= 45.0 => 5,
        p if p >= 40.0 => 6,
        p if p >= 30.0 => 7,
        p if p >= 20.0 => 8,
        _ => 9,
    }
}

pub fn grade_code(band: u8) -> String {
    match band {
        1 => "D1".to_string(),
        2 => "D2".to_string(),
        3 => "C3".to_string(),
        4 => "C4".to_string(),
        5 => "P5".to_string(),
        6 => "P6".to_string(),
        other => format!("F{}", other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Division {
    #[serde(rename = "Division 1")]
    One,
    #[serde(rename = "Division 2")]
    Two,
    #[serde(rename = "Division 3")]
    Three,
    #[serde(rename = "Division 4")]
    Four,
    #[serde(rename = "U")]
    Ungraded,
}

impl Division {
    pub fn from_aggregate(aggregate: u32) -> Self {
        match aggregate {
            4..=12 => Self::One,
            13..=23 => Self::Two,
            24..=29 => Self::Three,
            30..=34 => Self::Four,
            _ => Self::Ungraded,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::One => "Division 1",
            Self::Two => "Division 2",
            Self::Three => "Division 3",
            Self::Four => "Division 4",
            Self::Ungraded => "U",
        }
    }

    /// One tier worse. U stays U.
    pub fn downgrade(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::Three,
            Self::Three => Self::Four,
            Self::Four | Self::Ungraded => Self::Ungraded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DivisionPolicy {
    /// Drop one division when both an English and a Maths subject scored F9.
    pub english_math_downgrade: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DivisionResult {
    pub aggregate: u32,
    pub division: Division,
    pub subjects_counted: usize,
    /// False when fewer than four subjects were available for the aggregate.
    pub complete: bool,
    pub downgraded: bool,
}

/// Aggregate and division from per-subject bands. Input order does not matter.
pub fn compute_division(subject_grades: &[u8]) -> DivisionResult {
    let mut sorted = subject_grades.to_vec();
    sorted.sort_unstable();

    let (best, complete) = if sorted.len() >= BEST_SUBJECT_COUNT {
        (&sorted[..BEST_SUBJECT_COUNT], true)
    } else {
        // Short students are aggregated over what they have, not scaled up.
        (&sorted[..], false)
    };
    let aggregate: u32 = best.iter().map(|g| u32::from(*g)).sum();

    DivisionResult {
        aggregate,
        division: Division::from_aggregate(aggregate),
        subjects_counted: best.len(),
        complete,
        downgraded: false,
    }
}

/// Division for named subjects, applying `policy` on top of [`compute_division`].
pub fn classify_division(subjects: &[(&str, u8)], policy: DivisionPolicy) -> DivisionResult {
    let grades: Vec<u8> = subjects.iter().map(|(_, g)| *g).collect();
    let mut result = compute_division(&grades);
    if policy.english_math_downgrade && failed_english_and_math(subjects) {
        let lowered = result.division.downgrade();
        result.downgraded = lowered != result.division;
        result.division = lowered;
    }
    result
}

fn failed_english_and_math(subjects: &[(&str, u8)]) -> bool {
    let failed = |needle: &str| {
        subjects
            .iter()
            .any(|(name, grade)| *grade == 9 && name.to_lowercase().contains(needle))
    };
    failed("english") && failed("math")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn subject(id: &str, name: &str) -> Subject {
        Subject {
            id: id.to_string(),
            name: name.to_string(),
            teacher_name: None,
        }
    }

    fn session(id: &str, t: SessionType) -> ExamSession {
        ExamSession {
            id: id.to_string(),
            name: t.as_str().to_string(),
            session_type: t,
        }
    }

    fn question(id: &str, subject_id: Option<&str>, session_id: &str, max: f64) -> Question {
        Question {
            id: id.to_string(),
            subject_id: subject_id.map(|s| s.to_string()),
            exam_session_id: Some(session_id.to_string()),
            max_score: max,
        }
    }

    fn result(student: &str, question_id: &str, session_id: &str, score: f64) -> ExamResult {
        ExamResult {
            student_id: student.to_string(),
            question_id: Some(question_id.to_string()),
            exam_session_id: Some(session_id.to_string()),
            score,
        }
    }

    #[test]
    fn round_off_one_decimal() {
        assert_eq!(round_off_1_decimal(0.0), 0.0);
        assert_eq!(round_off_1_decimal(3.54), 3.5);
        assert_eq!(round_off_1_decimal(66.666), 66.7);
    }

    #[test]
    fn two_subject_term_matches_worked_example() {
        let subjects = vec![subject("a", "Science"), subject("b", "History")];
        let sessions = vec![session("bot", SessionType::Bot), session("eot", SessionType::Eot)];
        let questions = vec![
            question("qa1", Some("a"), "bot", 50.0),
            question("qa2", Some("a"), "eot", 50.0),
            question("qb1", Some("b"), "bot", 50.0),
            question("qb2", Some("b"), "eot", 50.0),
        ];
        let results = vec![
            result("s1", "qa1", "bot", 40.0),
            result("s1", "qa2", "eot", 45.0),
            result("s1", "qb1", "bot", 10.0),
            result("s1", "qb2", "eot", 15.0),
            result("s2", "qa1", "bot", 1.0),
        ];

        let perf = aggregate_subject_performance("s1", &subjects, &sessions, &questions, &results);
        assert_eq!(perf.len(), 2);
        assert!((perf[0].term_percentage - 85.0).abs() < 1e-9);
        assert!((perf[1].term_percentage - 25.0).abs() < 1e-9);
        assert_eq!(perf[0].sessions[0].achieved, 40.0);
        assert_eq!(perf[0].sessions[1].session_type, SessionType::Eot);

        let g_a = classify_subject_grade(perf[0].term_percentage);
        let g_b = classify_subject_grade(perf[1].term_percentage);
        assert_eq!(grade_code(g_a), "D1");
        assert_eq!(grade_code(g_b), "F8");

        let div = compute_division(&[g_a, g_b]);
        assert_eq!(div.aggregate, 9);
        assert_eq!(div.division, Division::One);
        assert_eq!(div.subjects_counted, 2);
        assert!(!div.complete);
    }

    #[test]
    fn zero_possible_session_is_excluded_not_zeroed() {
        let subjects = vec![subject("a", "Science")];
        let sessions = vec![
            session("bot", SessionType::Bot),
            session("mot", SessionType::Mot),
            session("eot", SessionType::Eot),
        ];
        // MOT has no questions for the subject at all.
        let questions = vec![
            question("q1", Some("a"), "bot", 20.0),
            question("q2", Some("a"), "eot", 20.0),
        ];
        let results = vec![result("s1", "q1", "bot", 10.0), result("s1", "q2", "eot", 20.0)];
        let perf = aggregate_subject_performance("s1", &subjects, &sessions, &questions, &results);
        assert!((perf[0].term_percentage - 75.0).abs() < 1e-9);
        assert_eq!(perf[0].sessions[1].possible, 0.0);
        assert_eq!(perf[0].sessions[1].percentage, 0.0);
    }

    #[test]
    fn skips_subjectless_questions_and_unlinked_results() {
        let subjects = vec![subject("a", "Science")];
        let sessions = vec![session("bot", SessionType::Bot)];
        let questions = vec![
            question("q1", Some("a"), "bot", 10.0),
            question("q2", None, "bot", 90.0),
        ];
        let results = vec![
            result("s1", "q1", "bot", 5.0),
            result("s1", "q2", "bot", 90.0),
            ExamResult {
                student_id: "s1".to_string(),
                question_id: None,
                exam_session_id: Some("bot".to_string()),
                score: 7.0,
            },
            ExamResult {
                student_id: "s1".to_string(),
                question_id: Some("q1".to_string()),
                exam_session_id: None,
                score: 3.0,
            },
        ];
        let perf = aggregate_subject_performance("s1", &subjects, &sessions, &questions, &results);
        assert_eq!(perf[0].sessions[0].possible, 10.0);
        assert_eq!(perf[0].sessions[0].achieved, 5.0);
        assert!((perf[0].term_percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn subject_without_sessions_yields_zero() {
        let subjects = vec![subject("a", "Art")];
        let perf = aggregate_subject_performance("s1", &subjects, &[], &[], &[]);
        assert_eq!(perf[0].term_percentage, 0.0);
        assert!(!perf[0].has_data());
        assert_eq!(overall_percentage(&perf), 0.0);
    }

    #[test]
    fn overall_percentage_ignores_subjects_without_data() {
        let with = |id: &str, pct: f64, possible: f64| SubjectPerformance {
            subject_id: id.to_string(),
            subject_name: id.to_string(),
            teacher_name: None,
            sessions: vec![SessionScore {
                session_id: "x".to_string(),
                session_name: "BOT".to_string(),
                session_type: SessionType::Bot,
                achieved: 0.0,
                possible,
                percentage: pct,
            }],
            term_percentage: pct,
        };
        let perf = vec![with("a", 80.0, 10.0), with("b", 60.0, 10.0), with("c", 0.0, 0.0)];
        assert!((overall_percentage(&perf) - 70.0).abs() < 1e-9);
    }

    #[test]
    fn grade_band_boundaries() {
        assert_eq!(classify_subject_grade(100.0), 1);
        assert_eq!(classify_subject_grade(80.0), 1);
        assert_eq!(classify_subject_grade(79.9), 2);
        assert_eq!(classify_subject_grade(70.0), 2);
        assert_eq!(classify_subject_grade(60.0), 3);
        assert_eq!(classify_subject_grade(50.0), 4);
        assert_eq!(classify_subject_grade(45.0), 5);
        assert_eq!(classify_subject_grade(44.99), 6);
        assert_eq!(classify_subject_grade(40.0), 6);
        assert_eq!(classify_subject_grade(30.0), 7);
        assert_eq!(classify_subject_grade(20.0), 8);
        assert_eq!(classify_subject_grade(19.99), 9);
        assert_eq!(classify_subject_grade(0.0), 9);
        assert_eq!(classify_subject_grade(f64::NAN), 9);
    }

    #[test]
    fn grade_codes() {
        let codes: Vec<String> = (1..=9).map(grade_code).collect();
        assert_eq!(
            codes,
            vec!["D1", "D2", "C3", "C4", "P5", "P6", "F7", "F8", "F9"]
        );
    }

    #[test]
    fn division_boundaries() {
        assert_eq!(Division::from_aggregate(3), Division::Ungraded);
        assert_eq!(Division::from_aggregate(4), Division::One);
        assert_eq!(Division::from_aggregate(12), Division::One);
        assert_eq!(Division::from_aggregate(13), Division::Two);
        assert_eq!(Division::from_aggregate(23), Division::Two);
        assert_eq!(Division::from_aggregate(24), Division::Three);
        assert_eq!(Division::from_aggregate(29), Division::Three);
        assert_eq!(Division::from_aggregate(30), Division::Four);
        assert_eq!(Division::from_aggregate(34), Division::Four);
        assert_eq!(Division::from_aggregate(35), Division::Ungraded);
    }

    #[test]
    fn division_uses_best_four_only() {
        let div = compute_division(&[9, 1, 2, 9, 3, 1]);
        assert_eq!(div.aggregate, 7);
        assert_eq!(div.subjects_counted, 4);
        assert!(div.complete);
        assert_eq!(div.division.label(), "Division 1");
    }

    #[test]
    fn division_of_no_subjects_is_ungraded() {
        let div = compute_division(&[]);
        assert_eq!(div.aggregate, 0);
        assert_eq!(div.division, Division::Ungraded);
        assert_eq!(div.subjects_counted, 0);
    }

    #[test]
    fn english_math_downgrade_only_when_enabled() {
        let subjects = [
            ("English Language", 9),
            ("Mathematics", 9),
            ("Physics", 1),
            ("Chemistry", 1),
            ("Biology", 1),
            ("History", 1),
        ];
        // Best four are all D1: aggregate 4.
        let plain = classify_division(&subjects, DivisionPolicy::default());
        assert_eq!(plain.division, Division::One);
        assert!(!plain.downgraded);

        let strict = classify_division(
            &subjects,
            DivisionPolicy {
                english_math_downgrade: true,
            },
        );
        assert_eq!(strict.aggregate, 4);
        assert_eq!(strict.division, Division::Two);
        assert!(strict.downgraded);
    }

    #[test]
    fn downgrade_needs_both_failures_and_stops_at_u() {
        let policy = DivisionPolicy {
            english_math_downgrade: true,
        };
        let only_english = classify_division(&[("english", 9), ("maths", 8)], policy);
        assert!(!only_english.downgraded);

        assert_eq!(Division::Four.downgrade(), Division::Ungraded);
        let already_u = classify_division(&[("English", 9), ("Math", 9), ("Art", 9), ("PE", 9)], policy);
        assert_eq!(already_u.aggregate, 36);
        assert_eq!(already_u.division, Division::Ungraded);
        assert!(!already_u.downgraded);
    }

    #[test]
    fn division_serializes_as_label() {
        let v = serde_json::to_value(Division::Three).expect("serialize");
        assert_eq!(v, serde_json::json!("Division 3"));
        let v = serde_json::to_value(Division::Ungraded).expect("serialize");
        assert_eq!(v, serde_json::json!("U"));
    }

    proptest! {
        #[test]
        fn term_percentage_stays_in_bounds(
            rows in proptest::collection::vec((1.0f64..200.0, 0.0f64..1.0), 1..12)
        ) {
            let subjects = vec![subject("a", "Science")];
            let sessions = vec![
                session("bot", SessionType::Bot),
                session("mot", SessionType::Mot),
                session("eot", SessionType::Eot),
            ];
            let ids = ["bot", "mot", "eot"];
            let mut questions = Vec::new();
            let mut results = Vec::new();
            for (i, (max, frac)) in rows.iter().enumerate() {
                let sid = ids[i % ids.len()];
                let qid = format!("q{}", i);
                questions.push(question(&qid, Some("a"), sid, *max));
                results.push(result("s1", &qid, sid, max * frac));
            }
            let perf = aggregate_subject_performance("s1", &subjects, &sessions, &questions, &results);
            let pct = perf[0].term_percentage;
            prop_assert!((0.0..=100.0 + 1e-9).contains(&pct));
        }

        #[test]
        fn grade_is_monotonic(a in -10.0f64..110.0, b in -10.0f64..110.0) {
            let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
            prop_assert!(classify_subject_grade(hi) <= classify_subject_grade(lo));
        }

        #[test]
        fn division_ignores_input_order(mut grades in proptest::collection::vec(1u8..=9, 0..10)) {
            let before = compute_division(&grades);
            grades.reverse();
            prop_assert_eq!(before, compute_division(&grades));
        }
    }
}
