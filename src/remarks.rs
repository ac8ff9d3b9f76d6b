//! Deterministic remark selection.
//!
//! Remarks are never stored by the selector itself: the same inputs always hash to the same
//! template, so a report reopened later shows the same text without persisting the choice.

use crate::calc::Division;
use serde::{Deserialize, Serialize};

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a over UTF-16 code units, folded to a non-negative value.
///
/// The accumulator becomes a signed 32-bit integer once the first unit is mixed in, so the
/// result is its absolute value rather than the raw unsigned hash. An empty key hashes to the
/// unsigned offset basis.
pub fn stable_hash(key: &str) -> u32 {
    let mut units = key.encode_utf16().peekable();
    if units.peek().is_none() {
        return FNV_OFFSET_BASIS;
    }
    let mut h = FNV_OFFSET_BASIS as i32;
    for unit in units {
        h ^= i32::from(unit);
        h = h.wrapping_mul(FNV_PRIME as i32);
    }
    h.unsigned_abs()
}

/// Picks one pool entry by hashing `key`. Empty pool gives an empty string.
pub fn pick_stable<'a>(pool: &'a [String], key: &str) -> &'a str {
    if pool.is_empty() {
        return "";
    }
    let idx = (stable_hash(key) as usize) % pool.len();
    pool.get(idx).map(|s| s.as_str()).unwrap_or("")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceBand {
    Excellent,
    VeryGood,
    Good,
    Fair,
    Poor,
}

impl PerformanceBand {
    pub fn from_percentage(pct: f64) -> Self {
        match pct {
            p if p >= 85.0 => Self::Excellent,
            p if p >= 70.0 => Self::VeryGood,
            p if p >= 60.0 => Self::Good,
            p if p >= 50.0 => Self::Fair,
            _ => Self::Poor,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::VeryGood => "very_good",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemarkRole {
    Subject,
    ClassTeacher,
    HeadTeacher,
}

impl RemarkRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subject" => Some(Self::Subject),
            "classTeacher" => Some(Self::ClassTeacher),
            "headTeacher" => Some(Self::HeadTeacher),
            _ => None,
        }
    }

    fn discriminator(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::ClassTeacher => "class",
            Self::HeadTeacher => "head",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandPools {
    pub excellent: Vec<String>,
    pub very_good: Vec<String>,
    pub good: Vec<String>,
    pub fair: Vec<String>,
    pub poor: Vec<String>,
}

impl BandPools {
    pub fn get(&self, band: PerformanceBand) -> &[String] {
        match band {
            PerformanceBand::Excellent => &self.excellent,
            PerformanceBand::VeryGood => &self.very_good,
            PerformanceBand::Good => &self.good,
            PerformanceBand::Fair => &self.fair,
            PerformanceBand::Poor => &self.poor,
        }
    }

    pub fn get_mut(&mut self, band: PerformanceBand) -> &mut Vec<String> {
        match band {
            PerformanceBand::Excellent => &mut self.excellent,
            PerformanceBand::VeryGood => &mut self.very_good,
            PerformanceBand::Good => &mut self.good,
            PerformanceBand::Fair => &mut self.fair,
            PerformanceBand::Poor => &mut self.poor,
        }
    }
}

/// Template table keyed by (role, band).
///
/// Placeholders: `{subject}` and `{pct}` in subject pools, `{division}` and `{pct}` in the
/// class-teacher and head-teacher pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemarkTemplates {
    pub subject: BandPools,
    pub class_teacher: BandPools,
    pub head_teacher: BandPools,
}

fn pool(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for RemarkTemplates {
    fn default() -> Self {
        Self {
            subject: BandPools {
                excellent: pool(&[
                    "Outstanding work in {subject} ({pct}%). Keep it up.",
                    "Excellent grasp of {subject}, scoring {pct}%.",
                    "A superb {pct}% in {subject}. Well done.",
                ]),
                very_good: pool(&[
                    "Very good performance in {subject} ({pct}%).",
                    "Strong results in {subject} at {pct}%. Aim higher.",
                    "Commendable {pct}% in {subject}.",
                ]),
                good: pool(&[
                    "Good effort in {subject} ({pct}%). More practice will help.",
                    "A sound {pct}% in {subject}; room to grow.",
                ]),
                fair: pool(&[
                    "Fair performance in {subject} ({pct}%). Needs more revision.",
                    "{pct}% in {subject} is average. Work harder.",
                ]),
                poor: pool(&[
                    "Weak performance in {subject} ({pct}%). Needs serious attention.",
                    "{subject} needs much more effort; scored {pct}%.",
                    "Below expectations in {subject} at {pct}%. Seek extra help.",
                ]),
            },
            class_teacher: BandPools {
                excellent: pool(&[
                    "An exceptional term: {division} with {pct}% overall. Keep shining.",
                    "Excellent results ({pct}%, {division}). A model learner.",
                    "Brilliant work this term, {pct}% overall.",
                ]),
                very_good: pool(&[
                    "Very good term with {pct}% overall ({division}).",
                    "Pleasing progress at {pct}%. Push for the top.",
                ]),
                good: pool(&[
                    "A good term ({pct}%, {division}). Consistency will bring more.",
                    "Good work at {pct}% overall; keep building.",
                ]),
                fair: pool(&[
                    "A fair term at {pct}% ({division}). More focus is needed.",
                    "Average results ({pct}%). Revise regularly.",
                ]),
                poor: pool(&[
                    "A difficult term: {pct}% overall ({division}). Must work much harder.",
                    "Results of {pct}% are below expectations. Needs close support.",
                    "Serious improvement needed; {division} at {pct}%.",
                ]),
            },
            head_teacher: BandPools {
                excellent: pool(&[
                    "Excellent performance. {division} at {pct}% is a credit to the school.",
                    "Outstanding achievement ({pct}%). Congratulations.",
                ]),
                very_good: pool(&[
                    "Very good results ({division}, {pct}%). Keep aiming high.",
                    "Well done on {pct}% overall.",
                ]),
                good: pool(&[
                    "Good results ({pct}%). Greater effort will bring a better division.",
                    "Steady work at {pct}% ({division}). Keep going.",
                ]),
                fair: pool(&[
                    "Fair results ({pct}%). Work harder next term.",
                    "{division} at {pct}% shows potential; more effort required.",
                ]),
                poor: pool(&[
                    "Poor results ({pct}%, {division}). Parents are asked to see the class teacher.",
                    "Performance of {pct}% is a concern. Improvement is expected next term.",
                ]),
            },
        }
    }
}

impl RemarkTemplates {
    pub fn pools(&self, role: RemarkRole) -> &BandPools {
        match role {
            RemarkRole::Subject => &self.subject,
            RemarkRole::ClassTeacher => &self.class_teacher,
            RemarkRole::HeadTeacher => &self.head_teacher,
        }
    }

    pub fn pools_mut(&mut self, role: RemarkRole) -> &mut BandPools {
        match role {
            RemarkRole::Subject => &mut self.subject,
            RemarkRole::ClassTeacher => &mut self.class_teacher,
            RemarkRole::HeadTeacher => &mut self.head_teacher,
        }
    }
}

fn rounded(pct: f64) -> i64 {
    pct.round() as i64
}

/// Stable key for one student's subject remark.
pub fn subject_stable_key(registration_id: &str, subject_id: &str, pct: f64) -> String {
    format!("{}|{}|{}", registration_id, subject_id, rounded(pct))
}

pub fn select_subject_comment(
    templates: &RemarkTemplates,
    subject_name: &str,
    term_pct: f64,
    stable_key: &str,
) -> String {
    let band = PerformanceBand::from_percentage(term_pct);
    let pool = templates.subject.get(band);
    let key = format!("{}{}", stable_key, band.as_str());
    pick_stable(pool, &key)
        .replace("{subject}", subject_name)
        .replace("{pct}", &rounded(term_pct).to_string())
}

pub fn select_class_teacher_comment(
    templates: &RemarkTemplates,
    division: Division,
    overall_pct: f64,
) -> String {
    select_overall_comment(templates, RemarkRole::ClassTeacher, division, overall_pct)
}

pub fn select_head_teacher_comment(
    templates: &RemarkTemplates,
    division: Division,
    overall_pct: f64,
) -> String {
    select_overall_comment(templates, RemarkRole::HeadTeacher, division, overall_pct)
}

fn select_overall_comment(
    templates: &RemarkTemplates,
    role: RemarkRole,
    division: Division,
    overall_pct: f64,
) -> String {
    let band = PerformanceBand::from_percentage(overall_pct);
    let pct = rounded(overall_pct);
    let key = format!("{}|{}|{}", division.label(), pct, role.discriminator());
    pick_stable(templates.pools(role).get(band), &key)
        .replace("{division}", division.label())
        .replace("{pct}", &pct.to_string())
}
