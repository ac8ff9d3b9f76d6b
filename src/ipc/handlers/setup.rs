use crate::calc::DivisionPolicy;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_row};
use crate::ipc::types::{AppState, Request};
use crate::remarks::{PerformanceBand, RemarkRole, RemarkTemplates};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

const MAX_TEMPLATE_LEN: usize = 300;
const MAX_TEMPLATES_PER_POOL: usize = 20;

#[derive(Clone, Copy)]
enum SetupSection {
    School,
    Grading,
    Comments,
    RemarkTemplates,
}

impl SetupSection {
    const ALL: [SetupSection; 4] = [
        Self::School,
        Self::Grading,
        Self::Comments,
        Self::RemarkTemplates,
    ];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "school" => Some(Self::School),
            "grading" => Some(Self::Grading),
            "comments" => Some(Self::Comments),
            "remarkTemplates" => Some(Self::RemarkTemplates),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::School => "school",
            Self::Grading => "grading",
            Self::Comments => "comments",
            Self::RemarkTemplates => "remarkTemplates",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::School => "setup.school",
            Self::Grading => "setup.grading",
            Self::Comments => "setup.comments",
            Self::RemarkTemplates => "setup.remarkTemplates",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::School => json!({
            "activeSchoolId": null
        }),
        SetupSection::Grading => json!({
            "englishMathDowngrade": false
        }),
        SetupSection::Comments => json!({
            "autoFillOnOpen": true
        }),
        SetupSection::RemarkTemplates => {
            serde_json::to_value(RemarkTemplates::default()).unwrap_or_else(|_| json!({}))
        }
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_nullable_id(v: &Value, key: &str) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string or null", key))?
        .trim();
    if s.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::String(s.to_string()))
}

fn parse_band(s: &str) -> Option<PerformanceBand> {
    match s {
        "excellent" => Some(PerformanceBand::Excellent),
        "very_good" => Some(PerformanceBand::VeryGood),
        "good" => Some(PerformanceBand::Good),
        "fair" => Some(PerformanceBand::Fair),
        "poor" => Some(PerformanceBand::Poor),
        _ => None,
    }
}

fn parse_template_pool(v: &Value, key: &str) -> Result<Vec<String>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    if arr.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if arr.len() > MAX_TEMPLATES_PER_POOL {
        return Err(format!(
            "{} may hold at most {} templates",
            key, MAX_TEMPLATES_PER_POOL
        ));
    }
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .ok_or_else(|| format!("{} must be an array of strings", key))?
            .trim();
        if s.is_empty() {
            return Err(format!("{} must not contain blank templates", key));
        }
        if s.len() > MAX_TEMPLATE_LEN {
            return Err(format!(
                "{} templates must be <= {} characters",
                key, MAX_TEMPLATE_LEN
            ));
        }
        out.push(s.to_string());
    }
    Ok(out)
}

fn merge_templates_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let mut templates: RemarkTemplates =
        serde_json::from_value(current.clone()).unwrap_or_default();
    for (role_key, bands) in patch {
        let Some(role) = RemarkRole::parse(role_key) else {
            return Err(format!("unknown remarkTemplates role: {}", role_key));
        };
        let bands = bands
            .as_object()
            .ok_or_else(|| format!("{} must be an object of bands", role_key))?;
        for (band_key, pool) in bands {
            let Some(band) = parse_band(band_key) else {
                return Err(format!("unknown remark band: {}", band_key));
            };
            let key = format!("{}.{}", role_key, band_key);
            *templates.pools_mut(role).get_mut(band) = parse_template_pool(pool, &key)?;
        }
    }
    *current = serde_json::to_value(templates).map_err(|e| e.to_string())?;
    Ok(())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    if let SetupSection::RemarkTemplates = section {
        return merge_templates_patch(current, patch);
    }
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::School => match k.as_str() {
                "activeSchoolId" => {
                    obj.insert(k.clone(), parse_nullable_id(v, k)?);
                }
                _ => return Err(format!("unknown school field: {}", k)),
            },
            SetupSection::Grading => match k.as_str() {
                "englishMathDowngrade" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Comments => match k.as_str() {
                "autoFillOnOpen" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown comments field: {}", k)),
            },
            SetupSection::RemarkTemplates => {}
        }
    }
    Ok(())
}

/// Splits a saved section into one-field patches; template tables split per (role, band).
fn saved_field_patches(section: SetupSection, saved: &Map<String, Value>) -> Vec<Map<String, Value>> {
    let mut out = Vec::new();
    for (k, v) in saved {
        match (section, v.as_object()) {
            (SetupSection::RemarkTemplates, Some(bands)) => {
                for (band, pool) in bands {
                    let mut inner = Map::new();
                    inner.insert(band.clone(), pool.clone());
                    let mut patch = Map::new();
                    patch.insert(k.clone(), Value::Object(inner));
                    out.push(patch);
                }
            }
            _ => {
                let mut patch = Map::new();
                patch.insert(k.clone(), v.clone());
                out.push(patch);
            }
        }
    }
    out
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // A malformed saved field keeps its default; the other fields still apply.
            for patch in saved_field_patches(section, saved_obj) {
                if let Err(e) = merge_section_patch(section, &mut current, &patch) {
                    tracing::warn!(section = section.name(), error = %e, "ignoring saved setup field");
                }
            }
        }
    }
    Ok(current)
}

fn load_typed<T: DeserializeOwned>(
    conn: &rusqlite::Connection,
    section: SetupSection,
) -> anyhow::Result<T> {
    Ok(serde_json::from_value(load_section(conn, section)?)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchoolSetup {
    active_school_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentsSetup {
    auto_fill_on_open: bool,
}

pub fn active_school_id(conn: &rusqlite::Connection) -> anyhow::Result<Option<String>> {
    Ok(load_typed::<SchoolSetup>(conn, SetupSection::School)?.active_school_id)
}

pub fn division_policy(conn: &rusqlite::Connection) -> anyhow::Result<DivisionPolicy> {
    load_typed(conn, SetupSection::Grading)
}

pub fn auto_fill_on_open(conn: &rusqlite::Connection) -> anyhow::Result<bool> {
    Ok(load_typed::<CommentsSetup>(conn, SetupSection::Comments)?.auto_fill_on_open)
}

pub fn remark_templates(conn: &rusqlite::Connection) -> anyhow::Result<RemarkTemplates> {
    load_typed(conn, SetupSection::RemarkTemplates)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let SetupSection::School = section {
        if let Some(school_id) = current.get("activeSchoolId").and_then(|v| v.as_str()) {
            if let Err(resp) = require_row(conn, req, "schools", school_id) {
                return resp;
            }
        }
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
