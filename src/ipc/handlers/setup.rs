use crate::db;
use crate::external::{AnalysisConfig, DocumentsConfig, SchedulerConfig};
use crate::ipc::helpers::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::mail::MailConfig;
use crate::stats::DashboardConfig;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy)]
enum SetupSection {
    Scheduler,
    Analysis,
    Documents,
    Mail,
    Dashboard,
}

const ALL_SECTIONS: [SetupSection; 5] = [
    SetupSection::Scheduler,
    SetupSection::Analysis,
    SetupSection::Documents,
    SetupSection::Mail,
    SetupSection::Dashboard,
];

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduler" => Some(Self::Scheduler),
            "analysis" => Some(Self::Analysis),
            "documents" => Some(Self::Documents),
            "mail" => Some(Self::Mail),
            "dashboard" => Some(Self::Dashboard),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Scheduler => "scheduler",
            Self::Analysis => "analysis",
            Self::Documents => "documents",
            Self::Mail => "mail",
            Self::Dashboard => "dashboard",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Scheduler => "setup.scheduler",
            Self::Analysis => "setup.analysis",
            Self::Documents => "setup.documents",
            Self::Mail => "setup.mail",
            Self::Dashboard => "setup.dashboard",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Scheduler => json!({
            "command": "",
            "args": [],
            "outputFileName": crate::workspace::MIRROR_FILE_NAME
        }),
        SetupSection::Analysis => json!({
            "command": "",
            "args": []
        }),
        SetupSection::Documents => json!({
            "command": "",
            "args": [],
            "templatesDir": null,
            "rosterFileName": "teachers.csv",
            "teacherTemplate": "convocation.docx",
            "globalTemplates": ["convocation.docx", "teachers_by_slot.docx"]
        }),
        SetupSection::Mail => json!({
            "fromName": "Administration",
            "fromAddress": "",
            "subject": "Exam surveillance convocation",
            "batchSize": 5,
            "batchDelayMs": 1000,
            "attachDocuments": false
        }),
        SetupSection::Dashboard => json!({
            "slotHours": 3.0,
            "topTeacherCount": 5,
            "slotHoursByLabel": {}
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_nullable_string_max(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = parse_string_max(v, key, max_len)?;
    Ok(if s.is_empty() {
        Value::Null
    } else {
        Value::String(s)
    })
}

/// A bare file name: non-empty, no directory components.
fn parse_file_name(v: &Value, key: &str) -> Result<String, String> {
    let s = parse_string_max(v, key, 120)?;
    if s.is_empty() || s.contains('/') || s.contains('\\') || s == "." || s == ".." {
        return Err(format!("{} must be a plain file name", key));
    }
    Ok(s)
}

fn parse_string_list(v: &Value, key: &str, allow_empty: bool) -> Result<Vec<String>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    let out = arr
        .iter()
        .map(|item| {
            item.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| format!("{} must be an array of strings", key))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if !allow_empty && out.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    Ok(out)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Scheduler => match k.as_str() {
                "command" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 500)?));
                }
                "args" => {
                    obj.insert(k.clone(), json!(parse_string_list(v, k, true)?));
                }
                "outputFileName" => {
                    obj.insert(k.clone(), Value::String(parse_file_name(v, k)?));
                }
                _ => return Err(format!("unknown scheduler field: {}", k)),
            },
            SetupSection::Analysis => match k.as_str() {
                "command" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 500)?));
                }
                "args" => {
                    obj.insert(k.clone(), json!(parse_string_list(v, k, true)?));
                }
                _ => return Err(format!("unknown analysis field: {}", k)),
            },
            SetupSection::Documents => match k.as_str() {
                "command" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 500)?));
                }
                "args" => {
                    obj.insert(k.clone(), json!(parse_string_list(v, k, true)?));
                }
                "templatesDir" => {
                    obj.insert(k.clone(), parse_nullable_string_max(v, k, 1000)?);
                }
                "rosterFileName" | "teacherTemplate" => {
                    obj.insert(k.clone(), Value::String(parse_file_name(v, k)?));
                }
                "globalTemplates" => {
                    let list = parse_string_list(v, k, false)?;
                    for name in &list {
                        parse_file_name(&Value::String(name.clone()), k)?;
                    }
                    obj.insert(k.clone(), json!(list));
                }
                _ => return Err(format!("unknown documents field: {}", k)),
            },
            SetupSection::Mail => match k.as_str() {
                "fromName" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "fromAddress" => {
                    let s = parse_string_max(v, k, 200)?;
                    if !s.is_empty() && !s.contains('@') {
                        return Err("fromAddress must be an email address".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "subject" => {
                    let s = parse_string_max(v, k, 200)?;
                    if s.is_empty() {
                        return Err("subject must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "batchSize" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50)?));
                }
                "batchDelayMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 60_000)?));
                }
                "attachDocuments" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown mail field: {}", k)),
            },
            SetupSection::Dashboard => match k.as_str() {
                "slotHours" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.25, 12.0)?));
                }
                "topTeacherCount" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50)?));
                }
                "slotHoursByLabel" => {
                    let map = v
                        .as_object()
                        .ok_or_else(|| "slotHoursByLabel must be an object".to_string())?;
                    let mut out = Map::new();
                    for (label, hours) in map {
                        let label = label.trim();
                        if label.is_empty() {
                            return Err("slotHoursByLabel keys must not be empty".into());
                        }
                        let h = parse_f64_range(hours, &format!("slotHoursByLabel.{}", label), 0.25, 12.0)?;
                        out.insert(label.to_string(), Value::from(h));
                    }
                    obj.insert(k.clone(), Value::Object(out));
                }
                _ => return Err(format!("unknown dashboard field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                if let Err(e) = merge_section_patch(section, &mut current, &one) {
                    tracing::warn!(section = section.name(), error = %e, "ignoring saved setting");
                }
            }
        }
    }
    Ok(current)
}

fn load_or_default(conn: &rusqlite::Connection, section: SetupSection) -> Value {
    load_section(conn, section).unwrap_or_else(|e| {
        tracing::warn!(section = section.name(), error = %e, "setup section unreadable, using defaults");
        default_section(section)
    })
}

fn str_field(obj: &Value, key: &str) -> String {
    obj.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn list_field(obj: &Value, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|s| s.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

pub fn scheduler_config(conn: &rusqlite::Connection) -> SchedulerConfig {
    let obj = load_or_default(conn, SetupSection::Scheduler);
    SchedulerConfig {
        command: str_field(&obj, "command"),
        args: list_field(&obj, "args"),
        output_file_name: str_field(&obj, "outputFileName"),
    }
}

pub fn analysis_config(conn: &rusqlite::Connection) -> AnalysisConfig {
    let obj = load_or_default(conn, SetupSection::Analysis);
    AnalysisConfig {
        command: str_field(&obj, "command"),
        args: list_field(&obj, "args"),
    }
}

pub fn documents_config(conn: &rusqlite::Connection) -> DocumentsConfig {
    let obj = load_or_default(conn, SetupSection::Documents);
    DocumentsConfig {
        command: str_field(&obj, "command"),
        args: list_field(&obj, "args"),
        templates_dir: obj
            .get("templatesDir")
            .and_then(|v| v.as_str())
            .map(PathBuf::from),
        roster_file_name: str_field(&obj, "rosterFileName"),
        teacher_template: str_field(&obj, "teacherTemplate"),
        global_templates: list_field(&obj, "globalTemplates"),
    }
}

pub fn mail_config(conn: &rusqlite::Connection) -> MailConfig {
    let obj = load_or_default(conn, SetupSection::Mail);
    let defaults = MailConfig::default();
    MailConfig {
        from_name: str_field(&obj, "fromName"),
        from_address: str_field(&obj, "fromAddress"),
        subject: str_field(&obj, "subject"),
        batch_size: obj
            .get("batchSize")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(defaults.batch_size),
        batch_delay: obj
            .get("batchDelayMs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(defaults.batch_delay),
        attach_documents: obj
            .get("attachDocuments")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    }
}

pub fn dashboard_config(conn: &rusqlite::Connection) -> DashboardConfig {
    let obj = load_or_default(conn, SetupSection::Dashboard);
    let defaults = DashboardConfig::default();
    DashboardConfig {
        slot_hours: obj
            .get("slotHours")
            .and_then(|v| v.as_f64())
            .unwrap_or(defaults.slot_hours),
        slot_hours_by_label: obj
            .get("slotHoursByLabel")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| Some((k.trim().to_lowercase(), v.as_f64()?)))
                    .collect()
            })
            .unwrap_or_default(),
        top_teacher_count: obj
            .get("topTeacherCount")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(defaults.top_teacher_count),
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let sections: Vec<SetupSection> = match req.params.get("section").and_then(|v| v.as_str()) {
        Some(raw) => match SetupSection::parse(raw) {
            Some(s) => vec![s],
            None => return err(&req.id, "bad_params", "unknown section", None),
        },
        None => ALL_SECTIONS.to_vec(),
    };
    let mut out = Map::new();
    for section in sections {
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
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
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
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup updated");
    let mut out = Map::new();
    out.insert("ok".to_string(), Value::Bool(true));
    out.insert(section.name().to_string(), current);
    ok(&req.id, Value::Object(out))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
