use crate::error::StoreError;
use crate::external::{self, AnalysisInputs, GradeGaps, SchedulerInputs, SystemRunner};
use crate::grade_hours;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    self, optional_i64, optional_str, required_path, respond, to_value, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::mirror;
use crate::store;
use serde_json::{json, Value};
use std::path::PathBuf;

fn read_results(state: &mut AppState, _params: &Value) -> HandlerResult {
    let paths = helpers::workspace(state)?;
    let file = paths.mirror();
    if !file.is_file() {
        return Err(StoreError::MissingInput {
            what: "current schedule".to_string(),
            searched: vec![file],
        }
        .into());
    }
    let rows = mirror::read_rows(&file)?;
    Ok(json!({
        "path": file.to_string_lossy(),
        "count": rows.len(),
        "rows": to_value(&rows)?,
    }))
}

fn export_results(state: &mut AppState, params: &Value) -> HandlerResult {
    let paths = helpers::workspace(state)?;
    let out_path = required_path(params, "outPath")?;
    let file = paths.mirror();
    if !file.is_file() {
        return Err(StoreError::MissingInput {
            what: "current schedule".to_string(),
            searched: vec![file],
        }
        .into());
    }
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
    }
    let bytes = std::fs::copy(&file, &out_path).map_err(StoreError::io(&out_path))?;
    Ok(json!({ "outPath": out_path.to_string_lossy(), "bytes": bytes }))
}

/// Rewrites the mirror file from the store, for when the two have drifted.
fn rebuild_mirror(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let session_id = match optional_i64(params, "sessionId")? {
        Some(id) => store::get_session(conn, id)?.id,
        None => store::latest_session_id(conn)?,
    };
    let rows = store::session_assignments(conn, session_id)?;
    let written = mirror::rebuild(&paths.mirror(), &rows)?;
    Ok(json!({ "sessionId": session_id, "rows": written }))
}

fn scheduler_run(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let grade_hours = match params.get("gradeHours") {
        None | Some(Value::Null) => {
            let (hours, source) = grade_hours::current(conn, &paths.grade_hours())?;
            tracing::debug!(source, "using stored grade hours");
            hours
        }
        Some(raw) => grade_hours::parse(raw)?,
    };
    let inputs = SchedulerInputs {
        teachers: required_path(params, "teachersFile")?,
        wishes: required_path(params, "wishesFile")?,
        exams: required_path(params, "examsFile")?,
        credits: optional_str(params, "creditsFile").map(PathBuf::from),
        grade_hours: Some(grade_hours),
    };
    let cfg = setup::scheduler_config(conn);
    let run = external::run_scheduler(&SystemRunner, &cfg, &paths, &inputs)?;
    to_value(&run)
}

fn optional_gap(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|g| g.is_finite() && *g >= 0.0)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-negative number", key))),
    }
}

/// Analyses a planning against the roster. Without `planningFile` the
/// current schedule is analysed.
fn analysis_run(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let inputs = AnalysisInputs {
        teachers: required_path(params, "teachersFile")?,
        planning: optional_str(params, "planningFile")
            .map(PathBuf::from)
            .unwrap_or_else(|| paths.mirror()),
        gaps: GradeGaps {
            first_to_second: optional_gap(params, "gap12")?,
            second_to_third: optional_gap(params, "gap23")?,
            third_to_fourth: optional_gap(params, "gap34")?,
        },
    };
    let cfg = setup::analysis_config(conn);
    let report = external::run_analysis(&SystemRunner, &cfg, &paths, &inputs)?;
    Ok(json!({ "report": report }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schedule.readResults" => read_results(state, &req.params),
        "schedule.exportResults" => export_results(state, &req.params),
        "schedule.rebuildMirror" => rebuild_mirror(state, &req.params),
        "scheduler.run" => scheduler_run(state, &req.params),
        "analysis.run" => analysis_run(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
