use crate::error::StoreError;
use crate::ipc::helpers::{
    self, required_array, required_i64, required_path, required_str, respond, to_value,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, NewSession};
use serde_json::{json, Value};
use std::path::PathBuf;

fn sessions_create(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let name = required_str(params, "name")?;
    let session_type = required_str(params, "sessionType")?;
    let semester = required_str(params, "semester")?;
    let rows = required_array(params, "assignments")?;
    let wishes = match params.get("wishes") {
        None | Some(Value::Null) => None,
        Some(_) => Some(required_array(params, "wishes")?),
    };

    let created = store::create_session(
        conn,
        &NewSession {
            name: &name,
            session_type: &session_type,
            semester: &semester,
        },
        rows,
        wishes,
        Some(&paths),
    )?;
    to_value(&created)
}

fn sessions_list(state: &mut AppState, _params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let sessions = store::list_sessions(conn)?;
    Ok(json!({ "sessions": to_value(&sessions)? }))
}

fn sessions_get(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let session_id = required_i64(params, "sessionId")?;
    let session = store::get_session(conn, session_id)?;
    let assignments = store::session_assignments(conn, session_id)?;
    Ok(json!({
        "session": to_value(&session)?,
        "assignments": to_value(&assignments)?,
    }))
}

fn sessions_delete(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let session_id = required_i64(params, "sessionId")?;
    let deleted = store::delete_session(conn, session_id)?;
    to_value(&deleted)
}

fn sessions_export(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let session_id = required_i64(params, "sessionId")?;
    let out_path = required_path(params, "outPath")?;
    let session = store::get_session(conn, session_id)?;
    let src = match session.file_path.map(PathBuf::from) {
        Some(p) if p.is_file() => p,
        recorded => {
            return Err(StoreError::MissingInput {
                what: format!("saved planning file of session {}", session_id),
                searched: recorded.into_iter().collect(),
            }
            .into())
        }
    };
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
    }
    let bytes = std::fs::copy(&src, &out_path).map_err(StoreError::io(&out_path))?;
    tracing::info!(session_id, out = %out_path.display(), "saved planning exported");
    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "bytes": bytes,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sessions.create" => sessions_create(state, &req.params),
        "sessions.list" => sessions_list(state, &req.params),
        "sessions.get" => sessions_get(state, &req.params),
        "sessions.delete" => sessions_delete(state, &req.params),
        "sessions.export" => sessions_export(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
