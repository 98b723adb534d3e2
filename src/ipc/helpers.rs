use crate::error::{StoreError, StoreResult};
use crate::ipc::types::AppState;
use crate::mirror::MirrorSync;
use crate::store::{Coordinate, SlotKey};
use crate::workspace::WorkspacePaths;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

/// Success envelope: `{ id, ok: true, result }`.
pub fn ok(id: &str, result: Value) -> Value {
    json!({ "id": id, "ok": true, "result": result })
}

/// Failure envelope. `details` carries the structured part of a store error,
/// such as the paths searched for a missing input or a process's stderr.
pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message.into() });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({ "id": id, "ok": false, "error": error })
}

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

pub fn respond(id: &str, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn to_value<T: Serialize>(v: &T) -> HandlerResult {
    serde_json::to_value(v).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}

pub fn db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(|| HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".into(),
        details: None,
    })
}

pub fn workspace(state: &AppState) -> Result<WorkspacePaths, HandlerErr> {
    state
        .workspace
        .as_ref()
        .map(WorkspacePaths::new)
        .ok_or_else(|| HandlerErr {
            code: "no_workspace",
            message: "select a workspace first".into(),
            details: None,
        })
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    optional_str(params, key).ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Trimmed string; numbers are accepted for id-like fields.
pub fn optional_str(params: &Value, key: &str) -> Option<String> {
    crate::fields::text(params, key)
}

pub fn required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    optional_i64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => crate::fields::int(params, key)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn required_path(params: &Value, key: &str) -> Result<PathBuf, HandlerErr> {
    required_str(params, key).map(PathBuf::from)
}

pub fn required_array<'a>(params: &'a Value, key: &str) -> Result<&'a [Value], HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|v| v.as_slice())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array", key)))
}

/// `{ day, slot }` under `key`.
pub fn slot_key(params: &Value, key: &str) -> Result<SlotKey, HandlerErr> {
    let obj = params
        .get(key)
        .filter(|v| v.is_object())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an object", key)))?;
    let day = required_i64(obj, "day").map_err(|e| prefixed(key, e))?;
    let slot = required_str(obj, "slot").map_err(|e| prefixed(key, e))?;
    Ok(SlotKey { day, slot })
}

/// `{ teacherId, day, slot }` under `key`.
pub fn coordinate(params: &Value, key: &str) -> Result<Coordinate, HandlerErr> {
    let obj = params
        .get(key)
        .filter(|v| v.is_object())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an object", key)))?;
    coordinate_fields(obj).map_err(|e| prefixed(key, e))
}

/// `teacherId`, `day` and `slot` read directly from `obj`.
pub fn coordinate_fields(obj: &Value) -> Result<Coordinate, HandlerErr> {
    Ok(Coordinate {
        teacher_id: required_str(obj, "teacherId")?,
        day: required_i64(obj, "day")?,
        slot: required_str(obj, "slot")?,
    })
}

fn prefixed(key: &str, e: HandlerErr) -> HandlerErr {
    HandlerErr {
        message: format!("{}: {}", key, e.message),
        ..e
    }
}

/// Mirror outcome as reported next to a store result. A failed sync is
/// reported, never turned into an error: the store change stands.
pub fn mirror_report(result: StoreResult<MirrorSync>) -> Value {
    match result {
        Ok(MirrorSync::Synced { rows }) => json!({ "status": "synced", "rows": rows }),
        Ok(MirrorSync::Absent) => json!({ "status": "absent" }),
        Err(e) => {
            tracing::warn!(error = %e, "mirror sync failed");
            json!({ "status": "failed", "error": e.to_string() })
        }
    }
}
