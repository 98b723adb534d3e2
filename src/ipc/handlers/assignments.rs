use crate::ipc::helpers::{
    self, coordinate, coordinate_fields, mirror_report, optional_str, required_str, respond, slot_key, to_value,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::mirror::{self, MirrorEdit, MirrorRow};
use crate::store::{self, AddMode, SlotKey};
use serde_json::{json, Value};

fn assignments_swap(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let first = coordinate(params, "first")?;
    let second = coordinate(params, "second")?;

    let outcome = store::swap_teachers(conn, &first, &second)?;
    let mirror = if outcome.changed {
        mirror_report(mirror::apply(
            &paths.mirror(),
            MirrorEdit::Swap {
                a: outcome.first.coordinate(),
                b: outcome.second.coordinate(),
                a_identity: outcome.first.identity(),
                b_identity: outcome.second.identity(),
            },
        ))
    } else {
        json!({ "status": "unchanged" })
    };
    Ok(json!({
        "sessionId": outcome.session_id,
        "changed": outcome.changed,
        "mirror": mirror,
    }))
}

fn assignments_change_slot(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let teacher_id = required_str(params, "teacherId")?;
    let from = slot_key(params, "from")?;
    let to = slot_key(params, "to")?;

    let outcome = store::change_teacher_slot(conn, &teacher_id, &from, &to)?;
    let mirror = mirror_report(mirror::apply(
        &paths.mirror(),
        MirrorEdit::Move {
            from: outcome.removed.coordinate(),
            row: MirrorRow::from(&outcome.inserted),
        },
    ));
    Ok(json!({
        "sessionId": outcome.session_id,
        "assignment": to_value(&outcome.inserted)?,
        "mirror": mirror,
    }))
}

fn assignments_add(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let teacher_id = required_str(params, "teacherId")?;
    let mode = match optional_str(params, "mode").as_deref().unwrap_or("automatic") {
        "automatic" => AddMode::Automatic,
        "manual" => {
            let day = helpers::required_i64(params, "day")?;
            let slot = required_str(params, "slot")?;
            AddMode::Manual(SlotKey { day, slot })
        }
        other => {
            return Err(HandlerErr::bad_params(format!(
                "mode must be automatic or manual (got {})",
                other
            )))
        }
    };

    let outcome = store::add_assignment(conn, &teacher_id, mode)?;
    let mirror = mirror_report(mirror::apply(
        &paths.mirror(),
        MirrorEdit::Add {
            row: MirrorRow::from(&outcome.assignment),
        },
    ));
    Ok(json!({
        "sessionId": outcome.session_id,
        "assignment": to_value(&outcome.assignment)?,
        "warnings": to_value(&outcome.warnings)?,
        "mirror": mirror,
    }))
}

fn assignments_delete(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let key = coordinate_fields(params)?;

    let outcome = store::delete_assignment(conn, &key)?;
    let mirror = mirror_report(mirror::apply(
        &paths.mirror(),
        MirrorEdit::Remove {
            key: outcome.removed.coordinate(),
        },
    ));
    Ok(json!({
        "sessionId": outcome.session_id,
        "removed": to_value(&outcome.removed)?,
        "mirror": mirror,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "assignments.swap" => assignments_swap(state, &req.params),
        "assignments.changeSlot" => assignments_change_slot(state, &req.params),
        "assignments.add" => assignments_add(state, &req.params),
        "assignments.delete" => assignments_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
