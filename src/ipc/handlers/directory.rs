use crate::directory;
use crate::error::StoreError;
use crate::grade_hours;
use crate::ipc::helpers::{
    self, optional_i64, optional_str, required_array, required_path, required_str, respond,
    to_value, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

fn import_teachers(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let rows = required_array(params, "rows")?;
    to_value(&directory::replace_teachers(conn, rows)?)
}

fn import_exams(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let rows = required_array(params, "rows")?;
    to_value(&directory::replace_exams(conn, rows)?)
}

fn list_teachers(state: &mut AppState, _params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let teachers = directory::list_teachers(conn)?;
    Ok(json!({ "teachers": to_value(&teachers)? }))
}

fn export_files(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let dir = optional_str(params, "outDir")
        .map(PathBuf::from)
        .unwrap_or_else(|| paths.temp());
    to_value(&directory::export_files(conn, &dir)?)
}

fn wishes_import(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let rows = required_array(params, "rows")?;
    to_value(&directory::replace_wishes(conn, rows)?)
}

fn wishes_by_teacher(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let teacher = required_str(params, "teacher")?;
    let wishes = directory::wishes_by_teacher(conn, &teacher)?;
    Ok(json!({ "teacher": teacher, "wishes": to_value(&wishes)? }))
}

fn wishes_list(state: &mut AppState, _params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let wishes = directory::all_wishes(conn)?;
    Ok(json!({ "wishes": to_value(&wishes)? }))
}

fn credits_record(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let teacher_id = required_str(params, "teacherId")?;
    let session_id = optional_i64(params, "sessionId")?;
    to_value(&store::record_credit(conn, session_id, &teacher_id)?)
}

fn credits_list(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let session_id = optional_i64(params, "sessionId")?;
    let credits = store::list_credits(conn, session_id)?;
    Ok(json!({ "credits": to_value(&credits)? }))
}

fn credits_export_file(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let session_id = optional_i64(params, "sessionId")?;
    let out_path = optional_str(params, "outPath")
        .map(PathBuf::from)
        .unwrap_or_else(|| paths.scheduler_workspace().join("credits.csv"));
    let rows = store::export_credits(conn, session_id, &out_path)?;
    Ok(json!({ "outPath": out_path.to_string_lossy(), "rows": rows }))
}

fn grade_hours_get(state: &mut AppState, _params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let (hours, source) = grade_hours::current(conn, &paths.grade_hours())?;
    Ok(json!({ "gradeHours": grade_hours::to_json(&hours), "source": source }))
}

fn grade_hours_save(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let raw = params
        .get("gradeHours")
        .ok_or_else(|| HandlerErr::bad_params("missing gradeHours"))?;
    let hours = grade_hours::parse(raw)?;
    grade_hours::save(conn, &paths.grade_hours(), &hours)?;
    Ok(json!({ "gradeHours": grade_hours::to_json(&hours), "count": hours.len() }))
}

/// Only a bare file name is accepted; uploads never leave the uploads folder.
fn upload_target(dir: &Path, file_name: &str) -> Result<PathBuf, HandlerErr> {
    let name = Path::new(file_name);
    let plain = name.file_name().map(|n| n == name.as_os_str()).unwrap_or(false);
    if !plain || file_name.starts_with('.') {
        return Err(HandlerErr::bad_params(format!(
            "fileName must be a plain file name (got {})",
            file_name
        )));
    }
    Ok(dir.join(name))
}

fn uploads_save(state: &mut AppState, params: &Value) -> HandlerResult {
    let paths = helpers::workspace(state)?;
    let file_name = required_str(params, "fileName")?;
    let src = required_path(params, "filePath")?;
    if !src.is_file() {
        return Err(StoreError::MissingInput {
            what: format!("upload source {}", file_name),
            searched: vec![src],
        }
        .into());
    }
    let dir = paths.uploads();
    let dst = upload_target(&dir, &file_name)?;
    std::fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
    let bytes = std::fs::copy(&src, &dst).map_err(StoreError::io(&dst))?;
    tracing::info!(file = %dst.display(), bytes, "upload saved");
    Ok(json!({ "path": dst.to_string_lossy(), "bytes": bytes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "directory.importTeachers" => import_teachers(state, &req.params),
        "directory.importExams" => import_exams(state, &req.params),
        "directory.listTeachers" => list_teachers(state, &req.params),
        "directory.exportFiles" => export_files(state, &req.params),
        "wishes.import" => wishes_import(state, &req.params),
        "wishes.byTeacher" => wishes_by_teacher(state, &req.params),
        "wishes.list" => wishes_list(state, &req.params),
        "credits.record" => credits_record(state, &req.params),
        "credits.list" => credits_list(state, &req.params),
        "credits.exportFile" => credits_export_file(state, &req.params),
        "gradeHours.get" => grade_hours_get(state, &req.params),
        "gradeHours.save" => grade_hours_save(state, &req.params),
        "uploads.save" => uploads_save(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
