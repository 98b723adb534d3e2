use crate::external::{self, DocumentTarget, SystemRunner};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    self, optional_i64, required_str, respond, to_value, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::mail::{self, OutboxTransport, Recipient};
use crate::store;
use serde_json::{json, Value};

fn generate(state: &mut AppState, target: DocumentTarget) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let cfg = setup::documents_config(conn);
    let result = external::generate_documents(&SystemRunner, &cfg, &paths, &target)?;
    Ok(json!({
        "outputDir": paths.documents().to_string_lossy(),
        "result": result,
    }))
}

fn generate_global(state: &mut AppState, _params: &Value) -> HandlerResult {
    generate(state, DocumentTarget::Global)
}

fn generate_teacher(state: &mut AppState, params: &Value) -> HandlerResult {
    let teacher_id = required_str(params, "teacherId")?;
    generate(state, DocumentTarget::Teacher(teacher_id))
}

/// Sends convocations to the given recipients, or to every teacher of the
/// session when none are given.
fn send_convocations(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let paths = helpers::workspace(state)?;
    let cfg = setup::mail_config(conn);

    let mut recipients: Vec<Recipient> = match params.get("recipients") {
        None | Some(Value::Null) => {
            let session_id = match optional_i64(params, "sessionId")? {
                Some(id) => store::get_session(conn, id)?.id,
                None => store::latest_session_id(conn)?,
            };
            let rows = store::session_assignments(conn, session_id)?;
            mail::recipients_from_assignments(&rows)
        }
        Some(Value::Array(items)) => items.iter().map(Recipient::from_json).collect(),
        Some(_) => return Err(HandlerErr::bad_params("recipients must be an array")),
    };
    if recipients.is_empty() {
        return Err(HandlerErr::bad_params("no recipients to convene"));
    }
    if cfg.attach_documents {
        let dir = paths.documents();
        for r in recipients.iter_mut().filter(|r| r.attachment.is_none()) {
            r.attachment = Some(mail::convocation_path(&dir, r));
        }
    }

    let mut transport = OutboxTransport::new(paths.outbox());
    let report = mail::deliver(&mut transport, &recipients, &cfg);
    to_value(&report)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "documents.generateGlobal" => generate_global(state, &req.params),
        "documents.generateTeacher" => generate_teacher(state, &req.params),
        "mail.sendConvocations" => send_convocations(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
