use crate::ipc::handlers::setup;
use crate::ipc::helpers::{self, optional_i64, respond, to_value, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, Dashboard};
use crate::store;
use serde_json::Value;

/// Statistics of the requested session, or of the most recent one. An empty
/// store yields `hasData: false` rather than an error.
fn dashboard_stats(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = helpers::db(state)?;
    let session_id = match optional_i64(params, "sessionId")? {
        Some(id) => id,
        None => match store::latest_session_id_opt(conn)? {
            Some(id) => id,
            None => return to_value(&Dashboard::empty()),
        },
    };
    let session = store::get_session(conn, session_id)?;
    let rows = store::session_assignments(conn, session_id)?;
    let cfg = setup::dashboard_config(conn);
    to_value(&stats::summarize(session, &rows, &cfg))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "dashboard.stats" => dashboard_stats(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
