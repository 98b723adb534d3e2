use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The single store handle; replaced when another workspace is selected.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    /// Drops the connection, which closes the database file.
    pub fn close(&mut self) {
        if let Some(conn) = self.db.take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(error = %e, "closing workspace database failed");
            }
        }
    }
}
