use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    ExternalProcess { message: String, stderr: String },

    #[error("{what} not found (searched: {})", join_paths(.searched))]
    MissingInput { what: String, searched: Vec<PathBuf> },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }

    /// Stable code used in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "bad_params",
            Self::ExternalProcess { .. } => "external_process_failed",
            Self::MissingInput { .. } => "missing_input",
            Self::Io { .. } => "io_failed",
            Self::Db(_) => "db_query_failed",
            Self::Csv(_) => "bad_file",
            Self::Json(_) => "bad_file",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::NotFound { entity, key } => {
                Some(serde_json::json!({ "entity": entity, "key": key }))
            }
            Self::ExternalProcess { stderr, .. } => Some(serde_json::json!({ "stderr": stderr })),
            Self::MissingInput { searched, .. } => Some(serde_json::json!({
                "searched": searched
                    .iter()
                    .map(|p| p.to_string_lossy().to_string())
                    .collect::<Vec<_>>()
            })),
            Self::Io { path, .. } => Some(serde_json::json!({ "path": path })),
            _ => None,
        }
    }
}
