use std::fmt;

use thiserror::Error;

use crate::clustering::ClusteringError;
use crate::llm::LlmError;
use crate::remarks::SheetError;
use crate::report::ReportError;
use crate::state_machine::{FileType, ProjectId, ProjectStatus};
use crate::storage::StorageError;
use crate::tasks::TaskManagerError;

pub type Result<T, E = EvalError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("No {file_type} artifact for project {project_id}")]
    ArtifactNotFound {
        project_id: ProjectId,
        file_type: FileType,
    },

    #[error("Project {project_id} is busy ({status}), retry later")]
    ProjectBusy {
        project_id: ProjectId,
        status: ProjectStatus,
    },

    #[error("Project {project_id} is still {status}, result not ready yet")]
    StillProcessing {
        project_id: ProjectId,
        status: ProjectStatus,
    },

    #[error("Task submission failed: {0}")]
    Submit(#[from] TaskManagerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Language model error: {0}")]
    Llm(#[from] LlmError),

    #[error("Clustering service error: {0}")]
    Clustering(#[from] ClusteringError),

    #[error("Spreadsheet error: {0}")]
    Sheet(#[from] SheetError),

    #[error("Report rendering error: {0}")]
    Report(#[from] ReportError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Outcome class a collaborator (HTTP layer, CLI) reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; do not retry unchanged.
    BadRequest,
    /// Unknown project, or the requested result was never generated.
    NotFound,
    /// Project busy; retry later.
    Conflict,
    /// Storage, database or external service failure.
    ServerError,
    /// Task queue saturated.
    Unavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::BadRequest => write!(f, "BadRequest"),
            ErrorKind::NotFound => write!(f, "NotFound"),
            ErrorKind::Conflict => write!(f, "Conflict"),
            ErrorKind::ServerError => write!(f, "ServerError"),
            ErrorKind::Unavailable => write!(f, "Unavailable"),
        }
    }
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::BadRequest(_) => ErrorKind::BadRequest,
            EvalError::ProjectNotFound(_) | EvalError::ArtifactNotFound { .. } => {
                ErrorKind::NotFound
            }
            EvalError::Storage(StorageError::NotFound(_)) => ErrorKind::NotFound,
            EvalError::ProjectBusy { .. } | EvalError::StillProcessing { .. } => {
                ErrorKind::Conflict
            }
            EvalError::Submit(TaskManagerError::QueueFull) => ErrorKind::Unavailable,
            _ => ErrorKind::ServerError,
        }
    }
}
