use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum JournalError {
    #[error("workflow run '{workflow_id}' already exists")]
    DuplicateRun { workflow_id: String },

    #[error("workflow run '{workflow_id}' not found")]
    RunNotFound { workflow_id: String },

    #[error("workflow journal storage error: {message}")]
    Storage { message: String },
}

/// Failure of a single activity attempt.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ActivityError {
    pub message: String,
    pub retryable: bool,
}

impl ActivityError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("workflow '{workflow_id}' already exists")]
    DuplicateWorkflow { workflow_id: String },

    #[error("workflow '{workflow_id}' not found")]
    NotFound { workflow_id: String },

    #[error("workflow '{workflow_id}' is not running")]
    NotRunning { workflow_id: String },

    #[error("unknown query '{name}'")]
    UnknownQuery { name: String },

    #[error("invalid signal: {message}")]
    InvalidSignal { message: String },

    #[error("invalid workflow input: {message}")]
    InvalidInput { message: String },

    #[error("activity '{activity}' failed after {attempts} attempts: {message}")]
    ActivityFailed {
        activity: String,
        attempts: u32,
        message: String,
    },

    #[error("settlement of payment {payment_id} failed: {message}")]
    SettlementFailed { payment_id: Uuid, message: String },

    #[error("workflow '{workflow_id}' failed: {message}")]
    RunFailed { workflow_id: String, message: String },

    #[error("workflow engine is shutting down")]
    ShuttingDown,

    #[error("workflow serialization error: {message}")]
    Serialization { message: String },

    #[error(transparent)]
    Journal(#[from] JournalError),
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<WorkflowError> for crate::error::AppError {
    fn from(err: WorkflowError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError, ValidationError};

        let kind = match err {
            WorkflowError::InvalidSignal { message } | WorkflowError::InvalidInput { message } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "workflow".to_string(),
                    reason: message,
                })
            }
            other => AppErrorKind::Infrastructure(InfrastructureError::Workflow {
                message: other.to_string(),
            }),
        };
        AppError::new(kind)
    }
}
