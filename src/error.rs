//! Unified error handling for the settlement core
//!
//! Module-level errors convert into [`AppError`], which carries the HTTP status
//! mapping, a machine-readable code and a user-facing message for whatever
//! transport sits in front of the orchestrators.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "IDEMPOTENCY_KEY_CONFLICT")]
    IdempotencyKeyConflict,
    #[serde(rename = "INVALID_STATE_TRANSITION")]
    InvalidStateTransition,
    #[serde(rename = "MISSING_IDEMPOTENCY_KEY")]
    MissingIdempotencyKey,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "WORKFLOW_ERROR")]
    WorkflowError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "PROVIDER_UNAVAILABLE")]
    ProviderUnavailable,
    #[serde(rename = "SERVICE_UNAVAILABLE")]
    ServiceUnavailable,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,
    #[serde(rename = "WEBHOOK_VERIFICATION_FAILED")]
    WebhookVerificationFailed,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Payment with the given id doesn't exist
    PaymentNotFound { payment_id: String },
    /// Idempotency key reused with a different request body
    IdempotencyConflict { key: String },
    /// Status change not allowed by the settlement lifecycle
    InvalidTransition { from: String, to: String },
    /// Card charge submitted without an idempotency key
    MissingIdempotencyKey,
}

/// Infrastructure-level errors (database, cache, configuration, workflow engine)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Cache { message: String },
    Configuration { message: String },
    Workflow { message: String },
}

/// External dependency errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Provider rejected or failed a single request
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Every provider attempt failed
    ProviderUnavailable { attempts: u32, message: String },
    /// Neither the settlement workflow nor the direct provider call could start
    ServiceUnavailable { message: String },
    Timeout { service: String, timeout_ms: u64 },
    WebhookVerification { message: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidField { field: String, reason: String },
    MissingField { field: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::IdempotencyConflict { .. } => 409, // Conflict
                DomainError::InvalidTransition { .. } => 422,   // Unprocessable Entity
                DomainError::MissingIdempotencyKey => 400,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::ProviderUnavailable { .. } => 503,
                ExternalError::ServiceUnavailable { .. } => 503,
                ExternalError::Timeout { .. } => 504, // Gateway Timeout
                ExternalError::WebhookVerification { .. } => 401,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::IdempotencyConflict { .. } => ErrorCode::IdempotencyKeyConflict,
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
                DomainError::MissingIdempotencyKey => ErrorCode::MissingIdempotencyKey,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::Workflow { .. } => ErrorCode::WorkflowError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::ProviderUnavailable { .. } => ErrorCode::ProviderUnavailable,
                ExternalError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
                ExternalError::WebhookVerification { .. } => ErrorCode::WebhookVerificationFailed,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { payment_id } => {
                    format!("Payment '{}' not found", payment_id)
                }
                DomainError::IdempotencyConflict { key } => format!(
                    "Idempotency key '{}' was already used with a different request",
                    key
                ),
                DomainError::InvalidTransition { from, to } => {
                    format!("Payment cannot move from {} to {}", from, to)
                }
                DomainError::MissingIdempotencyKey => {
                    "An idempotency key is required for card payments".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::ProviderUnavailable { attempts, .. } => format!(
                    "Payment provider did not respond after {} attempts. Please try again later",
                    attempts
                ),
                ExternalError::ServiceUnavailable { .. } => {
                    "Card payments are temporarily unavailable. Please try again later".to_string()
                }
                ExternalError::Timeout {
                    service,
                    timeout_ms,
                } => format!(
                    "{} request timed out after {} ms. Please try again",
                    service, timeout_ms
                ),
                ExternalError::WebhookVerification { .. } => {
                    "Invalid webhook signature".to_string()
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid {}: {}", field, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::Workflow { .. } => true,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::ProviderUnavailable { .. } => true,
                ExternalError::ServiceUnavailable { .. } => true,
                ExternalError::Timeout { .. } => true,
                ExternalError::WebhookVerification { .. } => false,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Conversions from module errors live next to those errors.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

/// Serializable error body handed to the transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
