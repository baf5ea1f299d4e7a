//! Persistence errors shared by the Postgres and in-memory adapters.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    /// Primary key or unique constraint already taken
    Duplicate { entity: String, id: String },
    /// Write refused because the stored row moved on (e.g. already finalized)
    StaleWrite { entity: String, id: String },
    ConnectionError { message: String },
    SerializationError { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn duplicate(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::Duplicate {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn stale_write(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::StaleWrite {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::ConnectionError { .. })
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseErrorKind::Duplicate {
                    entity: db_err.table().unwrap_or("row").to_string(),
                    id: db_err.constraint().unwrap_or_default().to_string(),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::ConnectionError {
                    message: err.to_string(),
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::SerializationError {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} '{}' not found", entity, id),
            DatabaseErrorKind::Duplicate { entity, id } => {
                write!(f, "{} '{}' already exists", entity, id)
            }
            DatabaseErrorKind::StaleWrite { entity, id } => {
                write!(f, "{} '{}' was modified concurrently", entity, id)
            }
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "Database connection error: {}", message)
            }
            DatabaseErrorKind::SerializationError { message } => {
                write!(f, "Database serialization error: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => write!(f, "Database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        let kind = match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } if entity == "Payment" => {
                AppErrorKind::Domain(DomainError::PaymentNotFound {
                    payment_id: id.clone(),
                })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}
