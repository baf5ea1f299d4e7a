//! Idempotency gate
//!
//! Maps a caller-supplied key plus a hash of the canonical request body to the
//! payment created on first use. Expired keys are treated as absent at lookup
//! time; there is no background sweep.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub use memory::InMemoryIdempotencyStore;

pub const DEFAULT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub body_hash: String,
    pub payment_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyCheck {
    pub is_new: bool,
    pub payment_id: Option<Uuid>,
}

impl IdempotencyCheck {
    fn new_key() -> Self {
        Self {
            is_new: true,
            payment_id: None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum IdempotencyError {
    #[error("Idempotency key '{key}' was used with a different request body")]
    KeyConflict { key: String },

    #[error("Idempotency key '{key}' was stored concurrently by another request")]
    DuplicateKey { key: String },

    #[error("Idempotency store error: {message}")]
    Store { message: String },
}

impl From<IdempotencyError> for crate::error::AppError {
    fn from(err: IdempotencyError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        let kind = match err {
            IdempotencyError::KeyConflict { key } | IdempotencyError::DuplicateKey { key } => {
                AppErrorKind::Domain(DomainError::IdempotencyConflict { key })
            }
            IdempotencyError::Store { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Cache { message })
            }
        };
        AppError::new(kind)
    }
}

/// Backing store for idempotency records. Must reject a second unexpired
/// record under the same key.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError>;

    /// Insert unless an unexpired record already holds the key. Returns
    /// whether the record was written. A record that is already expired at
    /// `now` is refused with a `Store` error.
    async fn insert_if_absent(
        &self,
        record: IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError>;

    /// Delete the record under `key` only while it still points at
    /// `payment_id`. Returns whether a record was deleted.
    async fn remove_if_owned(&self, key: &str, payment_id: Uuid) -> Result<bool, IdempotencyError>;
}

pub(crate) fn expired_record_error(record: &IdempotencyRecord) -> IdempotencyError {
    IdempotencyError::Store {
        message: format!("idempotency key '{}' is already expired", record.key),
    }
}

/// SHA-256 hex digest of the JSON encoding of a canonical request body.
pub fn body_hash<T: Serialize>(canonical_body: &T) -> Result<String, IdempotencyError> {
    let bytes = serde_json::to_vec(canonical_body).map_err(|e| IdempotencyError::Store {
        message: format!("failed to encode request body: {}", e),
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[derive(Clone)]
pub struct IdempotencyGate {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
}

impl IdempotencyGate {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self::with_ttl(store, Duration::hours(DEFAULT_TTL_HOURS))
    }

    pub fn with_ttl(store: Arc<dyn IdempotencyStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn check_key(
        &self,
        key: &str,
        body_hash: &str,
    ) -> Result<IdempotencyCheck, IdempotencyError> {
        self.check_key_at(key, body_hash, Utc::now()).await
    }

    pub async fn check_key_at(
        &self,
        key: &str,
        body_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyCheck, IdempotencyError> {
        let existing = match self.store.find(key).await? {
            Some(record) => record,
            None => return Ok(IdempotencyCheck::new_key()),
        };

        if existing.is_expired(now) {
            if self.store.remove_if_owned(key, existing.payment_id).await? {
                debug!(idempotency_key = %key, "expired idempotency key evicted");
            }
            return Ok(IdempotencyCheck::new_key());
        }

        if existing.body_hash != body_hash {
            return Err(IdempotencyError::KeyConflict {
                key: key.to_string(),
            });
        }

        Ok(IdempotencyCheck {
            is_new: false,
            payment_id: Some(existing.payment_id),
        })
    }

    /// Payment recorded under an unexpired `key`, regardless of body.
    pub async fn resolve(&self, key: &str) -> Result<Option<Uuid>, IdempotencyError> {
        let now = Utc::now();
        Ok(self
            .store
            .find(key)
            .await?
            .filter(|record| !record.is_expired(now))
            .map(|record| record.payment_id))
    }

    /// Record first use of `key`. Fails with `DuplicateKey` when another
    /// request stored it first; callers then repeat the lookup.
    pub async fn store_key(
        &self,
        key: &str,
        body_hash: &str,
        payment_id: Uuid,
    ) -> Result<(), IdempotencyError> {
        let now = Utc::now();
        let record = IdempotencyRecord {
            key: key.to_string(),
            body_hash: body_hash.to_string(),
            payment_id,
            created_at: now,
            expires_at: now + self.ttl,
        };

        if self.store.insert_if_absent(record, now).await? {
            info!(idempotency_key = %key, payment_id = %payment_id, "idempotency key stored");
            Ok(())
        } else {
            Err(IdempotencyError::DuplicateKey {
                key: key.to_string(),
            })
        }
    }

    /// Drop a key claimed for `payment_id` whose creation did not go through.
    pub async fn release_key(&self, key: &str, payment_id: Uuid) -> Result<(), IdempotencyError> {
        if self.store.remove_if_owned(key, payment_id).await? {
            info!(idempotency_key = %key, payment_id = %payment_id, "idempotency key released");
        }
        Ok(())
    }
}
