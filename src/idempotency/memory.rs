use super::{expired_record_error, IdempotencyError, IdempotencyRecord, IdempotencyStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local idempotency store. The write lock makes insert-if-absent atomic.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn insert_if_absent(
        &self,
        record: IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError> {
        if record.is_expired(now) {
            return Err(expired_record_error(&record));
        }
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.key) {
            if !existing.is_expired(now) {
                return Ok(false);
            }
        }
        records.insert(record.key.clone(), record);
        Ok(true)
    }

    async fn remove_if_owned(&self, key: &str, payment_id: Uuid) -> Result<bool, IdempotencyError> {
        let mut records = self.records.write().await;
        match records.get(key) {
            Some(record) if record.payment_id == payment_id => {
                records.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
