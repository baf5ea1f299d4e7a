//! Redis-backed idempotency store
//!
//! Records are JSON values under `v1:idempotency:{key}` with a Redis expiry at
//! the record's `expires_at`, so `SET NX` gives the single-writer guarantee and
//! expired keys disappear on their own. Removal compares the stored payment
//! id inside a Lua script so a newer claim is never deleted.

use super::error::CacheError;
use super::keys::idempotency::RecordKey;
use super::RedisPool;
use crate::idempotency::{
    expired_record_error, IdempotencyError, IdempotencyRecord, IdempotencyStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use tracing::warn;
use uuid::Uuid;

const REMOVE_IF_OWNED: &str = r#"
local raw = redis.call('GET', KEYS[1])
if raw and cjson.decode(raw).payment_id == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Milliseconds until `record` expires, refusing records already past it.
fn ttl_millis(record: &IdempotencyRecord, now: DateTime<Utc>) -> Result<i64, IdempotencyError> {
    let ttl_ms = (record.expires_at - now).num_milliseconds();
    if ttl_ms <= 0 {
        warn!(idempotency_key = %record.key, "refusing to store an already expired idempotency key");
        return Err(expired_record_error(record));
    }
    Ok(ttl_ms)
}

#[derive(Clone)]
pub struct RedisIdempotencyStore {
    pool: RedisPool,
}

impl RedisIdempotencyStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let raw: Option<String> = conn
            .get(RecordKey::new(key).to_string())
            .await
            .map_err(CacheError::from)?;

        match raw {
            Some(json) => {
                let record = serde_json::from_str(&json).map_err(CacheError::from)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn insert_if_absent(
        &self,
        record: IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError> {
        let ttl_ms = ttl_millis(&record, now)?;
        let payload = serde_json::to_string(&record).map_err(CacheError::from)?;
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(RecordKey::new(&record.key).to_string())
            .arg(payload)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        Ok(reply.is_some())
    }

    async fn remove_if_owned(&self, key: &str, payment_id: Uuid) -> Result<bool, IdempotencyError> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let removed: i64 = redis::Script::new(REMOVE_IF_OWNED)
            .key(RecordKey::new(key).to_string())
            .arg(payment_id.to_string())
            .invoke_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;
        Ok(removed > 0)
    }
}
