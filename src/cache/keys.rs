//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod idempotency {
    use super::*;

    pub const NAMESPACE: &str = "idempotency";

    /// `v1:idempotency:{key}`
    #[derive(Debug, Clone)]
    pub struct RecordKey {
        pub key: String,
    }

    impl RecordKey {
        pub fn new(key: impl Into<String>) -> Self {
            Self { key: key.into() }
        }
    }

    impl fmt::Display for RecordKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:{}", VERSION, NAMESPACE, self.key)
        }
    }
}
