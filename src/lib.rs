//! Payment orchestration core: idempotent payment creation, the payment
//! status state machine, a retrying charge-provider client and a durable
//! settlement workflow for card charges.

#[cfg(feature = "cache")]
pub mod cache;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod logging;
pub mod payments;
pub mod services;
pub mod workers;
pub mod workflows;

pub use error::{AppError, AppResult};
