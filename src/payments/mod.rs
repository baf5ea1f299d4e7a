//! Outbound payment provider integration.

pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::ChargeProvider;
pub use retry::RetryPolicy;
pub use types::{ChargeLookup, ChargeRequest, ChargeResponse, ProviderName};
