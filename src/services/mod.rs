//! Services module for payment orchestration and provider notifications

pub mod payment_orchestrator;
pub mod webhook_processor;

// Re-export orchestrator types
pub use crate::services::payment_orchestrator::{
    CreateOutcome, CreatePaymentCommand, OrchestratorError, OrchestratorResult,
    PaymentOrchestrator, UpdateOutcome, ValidationError,
};
pub use crate::services::webhook_processor::{
    WebhookOutcome, WebhookProcessor, WebhookProcessorError,
};
