//! Provider webhook handling
//!
//! Turns a provider payment notification into a status signal for the
//! matching settlement workflow. Payments settled outside a workflow (direct
//! provider fallback) are updated through the orchestrator instead.

use crate::domain::PaymentStatus;
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, InfrastructureError};
use crate::idempotency::IdempotencyGate;
use crate::payments::types::map_provider_status;
use crate::payments::utils::verify_hmac_sha256_hex;
use crate::services::payment_orchestrator::{OrchestratorError, PaymentOrchestrator};
use crate::workflows::{
    settlement_workflow_id, DurableExecution, StatusSignal, WorkflowError, STATUS_SIGNAL,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PAYMENT_NOTIFICATION: &str = "payment";

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Unknown external reference: {0}")]
    UnknownReference(String),
    #[error("Processing error: {0}")]
    ProcessingError(String),
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        let kind = match err {
            WebhookProcessorError::InvalidSignature => {
                AppErrorKind::External(ExternalError::WebhookVerification {
                    message: err.to_string(),
                })
            }
            WebhookProcessorError::InvalidPayload(reason) => {
                AppErrorKind::Validation(crate::error::ValidationError::InvalidField {
                    field: "payload".to_string(),
                    reason,
                })
            }
            WebhookProcessorError::UnknownReference(reference) => {
                AppErrorKind::Domain(DomainError::PaymentNotFound {
                    payment_id: reference,
                })
            }
            WebhookProcessorError::ProcessingError(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Workflow { message })
            }
        };
        AppError::new(kind)
    }
}

/// What the processor did with a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Ignored { reason: String },
    Signalled { payment_id: Uuid, status: PaymentStatus },
    Updated { payment_id: Uuid, status: PaymentStatus },
}

#[derive(Debug, Deserialize)]
struct ProviderNotification {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: NotificationData,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationData {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
}

pub struct WebhookProcessor {
    gate: IdempotencyGate,
    orchestrator: Arc<PaymentOrchestrator>,
    workflows: Option<Arc<dyn DurableExecution>>,
    webhook_secret: Option<String>,
}

impl WebhookProcessor {
    pub fn new(
        gate: IdempotencyGate,
        orchestrator: Arc<PaymentOrchestrator>,
        workflows: Option<Arc<dyn DurableExecution>>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            gate,
            orchestrator,
            workflows,
            webhook_secret: webhook_secret.filter(|s| !s.is_empty()),
        }
    }

    pub async fn process_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        if let Some(secret) = &self.webhook_secret {
            let signature = signature.ok_or(WebhookProcessorError::InvalidSignature)?;
            if !verify_hmac_sha256_hex(raw_body, secret, signature) {
                error!("Invalid webhook signature");
                return Err(WebhookProcessorError::InvalidSignature);
            }
        }

        let notification: ProviderNotification = serde_json::from_slice(raw_body)
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?;

        if notification.kind != PAYMENT_NOTIFICATION {
            debug!(kind = %notification.kind, "ignoring non-payment notification");
            return Ok(WebhookOutcome::Ignored {
                reason: format!("notification type '{}'", notification.kind),
            });
        }

        let provider_status = notification.data.status.as_deref().ok_or_else(|| {
            WebhookProcessorError::InvalidPayload("missing data.status".to_string())
        })?;
        let status = map_provider_status(provider_status);
        if !status.is_terminal() {
            debug!(provider_status = %provider_status, "ignoring non-terminal provider status");
            return Ok(WebhookOutcome::Ignored {
                reason: format!("provider status '{}'", provider_status),
            });
        }

        let reference = notification
            .data
            .external_reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                WebhookProcessorError::InvalidPayload("missing data.external_reference".to_string())
            })?;
        let payment_id = self.resolve_reference(reference).await?;

        info!(payment_id = %payment_id, status = %status, "provider notification received");
        self.deliver(payment_id, status, notification_payload(raw_body))
            .await
    }

    /// External references carry the idempotency key; older charges used the
    /// payment id directly.
    async fn resolve_reference(&self, reference: &str) -> Result<Uuid, WebhookProcessorError> {
        match self.gate.resolve(reference).await {
            Ok(Some(payment_id)) => return Ok(payment_id),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "idempotency lookup failed for webhook reference"),
        }
        Uuid::parse_str(reference)
            .map_err(|_| WebhookProcessorError::UnknownReference(reference.to_string()))
    }

    async fn deliver(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        provider_data: Option<JsonValue>,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        if let Some(workflows) = &self.workflows {
            let signal = StatusSignal {
                status,
                provider_data,
            };
            let payload = serde_json::to_value(&signal)
                .map_err(|e| WebhookProcessorError::ProcessingError(e.to_string()))?;

            match workflows
                .signal(&settlement_workflow_id(payment_id), STATUS_SIGNAL, payload)
                .await
            {
                Ok(()) => return Ok(WebhookOutcome::Signalled { payment_id, status }),
                Err(WorkflowError::NotFound { .. }) | Err(WorkflowError::NotRunning { .. }) => {
                    debug!(payment_id = %payment_id, "no running settlement, updating payment");
                }
                Err(e) => return Err(WebhookProcessorError::ProcessingError(e.to_string())),
            }
        }

        match self.orchestrator.update(payment_id, status).await {
            Ok(_) => Ok(WebhookOutcome::Updated { payment_id, status }),
            Err(OrchestratorError::InvalidTransition(e)) => {
                info!(payment_id = %payment_id, error = %e, "payment already finalized");
                Ok(WebhookOutcome::Ignored {
                    reason: e.to_string(),
                })
            }
            Err(OrchestratorError::NotFound { .. }) => Err(
                WebhookProcessorError::UnknownReference(payment_id.to_string()),
            ),
            Err(e) => Err(WebhookProcessorError::ProcessingError(e.to_string())),
        }
    }
}

fn notification_payload(raw_body: &[u8]) -> Option<JsonValue> {
    serde_json::from_slice::<JsonValue>(raw_body)
        .ok()
        .and_then(|v| v.get("data").cloned())
}
