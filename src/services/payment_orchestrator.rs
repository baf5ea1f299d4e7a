//! Payment Orchestrator Service
//!
//! Creates payments behind the idempotency gate, hands card charges to the
//! settlement workflow (or charges the provider directly when the workflow
//! cannot start) and applies status updates through the payment state
//! machine.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::payment_repository::{PageRequest, PaymentFilter, PaymentPage, PaymentRepository};
use crate::domain::{
    InvalidTransition, Payment, PaymentEventKind, PaymentEventPayload, PaymentMethod,
    PaymentStatus, TaxId, TaxIdError,
};
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError};
use crate::events::{publish_best_effort, EventPublisher};
use crate::idempotency::{body_hash, IdempotencyError, IdempotencyGate};
use crate::logging::mask_tax_id;
use crate::payments::{ChargeProvider, ChargeRequest};
use crate::workflows::{
    settlement_workflow_id, DurableExecution, SettlementInput, SettlementState, StatusSignal,
    WorkflowError, STATUS_QUERY, STATUS_SIGNAL,
};
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const MAX_DESCRIPTION_LENGTH: usize = 255;

/// Lookups made while another request holds the key but has not yet saved its
/// payment.
const CLAIM_ATTEMPTS: u32 = 5;
const CLAIM_BACKOFF: Duration = Duration::from_millis(25);

// ============================================================================
// Request / Response Types
// ============================================================================

/// Payment creation request as received from the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentCommand {
    pub tax_id: String,
    pub description: String,
    pub amount: BigDecimal,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    pub payment: Payment,
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub payment: Payment,
    pub status_changed: bool,
}

/// Fields hashed to detect an idempotency key reused with another body.
#[derive(Serialize)]
struct CanonicalBody<'a> {
    amount: String,
    description: &'a str,
    method: &'a str,
    tax_id: &'a str,
}

struct ValidatedCommand {
    tax_id: TaxId,
    description: String,
    amount: BigDecimal,
    method: PaymentMethod,
    idempotency_key: Option<String>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Rejected creation input, checked in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("amount must be a number greater than or equal to 0.01")]
    InvalidAmount,
    #[error("unsupported payment method: {0}")]
    InvalidMethod(String),
    #[error("description must be between 1 and {MAX_DESCRIPTION_LENGTH} characters")]
    InvalidDescription,
    #[error("idempotency key is required for card charges")]
    MissingIdempotencyKey,
    #[error("invalid tax id: {0}")]
    InvalidTaxId(#[from] TaxIdError),
    #[error("page must be >= 1 and limit between 1 and 100")]
    InvalidPage,
}

impl ValidationError {
    fn field(&self) -> &'static str {
        match self {
            ValidationError::InvalidAmount => "amount",
            ValidationError::InvalidMethod(_) => "method",
            ValidationError::InvalidDescription => "description",
            ValidationError::MissingIdempotencyKey => "idempotencyKey",
            ValidationError::InvalidTaxId(_) => "taxId",
            ValidationError::InvalidPage => "page",
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("idempotency key '{key}' was already used with a different request")]
    KeyConflict { key: String },

    #[error("idempotency key '{key}' is held by a request still in progress")]
    KeyInFlight { key: String },

    #[error("payment {payment_id} not found")]
    NotFound { payment_id: Uuid },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("payment service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error(transparent)]
    Idempotency(IdempotencyError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<IdempotencyError> for OrchestratorError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::KeyConflict { key } => OrchestratorError::KeyConflict { key },
            other => OrchestratorError::Idempotency(other),
        }
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        let kind = match err {
            OrchestratorError::Validation(ValidationError::MissingIdempotencyKey) => {
                AppErrorKind::Domain(DomainError::MissingIdempotencyKey)
            }
            OrchestratorError::Validation(e) => {
                AppErrorKind::Validation(crate::error::ValidationError::InvalidField {
                    field: e.field().to_string(),
                    reason: e.to_string(),
                })
            }
            OrchestratorError::KeyConflict { key } | OrchestratorError::KeyInFlight { key } => {
                AppErrorKind::Domain(DomainError::IdempotencyConflict { key })
            }
            OrchestratorError::NotFound { payment_id } => {
                AppErrorKind::Domain(DomainError::PaymentNotFound {
                    payment_id: payment_id.to_string(),
                })
            }
            OrchestratorError::InvalidTransition(e) => {
                AppErrorKind::Domain(DomainError::InvalidTransition {
                    from: e.from.to_string(),
                    to: e.to.to_string(),
                })
            }
            OrchestratorError::ServiceUnavailable { message } => {
                AppErrorKind::External(ExternalError::ServiceUnavailable { message })
            }
            OrchestratorError::Idempotency(e) => return e.into(),
            OrchestratorError::Database(e) => return e.into(),
        };
        AppError::new(kind)
    }
}

/// How a new payment reaches the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    NotRequired,
    Workflow,
    Direct,
}

enum Claim {
    Won,
    Replay(Payment),
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    payments: Arc<dyn PaymentRepository>,
    gate: IdempotencyGate,
    provider: Arc<dyn ChargeProvider>,
    events: Arc<dyn EventPublisher>,
    workflows: Option<Arc<dyn DurableExecution>>,
}

impl PaymentOrchestrator {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        gate: IdempotencyGate,
        provider: Arc<dyn ChargeProvider>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            payments,
            gate,
            provider,
            events,
            workflows: None,
        }
    }

    /// Route card charges through the durable settlement workflow.
    pub fn with_workflows(mut self, workflows: Arc<dyn DurableExecution>) -> Self {
        self.workflows = Some(workflows);
        self
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a payment, or replay the one already created under the same
    /// idempotency key.
    pub async fn create(
        &self,
        command: CreatePaymentCommand,
        idempotency_key: Option<&str>,
    ) -> OrchestratorResult<CreateOutcome> {
        let validated = validate(&command, idempotency_key)?;
        let hash = body_hash(&CanonicalBody {
            amount: validated.amount.normalized().to_string(),
            description: &validated.description,
            method: validated.method.as_str(),
            tax_id: validated.tax_id.as_str(),
        })?;

        let mut payment = Payment::new(
            validated.tax_id.clone(),
            validated.description.clone(),
            validated.amount.clone(),
            validated.method,
            Utc::now(),
        );
        let payment_id = payment.id;
        let key = validated.idempotency_key.as_deref();

        if let Some(key) = key {
            if let Claim::Replay(existing) = self.claim_key(key, &hash, payment_id).await? {
                return Ok(CreateOutcome {
                    payment: existing,
                    is_new: false,
                });
            }
        }

        let settlement = match self.settle(&mut payment, key).await {
            Ok(settlement) => settlement,
            Err(e) => {
                self.release_claim(key, payment_id).await;
                return Err(e);
            }
        };

        let payment = match self.persist_new(payment).await {
            Ok(saved) => saved,
            Err(e) => {
                // A started workflow records the payment itself.
                if settlement != Settlement::Workflow {
                    self.release_claim(key, payment_id).await;
                }
                return Err(e);
            }
        };

        info!(
            payment_id = %payment.id,
            method = %payment.method,
            tax_id = %mask_tax_id(payment.tax_id.as_str()),
            "payment created"
        );
        publish_best_effort(
            self.events.as_ref(),
            PaymentEventKind::Created,
            &PaymentEventPayload::created(&payment),
        )
        .await;

        Ok(CreateOutcome {
            payment,
            is_new: true,
        })
    }

    /// Take the idempotency key for `payment_id`, or hand back the payment
    /// already created under it.
    async fn claim_key(&self, key: &str, hash: &str, payment_id: Uuid) -> OrchestratorResult<Claim> {
        for attempt in 1..=CLAIM_ATTEMPTS {
            let check = self.gate.check_key(key, hash).await?;
            match check.payment_id.filter(|_| !check.is_new) {
                Some(existing) => {
                    if let Some(payment) = self.payments.find_by_id(existing).await? {
                        info!(idempotency_key = %key, payment_id = %existing, "idempotent replay");
                        return Ok(Claim::Replay(payment));
                    }
                    debug!(
                        idempotency_key = %key,
                        payment_id = %existing,
                        attempt,
                        "idempotency key held by a payment not yet saved"
                    );
                    tokio::time::sleep(CLAIM_BACKOFF * attempt).await;
                }
                None => match self.gate.store_key(key, hash, payment_id).await {
                    Ok(()) => return Ok(Claim::Won),
                    Err(IdempotencyError::DuplicateKey { .. }) => {
                        debug!(idempotency_key = %key, "idempotency key taken concurrently");
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }

        warn!(idempotency_key = %key, "idempotency key still held by another request");
        Err(OrchestratorError::KeyInFlight {
            key: key.to_string(),
        })
    }

    async fn release_claim(&self, key: Option<&str>, payment_id: Uuid) {
        let Some(key) = key else {
            return;
        };
        if let Err(e) = self.gate.release_key(key, payment_id).await {
            warn!(idempotency_key = %key, payment_id = %payment_id, error = %e, "could not release idempotency key");
        }
    }

    async fn settle(&self, payment: &mut Payment, key: Option<&str>) -> OrchestratorResult<Settlement> {
        if !payment.method.requires_settlement() {
            return Ok(Settlement::NotRequired);
        }
        let key = key.ok_or(ValidationError::MissingIdempotencyKey)?;
        self.begin_settlement(payment, key).await
    }

    /// Start the settlement workflow; fall back to a direct provider charge
    /// when it cannot be started.
    async fn begin_settlement(
        &self,
        payment: &mut Payment,
        key: &str,
    ) -> OrchestratorResult<Settlement> {
        let workflow_error = match &self.workflows {
            Some(workflows) => {
                let input = SettlementInput {
                    payment_id: payment.id,
                    tax_id: payment.tax_id.clone(),
                    description: payment.description.clone(),
                    amount: payment.amount.clone(),
                    idempotency_key: key.to_string(),
                };
                let workflow_id = settlement_workflow_id(payment.id);
                let started = match serde_json::to_value(&input) {
                    Ok(input) => workflows.start(&workflow_id, input).await,
                    Err(e) => Err(WorkflowError::from(e)),
                };
                match started {
                    Ok(()) => {
                        info!(payment_id = %payment.id, workflow_id = %workflow_id, "settlement workflow started");
                        return Ok(Settlement::Workflow);
                    }
                    Err(e) => {
                        warn!(
                            payment_id = %payment.id,
                            error = %e,
                            "settlement workflow start failed, charging provider directly"
                        );
                        e.to_string()
                    }
                }
            }
            None => {
                debug!(payment_id = %payment.id, "no workflow engine, charging provider directly");
                "no workflow engine configured".to_string()
            }
        };

        let request = ChargeRequest {
            amount: payment.amount.clone(),
            description: payment.description.clone(),
            idempotency_key: key.to_string(),
            tax_id: Some(payment.tax_id.clone()),
        };
        match self.provider.open_charge(request).await {
            Ok(response) => {
                payment.set_provider_ref(response.provider_ref, Utc::now());
                info!(
                    payment_id = %payment.id,
                    provider = %self.provider.name(),
                    "provider charge opened without workflow"
                );
                Ok(Settlement::Direct)
            }
            Err(e) => {
                error!(
                    payment_id = %payment.id,
                    workflow_error = %workflow_error,
                    provider_error = %e,
                    "settlement could not be started"
                );
                Err(OrchestratorError::ServiceUnavailable {
                    message: format!("workflow: {}; provider: {}", workflow_error, e),
                })
            }
        }
    }

    /// Save a new payment. The settlement workflow may have recorded the row
    /// already, in which case the stored row wins.
    async fn persist_new(&self, payment: Payment) -> OrchestratorResult<Payment> {
        match self.payments.save(&payment).await {
            Ok(saved) => Ok(saved),
            Err(DatabaseError {
                kind: DatabaseErrorKind::Duplicate { .. },
            }) => {
                debug!(payment_id = %payment.id, "payment already recorded by settlement");
                self.payments
                    .find_by_id(payment.id)
                    .await?
                    .ok_or(OrchestratorError::NotFound {
                        payment_id: payment.id,
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Status Updates
    // =========================================================================

    pub async fn update(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> OrchestratorResult<UpdateOutcome> {
        let mut payment = self.find_by_id(payment_id).await?;

        let Some(change) = payment.transition_to(status, Utc::now())? else {
            return Ok(UpdateOutcome {
                payment,
                status_changed: false,
            });
        };

        let payment = match self.payments.update(&payment).await {
            Ok(saved) => saved,
            Err(DatabaseError {
                kind: DatabaseErrorKind::StaleWrite { .. },
            }) => {
                let current = self.find_by_id(payment_id).await?;
                return Err(InvalidTransition {
                    from: current.status,
                    to: status,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            payment_id = %payment_id,
            from = %change.old_status,
            to = %change.new_status,
            "payment status updated"
        );
        publish_best_effort(
            self.events.as_ref(),
            PaymentEventKind::StatusChanged,
            &PaymentEventPayload::status_changed(&payment, &change),
        )
        .await;

        if payment.method.requires_settlement() && status.is_terminal() {
            self.notify_settlement(payment_id, status).await;
        }

        Ok(UpdateOutcome {
            payment,
            status_changed: true,
        })
    }

    /// Let a waiting settlement workflow finish early.
    async fn notify_settlement(&self, payment_id: Uuid, status: PaymentStatus) {
        let Some(workflows) = &self.workflows else {
            return;
        };
        let signal = StatusSignal {
            status,
            provider_data: None,
        };
        let payload = match serde_json::to_value(&signal) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(payment_id = %payment_id, error = %e, "could not encode settlement signal");
                return;
            }
        };
        if let Err(e) = workflows
            .signal(&settlement_workflow_id(payment_id), STATUS_SIGNAL, payload)
            .await
        {
            debug!(payment_id = %payment_id, error = %e, "settlement workflow not signalled");
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn find_by_id(&self, payment_id: Uuid) -> OrchestratorResult<Payment> {
        self.payments
            .find_by_id(payment_id)
            .await?
            .ok_or(OrchestratorError::NotFound { payment_id })
    }

    pub async fn find_many(
        &self,
        filter: PaymentFilter,
        page: PageRequest,
    ) -> OrchestratorResult<PaymentPage> {
        if !page.is_valid() {
            return Err(ValidationError::InvalidPage.into());
        }
        Ok(self.payments.find_many(&filter, page).await?)
    }

    /// In-flight settlement view, `None` when no workflow tracks the payment.
    pub async fn settlement_state(
        &self,
        payment_id: Uuid,
    ) -> OrchestratorResult<Option<SettlementState>> {
        let Some(workflows) = &self.workflows else {
            return Ok(None);
        };
        match workflows
            .query(&settlement_workflow_id(payment_id), STATUS_QUERY)
            .await
        {
            Ok(value) => Ok(serde_json::from_value(value).ok()),
            Err(WorkflowError::NotFound { .. }) => Ok(None),
            Err(e) => Err(OrchestratorError::ServiceUnavailable {
                message: e.to_string(),
            }),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn validate(
    command: &CreatePaymentCommand,
    idempotency_key: Option<&str>,
) -> Result<ValidatedCommand, ValidationError> {
    let minimum = BigDecimal::new(1.into(), 2);
    if command.amount < minimum {
        return Err(ValidationError::InvalidAmount);
    }

    let method = PaymentMethod::from_str(&command.method)
        .map_err(|_| ValidationError::InvalidMethod(command.method.clone()))?;

    let description = command.description.trim();
    let length = description.chars().count();
    if length == 0 || length > MAX_DESCRIPTION_LENGTH {
        return Err(ValidationError::InvalidDescription);
    }

    let idempotency_key = idempotency_key
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);
    if method.requires_settlement() && idempotency_key.is_none() {
        return Err(ValidationError::MissingIdempotencyKey);
    }

    let tax_id = TaxId::parse(&command.tax_id)?;

    Ok(ValidatedCommand {
        tax_id,
        description: description.to_string(),
        amount: command.amount.clone(),
        method,
        idempotency_key,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn command(method: &str) -> CreatePaymentCommand {
        CreatePaymentCommand {
            tax_id: "123.456.789-09".to_string(),
            description: "Order #1".to_string(),
            amount: BigDecimal::from_str("10.50").unwrap(),
            method: method.to_string(),
        }
    }

    #[test]
    fn test_validation_order() {
        let mut cmd = command("WIRE");
        cmd.amount = BigDecimal::from_str("0.001").unwrap();
        assert_eq!(validate(&cmd, None).err(), Some(ValidationError::InvalidAmount));

        cmd.amount = BigDecimal::from(1);
        assert!(matches!(
            validate(&cmd, None),
            Err(ValidationError::InvalidMethod(_))
        ));

        cmd.method = "CARD_CHARGE".to_string();
        cmd.description = "   ".to_string();
        assert_eq!(
            validate(&cmd, None).err(),
            Some(ValidationError::InvalidDescription)
        );

        cmd.description = "Order".to_string();
        assert_eq!(
            validate(&cmd, Some("  ")).err(),
            Some(ValidationError::MissingIdempotencyKey)
        );

        cmd.tax_id = "11111111111".to_string();
        assert!(matches!(
            validate(&cmd, Some("key-1")),
            Err(ValidationError::InvalidTaxId(_))
        ));
    }

    #[test]
    fn test_validation_accepts_minimum_amount_and_aliases() {
        let mut cmd = command("PIX");
        cmd.amount = BigDecimal::from_str("0.01").unwrap();
        let validated = validate(&cmd, None).unwrap();

        assert_eq!(validated.method, PaymentMethod::InstantTransfer);
        assert_eq!(validated.tax_id.as_str(), "12345678909");
        assert!(validated.idempotency_key.is_none());
    }

    #[test]
    fn test_description_length_limit() {
        let mut cmd = command("INSTANT_TRANSFER");
        cmd.description = "x".repeat(MAX_DESCRIPTION_LENGTH);
        assert!(validate(&cmd, None).is_ok());

        cmd.description = "x".repeat(MAX_DESCRIPTION_LENGTH + 1);
        assert_eq!(
            validate(&cmd, None).err(),
            Some(ValidationError::InvalidDescription)
        );
    }

    #[test]
    fn test_error_mapping() {
        let app: AppError = OrchestratorError::from(ValidationError::MissingIdempotencyKey).into();
        assert_eq!(app.status_code(), 400);

        let app: AppError = OrchestratorError::KeyConflict {
            key: "k".to_string(),
        }
        .into();
        assert_eq!(app.status_code(), 409);

        let app: AppError = OrchestratorError::KeyInFlight {
            key: "k".to_string(),
        }
        .into();
        assert_eq!(app.status_code(), 409);

        let app: AppError = OrchestratorError::from(InvalidTransition {
            from: PaymentStatus::Settled,
            to: PaymentStatus::Failed,
        })
        .into();
        assert_eq!(app.status_code(), 422);

        let app: AppError = OrchestratorError::ServiceUnavailable {
            message: "down".to_string(),
        }
        .into();
        assert_eq!(app.status_code(), 503);

        let app: AppError = OrchestratorError::NotFound {
            payment_id: Uuid::new_v4(),
        }
        .into();
        assert_eq!(app.status_code(), 404);
    }
}
