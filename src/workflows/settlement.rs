//! Card-charge settlement workflow
//!
//! Records the pending payment, opens the provider charge, then waits in
//! bounded poll rounds for a terminal status signal. A round without a signal
//! optionally asks the provider directly. No outcome after the last round
//! finalizes the payment as `FAILED`.

use super::context::{StepRetryPolicy, WorkflowContext};
use super::engine::Workflow;
use super::error::{ActivityError, WorkflowError};
use crate::domain::{PaymentStatus, PaymentStatusChanged, TaxId};
use crate::payments::ChargeResponse;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const SETTLEMENT_WORKFLOW_TYPE: &str = "payment_settlement";
pub const STATUS_SIGNAL: &str = "payment_status";
pub const STATUS_QUERY: &str = "payment_status";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_POLLS: u32 = 30;

pub fn settlement_workflow_id(payment_id: Uuid) -> String {
    format!("settlement-{}", payment_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementInput {
    pub payment_id: Uuid,
    pub tax_id: TaxId,
    pub description: String,
    pub amount: BigDecimal,
    pub idempotency_key: String,
}

/// Payload of the status signal. Only terminal statuses are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSignal {
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_data: Option<JsonValue>,
}

/// In-flight view returned by the status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementState {
    pub payment_id: Uuid,
    pub current_status: PaymentStatus,
    pub provider_ref: Option<String>,
    pub signal_received: bool,
    pub polls: u32,
}

impl SettlementState {
    fn new(payment_id: Uuid) -> Self {
        Self {
            payment_id,
            current_status: PaymentStatus::Pending,
            provider_ref: None,
            signal_received: false,
            polls: 0,
        }
    }
}

/// Result of writing the final status. `status` is what the store holds
/// afterwards, which differs from the requested status when another writer
/// finalized the payment first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub status: PaymentStatus,
    pub change: Option<PaymentStatusChanged>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementOutcome {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub provider_ref: Option<String>,
    pub signal_received: bool,
    pub polls: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementConfig {
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub poll_provider: bool,
    pub step_retry: StepRetryPolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_polls: DEFAULT_MAX_POLLS,
            poll_provider: true,
            step_retry: StepRetryPolicy::default(),
        }
    }
}

/// Side effects the workflow may perform. Each call runs as a journaled step.
#[async_trait]
pub trait SettlementActivities: Send + Sync {
    /// Ensure a `PENDING` row exists for the payment.
    async fn record_pending(&self, input: &SettlementInput) -> Result<(), ActivityError>;

    async fn open_charge(&self, input: &SettlementInput) -> Result<ChargeResponse, ActivityError>;

    async fn attach_provider_ref(
        &self,
        payment_id: Uuid,
        provider_ref: &str,
    ) -> Result<(), ActivityError>;

    /// Provider view of the charge; lookup failures report `None`.
    async fn check_status(&self, input: &SettlementInput) -> Result<Option<PaymentStatus>, ActivityError>;

    async fn finalize(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> Result<FinalizeOutcome, ActivityError>;

    async fn publish_status_change(&self, change: &PaymentStatusChanged) -> Result<(), ActivityError>;
}

pub struct SettlementWorkflow {
    activities: Arc<dyn SettlementActivities>,
    config: SettlementConfig,
}

impl SettlementWorkflow {
    pub fn new(activities: Arc<dyn SettlementActivities>, config: SettlementConfig) -> Self {
        Self { activities, config }
    }

    async fn open_and_attach(
        &self,
        ctx: &mut WorkflowContext,
        input: &SettlementInput,
        state: &mut SettlementState,
    ) -> Result<(), WorkflowError> {
        let activities = self.activities.as_ref();

        ctx.activity("record_pending", || activities.record_pending(input))
            .await?;

        let charge = ctx
            .activity("open_charge", || activities.open_charge(input))
            .await?;

        ctx.activity("attach_provider_ref", || {
            activities.attach_provider_ref(input.payment_id, &charge.provider_ref)
        })
        .await?;

        state.provider_ref = Some(charge.provider_ref);
        ctx.publish_state(&*state).await
    }

    /// Poll rounds until a terminal status is known or the rounds run out.
    async fn await_outcome(
        &self,
        ctx: &mut WorkflowContext,
        input: &SettlementInput,
        state: &mut SettlementState,
    ) -> Result<PaymentStatus, WorkflowError> {
        let activities = self.activities.as_ref();

        while state.polls < self.config.max_polls {
            if let Some(signal) = ctx
                .wait_for_signal(STATUS_SIGNAL, self.config.poll_interval)
                .await?
            {
                match serde_json::from_value::<StatusSignal>(signal.payload) {
                    Ok(signal) if signal.status.is_terminal() => {
                        info!(
                            payment_id = %input.payment_id,
                            status = %signal.status,
                            "settlement signal received"
                        );
                        state.signal_received = true;
                        return Ok(signal.status);
                    }
                    Ok(signal) => warn!(
                        payment_id = %input.payment_id,
                        status = %signal.status,
                        "ignoring non-terminal settlement signal"
                    ),
                    Err(e) => warn!(
                        payment_id = %input.payment_id,
                        error = %e,
                        "ignoring malformed settlement signal"
                    ),
                }
            }

            state.polls += 1;
            ctx.publish_state(&*state).await?;

            if self.config.poll_provider {
                let status = ctx
                    .activity("check_status", || activities.check_status(input))
                    .await?;
                if let Some(status) = status.filter(|s| s.is_terminal()) {
                    info!(
                        payment_id = %input.payment_id,
                        status = %status,
                        polls = state.polls,
                        "provider reported terminal status"
                    );
                    return Ok(status);
                }
            }
        }

        warn!(
            payment_id = %input.payment_id,
            polls = state.polls,
            "settlement outcome not received in time"
        );
        Ok(PaymentStatus::Failed)
    }

    async fn finalize(
        &self,
        ctx: &mut WorkflowContext,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> Result<PaymentStatus, WorkflowError> {
        let activities = self.activities.as_ref();

        let outcome = ctx
            .activity("finalize", || activities.finalize(payment_id, status))
            .await?;

        if let Some(change) = outcome.change {
            ctx.activity("publish_status_change", || {
                activities.publish_status_change(&change)
            })
            .await?;
        }
        Ok(outcome.status)
    }
}

#[async_trait]
impl Workflow for SettlementWorkflow {
    type Input = SettlementInput;
    type Output = SettlementOutcome;

    fn workflow_type(&self) -> &'static str {
        SETTLEMENT_WORKFLOW_TYPE
    }

    fn step_retry(&self) -> StepRetryPolicy {
        self.config.step_retry
    }

    fn validate_signal(&self, name: &str, payload: &JsonValue) -> Result<(), WorkflowError> {
        if name != STATUS_SIGNAL {
            return Err(WorkflowError::InvalidSignal {
                message: format!("unknown signal '{}'", name),
            });
        }
        let signal: StatusSignal =
            serde_json::from_value(payload.clone()).map_err(|e| WorkflowError::InvalidSignal {
                message: e.to_string(),
            })?;
        if !signal.status.is_terminal() {
            return Err(WorkflowError::InvalidSignal {
                message: format!("status {} is not terminal", signal.status),
            });
        }
        Ok(())
    }

    fn supports_query(&self, name: &str) -> bool {
        name == STATUS_QUERY
    }

    async fn run(
        &self,
        ctx: &mut WorkflowContext,
        input: SettlementInput,
    ) -> Result<SettlementOutcome, WorkflowError> {
        let payment_id = input.payment_id;
        let mut state = SettlementState::new(payment_id);
        ctx.publish_state(&state).await?;

        let settled = async {
            self.open_and_attach(ctx, &input, &mut state).await?;
            let status = self.await_outcome(ctx, &input, &mut state).await?;
            self.finalize(ctx, payment_id, status).await
        }
        .await;

        match settled {
            Ok(status) => {
                state.current_status = status;
                ctx.publish_state(&state).await?;
                info!(payment_id = %payment_id, status = %status, "settlement finished");
                Ok(SettlementOutcome {
                    payment_id,
                    status,
                    provider_ref: state.provider_ref,
                    signal_received: state.signal_received,
                    polls: state.polls,
                })
            }
            Err(e) => {
                error!(payment_id = %payment_id, error = %e, "settlement failed");
                match self.finalize(ctx, payment_id, PaymentStatus::Failed).await {
                    Ok(status) => state.current_status = status,
                    Err(finalize_err) => {
                        error!(
                            payment_id = %payment_id,
                            error = %finalize_err,
                            "could not mark payment failed"
                        );
                        state.current_status = PaymentStatus::Failed;
                    }
                }
                ctx.publish_state(&state).await?;
                Err(WorkflowError::SettlementFailed {
                    payment_id,
                    message: e.to_string(),
                })
            }
        }
    }
}
