//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use settlement_core::database::InMemoryPaymentRepository;
use settlement_core::domain::PaymentStatus;
use settlement_core::events::BroadcastEventPublisher;
use chrono::{DateTime, Utc};
use settlement_core::idempotency::{
    IdempotencyError, IdempotencyGate, IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore,
};
use settlement_core::payments::{
    ChargeLookup, ChargeProvider, ChargeRequest, ChargeResponse, PaymentError, PaymentResult,
    ProviderName,
};
use settlement_core::services::PaymentOrchestrator;
use settlement_core::workflows::{
    DurableExecution, InMemoryJournal, LocalWorkflowEngine, PaymentActivities, SettlementConfig,
    SettlementWorkflow, WorkflowError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Succeed,
    Unavailable,
    Reject,
}

/// Provider whose answers are set by the test.
pub struct ScriptedProvider {
    behavior: Mutex<OpenBehavior>,
    status: Mutex<Option<PaymentStatus>>,
    open_calls: AtomicU32,
    status_calls: AtomicU32,
    keys: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(behavior: OpenBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            status: Mutex::new(None),
            open_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            keys: Mutex::new(Vec::new()),
        }
    }

    pub fn set_status(&self, status: Option<PaymentStatus>) {
        *self.status.lock().unwrap() = status;
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChargeProvider for ScriptedProvider {
    async fn open_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(request.idempotency_key.clone());

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            OpenBehavior::Succeed => Ok(ChargeResponse {
                provider_ref: format!("pref-{}", request.idempotency_key),
                provider_data: None,
            }),
            OpenBehavior::Unavailable => Err(PaymentError::ProviderUnavailable {
                attempts: 3,
                message: "connection refused".to_string(),
            }),
            OpenBehavior::Reject => Err(PaymentError::ValidationError {
                message: "payer rejected".to_string(),
                field: None,
            }),
        }
    }

    async fn charge_status(&self, external_reference: &str) -> PaymentResult<Option<ChargeLookup>> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status.lock().unwrap().map(|status| ChargeLookup {
            status,
            provider_status: status.as_str().to_lowercase(),
            provider_payment_id: Some(format!("pay-{}", external_reference)),
        }))
    }

    fn name(&self) -> ProviderName {
        ProviderName::Stub
    }
}

/// Durable execution that refuses every call, as when the engine is down.
pub struct UnavailableWorkflows;

#[async_trait]
impl DurableExecution for UnavailableWorkflows {
    async fn start(&self, _workflow_id: &str, _input: JsonValue) -> Result<(), WorkflowError> {
        Err(WorkflowError::ShuttingDown)
    }

    async fn signal(
        &self,
        workflow_id: &str,
        _signal_name: &str,
        _payload: JsonValue,
    ) -> Result<(), WorkflowError> {
        Err(WorkflowError::NotFound {
            workflow_id: workflow_id.to_string(),
        })
    }

    async fn query(&self, workflow_id: &str, _query_name: &str) -> Result<JsonValue, WorkflowError> {
        Err(WorkflowError::NotFound {
            workflow_id: workflow_id.to_string(),
        })
    }

    async fn result(&self, workflow_id: &str) -> Result<JsonValue, WorkflowError> {
        Err(WorkflowError::NotFound {
            workflow_id: workflow_id.to_string(),
        })
    }
}

/// In-memory store that hands control back to the scheduler after each
/// lookup, so concurrent requests interleave between check and store.
pub struct YieldingIdempotencyStore {
    inner: Arc<InMemoryIdempotencyStore>,
}

#[async_trait]
impl IdempotencyStore for YieldingIdempotencyStore {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let found = self.inner.find(key).await;
        tokio::task::yield_now().await;
        found
    }

    async fn insert_if_absent(
        &self,
        record: IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError> {
        self.inner.insert_if_absent(record, now).await
    }

    async fn remove_if_owned(&self, key: &str, payment_id: Uuid) -> Result<bool, IdempotencyError> {
        self.inner.remove_if_owned(key, payment_id).await
    }
}

pub type SettlementEngine = LocalWorkflowEngine<SettlementWorkflow>;

/// Everything a test may want to inspect after driving the orchestrator.
pub struct Harness {
    pub payments: Arc<InMemoryPaymentRepository>,
    pub idempotency: Arc<InMemoryIdempotencyStore>,
    pub provider: Arc<ScriptedProvider>,
    pub events: Arc<BroadcastEventPublisher>,
    pub journal: Arc<InMemoryJournal>,
    pub engine: Option<Arc<SettlementEngine>>,
    pub orchestrator: Arc<PaymentOrchestrator>,
}

impl Harness {
    pub fn gate(&self) -> IdempotencyGate {
        IdempotencyGate::new(self.idempotency.clone())
    }
}

pub fn fast_settlement() -> SettlementConfig {
    SettlementConfig {
        poll_interval: Duration::from_secs(1),
        max_polls: 3,
        ..SettlementConfig::default()
    }
}

pub fn engine_for(
    payments: Arc<InMemoryPaymentRepository>,
    provider: Arc<ScriptedProvider>,
    events: Arc<BroadcastEventPublisher>,
    journal: Arc<InMemoryJournal>,
    config: SettlementConfig,
) -> Arc<SettlementEngine> {
    let activities = PaymentActivities::new(payments, provider, events);
    let workflow = SettlementWorkflow::new(Arc::new(activities), config);
    Arc::new(LocalWorkflowEngine::new(Arc::new(workflow), journal))
}

/// Orchestrator over in-memory adapters. `engine` selects the settlement
/// backend: a local engine, an unavailable one, or none.
pub enum Engine {
    Local(SettlementConfig),
    Unavailable,
    None,
}

pub fn harness(behavior: OpenBehavior, engine: Engine) -> Harness {
    let idempotency = Arc::new(InMemoryIdempotencyStore::new());
    build_harness(behavior, engine, idempotency.clone(), idempotency)
}

/// Like [`harness`], but key lookups yield to other tasks before returning.
pub fn contended_harness(behavior: OpenBehavior, engine: Engine) -> Harness {
    let idempotency = Arc::new(InMemoryIdempotencyStore::new());
    let gate_store = Arc::new(YieldingIdempotencyStore {
        inner: idempotency.clone(),
    });
    build_harness(behavior, engine, idempotency, gate_store)
}

fn build_harness(
    behavior: OpenBehavior,
    engine: Engine,
    idempotency: Arc<InMemoryIdempotencyStore>,
    gate_store: Arc<dyn IdempotencyStore>,
) -> Harness {
    let payments = Arc::new(InMemoryPaymentRepository::new());
    let provider = Arc::new(ScriptedProvider::new(behavior));
    let events = Arc::new(BroadcastEventPublisher::new(64));
    let journal = Arc::new(InMemoryJournal::new());

    let orchestrator = PaymentOrchestrator::new(
        payments.clone(),
        IdempotencyGate::new(gate_store),
        provider.clone(),
        events.clone(),
    );

    let (engine, orchestrator) = match engine {
        Engine::Local(config) => {
            let engine = engine_for(
                payments.clone(),
                provider.clone(),
                events.clone(),
                journal.clone(),
                config,
            );
            let orchestrator = orchestrator.with_workflows(engine.clone());
            (Some(engine), orchestrator)
        }
        Engine::Unavailable => (None, orchestrator.with_workflows(Arc::new(UnavailableWorkflows))),
        Engine::None => (None, orchestrator),
    };

    Harness {
        payments,
        idempotency,
        provider,
        events,
        journal,
        engine,
        orchestrator: Arc::new(orchestrator),
    }
}
