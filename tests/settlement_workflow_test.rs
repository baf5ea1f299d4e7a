//! Settlement workflow driven through the local durable-execution engine.

mod common;

use bigdecimal::BigDecimal;
use common::{engine_for, fast_settlement, OpenBehavior, ScriptedProvider};
use serde_json::json;
use settlement_core::database::{InMemoryPaymentRepository, PaymentRepository};
use settlement_core::domain::{PaymentEventKind, PaymentStatus, TaxId};
use settlement_core::events::BroadcastEventPublisher;
use settlement_core::workflows::{
    settlement_workflow_id, DurableExecution, InMemoryJournal, RunStatus, SettlementConfig,
    SettlementInput, SettlementOutcome, SettlementState, WorkflowError, WorkflowJournal,
    STATUS_QUERY, STATUS_SIGNAL,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Fixture {
    payments: Arc<InMemoryPaymentRepository>,
    provider: Arc<ScriptedProvider>,
    events: Arc<BroadcastEventPublisher>,
    journal: Arc<InMemoryJournal>,
}

impl Fixture {
    fn new(behavior: OpenBehavior) -> Self {
        Self {
            payments: Arc::new(InMemoryPaymentRepository::new()),
            provider: Arc::new(ScriptedProvider::new(behavior)),
            events: Arc::new(BroadcastEventPublisher::new(64)),
            journal: Arc::new(InMemoryJournal::new()),
        }
    }

    fn engine(&self, config: SettlementConfig) -> Arc<common::SettlementEngine> {
        engine_for(
            self.payments.clone(),
            self.provider.clone(),
            self.events.clone(),
            self.journal.clone(),
            config,
        )
    }
}

fn input(key: &str) -> SettlementInput {
    SettlementInput {
        payment_id: Uuid::new_v4(),
        tax_id: TaxId::parse("12345678909").unwrap(),
        description: "Order #7".to_string(),
        amount: BigDecimal::from(80),
        idempotency_key: key.to_string(),
    }
}

fn outcome(value: serde_json::Value) -> SettlementOutcome {
    serde_json::from_value(value).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_signal_settles_payment() {
    let fx = Fixture::new(OpenBehavior::Succeed);
    let engine = fx.engine(SettlementConfig::default());
    let mut events = fx.events.subscribe();
    let input = input("sig-1");
    let id = settlement_workflow_id(input.payment_id);

    engine
        .start(&id, serde_json::to_value(&input).unwrap())
        .await
        .unwrap();
    engine
        .signal(&id, STATUS_SIGNAL, json!({ "status": "SETTLED" }))
        .await
        .unwrap();

    let outcome = outcome(engine.result(&id).await.unwrap());
    assert_eq!(outcome.status, PaymentStatus::Settled);
    assert!(outcome.signal_received);
    assert_eq!(outcome.polls, 0);
    assert_eq!(fx.provider.status_calls(), 0);

    let payment = fx
        .payments
        .find_by_id(input.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Settled);
    assert_eq!(payment.provider_ref.as_deref(), Some("pref-sig-1"));

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, PaymentEventKind::StatusChanged);
    assert_eq!(event.payload.status, PaymentStatus::Settled);
}

#[tokio::test(start_paused = true)]
async fn test_provider_poll_settles_payment() {
    let fx = Fixture::new(OpenBehavior::Succeed);
    fx.provider.set_status(Some(PaymentStatus::Settled));
    let engine = fx.engine(fast_settlement());
    let input = input("poll-1");
    let id = settlement_workflow_id(input.payment_id);

    engine
        .start(&id, serde_json::to_value(&input).unwrap())
        .await
        .unwrap();

    let outcome = outcome(engine.result(&id).await.unwrap());
    assert_eq!(outcome.status, PaymentStatus::Settled);
    assert!(!outcome.signal_received);
    assert_eq!(outcome.polls, 1);
    assert_eq!(fx.provider.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_polls_fail_payment() {
    let fx = Fixture::new(OpenBehavior::Succeed);
    let engine = fx.engine(fast_settlement());
    let input = input("slow-1");
    let id = settlement_workflow_id(input.payment_id);

    engine
        .start(&id, serde_json::to_value(&input).unwrap())
        .await
        .unwrap();

    let outcome = outcome(engine.result(&id).await.unwrap());
    assert_eq!(outcome.status, PaymentStatus::Failed);
    assert_eq!(outcome.polls, 3);
    assert_eq!(fx.provider.status_calls(), 3);

    let payment = fx
        .payments
        .find_by_id(input.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_provider_rejection_fails_payment_and_run() {
    let fx = Fixture::new(OpenBehavior::Reject);
    let engine = fx.engine(fast_settlement());
    let input = input("rej-1");
    let id = settlement_workflow_id(input.payment_id);

    engine
        .start(&id, serde_json::to_value(&input).unwrap())
        .await
        .unwrap();

    let err = engine.result(&id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::RunFailed { .. }));
    assert_eq!(fx.provider.open_calls(), 1);

    let payment = fx
        .payments
        .find_by_id(input.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);

    let run = fx.journal.get_run(&id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_provider_is_retried_before_failing() {
    let fx = Fixture::new(OpenBehavior::Unavailable);
    let engine = fx.engine(fast_settlement());
    let input = input("down-1");
    let id = settlement_workflow_id(input.payment_id);

    engine
        .start(&id, serde_json::to_value(&input).unwrap())
        .await
        .unwrap();

    assert!(engine.result(&id).await.is_err());
    assert_eq!(fx.provider.open_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_query_reports_in_flight_state() {
    let fx = Fixture::new(OpenBehavior::Succeed);
    let engine = fx.engine(SettlementConfig::default());
    let input = input("query-1");
    let id = settlement_workflow_id(input.payment_id);

    engine
        .start(&id, serde_json::to_value(&input).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let state: SettlementState =
        serde_json::from_value(engine.query(&id, STATUS_QUERY).await.unwrap()).unwrap();
    assert_eq!(state.payment_id, input.payment_id);
    assert_eq!(state.current_status, PaymentStatus::Pending);
    assert_eq!(state.provider_ref.as_deref(), Some("pref-query-1"));
    assert!(!state.signal_received);

    assert!(matches!(
        engine.query(&id, "unknown").await,
        Err(WorkflowError::UnknownQuery { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_signals_are_validated_and_deduplicated() {
    let fx = Fixture::new(OpenBehavior::Succeed);
    let engine = fx.engine(SettlementConfig::default());
    let input = input("dup-1");
    let id = settlement_workflow_id(input.payment_id);

    engine
        .start(&id, serde_json::to_value(&input).unwrap())
        .await
        .unwrap();

    assert!(matches!(
        engine
            .signal(&id, STATUS_SIGNAL, json!({ "status": "PENDING" }))
            .await,
        Err(WorkflowError::InvalidSignal { .. })
    ));

    engine
        .signal(&id, STATUS_SIGNAL, json!({ "status": "FAILED" }))
        .await
        .unwrap();
    engine
        .signal(&id, STATUS_SIGNAL, json!({ "status": "SETTLED" }))
        .await
        .unwrap();

    let outcome = outcome(engine.result(&id).await.unwrap());
    assert_eq!(outcome.status, PaymentStatus::Failed);

    assert!(matches!(
        engine
            .signal(&id, STATUS_SIGNAL, json!({ "status": "SETTLED" }))
            .await,
        Err(WorkflowError::NotRunning { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_start_is_rejected() {
    let fx = Fixture::new(OpenBehavior::Succeed);
    let engine = fx.engine(SettlementConfig::default());
    let input = input("twice-1");
    let id = settlement_workflow_id(input.payment_id);
    let body = serde_json::to_value(&input).unwrap();

    engine.start(&id, body.clone()).await.unwrap();
    let err = engine.start(&id, body).await.unwrap_err();

    assert!(matches!(err, WorkflowError::DuplicateWorkflow { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_resumed_run_does_not_repeat_completed_steps() {
    let fx = Fixture::new(OpenBehavior::Succeed);
    let input = input("resume-1");
    let id = settlement_workflow_id(input.payment_id);

    let first = fx.engine(SettlementConfig::default());
    first
        .start(&id, serde_json::to_value(&input).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    first.shutdown();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(fx.provider.open_calls(), 1);
    let run = fx.journal.get_run(&id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Running);

    let second = fx.engine(SettlementConfig::default());
    assert_eq!(second.resume_open_runs().await.unwrap(), 1);
    second
        .signal(&id, STATUS_SIGNAL, json!({ "status": "SETTLED" }))
        .await
        .unwrap();

    let outcome = outcome(second.result(&id).await.unwrap());
    assert_eq!(outcome.status, PaymentStatus::Settled);
    assert_eq!(outcome.provider_ref.as_deref(), Some("pref-resume-1"));
    assert_eq!(fx.provider.open_calls(), 1);

    let run = fx.journal.get_run(&id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}
