//! Creation and update orchestration over in-memory adapters.

mod common;

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use common::{contended_harness, harness, Engine, OpenBehavior};
use settlement_core::database::{PageRequest, PaymentFilter, PaymentRepository};
use settlement_core::domain::{PaymentEventKind, PaymentMethod, PaymentStatus};
use settlement_core::error::AppError;
use settlement_core::idempotency::{IdempotencyRecord, IdempotencyStore};
use settlement_core::services::{CreatePaymentCommand, OrchestratorError, ValidationError};
use settlement_core::workflows::{
    settlement_workflow_id, DurableExecution, SettlementConfig, SettlementOutcome,
};
use std::str::FromStr;
use uuid::Uuid;

fn command(method: &str) -> CreatePaymentCommand {
    CreatePaymentCommand {
        tax_id: "123.456.789-09".to_string(),
        description: "Order #42".to_string(),
        amount: BigDecimal::from_str("149.90").unwrap(),
        method: method.to_string(),
    }
}

#[tokio::test]
async fn test_instant_transfer_is_created_pending() {
    let h = harness(OpenBehavior::Succeed, Engine::None);
    let mut events = h.events.subscribe();

    let outcome = h
        .orchestrator
        .create(command("INSTANT_TRANSFER"), None)
        .await
        .unwrap();

    assert!(outcome.is_new);
    assert_eq!(outcome.payment.status, PaymentStatus::Pending);
    assert_eq!(outcome.payment.method, PaymentMethod::InstantTransfer);
    assert_eq!(outcome.payment.tax_id.as_str(), "12345678909");
    assert!(outcome.payment.provider_ref.is_none());
    assert_eq!(h.provider.open_calls(), 0);

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, PaymentEventKind::Created);
    assert_eq!(event.payload.payment_id, outcome.payment.id);
}

#[tokio::test]
async fn test_replay_with_same_key_returns_existing_payment() {
    let h = harness(OpenBehavior::Succeed, Engine::None);

    let first = h
        .orchestrator
        .create(command("PIX"), Some("order-42"))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .create(command("PIX"), Some("order-42"))
        .await
        .unwrap();

    assert!(first.is_new);
    assert!(!second.is_new);
    assert_eq!(first.payment.id, second.payment.id);
    assert_eq!(h.payments.len().await, 1);
}

#[tokio::test]
async fn test_card_charge_replay_does_not_charge_again() {
    let h = harness(OpenBehavior::Succeed, Engine::Unavailable);

    let first = h
        .orchestrator
        .create(command("CARD_CHARGE"), Some("card-r"))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .create(command("CARD_CHARGE"), Some("card-r"))
        .await
        .unwrap();

    assert!(first.is_new);
    assert!(!second.is_new);
    assert_eq!(second.payment.id, first.payment.id);
    assert_eq!(second.payment.provider_ref.as_deref(), Some("pref-card-r"));
    assert_eq!(h.provider.open_calls(), 1);
    assert_eq!(h.payments.len().await, 1);
}

#[tokio::test]
async fn test_card_charge_replay_does_not_restart_settlement() {
    let h = harness(OpenBehavior::Succeed, Engine::Local(SettlementConfig::default()));
    let engine = h.engine.clone().unwrap();

    let first = h
        .orchestrator
        .create(command("CARD_CHARGE"), Some("card-w"))
        .await
        .unwrap();
    let payment_id = first.payment.id;
    h.orchestrator
        .update(payment_id, PaymentStatus::Settled)
        .await
        .unwrap();
    engine.result(&settlement_workflow_id(payment_id)).await.unwrap();

    let replay = h
        .orchestrator
        .create(command("CARD_CHARGE"), Some("card-w"))
        .await
        .unwrap();

    assert!(!replay.is_new);
    assert_eq!(replay.payment.id, payment_id);
    assert_eq!(replay.payment.status, PaymentStatus::Settled);
    assert_eq!(replay.payment.provider_ref.as_deref(), Some("pref-card-w"));
    assert_eq!(h.provider.open_calls(), 1);
    assert_eq!(engine.live_runs().await, 0);
}

#[tokio::test]
async fn test_concurrent_creates_with_one_key_charge_once() {
    let h = contended_harness(OpenBehavior::Succeed, Engine::None);

    let (a, b) = tokio::join!(
        h.orchestrator.create(command("CARD_CHARGE"), Some("card-race")),
        h.orchestrator.create(command("CARD_CHARGE"), Some("card-race")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.payment.id, b.payment.id);
    assert!(a.is_new != b.is_new);
    assert_eq!(h.provider.open_calls(), 1);
    assert_eq!(h.payments.len().await, 1);
    let record = h.idempotency.find("card-race").await.unwrap().unwrap();
    assert_eq!(record.payment_id, a.payment.id);
}

#[tokio::test]
async fn test_concurrent_instant_transfers_share_one_payment() {
    let h = contended_harness(OpenBehavior::Succeed, Engine::None);
    let mut events = h.events.subscribe();

    let (a, b) = tokio::join!(
        h.orchestrator.create(command("PIX"), Some("pix-race")),
        h.orchestrator.create(command("PIX"), Some("pix-race")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.payment.id, b.payment.id);
    assert_eq!(h.payments.len().await, 1);
    assert_eq!(events.try_recv().unwrap().kind, PaymentEventKind::Created);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_expired_key_creates_a_new_payment() {
    let h = harness(OpenBehavior::Succeed, Engine::None);
    let created_at = Utc::now() - Duration::hours(25);
    let stale_payment = Uuid::new_v4();
    h.idempotency
        .insert_if_absent(
            IdempotencyRecord {
                key: "order-old".to_string(),
                body_hash: "another body".to_string(),
                payment_id: stale_payment,
                created_at,
                expires_at: created_at + Duration::hours(24),
            },
            created_at,
        )
        .await
        .unwrap();

    let outcome = h
        .orchestrator
        .create(command("PIX"), Some("order-old"))
        .await
        .unwrap();

    assert!(outcome.is_new);
    assert_ne!(outcome.payment.id, stale_payment);
    let record = h.idempotency.find("order-old").await.unwrap().unwrap();
    assert_eq!(record.payment_id, outcome.payment.id);
}

#[tokio::test]
async fn test_same_key_with_different_body_conflicts() {
    let h = harness(OpenBehavior::Succeed, Engine::None);
    h.orchestrator
        .create(command("PIX"), Some("order-42"))
        .await
        .unwrap();

    let mut changed = command("PIX");
    changed.amount = BigDecimal::from_str("150.00").unwrap();
    let err = h
        .orchestrator
        .create(changed, Some("order-42"))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::KeyConflict { ref key } if key == "order-42"));
    assert_eq!(AppError::from(err).status_code(), 409);
    assert_eq!(h.payments.len().await, 1);
}

#[tokio::test]
async fn test_card_charge_requires_idempotency_key() {
    let h = harness(OpenBehavior::Succeed, Engine::None);

    let err = h
        .orchestrator
        .create(command("CARD_CHARGE"), None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Validation(ValidationError::MissingIdempotencyKey)
    ));
    assert!(h.payments.is_empty().await);
    assert_eq!(h.provider.open_calls(), 0);
}

#[tokio::test]
async fn test_invalid_tax_id_is_rejected() {
    let h = harness(OpenBehavior::Succeed, Engine::None);
    let mut cmd = command("PIX");
    cmd.tax_id = "123.456.789-00".to_string();

    let err = h.orchestrator.create(cmd, None).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Validation(ValidationError::InvalidTaxId(_))
    ));
    assert_eq!(AppError::from(err).status_code(), 400);
}

#[tokio::test]
async fn test_amount_below_minimum_is_rejected() {
    let h = harness(OpenBehavior::Succeed, Engine::None);
    let mut cmd = command("PIX");
    cmd.amount = BigDecimal::from_str("0.009").unwrap();

    let err = h.orchestrator.create(cmd, None).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Validation(ValidationError::InvalidAmount)
    ));
}

#[tokio::test]
async fn test_card_charge_falls_back_to_provider_without_engine() {
    let h = harness(OpenBehavior::Succeed, Engine::Unavailable);

    let outcome = h
        .orchestrator
        .create(command("CREDIT_CARD"), Some("card-1"))
        .await
        .unwrap();

    assert!(outcome.is_new);
    assert_eq!(outcome.payment.status, PaymentStatus::Pending);
    assert_eq!(outcome.payment.provider_ref.as_deref(), Some("pref-card-1"));
    assert_eq!(h.provider.keys(), vec!["card-1".to_string()]);

    let stored = h
        .payments
        .find_by_id(outcome.payment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.provider_ref.as_deref(), Some("pref-card-1"));
}

#[tokio::test]
async fn test_card_charge_unavailable_when_engine_and_provider_fail() {
    let h = harness(OpenBehavior::Unavailable, Engine::Unavailable);

    let err = h
        .orchestrator
        .create(command("CARD_CHARGE"), Some("card-2"))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::ServiceUnavailable { .. }));
    assert_eq!(AppError::from(err).status_code(), 503);
    assert!(h.payments.is_empty().await);
    assert!(h.idempotency.find("card-2").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_card_charge_starts_settlement_workflow() {
    let h = harness(OpenBehavior::Succeed, Engine::Local(SettlementConfig::default()));
    let engine = h.engine.clone().unwrap();

    let created = h
        .orchestrator
        .create(command("CARD_CHARGE"), Some("card-3"))
        .await
        .unwrap();
    let payment_id = created.payment.id;
    assert_eq!(created.payment.status, PaymentStatus::Pending);

    let updated = h
        .orchestrator
        .update(payment_id, PaymentStatus::Settled)
        .await
        .unwrap();
    assert!(updated.status_changed);

    let outcome: SettlementOutcome =
        serde_json::from_value(engine.result(&settlement_workflow_id(payment_id)).await.unwrap())
            .unwrap();
    assert_eq!(outcome.status, PaymentStatus::Settled);
    assert!(outcome.signal_received);
    assert_eq!(outcome.provider_ref.as_deref(), Some("pref-card-3"));
    assert_eq!(h.provider.open_calls(), 1);

    let state = h
        .orchestrator
        .settlement_state(payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.current_status, PaymentStatus::Settled);

    let stored = h.orchestrator.find_by_id(payment_id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Settled);
    assert_eq!(stored.provider_ref.as_deref(), Some("pref-card-3"));
}

#[tokio::test]
async fn test_update_transitions_once_and_publishes() {
    let h = harness(OpenBehavior::Succeed, Engine::None);
    let created = h
        .orchestrator
        .create(command("PIX"), None)
        .await
        .unwrap();
    let mut events = h.events.subscribe();

    let settled = h
        .orchestrator
        .update(created.payment.id, PaymentStatus::Settled)
        .await
        .unwrap();
    assert!(settled.status_changed);
    assert_eq!(settled.payment.status, PaymentStatus::Settled);

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, PaymentEventKind::StatusChanged);
    assert_eq!(event.payload.previous_status, Some(PaymentStatus::Pending));
    assert_eq!(event.payload.status, PaymentStatus::Settled);

    let again = h
        .orchestrator
        .update(created.payment.id, PaymentStatus::Settled)
        .await
        .unwrap();
    assert!(!again.status_changed);
    assert!(events.try_recv().is_err());

    let err = h
        .orchestrator
        .update(created.payment.id, PaymentStatus::Failed)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition(_)));
    assert_eq!(AppError::from(err).status_code(), 422);

    let stored = h.orchestrator.find_by_id(created.payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Settled);
}

#[tokio::test]
async fn test_pending_to_pending_is_a_no_op() {
    let h = harness(OpenBehavior::Succeed, Engine::None);
    let created = h
        .orchestrator
        .create(command("PIX"), None)
        .await
        .unwrap();

    let outcome = h
        .orchestrator
        .update(created.payment.id, PaymentStatus::Pending)
        .await
        .unwrap();

    assert!(!outcome.status_changed);
    assert_eq!(outcome.payment.updated_at, created.payment.updated_at);
}

#[tokio::test]
async fn test_update_unknown_payment_is_not_found() {
    let h = harness(OpenBehavior::Succeed, Engine::None);

    let err = h
        .orchestrator
        .update(Uuid::new_v4(), PaymentStatus::Settled)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::NotFound { .. }));
    assert_eq!(AppError::from(err).status_code(), 404);
}

#[tokio::test]
async fn test_find_many_filters_and_pages() {
    let h = harness(OpenBehavior::Succeed, Engine::None);
    for _ in 0..3 {
        h.orchestrator.create(command("PIX"), None).await.unwrap();
    }
    let failed = h.orchestrator.create(command("PIX"), None).await.unwrap();
    h.orchestrator
        .update(failed.payment.id, PaymentStatus::Failed)
        .await
        .unwrap();

    let pending = h
        .orchestrator
        .find_many(
            PaymentFilter {
                status: Some(PaymentStatus::Pending),
                ..Default::default()
            },
            PageRequest { page: 1, limit: 2 },
        )
        .await
        .unwrap();
    assert_eq!(pending.total, 3);
    assert_eq!(pending.items.len(), 2);
    assert_eq!(pending.total_pages, 2);

    let err = h
        .orchestrator
        .find_many(PaymentFilter::default(), PageRequest { page: 0, limit: 2 })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Validation(ValidationError::InvalidPage)
    ));
}
