//! Best-effort payment event fan-out
//!
//! Publication never rolls back persisted state: [`publish_best_effort`] logs
//! failures and returns.

use crate::domain::{PaymentEventKind, PaymentEventPayload};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Clone, Error)]
pub enum EventError {
    #[error("event channel closed")]
    ChannelClosed,
    #[error("event publication failed: {message}")]
    PublishFailed { message: String },
}

/// Message-broker port.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        kind: PaymentEventKind,
        payload: &PaymentEventPayload,
    ) -> Result<(), EventError>;
}

/// Publish and swallow the error after logging it.
pub async fn publish_best_effort(
    publisher: &dyn EventPublisher,
    kind: PaymentEventKind,
    payload: &PaymentEventPayload,
) {
    if let Err(e) = publisher.publish(kind, payload).await {
        warn!(
            routing_key = kind.routing_key(),
            payment_id = %payload.payment_id,
            error = %e,
            "payment event publication failed"
        );
    }
}

/// Envelope delivered to in-process subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub kind: PaymentEventKind,
    pub payload: PaymentEventPayload,
}

/// Fan-out over a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(
        &self,
        kind: PaymentEventKind,
        payload: &PaymentEventPayload,
    ) -> Result<(), EventError> {
        self.sender
            .send(PublishedEvent {
                kind,
                payload: payload.clone(),
            })
            .map(|_| ())
            .map_err(|_| EventError::ChannelClosed)
    }
}

/// Writes every event to the structured log as JSON.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(
        &self,
        kind: PaymentEventKind,
        payload: &PaymentEventPayload,
    ) -> Result<(), EventError> {
        let body = serde_json::to_string(payload).map_err(|e| EventError::PublishFailed {
            message: e.to_string(),
        })?;
        info!(routing_key = kind.routing_key(), payload = %body, "payment event");
        Ok(())
    }
}
