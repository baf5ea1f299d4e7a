//! Replay-safe execution context handed to a running workflow
//!
//! Every side effect goes through [`WorkflowContext::activity`] or
//! [`WorkflowContext::wait_for_signal`]. Both take the next sequence number
//! and consult the journal first; a recorded outcome is returned without
//! running anything, so a resumed run fast-forwards to where it stopped.

use super::error::{ActivityError, WorkflowError};
use super::journal::{SignalRecord, WorkflowJournal};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

/// Retry schedule for activities: 1s initial, x2, capped at 10s, 3 attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: u32,
    pub max_attempts: u32,
    /// Bound on a single attempt
    pub start_to_close: Duration,
}

impl Default for StepRetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            multiplier: 2,
            max_attempts: 3,
            start_to_close: Duration::from_secs(30),
        }
    }
}

impl StepRetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_interval
            .saturating_mul(factor)
            .min(self.max_interval)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SignalWaitOutcome {
    signal: Option<SignalRecord>,
}

pub struct WorkflowContext {
    workflow_id: String,
    journal: Arc<dyn WorkflowJournal>,
    retry: StepRetryPolicy,
    signals: Arc<Notify>,
    state: watch::Sender<Option<JsonValue>>,
    seq: u32,
}

impl WorkflowContext {
    pub fn new(
        workflow_id: impl Into<String>,
        journal: Arc<dyn WorkflowJournal>,
        retry: StepRetryPolicy,
        signals: Arc<Notify>,
        state: watch::Sender<Option<JsonValue>>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            journal,
            retry,
            signals,
            state,
            seq: 0,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn next_key(&mut self, name: &str) -> String {
        let key = format!("{:04}:{}", self.seq, name);
        self.seq += 1;
        key
    }

    /// Run `op` at most once per checkpoint, retrying failed attempts.
    pub async fn activity<T, F, Fut>(&mut self, name: &str, mut op: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let key = self.next_key(name);
        if let Some(recorded) = self.journal.load_step(&self.workflow_id, &key).await? {
            debug!(workflow_id = %self.workflow_id, step = %key, "replaying recorded step");
            return Ok(serde_json::from_value(recorded)?);
        }

        let mut attempt = 1;
        let output = loop {
            let result = match tokio::time::timeout(self.retry.start_to_close, op()).await {
                Ok(result) => result,
                Err(_) => Err(ActivityError::retryable(format!(
                    "timed out after {}ms",
                    self.retry.start_to_close.as_millis()
                ))),
            };

            match result {
                Ok(output) => break output,
                Err(e) if e.retryable && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        workflow_id = %self.workflow_id,
                        activity = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "activity attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(WorkflowError::ActivityFailed {
                        activity: name.to_string(),
                        attempts: attempt,
                        message: e.message,
                    });
                }
            }
        };

        let stored = self
            .journal
            .record_step(&self.workflow_id, &key, &serde_json::to_value(&output)?)
            .await?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Journaled wall-clock read.
    pub async fn now(&mut self) -> Result<DateTime<Utc>, WorkflowError> {
        self.activity("now", || async { Ok(Utc::now()) }).await
    }

    /// Wait up to `timeout` for the signal `name`.
    ///
    /// The deadline is journaled before waiting, so a resumed run only waits
    /// for what was left. A signal recorded before the wait starts is
    /// returned immediately.
    pub async fn wait_for_signal(
        &mut self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<SignalRecord>, WorkflowError> {
        let key = self.next_key(&format!("wait:{}", name));
        if let Some(recorded) = self.journal.load_step(&self.workflow_id, &key).await? {
            let outcome: SignalWaitOutcome = serde_json::from_value(recorded)?;
            return Ok(outcome.signal);
        }

        let deadline_key = format!("{}:deadline", key);
        let deadline = match self.journal.load_step(&self.workflow_id, &deadline_key).await? {
            Some(value) => serde_json::from_value::<DateTime<Utc>>(value)?,
            None => {
                let proposed = Utc::now()
                    + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
                let stored = self
                    .journal
                    .record_step(&self.workflow_id, &deadline_key, &serde_json::to_value(proposed)?)
                    .await?;
                serde_json::from_value(stored)?
            }
        };
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let sleep = tokio::time::sleep(remaining);
        tokio::pin!(sleep);

        let signal = loop {
            if let Some(signal) = self.journal.load_signal(&self.workflow_id, name).await? {
                break Some(signal);
            }
            tokio::select! {
                _ = self.signals.notified() => continue,
                _ = &mut sleep => {
                    break self.journal.load_signal(&self.workflow_id, name).await?;
                }
            }
        };

        let stored = self
            .journal
            .record_step(
                &self.workflow_id,
                &key,
                &serde_json::to_value(SignalWaitOutcome { signal })?,
            )
            .await?;
        let outcome: SignalWaitOutcome = serde_json::from_value(stored)?;
        Ok(outcome.signal)
    }

    /// Publish the state answered by queries.
    pub async fn publish_state<S: Serialize>(&self, state: &S) -> Result<(), WorkflowError> {
        let value = serde_json::to_value(state)?;
        self.journal.save_state(&self.workflow_id, &value).await?;
        self.state.send_replace(Some(value));
        Ok(())
    }
}
