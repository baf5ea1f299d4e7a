//! In-process durable execution engine
//!
//! Each run executes on its own tokio task against a [`WorkflowJournal`].
//! A run's handle is dropped once it finishes; later queries and results are
//! read back from the journal.
//! Stopping the engine abandons in-flight runs in the `RUNNING` state;
//! [`LocalWorkflowEngine::resume_open_runs`] picks them up again and replays
//! their recorded steps.

use super::context::{StepRetryPolicy, WorkflowContext};
use super::error::{JournalError, WorkflowError};
use super::journal::{RunStatus, SignalRecord, WorkflowJournal, WorkflowRun};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Notify, RwLock};
use tracing::{debug, error, info, warn};

/// Durable-execution capability used by the orchestrators.
#[async_trait]
pub trait DurableExecution: Send + Sync {
    /// Returns once the run is journaled. Fails with `DuplicateWorkflow` for
    /// an id that was already used.
    async fn start(&self, workflow_id: &str, input: JsonValue) -> Result<(), WorkflowError>;

    async fn signal(
        &self,
        workflow_id: &str,
        signal_name: &str,
        payload: JsonValue,
    ) -> Result<(), WorkflowError>;

    async fn query(&self, workflow_id: &str, query_name: &str) -> Result<JsonValue, WorkflowError>;

    /// Wait for the run to finish.
    async fn result(&self, workflow_id: &str) -> Result<JsonValue, WorkflowError>;
}

/// A workflow definition runnable by [`LocalWorkflowEngine`].
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Send + Sync + 'static;

    fn workflow_type(&self) -> &'static str;

    fn step_retry(&self) -> StepRetryPolicy {
        StepRetryPolicy::default()
    }

    fn validate_signal(&self, _name: &str, _payload: &JsonValue) -> Result<(), WorkflowError> {
        Ok(())
    }

    fn supports_query(&self, _name: &str) -> bool {
        false
    }

    async fn run(
        &self,
        ctx: &mut WorkflowContext,
        input: Self::Input,
    ) -> Result<Self::Output, WorkflowError>;
}

type RunResult = Result<JsonValue, String>;

struct RunHandle {
    signals: Arc<Notify>,
    state: watch::Receiver<Option<JsonValue>>,
    outcome: watch::Receiver<Option<RunResult>>,
}

pub struct LocalWorkflowEngine<W: Workflow> {
    workflow: Arc<W>,
    journal: Arc<dyn WorkflowJournal>,
    runs: Arc<RwLock<HashMap<String, RunHandle>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<W: Workflow> LocalWorkflowEngine<W> {
    pub fn new(workflow: Arc<W>, journal: Arc<dyn WorkflowJournal>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            workflow,
            journal,
            runs: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
        }
    }

    /// Respawn every `RUNNING` run of this workflow type that has no live
    /// task. Returns the number of runs resumed.
    pub async fn resume_open_runs(&self) -> Result<usize, WorkflowError> {
        let open = self.journal.open_runs(self.workflow.workflow_type()).await?;
        let mut resumed = 0;

        for run in open {
            if self.runs.read().await.contains_key(&run.workflow_id) {
                continue;
            }
            let input: W::Input = match serde_json::from_value(run.input.clone()) {
                Ok(input) => input,
                Err(e) => {
                    error!(workflow_id = %run.workflow_id, error = %e, "unreadable workflow input");
                    self.journal
                        .complete_run(
                            &run.workflow_id,
                            RunStatus::Failed,
                            None,
                            Some(format!("unreadable input: {}", e)),
                        )
                        .await?;
                    continue;
                }
            };
            info!(workflow_id = %run.workflow_id, "resuming workflow run");
            self.spawn_run(run.workflow_id, input).await;
            resumed += 1;
        }

        Ok(resumed)
    }

    /// Stop all live runs. Their journal entries stay `RUNNING`.
    pub fn shutdown(&self) {
        info!(workflow_type = self.workflow.workflow_type(), "stopping workflow engine");
        self.shutdown_tx.send_replace(true);
    }

    /// Runs executing in this process. Finished runs are answered from the
    /// journal.
    pub async fn live_runs(&self) -> usize {
        self.runs.read().await.len()
    }

    async fn spawn_run(&self, workflow_id: String, input: W::Input) {
        let signals = Arc::new(Notify::new());
        let (state_tx, state_rx) = watch::channel(None);
        let (outcome_tx, outcome_rx) = watch::channel(None);

        self.runs.write().await.insert(
            workflow_id.clone(),
            RunHandle {
                signals: signals.clone(),
                state: state_rx,
                outcome: outcome_rx,
            },
        );

        let workflow = self.workflow.clone();
        let journal = self.journal.clone();
        let runs = self.runs.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ctx = WorkflowContext::new(
                workflow_id.clone(),
                journal.clone(),
                workflow.step_retry(),
                signals,
                state_tx,
            );

            let result = tokio::select! {
                result = workflow.run(&mut ctx, input) => Some(result),
                _ = wait_for_shutdown(&mut shutdown_rx) => None,
            };
            let Some(result) = result else {
                debug!(workflow_id = %workflow_id, "workflow run suspended by shutdown");
                runs.write().await.remove(&workflow_id);
                return;
            };

            let (status, output, message) = match result
                .and_then(|output| serde_json::to_value(output).map_err(WorkflowError::from))
            {
                Ok(output) => (RunStatus::Completed, Some(output), None),
                Err(e) => (RunStatus::Failed, None, Some(e.to_string())),
            };

            if let Err(e) = journal
                .complete_run(&workflow_id, status, output.clone(), message.clone())
                .await
            {
                error!(workflow_id = %workflow_id, error = %e, "failed to record workflow completion");
            }
            info!(workflow_id = %workflow_id, status = status.as_str(), "workflow run finished");

            let outcome = match (output, message) {
                (Some(output), _) => Ok(output),
                (None, message) => Err(message.unwrap_or_default()),
            };
            outcome_tx.send_replace(Some(outcome));
            runs.write().await.remove(&workflow_id);
        });
    }

    async fn load_run(&self, workflow_id: &str) -> Result<WorkflowRun, WorkflowError> {
        self.journal
            .get_run(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                workflow_id: workflow_id.to_string(),
            })
    }
}

/// Resolves once `true` is published; never resolves if the sender is gone.
async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl<W: Workflow> DurableExecution for LocalWorkflowEngine<W> {
    async fn start(&self, workflow_id: &str, input: JsonValue) -> Result<(), WorkflowError> {
        if *self.shutdown_tx.borrow() {
            return Err(WorkflowError::ShuttingDown);
        }

        let typed: W::Input =
            serde_json::from_value(input.clone()).map_err(|e| WorkflowError::InvalidInput {
                message: e.to_string(),
            })?;

        let run = WorkflowRun::new(workflow_id, self.workflow.workflow_type(), input, Utc::now());
        self.journal.create_run(&run).await.map_err(|e| match e {
            JournalError::DuplicateRun { workflow_id } => {
                WorkflowError::DuplicateWorkflow { workflow_id }
            }
            other => WorkflowError::Journal(other),
        })?;

        info!(
            workflow_id = %workflow_id,
            workflow_type = self.workflow.workflow_type(),
            "workflow run started"
        );
        self.spawn_run(workflow_id.to_string(), typed).await;
        Ok(())
    }

    async fn signal(
        &self,
        workflow_id: &str,
        signal_name: &str,
        payload: JsonValue,
    ) -> Result<(), WorkflowError> {
        self.workflow.validate_signal(signal_name, &payload)?;

        let run = self.load_run(workflow_id).await?;
        if run.status != RunStatus::Running {
            return Err(WorkflowError::NotRunning {
                workflow_id: workflow_id.to_string(),
            });
        }

        let record = SignalRecord {
            name: signal_name.to_string(),
            payload,
            received_at: Utc::now(),
        };
        if !self.journal.record_signal(workflow_id, &record).await? {
            warn!(workflow_id = %workflow_id, signal = signal_name, "duplicate signal ignored");
            return Ok(());
        }

        debug!(workflow_id = %workflow_id, signal = signal_name, "signal recorded");
        if let Some(handle) = self.runs.read().await.get(workflow_id) {
            handle.signals.notify_one();
        }
        Ok(())
    }

    async fn query(&self, workflow_id: &str, query_name: &str) -> Result<JsonValue, WorkflowError> {
        if !self.workflow.supports_query(query_name) {
            return Err(WorkflowError::UnknownQuery {
                name: query_name.to_string(),
            });
        }

        if let Some(handle) = self.runs.read().await.get(workflow_id) {
            if let Some(state) = handle.state.borrow().clone() {
                return Ok(state);
            }
        }

        let run = self.load_run(workflow_id).await?;
        Ok(run.state.unwrap_or(JsonValue::Null))
    }

    async fn result(&self, workflow_id: &str) -> Result<JsonValue, WorkflowError> {
        let live = self
            .runs
            .read()
            .await
            .get(workflow_id)
            .map(|h| h.outcome.clone());

        if let Some(mut outcome) = live {
            let finished = loop {
                let current = outcome.borrow_and_update().clone();
                if let Some(done) = current {
                    break done;
                }
                if outcome.changed().await.is_err() {
                    return Err(WorkflowError::ShuttingDown);
                }
            };
            return finished.map_err(|message| WorkflowError::RunFailed {
                workflow_id: workflow_id.to_string(),
                message,
            });
        }

        let run = self.load_run(workflow_id).await?;
        match run.status {
            RunStatus::Completed => Ok(run.output.unwrap_or(JsonValue::Null)),
            RunStatus::Failed => Err(WorkflowError::RunFailed {
                workflow_id: workflow_id.to_string(),
                message: run.error.unwrap_or_default(),
            }),
            RunStatus::Running => Err(WorkflowError::NotRunning {
                workflow_id: workflow_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::error::ActivityError;
    use crate::workflows::journal::InMemoryJournal;
    use serde_json::json;
    use std::time::Duration;

    /// Waits for a "go" signal and echoes its payload.
    struct EchoWorkflow;

    #[async_trait]
    impl Workflow for EchoWorkflow {
        type Input = u32;
        type Output = JsonValue;

        fn workflow_type(&self) -> &'static str {
            "echo"
        }

        fn validate_signal(&self, name: &str, _payload: &JsonValue) -> Result<(), WorkflowError> {
            if name == "go" {
                Ok(())
            } else {
                Err(WorkflowError::InvalidSignal {
                    message: name.to_string(),
                })
            }
        }

        fn supports_query(&self, name: &str) -> bool {
            name == "state"
        }

        async fn run(&self, ctx: &mut WorkflowContext, input: u32) -> Result<JsonValue, WorkflowError> {
            ctx.publish_state(&json!({"waiting": input})).await?;
            let doubled: u32 = ctx
                .activity("double", || async move { Ok::<_, ActivityError>(input * 2) })
                .await?;
            let signal = ctx.wait_for_signal("go", Duration::from_secs(60)).await?;
            Ok(json!({
                "doubled": doubled,
                "signal": signal.map(|s| s.payload),
            }))
        }
    }

    fn engine(journal: Arc<InMemoryJournal>) -> LocalWorkflowEngine<EchoWorkflow> {
        LocalWorkflowEngine::new(Arc::new(EchoWorkflow), journal)
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_completes_run() {
        let engine = engine(Arc::new(InMemoryJournal::new()));
        engine.start("wf-1", json!(21)).await.unwrap();
        tokio::task::yield_now().await;

        engine.signal("wf-1", "go", json!({"ok": true})).await.unwrap();
        let output = engine.result("wf-1").await.unwrap();

        assert_eq!(output["doubled"], 42);
        assert_eq!(output["signal"]["ok"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_rejected() {
        let engine = engine(Arc::new(InMemoryJournal::new()));
        engine.start("wf-1", json!(1)).await.unwrap();

        let err = engine.start("wf-1", json!(1)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateWorkflow { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_reads_published_state() {
        let engine = engine(Arc::new(InMemoryJournal::new()));
        engine.start("wf-1", json!(5)).await.unwrap();
        tokio::task::yield_now().await;

        let state = engine.query("wf-1", "state").await.unwrap();
        assert_eq!(state["waiting"], 5);

        let err = engine.query("wf-1", "other").await.unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownQuery { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_rules() {
        let engine = engine(Arc::new(InMemoryJournal::new()));

        let err = engine.signal("missing", "go", json!({})).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));

        engine.start("wf-1", json!(1)).await.unwrap();
        let err = engine.signal("wf-1", "stop", json!({})).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidSignal { .. }));

        engine.signal("wf-1", "go", json!({"n": 1})).await.unwrap();
        engine.result("wf-1").await.unwrap();

        let err = engine.signal("wf-1", "go", json!({"n": 2})).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotRunning { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_shutdown_replays_journal() {
        let journal = Arc::new(InMemoryJournal::new());
        let first = engine(journal.clone());
        first.start("wf-1", json!(4)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        first.shutdown();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(first.live_runs().await, 0);

        let second = engine(journal.clone());
        assert_eq!(second.resume_open_runs().await.unwrap(), 1);
        second.signal("wf-1", "go", json!("late")).await.unwrap();
        let output = second.result("wf-1").await.unwrap();

        assert_eq!(output["doubled"], 8);
        assert_eq!(output["signal"], "late");
        assert_eq!(second.resume_open_runs().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_runs_are_released() {
        let engine = engine(Arc::new(InMemoryJournal::new()));
        for i in 0..50 {
            let id = format!("wf-{}", i);
            engine.start(&id, json!(i)).await.unwrap();
            engine.signal(&id, "go", json!(i)).await.unwrap();
            engine.result(&id).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(engine.live_runs().await, 0);

        let output = engine.result("wf-7").await.unwrap();
        assert_eq!(output["doubled"], 14);
        assert_eq!(output["signal"], 7);
        let state = engine.query("wf-7", "state").await.unwrap();
        assert_eq!(state["waiting"], 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_shutdown_rejected() {
        let engine = engine(Arc::new(InMemoryJournal::new()));
        engine.shutdown();
        let err = engine.start("wf-1", json!(1)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::ShuttingDown));
    }
}
