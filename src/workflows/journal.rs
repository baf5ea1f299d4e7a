//! Durable record of workflow runs
//!
//! A run owns an ordered set of step checkpoints keyed `"{seq:04}:{name}"`,
//! the signals delivered to it and the latest queryable state. A checkpoint is
//! written once; later writes to the same key return the stored value so a
//! replay always observes the first outcome.

use super::error::JournalError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RUNNING" => Some(RunStatus::Running),
            "COMPLETED" => Some(RunStatus::Completed),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub workflow_type: String,
    pub input: JsonValue,
    pub status: RunStatus,
    /// Latest state published for queries
    pub state: Option<JsonValue>,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(workflow_id: &str, workflow_type: &str, input: JsonValue, now: DateTime<Utc>) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            workflow_type: workflow_type.to_string(),
            input,
            status: RunStatus::Running,
            state: None,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub name: String,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
}

#[async_trait]
pub trait WorkflowJournal: Send + Sync {
    /// Fails with `DuplicateRun` if the id was ever used.
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), JournalError>;

    async fn get_run(&self, workflow_id: &str) -> Result<Option<WorkflowRun>, JournalError>;

    async fn open_runs(&self, workflow_type: &str) -> Result<Vec<WorkflowRun>, JournalError>;

    async fn load_step(
        &self,
        workflow_id: &str,
        step_key: &str,
    ) -> Result<Option<JsonValue>, JournalError>;

    /// First write wins; returns the value now stored under `step_key`.
    async fn record_step(
        &self,
        workflow_id: &str,
        step_key: &str,
        output: &JsonValue,
    ) -> Result<JsonValue, JournalError>;

    /// Store the first signal of a given name. Returns `false` for a repeat.
    async fn record_signal(
        &self,
        workflow_id: &str,
        signal: &SignalRecord,
    ) -> Result<bool, JournalError>;

    async fn load_signal(
        &self,
        workflow_id: &str,
        name: &str,
    ) -> Result<Option<SignalRecord>, JournalError>;

    async fn save_state(&self, workflow_id: &str, state: &JsonValue) -> Result<(), JournalError>;

    async fn complete_run(
        &self,
        workflow_id: &str,
        status: RunStatus,
        output: Option<JsonValue>,
        error: Option<String>,
    ) -> Result<(), JournalError>;
}

#[derive(Default)]
struct JournalEntry {
    run: Option<WorkflowRun>,
    steps: HashMap<String, JsonValue>,
    signals: HashMap<String, SignalRecord>,
}

/// Process-local journal. Survives engine restarts within one process, which
/// is what the resume tests rely on.
#[derive(Default)]
pub struct InMemoryJournal {
    entries: RwLock<HashMap<String, JournalEntry>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn step_count(&self, workflow_id: &str) -> usize {
        self.entries
            .read()
            .await
            .get(workflow_id)
            .map_or(0, |e| e.steps.len())
    }
}

fn not_found(workflow_id: &str) -> JournalError {
    JournalError::RunNotFound {
        workflow_id: workflow_id.to_string(),
    }
}

#[async_trait]
impl WorkflowJournal for InMemoryJournal {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), JournalError> {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(run.workflow_id.clone()).or_default();
        if entry.run.is_some() {
            return Err(JournalError::DuplicateRun {
                workflow_id: run.workflow_id.clone(),
            });
        }
        entry.run = Some(run.clone());
        Ok(())
    }

    async fn get_run(&self, workflow_id: &str) -> Result<Option<WorkflowRun>, JournalError> {
        Ok(self
            .entries
            .read()
            .await
            .get(workflow_id)
            .and_then(|e| e.run.clone()))
    }

    async fn open_runs(&self, workflow_type: &str) -> Result<Vec<WorkflowRun>, JournalError> {
        let mut runs: Vec<WorkflowRun> = self
            .entries
            .read()
            .await
            .values()
            .filter_map(|e| e.run.as_ref())
            .filter(|r| r.workflow_type == workflow_type && r.status == RunStatus::Running)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    async fn load_step(
        &self,
        workflow_id: &str,
        step_key: &str,
    ) -> Result<Option<JsonValue>, JournalError> {
        Ok(self
            .entries
            .read()
            .await
            .get(workflow_id)
            .and_then(|e| e.steps.get(step_key).cloned()))
    }

    async fn record_step(
        &self,
        workflow_id: &str,
        step_key: &str,
        output: &JsonValue,
    ) -> Result<JsonValue, JournalError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(workflow_id)
            .ok_or_else(|| not_found(workflow_id))?;
        Ok(entry
            .steps
            .entry(step_key.to_string())
            .or_insert_with(|| output.clone())
            .clone())
    }

    async fn record_signal(
        &self,
        workflow_id: &str,
        signal: &SignalRecord,
    ) -> Result<bool, JournalError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(workflow_id)
            .ok_or_else(|| not_found(workflow_id))?;
        if entry.signals.contains_key(&signal.name) {
            return Ok(false);
        }
        entry.signals.insert(signal.name.clone(), signal.clone());
        Ok(true)
    }

    async fn load_signal(
        &self,
        workflow_id: &str,
        name: &str,
    ) -> Result<Option<SignalRecord>, JournalError> {
        Ok(self
            .entries
            .read()
            .await
            .get(workflow_id)
            .and_then(|e| e.signals.get(name).cloned()))
    }

    async fn save_state(&self, workflow_id: &str, state: &JsonValue) -> Result<(), JournalError> {
        let mut entries = self.entries.write().await;
        let run = entries
            .get_mut(workflow_id)
            .and_then(|e| e.run.as_mut())
            .ok_or_else(|| not_found(workflow_id))?;
        run.state = Some(state.clone());
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_run(
        &self,
        workflow_id: &str,
        status: RunStatus,
        output: Option<JsonValue>,
        error: Option<String>,
    ) -> Result<(), JournalError> {
        let mut entries = self.entries.write().await;
        let run = entries
            .get_mut(workflow_id)
            .and_then(|e| e.run.as_mut())
            .ok_or_else(|| not_found(workflow_id))?;
        run.status = status;
        run.output = output;
        run.error = error;
        run.updated_at = Utc::now();
        Ok(())
    }
}
