//! Durable settlement execution: journal, replay context, engine and the
//! card-charge settlement workflow.

pub mod activities;
pub mod context;
pub mod engine;
pub mod error;
pub mod journal;
pub mod settlement;

pub use activities::PaymentActivities;
pub use context::{StepRetryPolicy, WorkflowContext};
pub use engine::{DurableExecution, LocalWorkflowEngine, Workflow};
pub use error::{ActivityError, JournalError, WorkflowError};
pub use journal::{InMemoryJournal, RunStatus, SignalRecord, WorkflowJournal, WorkflowRun};
pub use settlement::{
    settlement_workflow_id, FinalizeOutcome, SettlementActivities, SettlementConfig,
    SettlementInput, SettlementOutcome, SettlementState, SettlementWorkflow, StatusSignal,
    SETTLEMENT_WORKFLOW_TYPE, STATUS_QUERY, STATUS_SIGNAL,
};
