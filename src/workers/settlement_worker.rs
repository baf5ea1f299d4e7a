use crate::workflows::{LocalWorkflowEngine, SettlementWorkflow, WorkflowError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SettlementWorkerConfig {
    /// How often the worker logs the number of in-flight settlements.
    pub heartbeat_interval: Duration,
}

impl Default for SettlementWorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

impl SettlementWorkerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.heartbeat_interval = Duration::from_secs(
            std::env::var("SETTLEMENT_HEARTBEAT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(cfg.heartbeat_interval.as_secs()),
        );
        cfg
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Hosts the settlement engine for the lifetime of the process: resumes runs
/// left open by a previous process and stops the engine on shutdown.
pub struct SettlementWorker {
    engine: Arc<LocalWorkflowEngine<SettlementWorkflow>>,
    config: SettlementWorkerConfig,
}

impl SettlementWorker {
    pub fn new(
        engine: Arc<LocalWorkflowEngine<SettlementWorkflow>>,
        config: SettlementWorkerConfig,
    ) -> Self {
        Self { engine, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), WorkflowError> {
        let resumed = self.engine.resume_open_runs().await?;
        info!(resumed, "settlement worker started");

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let live_runs = self.engine.live_runs().await;
                    info!(live_runs, "settlement worker heartbeat");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        let live = self.engine.live_runs().await;
        self.engine.shutdown();
        if live > 0 {
            error!(live_runs = live, "settlement runs suspended, they resume on next start");
        }
        info!("settlement worker stopped");
        Ok(())
    }
}
