use settlement_core::config::AppConfig;
use settlement_core::database::{InMemoryPaymentRepository, PaymentRepository};
use settlement_core::events::{EventPublisher, LoggingEventPublisher};
use settlement_core::logging::init_tracing;
use settlement_core::payments::factory::ChargeProviderFactory;
use settlement_core::workers::{SettlementWorker, SettlementWorkerConfig};
use settlement_core::workflows::{
    InMemoryJournal, LocalWorkflowEngine, PaymentActivities, SettlementWorkflow, WorkflowJournal,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

/// Storage the settlement worker runs on. The request path (orchestrator,
/// idempotency gate, webhook processor) is a library API and is mounted by
/// the transport layer, not by this binary.
struct Adapters {
    payments: Arc<dyn PaymentRepository>,
    journal: Arc<dyn WorkflowJournal>,
}

fn in_memory_adapters() -> Adapters {
    Adapters {
        payments: Arc::new(InMemoryPaymentRepository::new()),
        journal: Arc::new(InMemoryJournal::new()),
    }
}

#[cfg(feature = "database")]
async fn external_adapters(config: &AppConfig) -> anyhow::Result<Adapters> {
    use settlement_core::database::{self, PgPaymentRepository, PgWorkflowJournal};

    info!("Initializing database connection pool...");
    let db_pool = database::init_pool_from_config(&config.database).await?;
    info!(
        max_connections = db_pool.options().get_max_connections(),
        "Database connection pool initialized"
    );

    if let Err(e) = database::health_check(&db_pool).await {
        warn!(error = %e, "database health check failed");
    }

    Ok(Adapters {
        payments: Arc::new(PgPaymentRepository::new(db_pool.clone())),
        journal: Arc::new(PgWorkflowJournal::new(db_pool)),
    })
}

#[cfg(not(feature = "database"))]
async fn external_adapters(_config: &AppConfig) -> anyhow::Result<Adapters> {
    anyhow::bail!("built without the database feature; set SKIP_EXTERNALS=true")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = %config.provider.factory.provider,
        skip_externals = config.skip_externals,
        "Starting settlement worker"
    );

    let adapters = if config.skip_externals {
        info!("Using in-memory adapters (SKIP_EXTERNALS=true)");
        in_memory_adapters()
    } else {
        external_adapters(&config).await?
    };

    let provider = ChargeProviderFactory::build(&config.provider.factory)?;
    let events: Arc<dyn EventPublisher> = Arc::new(LoggingEventPublisher);

    let activities = PaymentActivities::new(adapters.payments, provider, events);
    let workflow = SettlementWorkflow::new(Arc::new(activities), config.settlement);
    let engine = Arc::new(LocalWorkflowEngine::new(
        Arc::new(workflow),
        adapters.journal,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown_signal_with_notify(shutdown_tx));

    let worker = SettlementWorker::new(engine, SettlementWorkerConfig::from_env());
    if let Err(e) = worker.run(shutdown_rx).await {
        error!(error = %e, "settlement worker failed");
        return Err(e.into());
    }

    info!("Settlement worker shut down");
    Ok(())
}
