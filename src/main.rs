use dotenv::dotenv;
use premium_payments::api::{self, AppState};
use premium_payments::clock::{Clock, SystemClock};
use premium_payments::config::AppConfig;
use premium_payments::database::fraud_audit_repository::PgFraudAuditRepository;
use premium_payments::database::memory::{
    InMemoryFraudAuditRepository, InMemorySiteConfigRepository, InMemoryTransactionRepository,
    InMemoryUserRepository,
};
use premium_payments::database::repository::{
    FraudAuditRepository, SiteConfigRepository, TransactionRepository, UserRepository,
};
use premium_payments::database::site_config_repository::PgSiteConfigRepository;
use premium_payments::database::transaction_repository::PgTransactionRepository;
use premium_payments::database::user_repository::PgUserRepository;
use premium_payments::database::init_pool_from_config;
use premium_payments::health::HealthChecker;
use premium_payments::logging::init_tracing;
use premium_payments::payments::{GatewayFactory, PaymentSettings, SettingsSnapshot};
use premium_payments::services::cancellation::CancellationService;
use premium_payments::services::fraud_detection::FraudDetector;
use premium_payments::services::notification::{alert_channel, LogAlertSink};
use premium_payments::services::payment_orchestrator::PaymentOrchestrator;
use premium_payments::services::transaction_monitor::TransactionMonitor;
use premium_payments::services::transaction_validator::TransactionValidator;
use premium_payments::services::webhook_processor::WebhookProcessor;
use premium_payments::workers::alert_dispatcher::AlertDispatcherWorker;
use premium_payments::workers::transaction_monitor::{
    TransactionMonitorConfig, TransactionMonitorWorker,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
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

struct Stores {
    transactions: Arc<dyn TransactionRepository>,
    users: Arc<dyn UserRepository>,
    site_config: Arc<dyn SiteConfigRepository>,
    fraud_audit: Arc<dyn FraudAuditRepository>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.server.environment,
        "Starting premium payments service"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (alerts, alert_rx) = alert_channel(config.payments.alert_queue_capacity);

    // Initialize storage
    let (db_pool, stores) = match &config.database {
        Some(db_config) => {
            info!("Initializing database connection pool...");
            let pool = init_pool_from_config(db_config).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "Database connection pool initialized"
            );
            let stores = Stores {
                transactions: Arc::new(PgTransactionRepository::new(pool.clone())),
                users: Arc::new(PgUserRepository::new(pool.clone())),
                site_config: Arc::new(PgSiteConfigRepository::new(pool.clone())),
                fraud_audit: Arc::new(PgFraudAuditRepository::new(pool.clone())),
            };
            (Some(pool), stores)
        }
        None => {
            warn!("SKIP_EXTERNALS=true, using in-memory stores; nothing is persisted");
            let stores = Stores {
                transactions: Arc::new(InMemoryTransactionRepository::new(clock.clone())),
                users: Arc::new(InMemoryUserRepository::new()),
                site_config: Arc::new(InMemorySiteConfigRepository::new()),
                fraud_audit: Arc::new(InMemoryFraudAuditRepository::new()),
            };
            (None, stores)
        }
    };

    // Gateways
    let snapshot = SettingsSnapshot::load(stores.site_config.as_ref())
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Site config unavailable, using environment only");
            SettingsSnapshot::from_env()
        });
    let settings = Arc::new(PaymentSettings::new(
        stores.site_config.clone(),
        config.payments.config_cache_ttl,
        clock.clone(),
    ));
    let factory = Arc::new(GatewayFactory::from_settings(
        &snapshot,
        &config.payments,
        settings.clone(),
        alerts.clone(),
    ));
    info!(
        active_gateway = %factory.active_gateway_name().await,
        "Payment gateways initialized"
    );

    // Services
    let monitor = Arc::new(TransactionMonitor::new(
        stores.transactions.clone(),
        stores.users.clone(),
        alerts.clone(),
        clock.clone(),
    ));
    let fraud = Arc::new(FraudDetector::new(
        stores.users.clone(),
        stores.transactions.clone(),
        stores.fraud_audit.clone(),
        settings.clone(),
        alerts.clone(),
        clock.clone(),
    ));
    let validator = Arc::new(TransactionValidator::new(
        stores.users.clone(),
        stores.transactions.clone(),
        settings.clone(),
        clock.clone(),
    ));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        factory.clone(),
        validator,
        fraud.clone(),
        monitor.clone(),
        stores.transactions.clone(),
        stores.users.clone(),
        config.payments.clone(),
        clock.clone(),
    ));
    let cancellation = Arc::new(CancellationService::new(
        factory.clone(),
        stores.transactions.clone(),
        monitor.clone(),
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        factory.clone(),
        stores.transactions.clone(),
        fraud,
        monitor.clone(),
        alerts.clone(),
    ));

    // Workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let mut worker_handles = Vec::new();

    worker_handles.push(tokio::spawn(
        AlertDispatcherWorker::new(alert_rx, Arc::new(LogAlertSink)).run(worker_shutdown_rx.clone()),
    ));

    let monitor_enabled = std::env::var("TX_MONITOR_ENABLED")
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false";
    if monitor_enabled {
        let monitor_config = TransactionMonitorConfig::from_env();
        info!(
            poll_interval_secs = monitor_config.poll_interval.as_secs(),
            pending_timeout_secs = monitor_config.pending_timeout.as_secs(),
            "Starting pending transaction monitor worker"
        );
        let worker = TransactionMonitorWorker::new(
            stores.transactions.clone(),
            factory.clone(),
            monitor,
            clock.clone(),
            monitor_config,
        );
        worker_handles.push(tokio::spawn(worker.run(worker_shutdown_rx)));
    } else {
        info!("Pending transaction monitor worker disabled (TX_MONITOR_ENABLED=false)");
    }

    let app = api::router(AppState {
        orchestrator,
        cancellation,
        webhooks,
        health: HealthChecker::new(db_pool, factory),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    drop(alerts);
    for handle in worker_handles {
        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for worker shutdown");
        }
    }

    info!("Server shutdown complete");

    Ok(())
}
