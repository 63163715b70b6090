use crate::clock::Clock;
use crate::database::models::Transaction;
use crate::database::repository::TransactionRepository;
use crate::payments::factory::GatewayFactory;
use crate::payments::types::{StatusRequest, TransactionStatus};
use crate::services::transaction_monitor::{ReconcileOutcome, TransactionMonitor};
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TransactionMonitorConfig {
    /// How often the worker wakes up to poll gateways.
    pub poll_interval: Duration,
    /// Rows younger than this are left to the webhook path.
    pub grace_period: Duration,
    /// Unverifiable rows older than this (from `created_at`) are expired.
    pub pending_timeout: Duration,
    /// Maximum number of pending rows fetched per cycle.
    pub pending_batch_size: i64,
    /// Gateway calls in flight at once.
    pub concurrency: usize,
}

impl Default for TransactionMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(300),
            pending_timeout: Duration::from_secs(24 * 60 * 60),
            pending_batch_size: 100,
            concurrency: 8,
        }
    }
}

impl TransactionMonitorConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("TX_MONITOR_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.grace_period = Duration::from_secs(
            std::env::var("TX_MONITOR_GRACE_PERIOD_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.grace_period.as_secs()),
        );
        cfg.pending_timeout = Duration::from_secs(
            std::env::var("TX_MONITOR_PENDING_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.pending_timeout.as_secs()),
        );
        cfg.pending_batch_size = std::env::var("TX_MONITOR_PENDING_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.pending_batch_size);
        cfg.concurrency = std::env::var("TX_MONITOR_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(cfg.concurrency);
        cfg
    }
}

/// Counts from one polling cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub scanned: usize,
    pub reconciled: usize,
    pub expired: usize,
    pub still_pending: usize,
    pub failed: usize,
}

enum RowResult {
    Reconciled,
    Expired,
    StillPending,
    Failed,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct TransactionMonitorWorker {
    transactions: Arc<dyn TransactionRepository>,
    factory: Arc<GatewayFactory>,
    monitor: Arc<TransactionMonitor>,
    clock: Arc<dyn Clock>,
    config: TransactionMonitorConfig,
}

impl TransactionMonitorWorker {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        factory: Arc<GatewayFactory>,
        monitor: Arc<TransactionMonitor>,
        clock: Arc<dyn Clock>,
        config: TransactionMonitorConfig,
    ) -> Self {
        Self {
            transactions,
            factory,
            monitor,
            clock,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            grace_period_secs = self.config.grace_period.as_secs(),
            pending_timeout_secs = self.config.pending_timeout.as_secs(),
            concurrency = self.config.concurrency,
            "pending transaction monitor worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("pending transaction monitor worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.run_cycle().await {
                        Ok(summary) if summary.scanned > 0 => info!(
                            scanned = summary.scanned,
                            reconciled = summary.reconciled,
                            expired = summary.expired,
                            still_pending = summary.still_pending,
                            failed = summary.failed,
                            "transaction monitor cycle complete"
                        ),
                        Ok(_) => debug!("transaction monitor cycle found nothing to do"),
                        Err(e) => warn!(error = %e, "transaction monitor cycle failed"),
                    }
                }
            }
        }

        info!("pending transaction monitor worker stopped");
    }

    /// One pass over pending rows past the grace period.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleSummary> {
        let now = self.clock.now();
        let cutoff = now - chrono::Duration::from_std(self.config.grace_period)?;
        let pending = self
            .transactions
            .find_pending_older_than(cutoff, self.config.pending_batch_size)
            .await?;

        let mut summary = CycleSummary {
            scanned: pending.len(),
            ..CycleSummary::default()
        };

        let results: Vec<RowResult> = stream::iter(pending)
            .map(|tx| {
                let span = crate::logging::payment_span(
                    &Uuid::new_v4().to_string(),
                    Some(&tx.order_id),
                );
                self.process(tx).instrument(span)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                RowResult::Reconciled => summary.reconciled += 1,
                RowResult::Expired => summary.expired += 1,
                RowResult::StillPending => summary.still_pending += 1,
                RowResult::Failed => summary.failed += 1,
            }
        }
        Ok(summary)
    }

    async fn process(&self, tx: Transaction) -> RowResult {
        let verification_error = match self.factory.gateway(tx.gateway) {
            Ok(gateway) if gateway.capabilities().supports_status_check => {
                let request = StatusRequest {
                    order_id: tx.order_id.clone(),
                    gateway_reference: gateway.gateway_reference(&tx.details).map(str::to_string),
                };
                let verified = gateway.verify_transaction(&request).await;
                if verified.is_valid {
                    if matches!(
                        verified.status,
                        TransactionStatus::Pending | TransactionStatus::Unknown
                    ) {
                        return RowResult::StillPending;
                    }
                    return match self
                        .monitor
                        .reconcile(tx.id, verified.status, &verified.details)
                        .await
                    {
                        Ok(ReconcileOutcome::Applied { .. }) => RowResult::Reconciled,
                        Ok(_) => RowResult::StillPending,
                        Err(e) => {
                            warn!(transaction_id = %tx.id, error = %e, "reconcile from poll failed");
                            RowResult::Failed
                        }
                    };
                }
                verified
                    .error
                    .unwrap_or_else(|| "status check failed".to_string())
            }
            Ok(gateway) => format!("{} has no status API", gateway.name()),
            Err(e) => e.to_string(),
        };

        if !self.is_timed_out(&tx) {
            debug!(
                transaction_id = %tx.id,
                reason = %verification_error,
                "pending transaction not verifiable yet"
            );
            return RowResult::StillPending;
        }

        warn!(
            transaction_id = %tx.id,
            order_id = %tx.order_id,
            gateway = %tx.gateway,
            reason = %verification_error,
            "expiring unverifiable pending transaction"
        );
        let patch = json!({
            "expired_by": "transaction_monitor",
            "expiry_reason": verification_error,
        });
        match self
            .monitor
            .reconcile(tx.id, TransactionStatus::Expired, &patch)
            .await
        {
            Ok(ReconcileOutcome::Applied { .. }) => RowResult::Expired,
            Ok(_) => RowResult::StillPending,
            Err(e) => {
                warn!(transaction_id = %tx.id, error = %e, "failed to expire transaction");
                RowResult::Failed
            }
        }
    }

    fn is_timed_out(&self, tx: &Transaction) -> bool {
        let age = self.clock.now().signed_duration_since(tx.created_at);
        age.to_std().map_or(false, |age| age >= self.config.pending_timeout)
    }
}
