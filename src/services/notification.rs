//! Fire-and-forget admin alerts.
//!
//! Payment code pushes onto a bounded channel and never waits; the
//! `alert_dispatcher` worker drains it into an [`AlertSink`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAlert {
    pub level: AlertLevel,
    /// Stable machine name, e.g. `reconciliation_conflict`.
    pub kind: String,
    pub message: String,
    pub context: JsonValue,
    pub raised_at: DateTime<Utc>,
}

impl AdminAlert {
    pub fn new(
        level: AlertLevel,
        kind: impl Into<String>,
        message: impl Into<String>,
        context: JsonValue,
    ) -> Self {
        Self {
            level,
            kind: kind.into(),
            message: message.into(),
            context,
            raised_at: Utc::now(),
        }
    }

    pub fn critical(kind: impl Into<String>, message: impl Into<String>, context: JsonValue) -> Self {
        Self::new(AlertLevel::Critical, kind, message, context)
    }

    pub fn warning(kind: impl Into<String>, message: impl Into<String>, context: JsonValue) -> Self {
        Self::new(AlertLevel::Warning, kind, message, context)
    }
}

/// Sending half of the alert queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AdminAlertEmitter {
    tx: mpsc::Sender<AdminAlert>,
}

impl AdminAlertEmitter {
    /// Queues the alert without waiting. A full or closed queue drops it
    /// with a log line; the payment path never blocks on alerting.
    pub fn emit(&self, alert: AdminAlert) {
        match self.tx.try_send(alert) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(alert)) => {
                warn!(
                    level = alert.level.as_str(),
                    kind = %alert.kind,
                    message = %alert.message,
                    "Admin alert queue full, alert dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(alert)) => {
                warn!(
                    level = alert.level.as_str(),
                    kind = %alert.kind,
                    message = %alert.message,
                    "Admin alert queue closed, alert dropped"
                );
            }
        }
    }
}

pub fn alert_channel(capacity: usize) -> (AdminAlertEmitter, mpsc::Receiver<AdminAlert>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AdminAlertEmitter { tx }, rx)
}

/// Delivery backend for admin alerts (email, chat, pager...).
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &AdminAlert) -> anyhow::Result<()>;
}

/// Writes alerts to the structured log.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(&self, alert: &AdminAlert) -> anyhow::Result<()> {
        match alert.level {
            AlertLevel::Critical => error!(
                alert_kind = %alert.kind,
                context = %alert.context,
                raised_at = %alert.raised_at,
                "ADMIN ALERT: {}", alert.message
            ),
            AlertLevel::Warning => warn!(
                alert_kind = %alert.kind,
                context = %alert.context,
                raised_at = %alert.raised_at,
                "ADMIN ALERT: {}", alert.message
            ),
            AlertLevel::Info => info!(
                alert_kind = %alert.kind,
                context = %alert.context,
                raised_at = %alert.raised_at,
                "ADMIN ALERT: {}", alert.message
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (emitter, mut rx) = alert_channel(1);
        emitter.emit(AdminAlert::critical("a", "first", json!({})));
        emitter.emit(AdminAlert::critical("b", "second", json!({})));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, "a");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_is_tolerated() {
        let (emitter, rx) = alert_channel(4);
        drop(rx);
        emitter.emit(AdminAlert::warning("x", "nobody listening", json!({})));
    }
}
