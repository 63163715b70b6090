use crate::services::notification::{AdminAlert, AlertSink};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Drains the admin alert queue into a sink.
///
/// Delivery failures are logged and the alert is dropped; payment code has
/// already moved on by the time an alert reaches this worker.
pub struct AlertDispatcherWorker {
    rx: mpsc::Receiver<AdminAlert>,
    sink: Arc<dyn AlertSink>,
}

impl AlertDispatcherWorker {
    pub fn new(rx: mpsc::Receiver<AdminAlert>, sink: Arc<dyn AlertSink>) -> Self {
        Self { rx, sink }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("admin alert dispatcher started");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("admin alert dispatcher stopping");
                        break;
                    }
                }
                alert = self.rx.recv() => match alert {
                    Some(alert) => self.deliver(alert).await,
                    None => {
                        info!("admin alert queue closed");
                        break;
                    }
                },
            }
        }

        // Flush whatever was queued before shutdown.
        self.rx.close();
        while let Some(alert) = self.rx.recv().await {
            self.deliver(alert).await;
        }

        info!("admin alert dispatcher stopped");
    }

    async fn deliver(&self, alert: AdminAlert) {
        if let Err(e) = self.sink.deliver(&alert).await {
            warn!(
                alert_kind = %alert.kind,
                level = alert.level.as_str(),
                error = %e,
                "admin alert delivery failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notification::alert_channel;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        kinds: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn deliver(&self, alert: &AdminAlert) -> anyhow::Result<()> {
            self.kinds.lock().await.push(alert.kind.clone());
            if alert.kind == "broken" {
                anyhow::bail!("sink down");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_queued_alerts_and_flushes_on_shutdown() {
        let (emitter, rx) = alert_channel(8);
        let sink = Arc::new(RecordingSink::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        emitter.emit(AdminAlert::critical("broken", "first", json!({})));
        emitter.emit(AdminAlert::warning("reconciliation_conflict", "second", json!({})));

        let handle = tokio::spawn(AlertDispatcherWorker::new(rx, sink.clone()).run(shutdown_rx));
        tokio::task::yield_now().await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let kinds = sink.kinds.lock().await.clone();
        assert_eq!(kinds, vec!["broken", "reconciliation_conflict"]);
    }
}
