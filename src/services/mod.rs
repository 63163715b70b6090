//! Business services around the gateways: eligibility, fraud scoring,
//! reconciliation and the flows that tie them together.

pub mod cancellation;
pub mod fraud_detection;
pub mod notification;
pub mod payment_orchestrator;
pub mod transaction_monitor;
pub mod transaction_validator;
pub mod webhook_processor;

pub use cancellation::{CancellationOutcome, CancellationService};
pub use fraud_detection::{FraudCheckResult, FraudDetector, FraudReason, RiskLevel};
pub use notification::{AdminAlert, AdminAlertEmitter, AlertLevel, AlertSink, LogAlertSink};
pub use payment_orchestrator::{PaymentCreation, PaymentOrchestrator, PremiumPaymentRequest};
pub use transaction_monitor::{MonitorError, ReconcileOutcome, TransactionMonitor};
pub use transaction_validator::{TransactionValidator, ValidationOutcome, ValidationReason};
pub use webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};
