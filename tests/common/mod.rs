//! Shared fixtures for the integration tests: a scriptable gateway and a
//! fully wired service graph over the in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use premium_payments::clock::ManualClock;
use premium_payments::config::PaymentRuntimeConfig;
use premium_payments::database::memory::{
    InMemoryFraudAuditRepository, InMemorySiteConfigRepository, InMemoryTransactionRepository,
    InMemoryUserRepository,
};
use premium_payments::database::models::{NewTransaction, Transaction, UserAccount};
use premium_payments::database::repository::TransactionRepository;
use premium_payments::payments::error::{PaymentError, PaymentResult};
use premium_payments::payments::types::{
    CancelTransactionResult, CreateTransactionRequest, CreateTransactionResult,
    GatewayCapabilities, GatewayName, NotificationResult, StatusRequest, TransactionStatus,
    VerifyTransactionResult, WebhookRequest, WebhookVerificationResult,
};
use premium_payments::payments::{GatewayFactory, PaymentGateway, PaymentSettings};
use premium_payments::services::cancellation::CancellationService;
use premium_payments::services::fraud_detection::FraudDetector;
use premium_payments::services::notification::{alert_channel, AdminAlert};
use premium_payments::services::payment_orchestrator::PaymentOrchestrator;
use premium_payments::services::transaction_monitor::TransactionMonitor;
use premium_payments::services::transaction_validator::TransactionValidator;
use premium_payments::services::webhook_processor::WebhookProcessor;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const PRICE: i64 = 99_000;
pub const SIGNATURE_HEADER: &str = "x-fake-signature";

fn text(payload: &JsonValue, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Scriptable gateway
// ---------------------------------------------------------------------------

/// Gateway double. Notifications authenticate when `x-fake-signature: valid`
/// is present and carry `order_id`, `status` and optionally `amount`.
pub struct FakeGateway {
    name: GatewayName,
    capabilities: GatewayCapabilities,
    verify: Mutex<VerifyTransactionResult>,
    cancel: Mutex<CancelTransactionResult>,
    fail_creation: AtomicBool,
    pub created: Mutex<Vec<CreateTransactionRequest>>,
    pub cancel_calls: AtomicU32,
    pub verify_calls: AtomicU32,
}

impl FakeGateway {
    pub fn new(name: GatewayName) -> Self {
        Self {
            name,
            capabilities: GatewayCapabilities {
                supports_cancellation: true,
                supports_webhooks: true,
                supports_status_check: true,
            },
            verify: Mutex::new(VerifyTransactionResult::verified(
                TransactionStatus::Pending,
                json!({}),
            )),
            cancel: Mutex::new(CancelTransactionResult {
                success: true,
                remote_cancelled: true,
                message: Some("cancelled at provider".to_string()),
                error: None,
            }),
            fail_creation: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
            cancel_calls: AtomicU32::new(0),
            verify_calls: AtomicU32::new(0),
        }
    }

    /// A link-style gateway: no status API, no webhooks.
    pub fn without_status_check(mut self) -> Self {
        self.capabilities = GatewayCapabilities {
            supports_cancellation: false,
            supports_webhooks: false,
            supports_status_check: false,
        };
        self
    }

    pub fn set_remote_status(&self, status: TransactionStatus) {
        *self.verify.lock().unwrap() =
            VerifyTransactionResult::verified(status, json!({"remote_status": status.as_str()}));
    }

    pub fn set_remote_unreachable(&self) {
        *self.verify.lock().unwrap() = VerifyTransactionResult::invalid("connection refused");
    }

    pub fn set_cancel_result(&self, result: CancelTransactionResult) {
        *self.cancel.lock().unwrap() = result;
    }

    pub fn fail_creation(&self) {
        self.fail_creation.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> GatewayName {
        self.name
    }

    fn capabilities(&self) -> GatewayCapabilities {
        self.capabilities
    }

    async fn create_transaction(&self, request: &CreateTransactionRequest) -> CreateTransactionResult {
        if self.fail_creation.load(Ordering::SeqCst) {
            return CreateTransactionResult::failed("provider returned 500");
        }
        self.created.lock().unwrap().push(request.clone());
        let reference = format!("REF-{}", request.order_id);
        let redirect = format!("https://pay.example.test/{}", reference);
        CreateTransactionResult::created(
            redirect.clone(),
            Some(reference.clone()),
            json!({"redirect_url": redirect, "gateway_reference": reference}),
        )
    }

    async fn verify_transaction(&self, _request: &StatusRequest) -> VerifyTransactionResult {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.verify.lock().unwrap().clone()
    }

    async fn authenticate_notification(
        &self,
        request: &WebhookRequest,
    ) -> PaymentResult<WebhookVerificationResult> {
        match request.header(SIGNATURE_HEADER) {
            Some("valid") => Ok(WebhookVerificationResult::accepted()),
            Some(_) => Ok(WebhookVerificationResult::rejected("signature mismatch")),
            None => Ok(WebhookVerificationResult::rejected("missing signature")),
        }
    }

    async fn handle_notification(&self, payload: &JsonValue) -> PaymentResult<NotificationResult> {
        let order_id = text(payload, "order_id").ok_or_else(|| PaymentError::ValidationError {
            message: "notification has no order_id".to_string(),
            field: Some("order_id".to_string()),
        })?;
        let status = text(payload, "status")
            .and_then(|s| TransactionStatus::from_str(&s).ok())
            .unwrap_or(TransactionStatus::Unknown);
        Ok(NotificationResult {
            order_id,
            status,
            is_success: status == TransactionStatus::Success,
            amount: payload.get("amount").and_then(|v| v.as_i64()),
            payment_method: None,
            details: payload.clone(),
            event_type: text(payload, "event"),
        })
    }

    async fn cancel_transaction(&self, _reference: &str) -> CancelTransactionResult {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Wired services
// ---------------------------------------------------------------------------

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub transactions: Arc<InMemoryTransactionRepository>,
    pub users: Arc<InMemoryUserRepository>,
    pub fraud_audit: Arc<InMemoryFraudAuditRepository>,
    pub site_config: Arc<InMemorySiteConfigRepository>,
    pub settings: Arc<PaymentSettings>,
    pub factory: Arc<GatewayFactory>,
    pub monitor: Arc<TransactionMonitor>,
    pub fraud: Arc<FraudDetector>,
    pub validator: Arc<TransactionValidator>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub cancellation: Arc<CancellationService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub alerts: mpsc::Receiver<AdminAlert>,
}

impl Harness {
    /// Services over the given gateways; the first one is the active gateway.
    pub fn new(gateways: Vec<Arc<dyn PaymentGateway>>) -> Self {
        let active = gateways
            .first()
            .map(|g| g.name())
            .unwrap_or(GatewayName::Midtrans);
        let clock = Arc::new(ManualClock::new(start_time()));
        let transactions = Arc::new(InMemoryTransactionRepository::new(clock.clone()));
        let users = Arc::new(InMemoryUserRepository::new());
        let fraud_audit = Arc::new(InMemoryFraudAuditRepository::new());
        let site_config = Arc::new(InMemorySiteConfigRepository::new());
        let settings = Arc::new(
            PaymentSettings::new(
                site_config.clone(),
                std::time::Duration::from_secs(60),
                clock.clone(),
            )
            .with_defaults(PRICE, active),
        );
        let factory = Arc::new(GatewayFactory::with_gateways(gateways, settings.clone()));
        let (emitter, alerts) = alert_channel(64);

        let monitor = Arc::new(TransactionMonitor::new(
            transactions.clone(),
            users.clone(),
            emitter.clone(),
            clock.clone(),
        ));
        let fraud = Arc::new(FraudDetector::new(
            users.clone(),
            transactions.clone(),
            fraud_audit.clone(),
            settings.clone(),
            emitter.clone(),
            clock.clone(),
        ));
        let validator = Arc::new(TransactionValidator::new(
            users.clone(),
            transactions.clone(),
            settings.clone(),
            clock.clone(),
        ));
        let runtime = PaymentRuntimeConfig {
            public_base_url: "https://premium.example.test".to_string(),
            ..PaymentRuntimeConfig::default()
        };
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            factory.clone(),
            validator.clone(),
            fraud.clone(),
            monitor.clone(),
            transactions.clone(),
            users.clone(),
            runtime,
            clock.clone(),
        ));
        let cancellation = Arc::new(CancellationService::new(
            factory.clone(),
            transactions.clone(),
            monitor.clone(),
        ));
        let webhooks = Arc::new(WebhookProcessor::new(
            factory.clone(),
            transactions.clone(),
            fraud.clone(),
            monitor.clone(),
            emitter.clone(),
        ));

        Self {
            clock,
            transactions,
            users,
            fraud_audit,
            site_config,
            settings,
            factory,
            monitor,
            fraud,
            validator,
            orchestrator,
            cancellation,
            webhooks,
            alerts,
        }
    }

    /// Registers a user whose account is `age` old.
    pub async fn add_user(&self, age: Duration) -> UserAccount {
        let id = Uuid::new_v4();
        let user = UserAccount {
            id,
            email: format!("{}@example.test", id.simple()),
            name: "Dewi Lestari".to_string(),
            phone: Some("+6281234567890".to_string()),
            is_premium: false,
            premium_expires_at: None,
            last_known_ip: None,
            created_at: self.clock_now() - age,
        };
        self.users.add_user(user.clone()).await;
        user
    }

    pub async fn add_established_user(&self) -> UserAccount {
        self.add_user(Duration::days(90)).await
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use premium_payments::clock::Clock;
        self.clock.now()
    }

    /// Inserts a pending row through the repository, stamped with the current clock.
    pub async fn insert_pending(&self, user_id: Uuid, gateway: GatewayName) -> Transaction {
        let order_id = format!("PREM-TEST-{}", Uuid::new_v4().simple());
        self.transactions
            .insert(NewTransaction {
                order_id: order_id.clone(),
                user_id,
                amount: PRICE,
                payment_method: "qris".to_string(),
                gateway,
                details: json!({"gateway_reference": format!("REF-{}", order_id)}),
            })
            .await
            .unwrap()
    }

    /// Seeds a row in an arbitrary state with explicit timestamps.
    pub async fn seed(
        &self,
        user_id: Uuid,
        status: TransactionStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Transaction {
        let tx = Transaction {
            id: Uuid::new_v4(),
            order_id: format!("PREM-SEED-{}", Uuid::new_v4().simple()),
            user_id,
            amount: PRICE,
            status,
            payment_method: "qris".to_string(),
            gateway: self.settings_gateway(),
            details: json!({}),
            created_at,
            updated_at,
        };
        self.transactions.seed(tx.clone()).await;
        tx
    }

    fn settings_gateway(&self) -> GatewayName {
        self.factory
            .list_gateways()
            .into_iter()
            .find(|g| g.available)
            .map(|g| g.name)
            .unwrap_or(GatewayName::Midtrans)
    }

    pub async fn reload(&self, id: Uuid) -> Transaction {
        self.transactions.find_by_id(id).await.unwrap().unwrap()
    }

    /// Alerts queued so far.
    pub fn drain_alerts(&mut self) -> Vec<AdminAlert> {
        let mut alerts = Vec::new();
        while let Ok(alert) = self.alerts.try_recv() {
            alerts.push(alert);
        }
        alerts
    }
}

pub fn webhook(payload: JsonValue, signature: Option<&str>) -> WebhookRequest {
    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    if let Some(signature) = signature {
        headers.push((SIGNATURE_HEADER.to_string(), signature.to_string()));
    }
    WebhookRequest::from_parts(headers, serde_json::to_vec(&payload).unwrap()).unwrap()
}
