use crate::payments::types::{GatewayName, TransactionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A premium purchase as recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub order_id: String,
    pub user_id: Uuid,
    /// IDR, whole rupiah.
    pub amount: i64,
    pub status: TransactionStatus,
    pub payment_method: String,
    pub gateway: GatewayName,
    /// Provider-specific data. Merged into, never replaced.
    pub details: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn redirect_url(&self) -> Option<&str> {
        self.details.get("redirect_url").and_then(|v| v.as_str())
    }

    pub fn gateway_reference(&self) -> Option<&str> {
        self.details
            .get("gateway_reference")
            .and_then(|v| v.as_str())
    }

    pub fn premium_granted(&self) -> bool {
        self.details.get("premium_granted_at").is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub order_id: String,
    pub user_id: Uuid,
    pub amount: i64,
    pub payment_method: String,
    pub gateway: GatewayName,
    pub details: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub is_premium: bool,
    /// `None` together with `is_premium` means lifetime.
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub last_known_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAuditEntry {
    pub user_id: Uuid,
    pub transaction_ref: String,
    pub risk_level: String,
    pub reasons: Vec<String>,
    pub details: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Shallow merge of `patch` into `base`. Keys in `patch` win; keys only in
/// `base` are kept. A non-object `base` is replaced by the patch object.
pub fn merge_details(base: &JsonValue, patch: &JsonValue) -> JsonValue {
    match (base, patch) {
        (JsonValue::Object(existing), JsonValue::Object(update)) => {
            let mut merged = existing.clone();
            for (k, v) in update {
                merged.insert(k.clone(), v.clone());
            }
            JsonValue::Object(merged)
        }
        (_, JsonValue::Object(_)) => patch.clone(),
        (existing, _) => existing.clone(),
    }
}
