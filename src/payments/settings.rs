//! Payment settings: site-config overrides on top of environment defaults.

use crate::clock::Clock;
use crate::database::error::DatabaseError;
use crate::database::repository::SiteConfigRepository;
use crate::payments::config_cache::TtlCache;
use crate::payments::types::GatewayName;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const PREMIUM_PRICE_KEY: &str = "premium_price";
pub const ACTIVE_GATEWAY_KEY: &str = "active_payment_gateway";
pub const DEFAULT_PREMIUM_PRICE_IDR: i64 = 99_000;

/// Point-in-time view of gateway configuration.
///
/// Keys are looked up in lower case. A site-config row wins over an
/// environment variable of the same (upper-case) name; blank values count as
/// unset.
#[derive(Debug, Clone, Default)]
pub struct SettingsSnapshot {
    values: HashMap<String, String>,
}

impl SettingsSnapshot {
    pub fn from_pairs<E, S, K1, V1, K2, V2>(env: E, site: S) -> Self
    where
        E: IntoIterator<Item = (K1, V1)>,
        S: IntoIterator<Item = (K2, V2)>,
        K1: AsRef<str>,
        V1: Into<String>,
        K2: AsRef<str>,
        V2: Into<String>,
    {
        let mut values = HashMap::new();
        for (k, v) in env {
            values.insert(k.as_ref().to_lowercase(), v.into());
        }
        for (k, v) in site {
            let v: String = v.into();
            if !v.trim().is_empty() {
                values.insert(k.as_ref().to_lowercase(), v);
            }
        }
        Self { values }
    }

    /// Environment plus every site-config row.
    pub async fn load(site_config: &dyn SiteConfigRepository) -> Result<Self, DatabaseError> {
        let site = site_config.get_all().await?;
        Ok(Self::from_pairs(std::env::vars(), site))
    }

    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars(), Vec::<(String, String)>::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_lowercase())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_string()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.to_lowercase()) {
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
            _ => default,
        }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default)
    }

    pub fn get_decimal(&self, key: &str, default: Decimal) -> Decimal {
        self.get(key)
            .and_then(|v| Decimal::from_str(v).ok())
            .filter(|d| *d > Decimal::ZERO)
            .unwrap_or(default)
    }
}

/// Cached access to the two settings read on every payment: the premium
/// price and the active gateway.
pub struct PaymentSettings {
    site_config: Arc<dyn SiteConfigRepository>,
    cache: TtlCache<String, Option<String>>,
    default_price: i64,
    default_gateway: GatewayName,
}

impl PaymentSettings {
    /// Defaults come from `PREMIUM_PRICE_IDR` and `ACTIVE_PAYMENT_GATEWAY`.
    pub fn new(
        site_config: Arc<dyn SiteConfigRepository>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let default_price = std::env::var("PREMIUM_PRICE_IDR")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PREMIUM_PRICE_IDR);
        let default_gateway = std::env::var("ACTIVE_PAYMENT_GATEWAY")
            .ok()
            .and_then(|v| GatewayName::from_str(&v).ok())
            .unwrap_or(GatewayName::Midtrans);

        Self {
            site_config,
            cache: TtlCache::new(ttl, clock),
            default_price,
            default_gateway,
        }
    }

    pub fn with_defaults(mut self, price: i64, gateway: GatewayName) -> Self {
        self.default_price = price;
        self.default_gateway = gateway;
        self
    }

    async fn lookup(&self, key: &str) -> Option<String> {
        let site_config = self.site_config.clone();
        let owned = key.to_string();
        match self
            .cache
            .get_or_try_load(key.to_string(), || async move {
                site_config.get(&owned).await
            })
            .await
        {
            Ok(value) => value.filter(|v| !v.trim().is_empty()),
            Err(e) => {
                warn!(key = %key, error = %e, "Site config lookup failed, using default");
                None
            }
        }
    }

    /// Current premium price in whole rupiah.
    pub async fn premium_price(&self) -> i64 {
        match self.lookup(PREMIUM_PRICE_KEY).await {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(price) if price > 0 => price,
                _ => {
                    warn!(value = %raw, "Invalid premium_price in site config, using default");
                    self.default_price
                }
            },
            None => self.default_price,
        }
    }

    /// Gateway used when the caller does not name one.
    pub async fn active_gateway(&self) -> GatewayName {
        match self.lookup(ACTIVE_GATEWAY_KEY).await {
            Some(raw) => GatewayName::from_str(&raw).unwrap_or_else(|_| {
                warn!(value = %raw, "Unknown active_payment_gateway in site config, using default");
                self.default_gateway
            }),
            None => self.default_gateway,
        }
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate(&PREMIUM_PRICE_KEY.to_string()).await;
        self.cache.invalidate(&ACTIVE_GATEWAY_KEY.to_string()).await;
    }
}
