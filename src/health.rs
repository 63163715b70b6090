//! Health check module
//! Reports the ledger store and the payment gateways the service can reach.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
#[cfg(feature = "database")]
use std::time::{Duration, Instant};
#[cfg(feature = "database")]
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::payments::factory::GatewayFactory;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    factory: Arc<GatewayFactory>,
}

impl HealthChecker {
    #[cfg(feature = "database")]
    pub fn new(db_pool: Option<sqlx::PgPool>, factory: Arc<GatewayFactory>) -> Self {
        Self { db_pool, factory }
    }

    #[cfg(not(feature = "database"))]
    pub fn new(factory: Arc<GatewayFactory>) -> Self {
        Self { factory }
    }

    /// Database down is unhealthy; the active gateway being unusable is degraded.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut overall_healthy = true;
        let mut degraded = false;

        #[cfg(feature = "database")]
        if let Some(pool) = &self.db_pool {
            match timeout(Duration::from_secs(5), check_database_health(pool)).await {
                Ok(Ok(response_time)) => {
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::up(Some(response_time)),
                    );
                    info!("Database health check: OK ({}ms)", response_time);
                }
                Ok(Err(e)) => {
                    overall_healthy = false;
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::down(Some(e.to_string())),
                    );
                    error!("Database health check failed: {}", e);
                }
                Err(_) => {
                    overall_healthy = false;
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::down(Some("Timeout".to_string())),
                    );
                    error!("Database health check timed out");
                }
            }
        }

        let active = self.factory.active_gateway_name().await;
        for gateway in self.factory.list_gateways() {
            let component = if gateway.available {
                ComponentHealth::up(None)
            } else if gateway.name == active {
                degraded = true;
                warn!(gateway = %gateway.name, "Active payment gateway is not configured");
                ComponentHealth::down(gateway.error.clone())
            } else {
                ComponentHealth::warning(None, gateway.error.clone())
            };
            health_status
                .checks
                .insert(format!("gateway:{}", gateway.name), component);
        }

        health_status.status = if !overall_healthy {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

#[cfg(feature = "database")]
pub async fn check_database_health(
    pool: &sqlx::PgPool,
) -> Result<u128, crate::database::error::DatabaseError> {
    let start = Instant::now();
    crate::database::health_check(pool).await?;
    Ok(start.elapsed().as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::database::memory::InMemorySiteConfigRepository;
    use crate::payments::providers::{PaypalMeConfig, PaypalMeGateway};
    use crate::payments::settings::PaymentSettings;
    use crate::payments::types::GatewayName;
    use rust_decimal::Decimal;

    fn factory(active: GatewayName) -> Arc<GatewayFactory> {
        let settings = Arc::new(
            PaymentSettings::new(
                Arc::new(InMemorySiteConfigRepository::new()),
                std::time::Duration::from_secs(60),
                Arc::new(ManualClock::default()),
            )
            .with_defaults(99_000, active),
        );
        let paypal_me = PaypalMeGateway::new(PaypalMeConfig {
            username: "premiumshop".to_string(),
            idr_per_usd: Decimal::from(16_000),
        });
        Arc::new(GatewayFactory::with_gateways(
            vec![Arc::new(paypal_me)],
            settings,
        ))
    }

    fn checker(factory: Arc<GatewayFactory>) -> HealthChecker {
        #[cfg(feature = "database")]
        return HealthChecker::new(None, factory);
        #[cfg(not(feature = "database"))]
        return HealthChecker::new(factory);
    }

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
        assert_eq!(warning_health.response_time_ms, Some(500));
    }

    #[tokio::test]
    async fn unconfigured_active_gateway_degrades_health() {
        let healthy = checker(factory(GatewayName::PaypalMe)).check_health().await;
        assert!(healthy.is_healthy());
        assert!(matches!(
            healthy.checks["gateway:paypal_me"].status,
            ComponentState::Up
        ));

        let degraded = checker(factory(GatewayName::Midtrans)).check_health().await;
        assert!(matches!(degraded.status, HealthState::Degraded));
        assert!(matches!(
            degraded.checks["gateway:midtrans"].status,
            ComponentState::Down
        ));
    }
}
