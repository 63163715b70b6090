pub mod error;
pub mod memory;
pub mod models;
pub mod repository;

#[cfg(feature = "database")]
pub mod fraud_audit_repository;
#[cfg(feature = "database")]
pub mod site_config_repository;
#[cfg(feature = "database")]
pub mod transaction_repository;
#[cfg(feature = "database")]
pub mod user_repository;

#[cfg(feature = "database")]
pub use pool::*;

#[cfg(feature = "database")]
mod pool {
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use std::time::Duration;
    use tracing::{error as log_error, info, warn};

    use super::error::DatabaseError;
    use crate::config::DatabaseConfig;

    /// Database pool configuration
    #[derive(Debug, Clone)]
    pub struct PoolConfig {
        pub max_connections: u32,
        pub min_connections: u32,
        pub connection_timeout: Duration,
        pub idle_timeout: Duration,
        pub max_lifetime: Duration,
    }

    impl Default for PoolConfig {
        fn default() -> Self {
            Self {
                max_connections: 10,
                min_connections: 2,
                connection_timeout: Duration::from_secs(30),
                idle_timeout: Duration::from_secs(600),
                max_lifetime: Duration::from_secs(1800),
            }
        }
    }

    pub async fn init_pool(
        database_url: &str,
        config: Option<PoolConfig>,
    ) -> Result<PgPool, DatabaseError> {
        let config = config.unwrap_or_default();

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Initializing database pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| {
                log_error!(error = %e, "Failed to initialize database pool");
                DatabaseError::from_sqlx(e)
            })?;

        pool.acquire().await.map_err(|e| {
            log_error!(error = %e, "Failed to acquire test connection");
            DatabaseError::from_sqlx(e)
        })?;

        info!("Database pool initialized");
        Ok(pool)
    }

    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
            warn!(error = %e, "Database health check failed");
            DatabaseError::from_sqlx(e)
        })?;
        Ok(())
    }

    pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        let pool_config = PoolConfig {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connection_timeout: Duration::from_secs(config.connection_timeout),
            idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
            max_lifetime: Duration::from_secs(1800),
        };

        init_pool(&config.url, Some(pool_config)).await
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn default_pool_config() {
            let config = PoolConfig::default();
            assert_eq!(config.max_connections, 10);
            assert_eq!(config.connection_timeout, Duration::from_secs(30));
        }
    }
}
