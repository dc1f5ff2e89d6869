//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling via deadpool-postgres.

use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use encore_core::{CatalogError, CatalogResult};
use std::time::Duration;
use tokio_postgres::NoTls;

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "encore".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("ENCORE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("ENCORE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("ENCORE_DB_NAME").unwrap_or_else(|_| "encore".to_string()),
            user: std::env::var("ENCORE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("ENCORE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("ENCORE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("ENCORE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> CatalogResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(self.max_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| CatalogError::Internal {
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_default() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "encore");
        assert_eq!(config.max_size, 16);
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        // No connection is attempted until the first checkout.
        let pool = DbConfig::default().create_pool().unwrap();
        assert_eq!(pool.status().max_size, 16);
    }
}
