//! API configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CARTAGE_CART_TABLE` - cart table (partition `cart_id`, sort `item_key`)
//! - `CARTAGE_STOCK_TABLE` - stock table (partition `item_id`, sort `warehouse_id`)
//! - `CARTAGE_WAREHOUSE_TABLE` - warehouse table
//! - `CARTAGE_CATALOG_TABLE` - catalog table
//! - `CARTAGE_USERS_TABLE` - users table
//! - `CARTAGE_USER_POOL_ID` - identity provider user pool
//!
//! ## Optional
//! - `CARTAGE_HOST` - bind address (default: 127.0.0.1)
//! - `CARTAGE_PORT` - listen port (default: 8080)
//! - `CARTAGE_CART_TTL_DAYS` - cart expiry window (default: 7)
//! - `CARTAGE_STOCK_WAREHOUSE_INDEX` - stock-by-warehouse index (default: warehouse_id_index)
//! - `CARTAGE_USERS_EMAIL_INDEX` - users-by-email index (default: email_index)
//! - `CARTAGE_WAREHOUSE_CACHE_SECS` - warehouse list cache TTL (default: 300)
//! - `CARTAGE_NEARBY_LIMIT` - default nearest-warehouse count (default: 3)
//! - `CARTAGE_CLOSEST_ITEMS_LIMIT` - stocked items returned with the closest warehouse (default: 200)
//! - `CARTAGE_SEARCH_PAGE_LIMIT` - catalog scan page cap (default: 3)
//! - `CARTAGE_SEARCH_ITEM_LIMIT` - catalog scan row cap (default: 8000)
//! - `CARTAGE_SEARCH_CUTOFF` - default similarity cutoff (default: 70)
//! - `CARTAGE_SEARCH_LIMIT` - default result limit (default: 20)
//! - `CARTAGE_STORE_ENDPOINT` - store endpoint override (local DynamoDB)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_TRACES_SAMPLE_RATE` - Sentry tracing sample rate (default: 0.0)

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    /// A variable is set but does not parse.
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// API application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// IP address to bind the server to.
    pub host: IpAddr,
    /// Port to listen on.
    pub port: u16,
    /// Cart table name.
    pub cart_table: String,
    /// Stock table name.
    pub stock_table: String,
    /// Warehouse table name.
    pub warehouse_table: String,
    /// Catalog table name.
    pub catalog_table: String,
    /// Users table name.
    pub users_table: String,
    /// Stock-by-warehouse index name.
    pub stock_warehouse_index: String,
    /// Users-by-email index name.
    pub users_email_index: String,
    /// Cart TTL in days; applied to `expires_at` and the anonymous cookie.
    pub cart_ttl_days: i64,
    /// Warehouse list cache TTL.
    pub warehouse_cache_ttl: Duration,
    /// Default nearest-warehouse count.
    pub nearby_limit: usize,
    /// Stocked items returned alongside the closest warehouse.
    pub closest_items_limit: usize,
    /// Catalog scan page cap per search.
    pub search_page_limit: usize,
    /// Catalog scan row cap per search.
    pub search_item_limit: usize,
    /// Default similarity cutoff.
    pub search_cutoff: f64,
    /// Default search result limit.
    pub search_limit: usize,
    /// Identity provider user pool.
    pub user_pool_id: String,
    /// Store endpoint override (local development).
    pub store_endpoint: Option<String>,
    /// Sentry DSN for error tracking.
    pub sentry_dsn: Option<String>,
    /// Sentry environment name.
    pub sentry_environment: Option<String>,
    /// Sentry tracing sample rate.
    pub sentry_traces_sample_rate: f32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or any
    /// variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found).
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a variable lookup (testable seam).
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: parse_or_default(&lookup, "CARTAGE_HOST", IpAddr::from([127, 0, 0, 1]))?,
            port: parse_or_default(&lookup, "CARTAGE_PORT", 8080)?,
            cart_table: required(&lookup, "CARTAGE_CART_TABLE")?,
            stock_table: required(&lookup, "CARTAGE_STOCK_TABLE")?,
            warehouse_table: required(&lookup, "CARTAGE_WAREHOUSE_TABLE")?,
            catalog_table: required(&lookup, "CARTAGE_CATALOG_TABLE")?,
            users_table: required(&lookup, "CARTAGE_USERS_TABLE")?,
            stock_warehouse_index: or_default(
                &lookup,
                "CARTAGE_STOCK_WAREHOUSE_INDEX",
                "warehouse_id_index",
            ),
            users_email_index: or_default(&lookup, "CARTAGE_USERS_EMAIL_INDEX", "email_index"),
            cart_ttl_days: parse_or_default(&lookup, "CARTAGE_CART_TTL_DAYS", 7)?,
            warehouse_cache_ttl: Duration::from_secs(parse_or_default(
                &lookup,
                "CARTAGE_WAREHOUSE_CACHE_SECS",
                300,
            )?),
            nearby_limit: parse_or_default(&lookup, "CARTAGE_NEARBY_LIMIT", 3)?,
            closest_items_limit: parse_or_default(&lookup, "CARTAGE_CLOSEST_ITEMS_LIMIT", 200)?,
            search_page_limit: parse_or_default(&lookup, "CARTAGE_SEARCH_PAGE_LIMIT", 3)?,
            search_item_limit: parse_or_default(&lookup, "CARTAGE_SEARCH_ITEM_LIMIT", 8000)?,
            search_cutoff: parse_or_default(&lookup, "CARTAGE_SEARCH_CUTOFF", 70.0)?,
            search_limit: parse_or_default(&lookup, "CARTAGE_SEARCH_LIMIT", 20)?,
            user_pool_id: required(&lookup, "CARTAGE_USER_POOL_ID")?,
            store_endpoint: lookup("CARTAGE_STORE_ENDPOINT"),
            sentry_dsn: lookup("SENTRY_DSN"),
            sentry_environment: lookup("SENTRY_ENVIRONMENT"),
            sentry_traces_sample_rate: parse_or_default(&lookup, "SENTRY_TRACES_SAMPLE_RATE", 0.0)?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper functions
// =============================================================================

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<String, ConfigError> {
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_owned()))
}

fn or_default(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_owned())
}

fn parse_or_default<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key).map_or(Ok(default), |raw| {
        raw.parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_owned(), e.to_string()))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("CARTAGE_CART_TABLE", "carts"),
            ("CARTAGE_STOCK_TABLE", "stock"),
            ("CARTAGE_WAREHOUSE_TABLE", "warehouses"),
            ("CARTAGE_CATALOG_TABLE", "catalog"),
            ("CARTAGE_USERS_TABLE", "users"),
            ("CARTAGE_USER_POOL_ID", "pool-1"),
        ])
    }

    fn config_from(vars: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| vars.get(key).map(ToString::to_string))
    }

    #[test]
    fn loads_with_defaults() {
        let config = config_from(&base_vars()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.cart_ttl_days, 7);
        assert_eq!(config.stock_warehouse_index, "warehouse_id_index");
        assert_eq!(config.users_email_index, "email_index");
        assert_eq!(config.warehouse_cache_ttl, Duration::from_secs(300));
        assert!((config.search_cutoff - 70.0).abs() < f64::EPSILON);
        assert!(config.store_endpoint.is_none());
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn missing_required_table_fails() {
        let mut vars = base_vars();
        vars.remove("CARTAGE_CART_TABLE");
        assert!(matches!(
            config_from(&vars),
            Err(ConfigError::MissingEnvVar(key)) if key == "CARTAGE_CART_TABLE"
        ));
    }

    #[test]
    fn invalid_numeric_override_fails() {
        let mut vars = base_vars();
        vars.insert("CARTAGE_PORT", "not-a-port");
        assert!(matches!(
            config_from(&vars),
            Err(ConfigError::InvalidEnvVar(key, _)) if key == "CARTAGE_PORT"
        ));
    }

    #[test]
    fn overrides_apply() {
        let mut vars = base_vars();
        vars.insert("CARTAGE_HOST", "0.0.0.0");
        vars.insert("CARTAGE_PORT", "9000");
        vars.insert("CARTAGE_CART_TTL_DAYS", "14");
        vars.insert("CARTAGE_STORE_ENDPOINT", "http://localhost:8000");
        let config = config_from(&vars).unwrap();
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:9000");
        assert_eq!(config.cart_ttl_days, 14);
        assert_eq!(
            config.store_endpoint.as_deref(),
            Some("http://localhost:8000")
        );
    }
}
