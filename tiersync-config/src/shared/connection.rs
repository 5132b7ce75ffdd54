use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::shared::ValidationError;

/// Application name reported to PostgreSQL, visible in `pg_stat_activity`.
const APP_NAME_WAREHOUSE: &str = "tiersync_loader";

fn default_pool_size() -> u32 {
    4
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

/// Connection parameters of a MySQL database, used for both the source and the replica.
#[derive(Debug, Clone, Deserialize)]
pub struct MySqlConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Name of the database (schema) holding the replicated tables.
    pub name: String,
    pub username: String,
    /// Password for the user. Redacted in debug output.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Upper bound of connections opened against this database across all workers.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Connection parameters of the PostgreSQL warehouse.
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Requires TLS when set, otherwise TLS is only preferred.
    #[serde(default)]
    pub require_tls: bool,
}

impl MySqlConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self, role: &'static str) -> Result<(), ValidationError> {
        if self.pool_size == 0 {
            return Err(ValidationError::PoolSizeZero { role });
        }

        Ok(())
    }
}

impl PgConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pool_size == 0 {
            return Err(ValidationError::PoolSizeZero { role: "warehouse" });
        }

        Ok(())
    }
}

/// Converts a connection configuration into driver specific connect options.
///
/// The configuration structs stay driver agnostic and each backend implements this trait for
/// the options type it needs.
pub trait IntoConnectOptions<Output> {
    /// Options that connect to the server without selecting a database.
    fn without_db(&self) -> Output;

    /// Options that connect to the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<MySqlConnectOptions> for MySqlConnectionConfig {
    fn without_db(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .charset("utf8mb4")
            .timezone(Some(String::from("+00:00")));

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }

    fn with_db(&self) -> MySqlConnectOptions {
        self.without_db().database(&self.name)
    }
}

impl IntoConnectOptions<PgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_tls {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .ssl_mode(ssl_mode)
            .application_name(APP_NAME_WAREHOUSE)
            .options([
                ("datestyle", "ISO"),
                ("client_encoding", "UTF8"),
                ("timezone", "UTC"),
            ]);

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }

    fn with_db(&self) -> PgConnectOptions {
        self.without_db().database(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql_config() -> MySqlConnectionConfig {
        serde_json::from_value(serde_json::json!({
            "host": "localhost",
            "port": 3306,
            "name": "production",
            "username": "reader",
            "password": "secret"
        }))
        .unwrap()
    }

    #[test]
    fn mysql_config_applies_defaults() {
        let config = mysql_config();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert!(config.validate("source").is_ok());
    }

    #[test]
    fn password_is_redacted_in_debug_output() {
        let config = mysql_config();
        assert!(!format!("{config:?}").contains("secret\""));
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let mut config = mysql_config();
        config.pool_size = 0;
        assert_eq!(
            config.validate("replica"),
            Err(ValidationError::PoolSizeZero { role: "replica" })
        );
    }
}
