use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{Error, Result};
use crate::sql::Engine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    #[serde(default)]
    pub engine: Engine,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
    /// Accept invalid/self-signed certificates. Ignored by the verifying modes.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Optional path to a custom CA certificate file (PEM format).
    #[serde(default)]
    pub ca_cert_path: Option<String>,
    /// Engine-native connection string. Overrides host, port, database and
    /// username when set; the password still comes from `password`.
    #[serde(default)]
    pub connection_string: Option<String>,
    /// Oracle service name, used instead of `database` when present.
    #[serde(default)]
    pub service_name: Option<String>,
    /// Schema assumed by requests that do not name one.
    #[serde(default)]
    pub default_schema: Option<String>,
    #[serde(default)]
    pub pool: PoolSettings,
}

/// SSL/TLS connection modes.
///
/// These match the standard PostgreSQL sslmode parameter:
/// - `Disable`: No SSL (unencrypted)
/// - `Prefer`: Try SSL first, fall back to non-SSL (default)
/// - `Require`: Require SSL but don't verify certificate
/// - `VerifyCa`: Require SSL and verify the server certificate is signed by a trusted CA
/// - `VerifyFull`: Like VerifyCa, but also verify the server hostname matches the certificate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn verifies_certificate(&self) -> bool {
        matches!(self, SslMode::VerifyCa | SslMode::VerifyFull)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Sessions opened eagerly by `connect`.
    #[serde(default)]
    pub min: usize,
    #[serde(default = "default_max_sessions")]
    pub max: usize,
    /// Upper bound on waiting for a free session. Unset waits indefinitely.
    #[serde(default)]
    pub acquire_timeout_secs: Option<u64>,
}

fn default_max_sessions() -> usize {
    5
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min: 0,
            max: default_max_sessions(),
            acquire_timeout_secs: None,
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max == 0 {
            return Err(Error::Config("pool.max must be at least 1".to_string()));
        }
        if self.min > self.max {
            return Err(Error::Config(format!(
                "pool.min ({}) exceeds pool.max ({})",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

impl ConnectionConfig {
    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username,
            self.host,
            self.port,
            self.service_name.as_deref().unwrap_or(&self.database)
        )
    }

    /// Fill an empty password from the environment, then from an
    /// interactive prompt when `prompt` is set.
    pub fn resolve_password(&mut self, prompt: bool) -> Result<()> {
        if !self.password.is_empty() {
            return Ok(());
        }
        let mut vars = vec!["SQLBRIDGE_PASSWORD"];
        if self.engine == Engine::Postgres {
            vars.push("PGPASSWORD");
        }
        if let Some(pw) = vars.into_iter().find_map(|v| std::env::var(v).ok()) {
            self.password = pw;
            return Ok(());
        }
        if prompt {
            let text = format!("Password for {}: ", self.display_string());
            self.password = rpassword::read_password_from_tty(Some(&text))?;
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::from("Local PostgreSQL"),
            engine: Engine::Postgres,
            host: String::from("localhost"),
            port: 5432,
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
            connection_string: None,
            service_name: None,
            default_schema: None,
            pool: PoolSettings::default(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedConnections {
    #[serde(default)]
    connections: Vec<ConnectionConfig>,
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sqlbridge")
        .join("connections.toml")
}

pub fn parse_connections(content: &str) -> Result<Vec<ConnectionConfig>> {
    let saved: SavedConnections =
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
    for config in &saved.connections {
        config.pool.validate()?;
    }
    Ok(saved.connections)
}

/// A missing file yields no connections.
pub fn load_connections(path: &Path) -> Result<Vec<ConnectionConfig>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let content = std::fs::read_to_string(path)?;
    parse_connections(&content)
}

pub fn save_connections(path: &Path, connections: &[ConnectionConfig]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let saved = SavedConnections {
        connections: connections.to_vec(),
    };
    let content = toml::to_string_pretty(&saved).map_err(|e| Error::Config(e.to_string()))?;
    std::fs::write(path, content)?;
    Ok(())
}

pub fn find_connection(connections: &[ConnectionConfig], name: &str) -> Option<ConnectionConfig> {
    connections
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .cloned()
}
