//! Service configuration.
//!
//! Non-secret settings come from a TOML file; secrets never do. The
//! encryption master key is read from `AGENTVAULT_ENCRYPTION_KEY` (64 hex
//! chars) and the payment webhook secret from `AGENTVAULT_WEBHOOK_SECRET`.

use serde::Deserialize;

/// Complete service configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VaultConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file holding credentials and the credit ledger
    #[serde(default = "default_db_path")]
    pub database_path: String,
}

fn default_db_path() -> String {
    "agentvault.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

/// Request authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// When disabled, requests run under the "default" user (local dev)
    #[serde(default = "default_auth_enabled")]
    pub enabled: bool,
}

fn default_auth_enabled() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: default_auth_enabled(),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<VaultConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: VaultConfig = toml::from_str(&contents)?;
    Ok(config)
}
