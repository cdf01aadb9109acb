use agentvault::api::{
    create_billing_router, create_credential_router, BillingAppState, CredentialAppState,
};
use agentvault::billing::BillingStore;
use agentvault::config::{load_config, VaultConfig};
use agentvault::vault::CredentialStore;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentvault=info".into()),
        )
        .init();

    let config_path =
        std::env::var("AGENTVAULT_CONFIG").unwrap_or_else(|_| "agentvault.toml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %config_path, error = %e, "Config file not loaded, using defaults");
            VaultConfig::default()
        }
    };

    // Refuse to start without a valid master key; operating without one
    // would mean storing secrets in plaintext
    let master_key = std::env::var("AGENTVAULT_ENCRYPTION_KEY")
        .map_err(|_| anyhow!("AGENTVAULT_ENCRYPTION_KEY is not set (64 hex chars required)"))?;

    let webhook_secret = std::env::var("AGENTVAULT_WEBHOOK_SECRET")
        .map_err(|_| anyhow!("AGENTVAULT_WEBHOOK_SECRET is not set"))?;

    let store = Arc::new(
        CredentialStore::new(&config.storage.database_path, &master_key)
            .context("Failed to open credential store")?,
    );
    let billing = Arc::new(
        BillingStore::new(&config.storage.database_path)
            .context("Failed to open billing store")?,
    );

    let app = create_credential_router(CredentialAppState {
        store,
        auth_enabled: config.auth.enabled,
    })
    .merge(create_billing_router(BillingAppState {
        billing,
        webhook_secret,
    }));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    info!(addr = %config.server.bind_addr, "agentvault listening");
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
