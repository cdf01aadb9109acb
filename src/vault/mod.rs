//! Encrypted credential vault.
//!
//! Stores per-user, per-agent, per-platform secrets (API keys, basic-auth
//! pairs, bearer tokens, OAuth token sets) encrypted at rest with
//! AES-256-GCM, backed by SQLite. Decryption happens only in-process, on
//! demand; plaintext secrets are never persisted or logged.
//!
//! # Security
//!
//! - Every blob carries its own IV and authentication tag, freshly
//!   generated per write and never reused across records
//! - OAuth access and refresh tokens are encrypted independently so one
//!   can be rotated without re-encrypting the other
//! - Master key (64 hex chars = 32 bytes) lives in memory only, loaded
//!   from `AGENTVAULT_ENCRYPTION_KEY`
//! - Tampering with any stored component fails decryption loudly

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

mod encryption;
mod oauth;
mod store;

pub use encryption::{decrypt, encrypt, validate_key, EncryptedBlob};
pub use oauth::{needs_refresh, refresh_access_token, RefreshError, TokenResponse};
pub use store::CredentialStore;

/// Classification of a stored credential.
///
/// A (user, agent, platform) triple has exactly one record regardless of
/// type; saving a different type for the same triple replaces the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    ApiKey,
    BasicAuth,
    BearerToken,
    Oauth2,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::ApiKey => "api_key",
            CredentialType::BasicAuth => "basic_auth",
            CredentialType::BearerToken => "bearer_token",
            CredentialType::Oauth2 => "oauth2",
        }
    }

    pub fn parse(s: &str) -> Option<CredentialType> {
        match s {
            "api_key" => Some(CredentialType::ApiKey),
            "basic_auth" => Some(CredentialType::BasicAuth),
            "bearer_token" => Some(CredentialType::BearerToken),
            "oauth2" => Some(CredentialType::Oauth2),
            _ => None,
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token set accepted from an OAuth provider (connect callback or refresh
/// response). `expires_in` is relative seconds; the absolute expiry is
/// always computed server-side at write time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

/// Decrypted OAuth credential set as returned from the vault.
#[derive(Clone, Debug)]
pub struct StoredOAuthCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Decrypted simple (API-key / basic-auth / bearer) credential set.
#[derive(Clone, Debug)]
pub struct SimpleCredentials {
    pub fields: HashMap<String, String>,
    pub metadata: Option<serde_json::Value>,
}

/// A decrypted credential of either shape, as handed to the execution
/// layer for secret injection.
#[derive(Clone, Debug)]
pub enum DecryptedCredential {
    Simple(SimpleCredentials),
    OAuth(StoredOAuthCredentials),
}

/// Status metadata for one stored record. Returned without attempting
/// decryption, so it is safe to list inactive or corrupt records.
#[derive(Clone, Debug, Serialize)]
pub struct CredentialSummary {
    pub platform: String,
    pub credential_type: CredentialType,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
