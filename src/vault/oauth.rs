//! OAuth2 refresh-on-demand.
//!
//! Callers check [`needs_refresh`] before handing an access token to an
//! outbound workflow call and invoke [`refresh_access_token`] when it is
//! about to lapse. Refresh is read-modify-write without in-process mutual
//! exclusion; concurrent refreshes for the same triple resolve
//! last-writer-wins at the store (callers integrating providers that
//! rotate refresh tokens should serialize attempts per triple).

use super::{CredentialStore, OAuthTokens, StoredOAuthCredentials};
use crate::platforms::OAuthEndpoint;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Tokens expiring within this window count as needing refresh, so a
/// token cannot lapse mid-flight during the outbound workflow call.
const REFRESH_BUFFER_SECONDS: i64 = 300;

/// Standard OAuth 2.0 token endpoint response.
#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Why a refresh attempt failed.
///
/// `NotConnected` and `NoRefreshToken` are terminal: the user must
/// reconnect the platform. `Upstream` carries provider diagnostics and is
/// not retried automatically; repeated blind retries risk provider-side
/// rate limiting or refresh-token lockout.
#[derive(Debug)]
pub enum RefreshError {
    /// No active OAuth2 credential exists for the triple
    NotConnected,
    /// Credential exists but holds no refresh token
    NoRefreshToken,
    /// Provider returned a non-2xx response
    Upstream { status: u16, body: String },
    /// Storage, crypto, or transport failure on our side
    Internal(anyhow::Error),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshError::NotConnected => {
                write!(f, "No connected OAuth credential; reconnect required")
            }
            RefreshError::NoRefreshToken => {
                write!(f, "Stored credential has no refresh token; reconnect required")
            }
            RefreshError::Upstream { status, body } => {
                write!(f, "Token refresh rejected upstream (status {}): {}", status, body)
            }
            RefreshError::Internal(e) => write!(f, "Token refresh failed: {}", e),
        }
    }
}

impl std::error::Error for RefreshError {}

/// True iff the credential has a known expiry inside the refresh buffer.
///
/// An unset expiry reads as "not expiring"; callers should still treat an
/// auth failure on the outbound call as a refresh trigger in that case.
pub fn needs_refresh(credentials: &StoredOAuthCredentials) -> bool {
    match credentials.expires_at {
        Some(expires_at) => expires_at < Utc::now() + Duration::seconds(REFRESH_BUFFER_SECONDS),
        None => false,
    }
}

/// Refreshes the access token for a (user, agent, platform) triple against
/// the platform's token endpoint and stores the result.
///
/// Prior metadata on the record is preserved. If the provider omits a new
/// refresh token, the stored one is kept; providers that rotate refresh
/// tokens return a replacement.
pub async fn refresh_access_token(
    store: &CredentialStore,
    user_id: &str,
    agent_id: &str,
    platform: &str,
    endpoint: &OAuthEndpoint,
) -> Result<OAuthTokens, RefreshError> {
    let current = store
        .retrieve_oauth(user_id, agent_id, platform)
        .map_err(RefreshError::Internal)?
        .ok_or(RefreshError::NotConnected)?;

    let refresh_token = current
        .refresh_token
        .clone()
        .ok_or(RefreshError::NoRefreshToken)?;

    let mut form_data = HashMap::new();
    form_data.insert("grant_type", "refresh_token");
    form_data.insert("refresh_token", refresh_token.as_str());
    form_data.insert("client_id", endpoint.client_id.as_str());
    form_data.insert("client_secret", endpoint.client_secret.as_str());

    debug!(platform = %platform, "Refreshing OAuth access token");

    let client = reqwest::Client::new();
    let response = client
        .post(&endpoint.token_url)
        .header("Accept", "application/json")
        .form(&form_data)
        .send()
        .await
        .map_err(|e| RefreshError::Internal(e.into()))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!(platform = %platform, status = status, "OAuth refresh rejected upstream");
        return Err(RefreshError::Upstream { status, body });
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| RefreshError::Internal(e.into()))?;

    debug!(
        platform = %platform,
        rotated_refresh_token = token_response.refresh_token.is_some(),
        expires_in = ?token_response.expires_in,
        "OAuth refresh successful"
    );

    let tokens = OAuthTokens {
        access_token: token_response.access_token,
        // Keep the old refresh token unless the provider rotated it
        refresh_token: token_response.refresh_token.or(Some(refresh_token)),
        expires_in: token_response.expires_in,
        scope: token_response.scope.or(current.scope),
    };

    // Metadata passed as None so the record's prior metadata survives
    store
        .store_oauth(user_id, agent_id, platform, &tokens, None)
        .map_err(RefreshError::Internal)?;

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(expires_at: Option<chrono::DateTime<Utc>>) -> StoredOAuthCredentials {
        StoredOAuthCredentials {
            access_token: "A".to_string(),
            refresh_token: Some("R".to_string()),
            expires_at,
            scope: None,
            metadata: None,
        }
    }

    #[test]
    fn test_needs_refresh_expired() {
        let creds = stored(Some(Utc::now() - Duration::seconds(10)));
        assert!(needs_refresh(&creds));
    }

    #[test]
    fn test_needs_refresh_inside_buffer() {
        // Expires in 2 minutes, buffer is 5 — refresh now
        let creds = stored(Some(Utc::now() + Duration::seconds(120)));
        assert!(needs_refresh(&creds));
    }

    #[test]
    fn test_needs_refresh_outside_buffer() {
        let creds = stored(Some(Utc::now() + Duration::seconds(3600)));
        assert!(!needs_refresh(&creds));
    }

    #[test]
    fn test_needs_refresh_unset_expiry() {
        assert!(!needs_refresh(&stored(None)));
    }

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "A2",
            "refresh_token": "R2",
            "expires_in": 3600,
            "scope": "read write"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "A2");
        assert_eq!(response.refresh_token, Some("R2".to_string()));
        assert_eq!(response.expires_in, Some(3600));
        assert_eq!(response.scope, Some("read write".to_string()));
    }

    #[test]
    fn test_token_response_minimal() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "only"}"#).unwrap();
        assert_eq!(response.access_token, "only");
        assert!(response.refresh_token.is_none());
        assert!(response.expires_in.is_none());
    }
}
