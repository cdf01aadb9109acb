//! Credential save / disconnect / summary endpoints.
//!
//! This is the only write path into the vault from the outside. Input is
//! validated against the platform definition before anything is
//! encrypted, and logs record the shape of a request (platform, field
//! names) but never field values.

use crate::api::{extract_user_id, AppError};
use crate::platforms;
use crate::requirements::{check_requirements, RequirementCheck};
use crate::vault::{CredentialStore, CredentialSummary, CredentialType};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared application state for the credential API
#[derive(Clone)]
pub struct CredentialAppState {
    pub store: Arc<CredentialStore>,
    pub auth_enabled: bool,
}

/// Request body for POST /api/agents/:agent_id/credentials/:platform
#[derive(Deserialize)]
pub struct SaveCredentialsRequest {
    #[serde(default)]
    pub credentials: Option<HashMap<String, String>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub disconnect: bool,
}

#[derive(Serialize)]
pub struct SaveCredentialsResponse {
    pub success: bool,
}

#[derive(Serialize)]
pub struct ListCredentialsResponse {
    pub credentials: Vec<CredentialSummary>,
}

#[derive(Deserialize)]
pub struct RequirementsQuery {
    /// Comma-separated platform slugs the agent declares as required
    #[serde(default)]
    pub required: String,
}

/// Create the credential API router
pub fn create_credential_router(state: CredentialAppState) -> Router {
    Router::new()
        .route("/api/agents/:agent_id/credentials", get(list_credentials))
        .route(
            "/api/agents/:agent_id/credentials/:platform",
            post(save_credentials).delete(delete_credential),
        )
        .route(
            "/api/agents/:agent_id/requirements",
            get(check_agent_requirements),
        )
        .with_state(Arc::new(state))
}

fn caller_user_id(state: &CredentialAppState, headers: &HeaderMap) -> Result<String, AppError> {
    if state.auth_enabled {
        extract_user_id(headers)
    } else {
        Ok("default".to_string())
    }
}

/// POST /api/agents/:agent_id/credentials/:platform
///
/// Saves a field-based credential set for the platform, or deactivates
/// the stored one when `disconnect` is true. OAuth2 platforms are
/// connected through the OAuth callback flow, not this endpoint.
async fn save_credentials(
    State(state): State<Arc<CredentialAppState>>,
    headers: HeaderMap,
    Path((agent_id, platform)): Path<(String, String)>,
    Json(body): Json<SaveCredentialsRequest>,
) -> Result<Json<SaveCredentialsResponse>, AppError> {
    let user_id = caller_user_id(&state, &headers)?;

    if !platforms::is_valid_slug(&platform) {
        return Err(AppError::BadRequest(format!(
            "Invalid platform slug '{}'",
            platform
        )));
    }

    let def = platforms::get_platform(&platform)
        .ok_or_else(|| AppError::NotFound(format!("Unknown platform '{}'", platform)))?;

    if body.disconnect {
        let deactivated = state
            .store
            .deactivate(&user_id, &agent_id, &platform)
            .map_err(|e| {
                warn!(error = %e, "Failed to deactivate credential");
                AppError::InternalServerError("Failed to disconnect credential".to_string())
            })?;

        if !deactivated {
            return Err(AppError::NotFound(format!(
                "No connected credential for platform '{}'",
                platform
            )));
        }

        info!(agent = %agent_id, platform = %platform, "Credential disconnected");
        return Ok(Json(SaveCredentialsResponse { success: true }));
    }

    if def.credential_type == CredentialType::Oauth2 {
        return Err(AppError::BadRequest(format!(
            "Platform '{}' connects via OAuth, not saved credentials",
            platform
        )));
    }

    let fields = body
        .credentials
        .ok_or_else(|| AppError::BadRequest("Missing 'credentials' object".to_string()))?;

    platforms::validate_fields(&def, &fields)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    // Light normalization at the call site; the vault stores fields as
    // given
    let fields: HashMap<String, String> = fields
        .into_iter()
        .map(|(name, value)| (name, value.trim().to_string()))
        .collect();

    // Shape only: field names, never values
    let field_names: Vec<&String> = fields.keys().collect();
    debug!(
        agent = %agent_id,
        platform = %platform,
        fields = ?field_names,
        "Saving credentials"
    );

    state
        .store
        .store_simple(
            &user_id,
            &agent_id,
            &platform,
            &fields,
            def.credential_type,
            body.metadata.as_ref(),
        )
        .map_err(|e| {
            warn!(error = %e, "Failed to store credentials");
            AppError::InternalServerError("Failed to store credentials".to_string())
        })?;

    info!(agent = %agent_id, platform = %platform, "Credentials stored");
    Ok(Json(SaveCredentialsResponse { success: true }))
}

/// GET /api/agents/:agent_id/credentials
///
/// Lists status metadata for the caller's credentials under the agent.
/// No decryption happens; inactive records are included so the UI can
/// distinguish "disconnected" from "never connected".
async fn list_credentials(
    State(state): State<Arc<CredentialAppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> Result<Json<ListCredentialsResponse>, AppError> {
    let user_id = caller_user_id(&state, &headers)?;

    let credentials = state
        .store
        .list_summaries(&user_id, &agent_id)
        .map_err(|e| {
            warn!(error = %e, "Failed to list credential summaries");
            AppError::InternalServerError("Failed to list credentials".to_string())
        })?;

    Ok(Json(ListCredentialsResponse { credentials }))
}

/// DELETE /api/agents/:agent_id/credentials/:platform
///
/// Permanently removes the stored record. Irreversible; normal
/// disconnect goes through the save endpoint with `disconnect: true`.
async fn delete_credential(
    State(state): State<Arc<CredentialAppState>>,
    headers: HeaderMap,
    Path((agent_id, platform)): Path<(String, String)>,
) -> Result<Json<SaveCredentialsResponse>, AppError> {
    let user_id = caller_user_id(&state, &headers)?;

    let deleted = state
        .store
        .delete(&user_id, &agent_id, &platform)
        .map_err(|e| {
            warn!(error = %e, "Failed to delete credential");
            AppError::InternalServerError("Failed to delete credential".to_string())
        })?;

    if !deleted {
        return Err(AppError::NotFound(format!(
            "No credential found for platform '{}'",
            platform
        )));
    }

    info!(agent = %agent_id, platform = %platform, "Credential permanently deleted");
    Ok(Json(SaveCredentialsResponse { success: true }))
}

/// GET /api/agents/:agent_id/requirements?required=a,b,c
///
/// Reports which of the agent's declared platforms the caller has not
/// connected. The declared list comes from the execution layer, which
/// owns agent definitions.
async fn check_agent_requirements(
    State(state): State<Arc<CredentialAppState>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Query(query): Query<RequirementsQuery>,
) -> Result<Json<RequirementCheck>, AppError> {
    let user_id = caller_user_id(&state, &headers)?;

    let required: Vec<String> = query
        .required
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    for slug in &required {
        if !platforms::is_valid_slug(slug) {
            return Err(AppError::BadRequest(format!(
                "Invalid platform slug '{}'",
                slug
            )));
        }
    }

    let check = check_requirements(&state.store, &user_id, &agent_id, &required).map_err(|e| {
        warn!(error = %e, "Requirement check failed");
        AppError::InternalServerError("Failed to check requirements".to_string())
    })?;

    Ok(Json(check))
}
