//! Platform definition registry.
//!
//! Describes, per platform slug, which credential fields exist and what
//! credential type they imply. Read-only from the vault's perspective:
//! the save endpoint validates input against these definitions before
//! anything is encrypted, and the vault itself trusts validated input.

use crate::vault::CredentialType;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// One credential field a platform expects from the user.
#[derive(Clone, Debug, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub required: bool,
    /// Secret fields are masked in UI hints and never logged
    pub secret: bool,
}

/// Token endpoint configuration for an OAuth2 platform.
#[derive(Clone, Debug)]
pub struct OAuthEndpoint {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Definition of one integratable platform.
#[derive(Clone, Debug, Serialize)]
pub struct PlatformDefinition {
    pub slug: String,
    pub name: String,
    pub credential_type: CredentialType,
    pub fields: Vec<FieldSpec>,
    pub setup_hint: String,
}

/// Field-level input validation failure. Messages name the field, never
/// its value.
#[derive(Debug, PartialEq, Clone)]
pub enum ValidationError {
    /// Slug is not lowercase `[a-z0-9_]+`
    InvalidSlug(String),
    /// No definition exists for the slug
    UnknownPlatform(String),
    /// A required field is absent
    MissingField(String),
    /// A required field is present but blank
    BlankField(String),
    /// A field the platform does not declare
    UnknownField(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidSlug(slug) => {
                write!(f, "Invalid platform slug '{}'", slug)
            }
            ValidationError::UnknownPlatform(slug) => {
                write!(f, "Unknown platform '{}'", slug)
            }
            ValidationError::MissingField(field) => {
                write!(f, "Missing required field '{}'", field)
            }
            ValidationError::BlankField(field) => {
                write!(f, "Required field '{}' is blank", field)
            }
            ValidationError::UnknownField(field) => {
                write!(f, "Unexpected field '{}'", field)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Platforms the marketplace integrates with.
const SUPPORTED_PLATFORMS: &[&str] = &["openai", "anthropic", "wordpress", "notion", "google_docs"];

fn field(name: &str, label: &str, required: bool, secret: bool) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        label: label.to_string(),
        required,
        secret,
    }
}

/// Look up the definition for a platform slug.
pub fn get_platform(slug: &str) -> Option<PlatformDefinition> {
    let (name, credential_type, fields, setup_hint) = match slug {
        "openai" => (
            "OpenAI",
            CredentialType::ApiKey,
            vec![field("api_key", "API key", true, true)],
            "Create an API key under platform.openai.com and paste it here.",
        ),
        "anthropic" => (
            "Anthropic",
            CredentialType::ApiKey,
            vec![field("api_key", "API key", true, true)],
            "Create an API key in the Anthropic console and paste it here.",
        ),
        "wordpress" => (
            "WordPress",
            CredentialType::BasicAuth,
            vec![
                field("site_url", "Site URL", true, false),
                field("username", "Username", true, false),
                field("app_password", "Application password", true, true),
            ],
            "Generate an application password under Users > Profile on your site.",
        ),
        "notion" => (
            "Notion",
            CredentialType::Oauth2,
            vec![],
            "Connect your Notion workspace to authorize access.",
        ),
        "google_docs" => (
            "Google Docs",
            CredentialType::Oauth2,
            vec![],
            "Connect your Google account to authorize document access.",
        ),
        _ => return None,
    };

    Some(PlatformDefinition {
        slug: slug.to_string(),
        name: name.to_string(),
        credential_type,
        fields,
        setup_hint: setup_hint.to_string(),
    })
}

/// All known platform definitions, for UI listing.
pub fn all_platforms() -> Vec<PlatformDefinition> {
    SUPPORTED_PLATFORMS
        .iter()
        .filter_map(|slug| get_platform(slug))
        .collect()
}

/// Token endpoint for an OAuth2 platform.
///
/// Client id and secret come from `AGENTVAULT_OAUTH_<SLUG>_CLIENT_ID` /
/// `_CLIENT_SECRET`; returns `None` if either is unset or the platform
/// is not OAuth2.
pub fn oauth_endpoint(slug: &str) -> Option<OAuthEndpoint> {
    let token_url = match slug {
        "notion" => "https://api.notion.com/v1/oauth/token",
        "google_docs" => "https://oauth2.googleapis.com/token",
        _ => return None,
    };

    let env_prefix = slug.to_uppercase();
    let client_id = std::env::var(format!("AGENTVAULT_OAUTH_{}_CLIENT_ID", env_prefix)).ok()?;
    let client_secret =
        std::env::var(format!("AGENTVAULT_OAUTH_{}_CLIENT_SECRET", env_prefix)).ok()?;

    Some(OAuthEndpoint {
        token_url: token_url.to_string(),
        client_id,
        client_secret,
    })
}

/// Platform slugs are lowercase `[a-z0-9_]+`.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Validates a credential field map against a platform definition.
///
/// Every required field must be present with non-blank content, and no
/// field outside the definition is accepted. Values are never echoed in
/// the error.
pub fn validate_fields(
    def: &PlatformDefinition,
    fields: &HashMap<String, String>,
) -> Result<(), ValidationError> {
    for spec in &def.fields {
        match fields.get(&spec.name) {
            None if spec.required => return Err(ValidationError::MissingField(spec.name.clone())),
            Some(value) if spec.required && value.trim().is_empty() => {
                return Err(ValidationError::BlankField(spec.name.clone()))
            }
            _ => {}
        }
    }

    for name in fields.keys() {
        if !def.fields.iter().any(|spec| &spec.name == name) {
            return Err(ValidationError::UnknownField(name.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_platforms() {
        for slug in SUPPORTED_PLATFORMS {
            let def = get_platform(slug).expect("missing definition");
            assert_eq!(&def.slug, slug);
        }
        assert!(get_platform("myspace").is_none());
        assert_eq!(all_platforms().len(), SUPPORTED_PLATFORMS.len());
    }

    #[test]
    fn test_slug_validation() {
        assert!(is_valid_slug("openai"));
        assert!(is_valid_slug("google_docs"));
        assert!(is_valid_slug("s3"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("OpenAI"));
        assert!(!is_valid_slug("google-docs"));
        assert!(!is_valid_slug("a b"));
    }

    #[test]
    fn test_validate_fields_ok() {
        let def = get_platform("openai").unwrap();
        let mut fields = HashMap::new();
        fields.insert("api_key".to_string(), "sk-test-123".to_string());
        assert!(validate_fields(&def, &fields).is_ok());
    }

    #[test]
    fn test_validate_missing_field() {
        let def = get_platform("wordpress").unwrap();
        let mut fields = HashMap::new();
        fields.insert("site_url".to_string(), "https://example.com".to_string());
        fields.insert("username".to_string(), "admin".to_string());

        let err = validate_fields(&def, &fields).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("app_password".to_string()));
        // Message names the field, not any value
        assert!(err.to_string().contains("app_password"));
        assert!(!err.to_string().contains("example.com"));
    }

    #[test]
    fn test_validate_blank_field() {
        let def = get_platform("openai").unwrap();
        let mut fields = HashMap::new();
        fields.insert("api_key".to_string(), "   ".to_string());

        assert_eq!(
            validate_fields(&def, &fields).unwrap_err(),
            ValidationError::BlankField("api_key".to_string())
        );
    }

    #[test]
    fn test_validate_unknown_field() {
        let def = get_platform("openai").unwrap();
        let mut fields = HashMap::new();
        fields.insert("api_key".to_string(), "sk-1".to_string());
        fields.insert("organization".to_string(), "org-1".to_string());

        assert_eq!(
            validate_fields(&def, &fields).unwrap_err(),
            ValidationError::UnknownField("organization".to_string())
        );
    }

    #[test]
    fn test_oauth_endpoint_requires_env() {
        // Not an oauth platform
        assert!(oauth_endpoint("openai").is_none());
    }
}
