//! Requirement checker.
//!
//! Compares an agent's declared required platforms against the user's
//! active credentials. Pure read with no side effects, so it is safe to
//! call before every execution attempt; credential state can change
//! between calls (mid-session disconnect), so results are never cached.

use crate::vault::CredentialStore;
use anyhow::Result;
use serde::Serialize;

/// Outcome of a requirement check.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RequirementCheck {
    pub has_all: bool,
    pub missing: Vec<String>,
    pub required: Vec<String>,
}

/// Reports which of the agent's required platforms the user has not
/// connected. An empty required list is trivially satisfied.
pub fn check_requirements(
    store: &CredentialStore,
    user_id: &str,
    agent_id: &str,
    required: &[String],
) -> Result<RequirementCheck> {
    if required.is_empty() {
        return Ok(RequirementCheck {
            has_all: true,
            missing: vec![],
            required: vec![],
        });
    }

    let connected = store.active_platforms(user_id, agent_id)?;

    let missing: Vec<String> = required
        .iter()
        .filter(|platform| !connected.contains(platform))
        .cloned()
        .collect();

    Ok(RequirementCheck {
        has_all: missing.is_empty(),
        missing,
        required: required.to_vec(),
    })
}
