//! Domain model types for the Curalink client core.
//!
//! This module defines the types shared across the pipeline:
//! - [`Role`] - Credential partition, patient or doctor
//! - [`UserProfile`] - Account identity returned by the login endpoints

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Credential partition for the two product roles.
///
/// Exactly one role is *active* in the UI at a time, but both roles may
/// hold valid, independently stored credentials at the same time.
///
/// # Examples
///
/// ```
/// use curalink_core::Role;
///
/// let role: Role = "doctor".parse().unwrap();
/// assert_eq!(role, Role::Doctor);
/// assert_eq!(role.access_token_key(), "doctor_auth_token");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
}

impl Role {
    /// All roles, in a fixed order.
    ///
    /// Useful for exhaustive sweeps such as logout-everywhere or cache
    /// invalidation.
    pub const ALL: [Role; 2] = [Role::Patient, Role::Doctor];

    /// Stable string form used in wire payloads and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
        }
    }

    /// Keyring entry name holding this role's access token.
    pub fn access_token_key(&self) -> &'static str {
        match self {
            Role::Patient => "patient_auth_token",
            Role::Doctor => "doctor_auth_token",
        }
    }

    /// Keyring entry name holding this role's refresh token.
    pub fn refresh_token_key(&self) -> &'static str {
        match self {
            Role::Patient => "patient_refresh_token",
            Role::Doctor => "doctor_refresh_token",
        }
    }

    /// Parse the `user_type` field reported by the auth endpoints.
    ///
    /// Returns `None` for values this client does not know, so callers
    /// can reject a grant instead of storing it under the wrong role.
    pub fn from_user_type(value: &str) -> Option<Role> {
        match value.to_ascii_lowercase().as_str() {
            "patient" => Some(Role::Patient),
            "doctor" => Some(Role::Doctor),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::from_user_type(s).ok_or_else(|| format!("unknown role: {s}"))
    }
}

/// Identity of a signed-in user as reported by the login endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Backend identifier for the account.
    pub id: String,

    /// Email address the account was registered with.
    pub email: String,

    /// Display name, when the backend has one.
    #[serde(default)]
    pub full_name: Option<String>,
}
