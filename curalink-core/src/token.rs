//! Token records and expiry semantics.
//!
//! A [`TokenRecord`] is the unit of persistence: one complete
//! credential set for one role, together with the metadata needed to
//! decide locally whether the access token is still usable.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Role;
use crate::store::Secret;

/// A complete credential set for one role.
///
/// Expiry is resolved locally from `expires_at`; the pipeline never
/// waits for the server to reject a token it could have refreshed
/// proactively. `expires_at` is computed when the record is minted and
/// already includes the configured safety margin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Role this credential set belongs to.
    pub role: Role,

    /// Opaque bearer token presented on authenticated requests.
    pub access_token: Secret,

    /// Long-lived token used to mint new access tokens. Absent for
    /// grants the backend issued without one.
    pub refresh_token: Option<Secret>,

    /// Token type as reported by the backend, normally `bearer`.
    pub token_type: String,

    /// When this record was minted locally.
    pub issued_at: DateTime<Utc>,

    /// When the access token stops being usable, safety margin already
    /// applied. `None` means the expiry metadata was lost.
    pub expires_at: Option<DateTime<Utc>>,

    /// Backend environment that minted this record. `None` when the
    /// stored metadata predates environment tracking.
    pub environment: Option<String>,
}

impl TokenRecord {
    /// Create a record holding only an access token.
    pub fn new(role: Role, access_token: impl Into<Secret>) -> Self {
        Self {
            role,
            access_token: access_token.into(),
            refresh_token: None,
            token_type: "bearer".to_string(),
            issued_at: Utc::now(),
            expires_at: None,
            environment: None,
        }
    }

    /// Set the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<Secret>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set the expiry timestamp.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the backend environment tag.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Whether the access token must not be used any more.
    ///
    /// Fail-safe: a record whose expiry metadata is missing reports
    /// itself expired even though the access token is present, so an
    /// unreadable sidecar can never keep a stale token in circulation.
    pub fn is_expired(&self) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now(),
            None => true,
        }
    }

    /// Whether the access token expires within the given buffer.
    ///
    /// Like [`is_expired`](Self::is_expired), missing expiry metadata
    /// counts as expiring.
    pub fn expires_within(&self, buffer: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now() + buffer,
            None => true,
        }
    }

    /// Whether a refresh token is stored alongside the access token.
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token.expose())
    }

    /// Copy of this record with the access token dropped.
    ///
    /// The refresh token survives, and the missing expiry makes the
    /// record report itself expired, so the next validation refreshes
    /// instead of reusing a token the server already rejected.
    pub fn with_access_cleared(mut self) -> Self {
        self.access_token = Secret::new("");
        self.expires_at = None;
        self
    }
}
