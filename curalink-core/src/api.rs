//! Backend auth API client.
//!
//! Thin client for the endpoints that establish or extend a session:
//! password login, OTP verification, Google sign-in verification, and
//! token refresh. Business endpoints go through the request executor
//! instead; this client exists because auth calls run *underneath* the
//! executor's authentication step and must not recurse into it.

use chrono::Utc;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{detail_from_body, AuthError, NetworkError};
use crate::model::{Role, UserProfile};
use crate::sign::RequestSigner;
use crate::store::Secret;
use crate::token::TokenRecord;

/// Token material issued by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Rotated refresh token. Absent when the backend keeps the
    /// previous one valid.
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_type: String,
    /// Which role this grant belongs to, `patient` or `doctor`.
    pub user_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

impl TokenGrant {
    /// Materialize a storable record from this grant.
    ///
    /// The expiry is fixed here, at mint time: issue time plus the
    /// server-reported lifetime minus the safety margin. Every later
    /// validation is then a plain clock comparison. A lifetime shorter
    /// than the margin is stored unmargined; otherwise the record would
    /// be born expired and refresh itself in a loop.
    pub fn into_record(
        self,
        role: Role,
        environment: &str,
        safety_margin: chrono::Duration,
    ) -> TokenRecord {
        let issued_at = Utc::now();
        let lifetime = chrono::Duration::seconds(self.expires_in);
        let margin = if lifetime > safety_margin {
            safety_margin
        } else {
            chrono::Duration::zero()
        };
        TokenRecord {
            role,
            access_token: Secret::new(self.access_token),
            refresh_token: self.refresh_token.map(Secret::new),
            token_type: self.token_type,
            issued_at,
            expires_at: Some(issued_at + lifetime - margin),
            environment: Some(environment.to_string()),
        }
    }
}

/// Response of the role-establishing login endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub tokens: TokenGrant,
    pub user: UserProfile,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct PasswordLoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct OtpVerifyRequest<'a> {
    email: &'a str,
    code: &'a str,
}

#[derive(Serialize)]
struct GoogleVerifyRequest<'a> {
    id_token: &'a str,
}

/// Client for the auth endpoints.
pub struct AuthApi {
    http: reqwest::Client,
    config: Arc<ApiConfig>,
    signer: RequestSigner,
}

impl AuthApi {
    pub fn new(config: Arc<ApiConfig>, signer: RequestSigner) -> Result<Self, NetworkError> {
        let http = config.build_http_client()?;
        Ok(Self {
            http,
            config,
            signer,
        })
    }

    /// Exchange a refresh token for a new grant.
    pub async fn refresh(&self, refresh_token: &Secret) -> Result<TokenGrant, AuthError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.expose(),
        };
        let (status, bytes) = self.post_auth("/auth/refresh", &body).await?;

        if status.is_success() {
            return parse_json(&bytes);
        }
        let detail = detail_from_body(&bytes)
            .unwrap_or_else(|| format!("refresh failed with status {}", status.as_u16()));
        if status.is_client_error() {
            Err(AuthError::RefreshRejected { message: detail })
        } else {
            Err(AuthError::Transport { message: detail })
        }
    }

    /// Log in with email and password.
    pub async fn login_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<LoginResponse, AuthError> {
        self.login("/auth/email/password", &PasswordLoginRequest { email, password })
            .await
    }

    /// Verify an emailed one-time code.
    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<LoginResponse, AuthError> {
        self.login("/auth/email/otp/verify", &OtpVerifyRequest { email, code })
            .await
    }

    /// Verify a Google sign-in token.
    pub async fn verify_google(&self, id_token: &str) -> Result<LoginResponse, AuthError> {
        self.login("/auth/google/verify", &GoogleVerifyRequest { id_token })
            .await
    }

    async fn login<B: Serialize>(&self, path: &str, body: &B) -> Result<LoginResponse, AuthError> {
        let (status, bytes) = self.post_auth(path, body).await?;

        if status.is_success() {
            return parse_json(&bytes);
        }
        let detail = detail_from_body(&bytes)
            .unwrap_or_else(|| format!("login failed with status {}", status.as_u16()));
        if status.is_client_error() {
            Err(AuthError::AuthenticationFailed { message: detail })
        } else {
            Err(AuthError::Transport { message: detail })
        }
    }

    /// Send one signed, unauthenticated POST and return the raw outcome.
    async fn post_auth<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(StatusCode, Vec<u8>), AuthError> {
        let url = self
            .config
            .endpoint(path)
            .map_err(|e| AuthError::Transport {
                message: e.to_string(),
            })?;
        let bytes = serde_json::to_vec(body).map_err(|e| AuthError::Transport {
            message: format!("serialize request: {e}"),
        })?;
        let headers = self
            .signer
            .build_headers("application/json", None, &bytes)
            .map_err(|e| AuthError::Transport {
                message: e.to_string(),
            })?;

        debug!(path, "auth request");
        let response = self
            .http
            .post(url)
            .headers(headers)
            .body(bytes)
            .send()
            .await
            .map_err(|e| AuthError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::InvalidResponse {
                message: format!("read body: {e}"),
            })?;
        debug!(path, status = status.as_u16(), "auth response");
        Ok((status, body.to_vec()))
    }
}

impl std::fmt::Debug for AuthApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthApi")
            .field("base_url", &self.config.base_url.as_str())
            .finish()
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, AuthError> {
    serde_json::from_slice(body).map_err(|e| AuthError::InvalidResponse {
        message: e.to_string(),
    })
}
