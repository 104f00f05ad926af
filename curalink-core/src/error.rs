//! Error taxonomy for the request pipeline.
//!
//! Two layers:
//! - [`AuthError`] - failures while establishing or refreshing a
//!   session, produced by the session manager
//! - [`NetworkError`] - the typed outcomes a caller of the request
//!   executor can observe

use thiserror::Error;

use crate::store::StoreError;

/// Authentication failures from the session layer.
///
/// `Clone` because a single in-flight refresh hands the same outcome to
/// every caller that joined it; variants therefore carry messages, not
/// source errors.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No usable credential exists and none can be minted without an
    /// interactive login.
    #[error("authentication required: {message}")]
    AuthenticationFailed { message: String },

    /// The backend rejected the refresh token.
    #[error("refresh rejected: {message}")]
    RefreshRejected { message: String },

    /// The backend could not be reached while authenticating.
    #[error("network failure during authentication: {message}")]
    Transport { message: String },

    /// An auth endpoint returned a payload this client cannot use.
    #[error("invalid auth response: {message}")]
    InvalidResponse { message: String },

    /// Token persistence failed.
    #[error("token store failure: {message}")]
    Store { message: String },
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Store {
            message: err.to_string(),
        }
    }
}

/// Typed outcome of a pipeline request.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The request path could not be resolved against the base URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The request could not be constructed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response could not be read.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The response body did not match the expected shape.
    #[error("response decoding failed: {0}")]
    Decoding(String),

    /// Terminal non-success status from the backend, with the `detail`
    /// message its error bodies carry when present.
    #[error("server error ({status}): {detail}")]
    ServerError { status: u16, detail: String },

    /// The session layer could not produce a usable credential.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(#[from] AuthError),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The backend could not be reached at all.
    #[error("no network connectivity")]
    NoConnection,

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl NetworkError {
    /// Classify a transport-level failure into the pipeline taxonomy.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::Timeout
        } else if err.is_connect() {
            NetworkError::NoConnection
        } else if err.is_builder() {
            NetworkError::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            NetworkError::InvalidResponse(err.to_string())
        } else {
            NetworkError::Transport(err.to_string())
        }
    }

    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, NetworkError::Timeout | NetworkError::NoConnection)
    }
}

/// Extract the `detail` field backend error bodies usually carry.
pub(crate) fn detail_from_body(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()?
        .get("detail")?
        .as_str()
        .map(str::to_string)
}
