//! Request execution.
//!
//! [`RequestExecutor`] drives one logical API call end to end:
//! authentication, header construction and body signing, transport, and
//! classification of the outcome into [`NetworkError`]. Transient
//! failures are retried inside a single bounded loop; a caller sees
//! either a success or one terminal error, never the retries in
//! between.
//!
//! One retry budget covers the whole call. Authentication retries
//! (refresh after a 401) and availability retries (backoff after 5xx,
//! 408, 429, or a transport failure) draw from the same counter, so a
//! call makes at most `max_retries + 1` attempts no matter how the
//! failure modes interleave.

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{detail_from_body, NetworkError};
use crate::model::Role;
use crate::session::SessionManager;
use crate::sign::RequestSigner;

/// Everything needed to issue one logical API call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Absolute path on the backend, e.g. `/appointments`.
    pub path: String,
    pub method: Method,
    /// Serialized body bytes. These exact bytes are signed and sent.
    pub body: Option<Vec<u8>>,
    pub content_type: String,
    /// Whether the request carries a bearer token.
    pub requires_auth: bool,
    /// Role to authenticate as; `None` uses the session's active role.
    pub role: Option<Role>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            body: None,
            content_type: "application/json".to_string(),
            requires_auth: true,
            role: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON payload, serialized exactly once. The signature
    /// and the transmitted body both come from this buffer.
    pub fn json<T: Serialize>(mut self, payload: &T) -> Result<Self, NetworkError> {
        self.body = Some(
            serde_json::to_vec(payload)
                .map_err(|e| NetworkError::InvalidRequest(format!("serialize body: {e}")))?,
        );
        Ok(self)
    }

    /// Send without a bearer token.
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// Authenticate as an explicit role instead of the active one.
    pub fn for_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
}

/// Executes pipeline requests against the configured backend.
pub struct RequestExecutor {
    config: Arc<ApiConfig>,
    http: reqwest::Client,
    session: SessionManager,
    signer: RequestSigner,
    monitor: Arc<ConnectivityMonitor>,
}

impl RequestExecutor {
    pub fn new(
        config: Arc<ApiConfig>,
        session: SessionManager,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Self, NetworkError> {
        let http = config.build_http_client()?;
        let signer = RequestSigner::new(config.clone());
        Ok(Self {
            config,
            http,
            session,
            signer,
            monitor,
        })
    }

    /// Execute a request and return the raw response body.
    pub async fn execute(&self, ctx: RequestContext) -> Result<Vec<u8>, NetworkError> {
        let url = self.config.endpoint(&ctx.path)?;
        let role = ctx.role.unwrap_or_else(|| self.session.active_role());
        let body = ctx.body.clone().unwrap_or_default();

        // The budget lives on this stack frame: it cannot leak into
        // another call, and the loop below visibly terminates.
        let max_retries = self.config.retry.max_retries;
        let mut retries = 0u32;

        loop {
            if ctx.requires_auth {
                self.session.ensure_authenticated(role).await?;
            }
            let bearer = if ctx.requires_auth {
                Some(self.session.current_token(role).await?.authorization_header())
            } else {
                None
            };
            let headers = self
                .signer
                .build_headers(&ctx.content_type, bearer.as_deref(), &body)?;

            debug!(
                method = %ctx.method,
                path = %ctx.path,
                attempt = retries + 1,
                "sending request"
            );
            let sent = self
                .http
                .request(ctx.method.clone(), url.clone())
                .headers(headers)
                .body(body.clone())
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    let mapped = NetworkError::from_transport(err);
                    if matches!(mapped, NetworkError::NoConnection) {
                        self.monitor.mark_unreachable();
                        self.monitor.start();
                    }
                    if mapped.is_transient() && retries < max_retries {
                        retries += 1;
                        let delay = self.config.retry.backoff_for(retries);
                        warn!(
                            path = %ctx.path,
                            error = %mapped,
                            delay_ms = delay.as_millis() as u64,
                            "transport failure, backing off"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    return Err(mapped);
                }
            };

            let status = response.status();
            if status.is_success() {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| NetworkError::InvalidResponse(format!("read body: {e}")))?;
                if retries > 0 {
                    info!(path = %ctx.path, attempts = retries + 1, "request succeeded after retry");
                }
                return Ok(bytes.to_vec());
            }

            let error_body = response.bytes().await.unwrap_or_default();

            if status == StatusCode::UNAUTHORIZED && ctx.requires_auth && retries < max_retries {
                retries += 1;
                info!(
                    path = %ctx.path,
                    role = %role,
                    attempt = retries,
                    "401 received, rotating access token before retry"
                );
                self.session.invalidate_access_token(role).await?;
                sleep(self.config.retry.auth_retry_delay()).await;
                continue;
            }

            if is_retryable_status(status) && retries < max_retries {
                retries += 1;
                let delay = self.config.retry.backoff_for(retries);
                warn!(
                    path = %ctx.path,
                    status = status.as_u16(),
                    delay_ms = delay.as_millis() as u64,
                    "server unavailable, backing off"
                );
                sleep(delay).await;
                continue;
            }

            let detail =
                detail_from_body(&error_body).unwrap_or_else(|| "unknown".to_string());
            warn!(path = %ctx.path, status = status.as_u16(), detail = %detail, "request failed");
            return Err(NetworkError::ServerError {
                status: status.as_u16(),
                detail,
            });
        }
    }

    /// Execute a request and decode its JSON response.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        ctx: RequestContext,
    ) -> Result<T, NetworkError> {
        let body = self.execute(ctx).await?;
        serde_json::from_slice(&body)
            .map_err(|e| NetworkError::Decoding(format!("response body: {e}")))
    }

    /// The connectivity monitor this executor reports into.
    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.config.base_url.as_str())
            .finish()
    }
}

/// Statuses worth retrying with backoff: the server is there but
/// momentarily unable to answer.
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}
