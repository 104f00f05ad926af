//! Session management.
//!
//! [`SessionManager`] owns every credential mutation in the process:
//! it validates stored records, refreshes them proactively, installs
//! login grants, and tears sessions down. Nothing else writes to the
//! token store or cache, which is what keeps the store-then-cache
//! update order a real invariant rather than a convention.
//!
//! Concurrent refresh attempts for a role collapse into one backend
//! call. The winner parks a [`Shared`] future in the role's slot and
//! runs the refresh on a detached task; every later caller awaits a
//! clone of that future, so one rotation happens and all callers see
//! its outcome, even if the caller that started it is cancelled.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{AuthApi, LoginResponse};
use crate::cache::TokenCache;
use crate::config::ApiConfig;
use crate::error::{AuthError, NetworkError};
use crate::model::{Role, UserProfile};
use crate::sign::RequestSigner;
use crate::store::TokenStore;
use crate::token::TokenRecord;

/// Authentication state of one role, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No usable credential is known for the role.
    Unauthenticated,
    /// A stored token was valid at the last check.
    Valid,
    /// A refresh call is in flight.
    Refreshing,
    /// The last attempt ended without a usable credential; only an
    /// interactive login leaves this state.
    Failed,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Valid => "valid",
            AuthState::Refreshing => "refreshing",
            AuthState::Failed => "failed",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<TokenRecord, AuthError>>>;

struct SessionInner {
    config: Arc<ApiConfig>,
    api: AuthApi,
    store: Arc<dyn TokenStore>,
    cache: TokenCache,
    states: RwLock<HashMap<Role, AuthState>>,
    active_role: RwLock<Role>,
    patient_refresh: Mutex<Option<SharedRefresh>>,
    doctor_refresh: Mutex<Option<SharedRefresh>>,
}

/// Manages credentials for both roles. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create a session manager over the given store.
    pub fn new(config: Arc<ApiConfig>, store: Arc<dyn TokenStore>) -> Result<Self, NetworkError> {
        let signer = RequestSigner::new(config.clone());
        let api = AuthApi::new(config.clone(), signer)?;
        let cache = TokenCache::new(store.clone(), config.cache_ttl());
        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                api,
                store,
                cache,
                states: RwLock::new(HashMap::new()),
                active_role: RwLock::new(Role::Patient),
                patient_refresh: Mutex::new(None),
                doctor_refresh: Mutex::new(None),
            }),
        })
    }

    /// Make sure the role holds a valid access token, refreshing it if
    /// the stored one has expired.
    ///
    /// Succeeds without any network traffic when the stored token is
    /// still fresh. Fails with [`AuthError::AuthenticationFailed`] when
    /// nothing refreshable is stored; only an interactive login
    /// recovers from that.
    pub async fn ensure_authenticated(&self, role: Role) -> Result<(), AuthError> {
        match self.inner.usable_record(role).await? {
            Some(record) if !record.is_expired() => {
                self.inner.set_state(role, AuthState::Valid);
                debug!(role = %role, "stored access token is valid");
                Ok(())
            }
            Some(record) if record.has_refresh_token() => {
                let shared = self.inner.join_refresh(role, false).await;
                shared.await.map(|_| ())
            }
            Some(_) => {
                warn!(role = %role, "stored token expired with no refresh token");
                self.inner.clear_role(role).await?;
                self.inner.set_state(role, AuthState::Failed);
                Err(AuthError::AuthenticationFailed {
                    message: format!(
                        "stored {role} token expired with no refresh token; interactive login required"
                    ),
                })
            }
            None => {
                self.inner.set_state(role, AuthState::Failed);
                Err(AuthError::AuthenticationFailed {
                    message: format!("no stored credentials for {role}; interactive login required"),
                })
            }
        }
    }

    /// Force a refresh for the role, joining one already in flight.
    pub async fn refresh(&self, role: Role) -> Result<TokenRecord, AuthError> {
        let shared = self.inner.join_refresh(role, true).await;
        shared.await
    }

    /// The record whose access token a request should present.
    ///
    /// Never performs network I/O; call
    /// [`ensure_authenticated`](Self::ensure_authenticated) first.
    pub async fn current_token(&self, role: Role) -> Result<TokenRecord, AuthError> {
        match self.inner.usable_record(role).await? {
            Some(record) if !record.is_expired() => Ok(record),
            _ => Err(AuthError::AuthenticationFailed {
                message: format!("no valid access token for {role}"),
            }),
        }
    }

    /// Drop the role's access token while keeping its refresh token.
    ///
    /// Used after the backend rejects a request with 401: the next
    /// [`ensure_authenticated`](Self::ensure_authenticated) then mints
    /// a fresh access token instead of resending the rejected one.
    pub async fn invalidate_access_token(&self, role: Role) -> Result<(), AuthError> {
        let Some(record) = self.inner.cache.read(role).await.map_err(AuthError::from)? else {
            return Ok(());
        };
        let cleared = record.with_access_cleared();
        self.inner.store.put(&cleared).await.map_err(AuthError::from)?;
        self.inner.cache.write(&cleared);
        self.inner.set_state(role, AuthState::Unauthenticated);
        debug!(role = %role, "access token invalidated");
        Ok(())
    }

    /// Log in with email and password.
    pub async fn login_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, AuthError> {
        let response = self.inner.api.login_password(email, password).await?;
        self.inner.install_session(response).await
    }

    /// Complete an email one-time-code login.
    pub async fn login_with_otp(&self, email: &str, code: &str) -> Result<UserProfile, AuthError> {
        let response = self.inner.api.verify_otp(email, code).await?;
        self.inner.install_session(response).await
    }

    /// Complete a Google sign-in.
    pub async fn login_with_google(&self, id_token: &str) -> Result<UserProfile, AuthError> {
        let response = self.inner.api.verify_google(id_token).await?;
        self.inner.install_session(response).await
    }

    /// Discard the stored credentials of one role.
    pub async fn logout(&self, role: Role) -> Result<(), AuthError> {
        self.inner.clear_role(role).await?;
        self.inner.set_state(role, AuthState::Unauthenticated);
        info!(role = %role, "logged out");
        Ok(())
    }

    /// Discard the stored credentials of every role.
    pub async fn reset(&self) -> Result<(), AuthError> {
        self.inner.store.clear_all().await.map_err(AuthError::from)?;
        self.inner.cache.invalidate_all();
        for role in Role::ALL {
            self.inner.set_state(role, AuthState::Unauthenticated);
        }
        info!("session state reset");
        Ok(())
    }

    /// The role requests run as when no explicit role is given.
    pub fn active_role(&self) -> Role {
        *self.inner.active_role.read()
    }

    /// Switch the active role. Cached token reads do not survive the
    /// switch.
    pub fn switch_role(&self, role: Role) {
        let previous = {
            let mut active = self.inner.active_role.write();
            std::mem::replace(&mut *active, role)
        };
        self.inner.cache.invalidate_all();
        if previous != role {
            info!(from = %previous, to = %role, "active role switched");
        }
    }

    /// Last observed authentication state of a role.
    pub fn auth_state(&self, role: Role) -> AuthState {
        self.inner
            .states
            .read()
            .get(&role)
            .copied()
            .unwrap_or(AuthState::Unauthenticated)
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("active_role", &*self.inner.active_role.read())
            .finish()
    }
}

impl SessionInner {
    fn refresh_slot(&self, role: Role) -> &Mutex<Option<SharedRefresh>> {
        match role {
            Role::Patient => &self.patient_refresh,
            Role::Doctor => &self.doctor_refresh,
        }
    }

    /// Join the in-flight refresh for a role, or start one.
    async fn join_refresh(self: &Arc<Self>, role: Role, force: bool) -> SharedRefresh {
        let mut slot = self.refresh_slot(role).lock().await;
        if let Some(in_flight) = slot.as_ref() {
            debug!(role = %role, "joining in-flight token refresh");
            return in_flight.clone();
        }
        self.set_state(role, AuthState::Refreshing);
        let shared = self.spawn_refresh(role, force);
        *slot = Some(shared.clone());
        shared
    }

    /// Run the refresh on its own task so no caller's cancellation can
    /// abort it for the callers still waiting.
    fn spawn_refresh(self: &Arc<Self>, role: Role, force: bool) -> SharedRefresh {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = inner.perform_refresh(role, force).await;
            *inner.refresh_slot(role).lock().await = None;
            outcome
        });
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(err) => Err(AuthError::Transport {
                    message: format!("refresh task failed: {err}"),
                }),
            }
        }
        .boxed()
        .shared()
    }

    async fn perform_refresh(&self, role: Role, force: bool) -> Result<TokenRecord, AuthError> {
        // Re-read after winning the slot: a concurrent login or an
        // earlier refresh may have rotated the record already.
        let current = match self.usable_record(role).await? {
            Some(record) => record,
            None => {
                self.set_state(role, AuthState::Unauthenticated);
                return Err(AuthError::AuthenticationFailed {
                    message: format!("no stored credentials for {role}"),
                });
            }
        };
        if !force && !current.is_expired() {
            debug!(role = %role, "token already fresh, skipping refresh");
            self.set_state(role, AuthState::Valid);
            return Ok(current);
        }
        let Some(refresh_token) = current.refresh_token.clone() else {
            self.set_state(role, AuthState::Failed);
            return Err(AuthError::AuthenticationFailed {
                message: format!(
                    "stored {role} token has no refresh token; interactive login required"
                ),
            });
        };

        info!(role = %role, "refreshing access token");
        match self.api.refresh(&refresh_token).await {
            Ok(grant) => {
                if Role::from_user_type(&grant.user_type) != Some(role) {
                    warn!(
                        role = %role,
                        user_type = %grant.user_type,
                        "refresh grant does not belong to the requested role"
                    );
                    self.set_state(role, AuthState::Failed);
                    return Err(AuthError::InvalidResponse {
                        message: format!(
                            "refresh returned user_type `{}` for {role}",
                            grant.user_type
                        ),
                    });
                }
                let mut record =
                    grant.into_record(role, &self.config.environment, self.config.safety_margin());
                if record.refresh_token.is_none() {
                    // Backend kept the previous refresh token valid.
                    record.refresh_token = Some(refresh_token);
                }
                if let Err(err) = self.store.put(&record).await {
                    // An unsaved token is never handed out; forcing
                    // re-authentication beats trusting a credential
                    // that vanishes on restart.
                    self.cache.invalidate(role);
                    self.set_state(role, AuthState::Unauthenticated);
                    return Err(AuthError::from(err));
                }
                self.cache.write(&record);
                self.set_state(role, AuthState::Valid);
                info!(role = %role, "token refresh succeeded");
                Ok(record)
            }
            Err(AuthError::RefreshRejected { message }) => {
                warn!(role = %role, error = %message, "refresh token rejected, clearing stored credentials");
                if let Err(err) = self.clear_role(role).await {
                    warn!(role = %role, error = %err, "failed to clear rejected credentials");
                }
                self.set_state(role, AuthState::Unauthenticated);
                Err(AuthError::RefreshRejected { message })
            }
            Err(err) => {
                // Transient failure: the refresh token stays stored so
                // a later attempt can still succeed.
                warn!(role = %role, error = %err, "token refresh failed");
                self.cache.invalidate(role);
                self.set_state(role, AuthState::Unauthenticated);
                Err(err)
            }
        }
    }

    /// Read the role's record, discarding it when it was minted by a
    /// different backend environment.
    async fn usable_record(&self, role: Role) -> Result<Option<TokenRecord>, AuthError> {
        let Some(record) = self.cache.read(role).await.map_err(AuthError::from)? else {
            return Ok(None);
        };
        if let Some(environment) = &record.environment {
            if environment != &self.config.environment {
                info!(
                    role = %role,
                    stored = %environment,
                    configured = %self.config.environment,
                    "stored credentials belong to a different environment, discarding"
                );
                self.clear_role(role).await?;
                return Ok(None);
            }
        }
        Ok(Some(record))
    }

    async fn install_session(&self, response: LoginResponse) -> Result<UserProfile, AuthError> {
        let LoginResponse { tokens, user } = response;
        let role =
            Role::from_user_type(&tokens.user_type).ok_or_else(|| AuthError::InvalidResponse {
                message: format!("unknown user_type `{}`", tokens.user_type),
            })?;
        let record = tokens.into_record(role, &self.config.environment, self.config.safety_margin());
        self.store.put(&record).await.map_err(AuthError::from)?;
        self.cache.write(&record);
        self.set_state(role, AuthState::Valid);
        *self.active_role.write() = role;
        info!(role = %role, "login succeeded");
        Ok(user)
    }

    async fn clear_role(&self, role: Role) -> Result<(), AuthError> {
        self.store.delete(role).await.map_err(AuthError::from)?;
        self.cache.invalidate(role);
        Ok(())
    }

    fn set_state(&self, role: Role, state: AuthState) {
        let previous = self.states.write().insert(role, state);
        if previous != Some(state) {
            debug!(role = %role, state = %state, "auth state changed");
        }
    }
}
