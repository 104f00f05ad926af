//! # Curalink Core
//!
//! Shared client core of the Curalink telehealth apps: every request a
//! host application sends to the backend goes through the pipeline in
//! this crate.
//!
//! This crate provides:
//! - Role-partitioned token storage (OS keyring plus a short-lived
//!   in-memory cache) for the patient and doctor sessions
//! - A session manager that validates, proactively refreshes, and
//!   installs credentials, collapsing concurrent refreshes for a role
//!   into a single backend call
//! - Request signing: API key, device identity, bearer token, and an
//!   optional HMAC-SHA256 body signature
//! - A request executor with typed error classification and a bounded
//!   retry budget shared between auth and availability retries
//! - A connectivity monitor that probes the backend while it is
//!   unreachable and notifies subscribers on recovery
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use curalink_core::{
//!     ApiConfig, ConnectivityMonitor, DeviceIdentity, RequestContext,
//!     RequestExecutor, SessionManager, create_store,
//! };
//! use url::Url;
//!
//! let config = Arc::new(
//!     ApiConfig::new(
//!         Url::parse("https://api.curalink.example")?,
//!         "public-api-key",
//!         DeviceIdentity::generate("2.4.0"),
//!     )
//!     .with_signing_secret("shared-hmac-secret"),
//! );
//!
//! let store = create_store(true);
//! let session = SessionManager::new(config.clone(), store)?;
//! let monitor = Arc::new(ConnectivityMonitor::new(config.clone())?);
//! let executor = RequestExecutor::new(config, session.clone(), monitor)?;
//!
//! session.login_with_password("amira@example.com", "secret").await?;
//! let appointments: Vec<Appointment> = executor
//!     .execute_json(RequestContext::get("/appointments"))
//!     .await?;
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod executor;
pub mod model;
pub mod session;
pub mod sign;
pub mod store;
pub mod token;

// Re-export commonly used types at crate root
pub use api::{LoginResponse, TokenGrant};
pub use cache::TokenCache;
pub use config::{ApiConfig, DeviceIdentity, RetryConfig};
pub use connectivity::ConnectivityMonitor;
pub use error::{AuthError, NetworkError};
pub use executor::{RequestContext, RequestExecutor};
pub use model::{Role, UserProfile};
pub use session::{AuthState, SessionManager};
pub use sign::RequestSigner;
pub use store::{create_store, MemoryTokenStore, Secret, StoreError, TokenStore};
pub use token::TokenRecord;

#[cfg(feature = "keyring-store")]
pub use store::KeyringTokenStore;
