//! Durable token storage.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`TokenStore`] - Trait for token persistence backends
//! - [`MemoryTokenStore`] - In-memory implementation for testing
//! - [`KeyringTokenStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select a backend based on availability
//!
//! # Storage Key Convention
//!
//! Each role owns a fixed pair of keyring entries under one service name:
//! `patient_auth_token` / `patient_refresh_token` and
//! `doctor_auth_token` / `doctor_refresh_token`. Entry names come from
//! [`Role::access_token_key`](crate::model::Role::access_token_key) and
//! [`Role::refresh_token_key`](crate::model::Role::refresh_token_key);
//! nothing builds them from string fragments.
//!
//! # Example
//!
//! ```rust,ignore
//! use curalink_core::model::Role;
//! use curalink_core::store::create_store;
//! use curalink_core::token::TokenRecord;
//!
//! let store = create_store(true); // Prefer keyring if available
//!
//! let record = TokenRecord::new(Role::Patient, "opaque-access-token");
//! store.put(&record).await.unwrap();
//!
//! let loaded = store.get(Role::Patient).await.unwrap();
//! assert!(loaded.is_some());
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::model::Role;
use crate::token::TokenRecord;

#[cfg(feature = "keyring-store")]
mod keyring;
mod memory;

#[cfg(feature = "keyring-store")]
pub use keyring::KeyringTokenStore;
pub use memory::MemoryTokenStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the
/// value, and the backing memory is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Error type for token store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reading or writing the metadata sidecar failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over durable token persistence.
///
/// Implementations must be atomic per role: a concurrent reader
/// observes either the previous record or the new one, never a mix of
/// the two.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a record under its role, replacing any existing one.
    async fn put(&self, record: &TokenRecord) -> Result<(), StoreError>;

    /// Retrieve the record for a role.
    ///
    /// Returns `Ok(None)` if nothing is stored for the role.
    async fn get(&self, role: Role) -> Result<Option<TokenRecord>, StoreError>;

    /// Delete the record for a role.
    ///
    /// Returns `Ok(())` even if nothing was stored.
    async fn delete(&self, role: Role) -> Result<(), StoreError>;

    /// Delete the records of every role.
    async fn clear_all(&self) -> Result<(), StoreError> {
        for role in Role::ALL {
            self.delete(role).await?;
        }
        Ok(())
    }
}

/// Create a token store with automatic backend selection.
///
/// If `prefer_keyring` is `true` and the `keyring-store` feature is
/// enabled, attempts a [`KeyringTokenStore`] and falls back to
/// [`MemoryTokenStore`] with a warning when the keyring is unavailable.
/// Otherwise returns a [`MemoryTokenStore`].
pub fn create_store(prefer_keyring: bool) -> std::sync::Arc<dyn TokenStore> {
    #[cfg(feature = "keyring-store")]
    if prefer_keyring {
        match KeyringTokenStore::try_new("curalink") {
            Ok(store) => {
                tracing::info!("using OS keyring for token storage");
                return std::sync::Arc::new(store);
            }
            Err(e) => {
                tracing::warn!(
                    "keyring unavailable ({}), falling back to memory store; \
                     tokens will not persist across restarts",
                    e
                );
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    if prefer_keyring {
        tracing::warn!(
            "keyring storage requested but the keyring-store feature is not enabled; \
             tokens will not persist across restarts"
        );
    }

    tracing::debug!("using in-memory token storage");
    std::sync::Arc::new(MemoryTokenStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("super-secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_display_redacted() {
        let secret = Secret::new("super-secret");
        let display = format!("{}", secret);
        assert!(!display.contains("super-secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_secret_equality_compares_values() {
        assert_eq!(Secret::new("a"), Secret::new("a"));
        assert_ne!(Secret::new("a"), Secret::new("b"));
    }

    #[tokio::test]
    async fn test_create_store_memory_fallback() {
        let store = create_store(false);
        assert!(store.get(Role::Patient).await.unwrap().is_none());
    }
}
