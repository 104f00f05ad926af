//! OS keyring-backed token storage implementation.
//!
//! Secrets live in the platform keyring; everything else about a
//! record (token type, timestamps, environment) lives in a JSON
//! sidecar file, so no secret material ever touches disk in the clear.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyring::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Secret, StoreError, TokenStore};
use crate::model::Role;
use crate::token::TokenRecord;

/// Non-secret metadata persisted alongside the keyring entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordMeta {
    token_type: String,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    environment: Option<String>,
}

/// Sidecar file format, versioned for future migrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SidecarData {
    version: u32,
    #[serde(default)]
    roles: HashMap<Role, RecordMeta>,
}

impl Default for SidecarData {
    fn default() -> Self {
        Self {
            version: 1,
            roles: HashMap::new(),
        }
    }
}

fn load_sidecar(path: &Path) -> Result<HashMap<Role, RecordMeta>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let contents = fs::read_to_string(path)?;
    let data: SidecarData = serde_json::from_str(&contents)?;
    Ok(data.roles)
}

fn save_sidecar(path: &Path, roles: &HashMap<Role, RecordMeta>) -> Result<(), StoreError> {
    let data = SidecarData {
        version: 1,
        roles: roles.clone(),
    };
    let contents = serde_json::to_string_pretty(&data)?;
    fs::write(path, contents)?;
    Ok(())
}

/// Rebuild a record from whatever survived in the keyring and sidecar.
///
/// A record whose metadata is missing gets no expiry, which makes it
/// report itself expired, so a torn write can only ever cost one
/// refresh round trip, never a stale token on the wire.
fn assemble(
    role: Role,
    access: Option<String>,
    refresh: Option<String>,
    meta: Option<RecordMeta>,
) -> TokenRecord {
    let mut record = TokenRecord::new(role, access.unwrap_or_default());
    if let Some(refresh) = refresh {
        record.refresh_token = Some(Secret::new(refresh));
    }
    if let Some(meta) = meta {
        record.token_type = meta.token_type;
        record.issued_at = meta.issued_at;
        record.expires_at = meta.expires_at;
        record.environment = meta.environment;
    }
    record
}

/// OS keyring-backed token store.
///
/// This store uses the platform's native keyring service:
/// - macOS / iOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// # Storage Layout
///
/// Each role owns two entries under the configured service name, named
/// by [`Role::access_token_key`] and [`Role::refresh_token_key`]. The
/// non-secret metadata for all roles lives in one sidecar JSON file in
/// the platform config directory.
pub struct KeyringTokenStore {
    service_name: String,
    sidecar_path: PathBuf,
    meta: RwLock<HashMap<Role, RecordMeta>>,
}

impl KeyringTokenStore {
    /// Try to create a keyring store using the default sidecar path.
    ///
    /// Returns an error if the keyring backend is not available on this
    /// platform or the sidecar file cannot be read.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "curalink", "curalink").ok_or(
            StoreError::BackendError {
                message: "config directory not available".to_string(),
            },
        )?;
        let sidecar_path = dirs.config_dir().join("token_meta.json");
        Self::try_new_at(service_name, sidecar_path)
    }

    /// Try to create a keyring store with an explicit sidecar path.
    pub fn try_new_at(
        service_name: &str,
        sidecar_path: PathBuf,
    ) -> Result<Self, StoreError> {
        // Validate that a keyring backend exists before accepting writes.
        Entry::new(service_name, "__availability__").map_err(|e| {
            StoreError::KeyringUnavailable {
                message: format!("keyring backend not available: {}", e),
            }
        })?;

        if let Some(parent) = sidecar_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let meta = load_sidecar(&sidecar_path)?;

        Ok(Self {
            service_name: service_name.to_string(),
            sidecar_path,
            meta: RwLock::new(meta),
        })
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service_name, key).map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }

    fn read_entry(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::Ambiguous(_)) => Err(StoreError::BackendError {
                message: format!("ambiguous keyring entry: {}", key),
            }),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::BackendError {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    fn write_entry(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring password: {}", e),
            })
    }

    fn delete_entry(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Idempotent delete
            Err(e) => Err(StoreError::BackendError {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }

    fn save_meta(&self, roles: &HashMap<Role, RecordMeta>) -> Result<(), StoreError> {
        save_sidecar(&self.sidecar_path, roles)
    }
}

impl std::fmt::Debug for KeyringTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringTokenStore")
            .field("service_name", &self.service_name)
            .field("sidecar_path", &self.sidecar_path)
            .finish()
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    async fn put(&self, record: &TokenRecord) -> Result<(), StoreError> {
        let role = record.role;

        // Secrets first, metadata last: a torn write leaves a record
        // the expiry fail-safe already knows how to handle.
        if record.access_token.is_empty() {
            self.delete_entry(role.access_token_key())?;
        } else {
            self.write_entry(role.access_token_key(), record.access_token.expose())?;
        }
        match &record.refresh_token {
            Some(refresh) if !refresh.is_empty() => {
                self.write_entry(role.refresh_token_key(), refresh.expose())?;
            }
            _ => self.delete_entry(role.refresh_token_key())?,
        }

        let mut meta = self.meta.write();
        meta.insert(
            role,
            RecordMeta {
                token_type: record.token_type.clone(),
                issued_at: record.issued_at,
                expires_at: record.expires_at,
                environment: record.environment.clone(),
            },
        );
        self.save_meta(&meta)
    }

    async fn get(&self, role: Role) -> Result<Option<TokenRecord>, StoreError> {
        let access = self.read_entry(role.access_token_key())?;
        let refresh = self.read_entry(role.refresh_token_key())?;
        if access.is_none() && refresh.is_none() {
            return Ok(None);
        }

        let meta = self.meta.read().get(&role).cloned();
        Ok(Some(assemble(role, access, refresh, meta)))
    }

    async fn delete(&self, role: Role) -> Result<(), StoreError> {
        self.delete_entry(role.access_token_key())?;
        self.delete_entry(role.refresh_token_key())?;

        let mut meta = self.meta.write();
        meta.remove(&role);
        self.save_meta(&meta)
    }
}
