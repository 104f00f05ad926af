//! In-memory token storage implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{StoreError, TokenStore};
use crate::model::Role;
use crate::token::TokenRecord;

/// In-memory token store for testing and development.
///
/// This store is not persistent; records are lost when the process
/// exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
pub struct MemoryTokenStore {
    records: RwLock<HashMap<Role, TokenRecord>>,
}

impl MemoryTokenStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create a memory store seeded with records.
    pub fn with_records(records: impl IntoIterator<Item = TokenRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.role, r)).collect();
        Self {
            records: RwLock::new(map),
        }
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTokenStore")
            .field("record_count", &self.records.read().len())
            .finish()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, record: &TokenRecord) -> Result<(), StoreError> {
        self.records.write().insert(record.role, record.clone());
        Ok(())
    }

    async fn get(&self, role: Role) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.records.read().get(&role).cloned())
    }

    async fn delete(&self, role: Role) -> Result<(), StoreError> {
        self.records.write().remove(&role);
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.records.write().clear();
        Ok(())
    }
}
