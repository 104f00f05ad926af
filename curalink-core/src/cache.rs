//! Short-lived in-memory cache over the token store.
//!
//! Keyring reads can prompt, block, or both on some platforms, so the
//! hot path (header construction on every request) is served from
//! memory. Entries live for a few seconds at most; any credential
//! mutation goes to the store first and then updates or invalidates the
//! cache, so memory never holds a token the store has dropped. An
//! invalidation also voids any store read still in flight, so its
//! result cannot re-enter memory after the fact.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::model::Role;
use crate::store::{StoreError, TokenStore};
use crate::token::TokenRecord;

struct CacheEntry {
    record: TokenRecord,
    cached_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Role, CacheEntry>,
    // Bumped on every invalidation. A read snapshots the count before
    // its store fetch and may only install the result while the count
    // is unchanged.
    generations: HashMap<Role, u64>,
}

impl CacheState {
    fn fresh(&self, role: Role, ttl: Duration) -> Option<TokenRecord> {
        let entry = self.entries.get(&role)?;
        if entry.cached_at.elapsed() < ttl {
            Some(entry.record.clone())
        } else {
            None
        }
    }

    fn generation(&self, role: Role) -> u64 {
        self.generations.get(&role).copied().unwrap_or(0)
    }

    fn bump(&mut self, role: Role) {
        *self.generations.entry(role).or_insert(0) += 1;
    }
}

/// Read-through cache keyed by role.
pub struct TokenCache {
    store: Arc<dyn TokenStore>,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl TokenCache {
    /// Create a cache in front of the given store.
    pub fn new(store: Arc<dyn TokenStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Fetch the record for a role, from memory when fresh, otherwise
    /// from the store.
    pub async fn read(&self, role: Role) -> Result<Option<TokenRecord>, StoreError> {
        let generation = {
            let state = self.state.read();
            if let Some(record) = state.fresh(role, self.ttl) {
                debug!(role = %role, "token cache hit");
                return Ok(Some(record));
            }
            state.generation(role)
        };

        let fetched = self.store.get(role).await?;

        let mut state = self.state.write();
        // An invalidation that landed while the store read was in
        // flight wins over the fetch; the next read consults the
        // store again.
        if state.generation(role) == generation {
            match &fetched {
                Some(record) => {
                    state.entries.insert(
                        role,
                        CacheEntry {
                            record: record.clone(),
                            cached_at: Instant::now(),
                        },
                    );
                }
                // Absence is never cached: a login on another path
                // must be visible on the very next read.
                None => {
                    state.entries.remove(&role);
                }
            }
        } else {
            debug!(role = %role, "token cache fill discarded after invalidation");
        }
        Ok(fetched)
    }

    /// Install a record in memory. The caller has already persisted it.
    pub fn write(&self, record: &TokenRecord) {
        self.state.write().entries.insert(
            record.role,
            CacheEntry {
                record: record.clone(),
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop the entry for a role; the next read consults the store.
    pub fn invalidate(&self, role: Role) {
        let mut state = self.state.write();
        state.entries.remove(&role);
        state.bump(role);
        debug!(role = %role, "token cache invalidated");
    }

    /// Drop the entries of every role.
    pub fn invalidate_all(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        for role in Role::ALL {
            state.bump(role);
        }
        debug!("token cache cleared");
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("ttl", &self.ttl)
            .field("entry_count", &self.state.read().entries.len())
            .finish()
    }
}
