//! Ownership cache.
//!
//! The only state shared across sites. Readers may run concurrently;
//! writes are last-write-wins. Freshness is decided by the resolver, the
//! cache just stores what it is given.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use circuitmap_recon::model::RegistryOwnership;
use circuitmap_recon::StoreError;

pub trait OwnershipCache {
    fn get(&self, ip: &str) -> Result<Option<RegistryOwnership>, StoreError>;
    fn put(&self, entry: &RegistryOwnership) -> Result<(), StoreError>;
}

/// Whether a cached entry is still within its time-to-live.
pub fn is_fresh(entry: &RegistryOwnership, ttl: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(entry.resolved_at) < ttl
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, RegistryOwnership>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl OwnershipCache for MemoryCache {
    fn get(&self, ip: &str) -> Result<Option<RegistryOwnership>, StoreError> {
        Ok(self.entries.read().get(ip).cloned())
    }

    fn put(&self, entry: &RegistryOwnership) -> Result<(), StoreError> {
        self.entries.write().insert(entry.ip.clone(), entry.clone());
        Ok(())
    }
}
