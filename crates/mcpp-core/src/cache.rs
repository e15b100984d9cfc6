// crates/mcpp-core/src/cache.rs
// ============================================================================
// Module: MCPP Data Cache
// Description: In-memory store of cached tool-call results keyed by call id.
// Purpose: Provide linearizable per-key operations over sensitive payloads.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! The data cache maps call identifiers to typed entries. Lookups are O(1)
//! on average; missing keys are a normal `None` return, never an error.
//! Entries live until explicit deletion, process exit, or their optional
//! per-entry expiry; expired entries are purged on access. Time is supplied
//! explicitly by callers so behavior stays deterministic and replayable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use thiserror::Error;

use crate::core::CachedEntry;
use crate::core::CallId;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Data cache faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache lock was poisoned by a panicking writer.
    #[error("data cache lock poisoned")]
    Poisoned,
}

// ============================================================================
// SECTION: Data Cache
// ============================================================================

/// In-memory cache of tool-call results.
///
/// Clones share the same underlying map. Individual operations are
/// linearizable; no cross-key atomicity is provided.
#[derive(Debug, Default, Clone)]
pub struct DataCache {
    /// Entry map guarded by a reader-writer lock.
    entries: Arc<RwLock<HashMap<String, CachedEntry>>>,
}

impl DataCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an entry, unconditionally replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Poisoned`] when the lock is poisoned.
    pub fn put(&self, call_id: &CallId, entry: CachedEntry) -> Result<(), CacheError> {
        let mut guard = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        guard.insert(call_id.as_str().to_string(), entry);
        Ok(())
    }

    /// Returns a copy of the entry, purging it first when expired.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Poisoned`] when the lock is poisoned.
    pub fn get(&self, call_id: &CallId, now_ms: u64) -> Result<Option<CachedEntry>, CacheError> {
        let expired = {
            let guard = self.entries.read().map_err(|_| CacheError::Poisoned)?;
            match guard.get(call_id.as_str()) {
                Some(entry) if entry.metadata.is_expired(now_ms) => true,
                Some(entry) => return Ok(Some(entry.clone())),
                None => return Ok(None),
            }
        };
        if expired {
            let mut guard = self.entries.write().map_err(|_| CacheError::Poisoned)?;
            if guard.get(call_id.as_str()).is_some_and(|entry| entry.metadata.is_expired(now_ms)) {
                guard.remove(call_id.as_str());
            }
        }
        Ok(None)
    }

    /// Returns true when an entry exists for the call id.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Poisoned`] when the lock is poisoned.
    pub fn has(&self, call_id: &CallId) -> Result<bool, CacheError> {
        let guard = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(guard.contains_key(call_id.as_str()))
    }

    /// Deletes the entry, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Poisoned`] when the lock is poisoned.
    pub fn delete(&self, call_id: &CallId) -> Result<bool, CacheError> {
        let mut guard = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        Ok(guard.remove(call_id.as_str()).is_some())
    }

    /// Returns every stored call id (unordered).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Poisoned`] when the lock is poisoned.
    pub fn keys(&self) -> Result<Vec<CallId>, CacheError> {
        let guard = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(guard.keys().map(|key| CallId::new(key.clone())).collect())
    }

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Poisoned`] when the lock is poisoned.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut guard = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        guard.clear();
        Ok(())
    }

    /// Returns the number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Poisoned`] when the lock is poisoned.
    pub fn len(&self) -> Result<usize, CacheError> {
        let guard = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(guard.len())
    }

    /// Returns true when the cache holds no entries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Poisoned`] when the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only cache assertions.")]

    use serde_json::json;

    use super::DataCache;
    use crate::core::CachedEntry;
    use crate::core::CallId;
    use crate::core::EntryMetadata;
    use crate::core::EntryPayload;
    use crate::core::TablePayload;

    fn sample_entry(expires_at_ms: Option<u64>) -> CachedEntry {
        CachedEntry {
            payload: EntryPayload::Table(TablePayload::new(
                vec!["ID".to_string()],
                vec![vec![json!("1")]],
            )),
            metadata: EntryMetadata {
                tool_name: "list_users".to_string(),
                created_at_ms: 0,
                is_sensitive: true,
                expires_at_ms,
            },
        }
    }

    #[test]
    fn put_get_replace_delete() {
        let cache = DataCache::new();
        let id = CallId::new("t1");
        assert_eq!(cache.get(&id, 0).unwrap(), None);

        cache.put(&id, sample_entry(None)).unwrap();
        assert!(cache.has(&id).unwrap());
        assert_eq!(cache.get(&id, 0).unwrap(), Some(sample_entry(None)));

        let replacement = CachedEntry {
            payload: EntryPayload::Text("replaced".to_string()),
            ..sample_entry(None)
        };
        cache.put(&id, replacement.clone()).unwrap();
        assert_eq!(cache.get(&id, 0).unwrap(), Some(replacement));

        assert!(cache.delete(&id).unwrap());
        assert!(!cache.delete(&id).unwrap());
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn expired_entries_miss_and_purge() {
        let cache = DataCache::new();
        let id = CallId::new("t1");
        cache.put(&id, sample_entry(Some(100))).unwrap();

        assert!(cache.get(&id, 99).unwrap().is_some());
        assert_eq!(cache.get(&id, 100).unwrap(), None);
        // The expired entry is gone after the purging access.
        assert!(!cache.has(&id).unwrap());
    }

    #[test]
    fn keys_and_clear() {
        let cache = DataCache::new();
        cache.put(&CallId::new("a"), sample_entry(None)).unwrap();
        cache.put(&CallId::new("b"), sample_entry(None)).unwrap();

        let mut keys: Vec<String> =
            cache.keys().unwrap().iter().map(|key| key.as_str().to_string()).collect();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        cache.clear().unwrap();
        assert_eq!(cache.len().unwrap(), 0);
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let cache = DataCache::new();
        let mut handles = Vec::new();
        for worker in 0..8 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                let id = CallId::new(format!("call-{worker}"));
                cache.put(&id, sample_entry(None)).unwrap();
                assert!(cache.get(&id, 0).unwrap().is_some());
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len().unwrap(), 8);
    }
}
