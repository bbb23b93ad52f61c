//! Raw key material held between discovery and materialization.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Fingerprint to raw key bytes.
///
/// Every entry is handed out at most once: [`KeyCache::take`] removes it in
/// the same critical section that reads it.
#[derive(Debug, Default)]
pub struct KeyCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `fingerprint`, replacing any earlier bytes.
    pub fn insert(&self, fingerprint: impl Into<String>, data: Vec<u8>) {
        self.lock().insert(fingerprint.into(), data);
    }

    /// Remove and return the bytes for `fingerprint`.
    pub fn take(&self, fingerprint: &str) -> Option<Vec<u8>> {
        self.lock().remove(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Fingerprints currently held, sorted.
    pub fn fingerprints(&self) -> Vec<String> {
        let mut fingerprints: Vec<String> = self.lock().keys().cloned().collect();
        fingerprints.sort();
        fingerprints
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        // Single map operations cannot leave it half updated, so a poisoned
        // lock is still safe to use.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
