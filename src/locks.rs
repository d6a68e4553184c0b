// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Keyed serialization points.
//!
//! Accounts and battle sessions each get their own async mutex. Holding the
//! guard for a key serializes every writer of that key while leaving other
//! keys free to proceed in parallel. There is no global lock.
//!
//! A key's mutex lives only while someone holds or waits for it; the last
//! guard to drop removes it from the registry.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Lazily populated map of per-key mutexes.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Arc<LockMap>,
}

/// Exclusive hold on one key.
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<LockMap>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Unlock first so the map holds the only remaining handle.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the serialization point for one key.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let guard = self.handle(key).lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            key: key.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Acquire several keys at once.
    ///
    /// Keys are locked in sorted order with duplicates removed, so two callers
    /// locking the same pair in opposite order cannot deadlock.
    pub async fn lock_many(&self, keys: &[&str]) -> Vec<KeyGuard> {
        let mut ordered: Vec<&str> = keys.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
