// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache of recent battle events per session.
//!
//! Reconnecting subscribers usually ask for the last few events of a hot
//! session. The cache keeps a bounded, contiguous tail per session so those
//! replays avoid a redb read. A tail that would become non-contiguous is
//! dropped and rebuilt from storage on the next miss.
//!
//! A cached tail never lags storage: [`EventCache::push`] runs after the
//! event's commit, and [`EventCache::fill`] re-checks the newest stored
//! sequence while holding the same lock.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::events::BattleEvent;

/// Events kept per session.
const DEFAULT_TAIL_LEN: usize = 64;

/// In-process LRU cache of per-session event tails.
pub struct EventCache {
    cache: Mutex<LruCache<String, VecDeque<BattleEvent>>>,
    tail_len: usize,
}

impl EventCache {
    /// Create a cache holding tails for at most `capacity` sessions.
    pub fn new(capacity: usize) -> Self {
        Self::with_tail_len(capacity, DEFAULT_TAIL_LEN)
    }

    pub fn with_tail_len(capacity: usize, tail_len: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            tail_len: tail_len.max(1),
        }
    }

    /// Record a newly committed event.
    ///
    /// Sequence 1 starts a fresh tail. Any other event must directly follow
    /// the cached tail, otherwise the tail is invalidated.
    pub fn push(&self, event: &BattleEvent) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };

        if event.sequence == 1 {
            let mut tail = VecDeque::with_capacity(self.tail_len);
            tail.push_back(event.clone());
            cache.put(event.session_id.clone(), tail);
            return;
        }

        let contiguous = cache
            .peek(&event.session_id)
            .and_then(|tail| tail.back())
            .is_some_and(|last| last.sequence + 1 == event.sequence);

        if !contiguous {
            cache.pop(&event.session_id);
            return;
        }

        if let Some(tail) = cache.get_mut(&event.session_id) {
            tail.push_back(event.clone());
            while tail.len() > self.tail_len {
                tail.pop_front();
            }
        }
    }

    /// Seed the tail for a session from a storage read.
    ///
    /// `events` must be every event with `sequence > after`, in order.
    /// `latest_stored` returns the newest committed sequence and is called
    /// with the cache locked; the tail is kept only if it ends there.
    pub fn fill<F>(&self, session_id: &str, after: u64, events: &[BattleEvent], latest_stored: F)
    where
        F: FnOnce() -> Option<u64>,
    {
        // Only a complete history from the start can seed the tail.
        if after != 0 || events.is_empty() {
            return;
        }
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        let newest = events.last().map_or(0, |event| event.sequence);
        let cached_newest = cache
            .peek(session_id)
            .and_then(|tail| tail.back())
            .map_or(0, |event| event.sequence);
        if cached_newest >= newest {
            return;
        }
        // An event committed after the read was pushed while no tail existed.
        if latest_stored() != Some(newest) {
            return;
        }
        let skip = events.len().saturating_sub(self.tail_len);
        let tail: VecDeque<BattleEvent> = events[skip..].iter().cloned().collect();
        cache.put(session_id.to_string(), tail);
    }

    /// Events with `sequence > after`, if the cached tail covers them.
    ///
    /// Returns `None` when the session is not cached or the tail starts after
    /// `after + 1` (the caller must fall back to storage).
    pub fn replay(&self, session_id: &str, after: u64) -> Option<Vec<BattleEvent>> {
        let mut cache = self.cache.lock().ok()?;
        let tail = cache.get(session_id)?;
        let first = tail.front()?.sequence;
        if first > after + 1 {
            return None;
        }
        Some(
            tail.iter()
                .filter(|event| event.sequence > after)
                .cloned()
                .collect(),
        )
    }
}
