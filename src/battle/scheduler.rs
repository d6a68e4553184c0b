// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Defense Window Scheduler
//!
//! One timer per session. Arming a session replaces whatever timer it had,
//! so a session waits on at most one deadline at a time (challenge expiry,
//! countdown end, attack window or defense window).
//!
//! A timer only suspends its own task. When it fires it runs the supplied
//! future, which takes the session lock like any other writer; a racing
//! submission that wins the lock first simply makes the firing a no-op.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::model::DeadlineKind;

struct Timer {
    kind: DeadlineKind,
    generation: u64,
    token: CancellationToken,
}

pub struct Scheduler {
    timers: Arc<DashMap<String, Timer>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Timers stop when `shutdown` is cancelled.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            timers: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Run `fire` after `delay` unless the session is re-armed or disarmed first.
    pub fn arm<F>(&self, session_id: &str, kind: DeadlineKind, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = self.shutdown.child_token();

        if let Some(previous) = self.timers.insert(
            session_id.to_string(),
            Timer {
                kind,
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        debug!(
            session_id,
            ?kind,
            delay_ms = delay.as_millis() as u64,
            "Session timer armed"
        );

        let timers = self.timers.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // Release the slot before firing so the handler can arm the next deadline.
            timers.remove_if(&session_id, |_, timer| timer.generation == generation);
            debug!(session_id = %session_id, ?kind, "Session timer fired");
            fire.await;
        });
    }

    pub fn disarm(&self, session_id: &str) {
        if let Some((_, timer)) = self.timers.remove(session_id) {
            timer.token.cancel();
            debug!(session_id, kind = ?timer.kind, "Session timer disarmed");
        }
    }

    /// Deadline currently armed for a session.
    pub fn armed(&self, session_id: &str) -> Option<DeadlineKind> {
        self.timers.get(session_id).map(|timer| timer.kind)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
