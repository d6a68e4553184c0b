// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-session event log and live fan-out.
//!
//! Events are appended inside the same write transaction as the state
//! transition that produced them ([`EventChannel::append_in`]) and handed to
//! live subscribers only after that transaction commits
//! ([`EventChannel::publish`]). Because commit always precedes publish, a
//! subscriber that reads storage after registering for live events cannot
//! miss an event; it may see one twice, which the [`SequenceTracker`] drops.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{GameError, GameResult};
use crate::storage::{EventCache, GameDatabase, GameTxn};

use super::model::{BattleEvent, BattleEventKind};
use super::tracker::{Delivery, SequenceTracker};

const SESSION_CHANNEL_CAPACITY: usize = 64;
const CACHED_SESSIONS: usize = 1024;

#[derive(Clone)]
pub struct EventChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    db: Arc<GameDatabase>,
    cache: EventCache,
    senders: DashMap<String, broadcast::Sender<BattleEvent>>,
    clock: Arc<dyn Clock>,
}

impl EventChannel {
    pub fn new(db: Arc<GameDatabase>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                db,
                cache: EventCache::new(CACHED_SESSIONS),
                senders: DashMap::new(),
                clock,
            }),
        }
    }

    /// Append the next event of a session inside `txn`.
    pub fn append_in(
        &self,
        txn: &GameTxn<'_>,
        session_id: &str,
        kind: BattleEventKind,
    ) -> GameResult<BattleEvent> {
        let event = BattleEvent {
            session_id: session_id.to_string(),
            sequence: txn.last_event_seq(session_id)? + 1,
            emitted_at: self.inner.clock.now(),
            kind,
        };
        txn.append_event(&event)?;
        Ok(event)
    }

    /// Deliver committed events to live subscribers.
    pub fn publish(&self, events: &[BattleEvent]) {
        for event in events {
            self.inner.cache.push(event);

            let session_id = event.session_id.as_str();
            let listeners = self
                .inner
                .senders
                .get(session_id)
                .map(|sender| sender.send(event.clone()).unwrap_or(0));

            debug!(
                session_id,
                sequence = event.sequence,
                listeners = listeners.unwrap_or(0),
                "Battle event published"
            );

            // Dropping the sender closes every receiver once drained.
            if event.is_terminal() {
                self.inner.senders.remove(session_id);
            } else if listeners == Some(0) {
                self.release(session_id);
            }
        }
    }

    /// Stored events with `sequence > after`.
    pub fn replay(&self, session_id: &str, after: u64) -> GameResult<Vec<BattleEvent>> {
        if let Some(events) = self.inner.cache.replay(session_id, after) {
            return Ok(events);
        }
        let events = self.inner.db.events_after(session_id, after)?;
        self.cache_history(session_id, after, &events);
        Ok(events)
    }

    fn cache_history(&self, session_id: &str, after: u64, events: &[BattleEvent]) {
        let db = &self.inner.db;
        self.inner.cache.fill(session_id, after, events, || {
            db.last_event_seq(session_id).ok()
        });
    }

    fn register(&self, session_id: &str) -> broadcast::Receiver<BattleEvent> {
        self.inner
            .senders
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(SESSION_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop the session's sender unless someone is still listening.
    fn release(&self, session_id: &str) {
        self.inner
            .senders
            .remove_if(session_id, |_, sender| sender.receiver_count() == 0);
    }

    /// Subscribe to a session, resuming after sequence `after`.
    pub fn subscribe(&self, session_id: &str, after: u64) -> GameResult<Subscription> {
        // Register before reading storage so nothing committed afterwards is missed.
        let rx = self.register(session_id);

        // Include the event at `after` itself to learn whether the stream already ended.
        let mut stored = self.replay(session_id, after.saturating_sub(1))?;
        let finished = stored.last().is_some_and(BattleEvent::is_terminal);
        stored.retain(|event| event.sequence > after);

        let rx = if finished {
            drop(rx);
            self.release(session_id);
            None
        } else {
            Some(rx)
        };

        Ok(Subscription {
            channel: self.clone(),
            session_id: session_id.to_string(),
            backlog: stored.into(),
            rx,
            tracker: SequenceTracker::resume(after),
            finished: false,
        })
    }

    /// Number of sessions with live subscribers.
    pub fn live_sessions(&self) -> usize {
        self.inner.senders.len()
    }
}

/// Ordered, duplicate-free event stream for one session.
pub struct Subscription {
    channel: EventChannel,
    session_id: String,
    backlog: VecDeque<BattleEvent>,
    rx: Option<broadcast::Receiver<BattleEvent>>,
    tracker: SequenceTracker,
    finished: bool,
}

impl Subscription {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn last_sequence(&self) -> u64 {
        self.tracker.last()
    }

    /// Next event in sequence order, or `None` once the session ended.
    pub async fn next(&mut self) -> GameResult<Option<BattleEvent>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            if let Some(event) = self.backlog.pop_front() {
                if let Some(event) = self.accept(event)? {
                    return Ok(Some(event));
                }
                continue;
            }

            let Some(rx) = self.rx.as_mut() else {
                self.finished = true;
                return Ok(None);
            };

            match rx.recv().await {
                Ok(event) => self.backlog.push_back(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        session_id = %self.session_id,
                        skipped,
                        "Subscriber lagged, refilling from storage"
                    );
                    self.refill()?;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // The sender went away without a terminal event reaching us.
                    // Listen again, then catch up from storage; an ended session
                    // shows its terminal event there.
                    self.rx = Some(self.channel.register(&self.session_id));
                    self.refill()?;
                }
            }
        }
    }

    fn accept(&mut self, event: BattleEvent) -> GameResult<Option<BattleEvent>> {
        match self.tracker.observe(event.sequence) {
            Delivery::Fresh => {
                if event.is_terminal() {
                    self.rx = None;
                    self.channel.release(&self.session_id);
                    self.backlog.clear();
                    self.finished = true;
                }
                Ok(Some(event))
            }
            Delivery::Duplicate => Ok(None),
            Delivery::Gap { expected, got } => {
                debug!(
                    session_id = %self.session_id,
                    expected,
                    got,
                    "Sequence gap, refilling from storage"
                );
                self.backlog.push_front(event);
                self.refill()?;
                if self.backlog.front().is_some_and(|e| e.sequence != expected) {
                    return Err(GameError::Inconsistent(format!(
                        "session {} is missing event {expected}",
                        self.session_id
                    )));
                }
                Ok(None)
            }
        }
    }

    fn refill(&mut self) -> GameResult<()> {
        let stored = self
            .channel
            .replay(&self.session_id, self.tracker.last())?;
        let mut merged: VecDeque<BattleEvent> = stored.into();
        let newest = merged.back().map_or(self.tracker.last(), |e| e.sequence);
        merged.extend(self.backlog.drain(..).filter(|e| e.sequence > newest));
        self.backlog = merged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::{BattleOutcome, CancelReason};
    use crate::clock::SystemClock;
    use std::time::Duration;

    fn channel() -> (EventChannel, Arc<GameDatabase>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(GameDatabase::open(&dir.path().join("events.redb")).unwrap());
        (EventChannel::new(db.clone(), Arc::new(SystemClock)), db, dir)
    }

    fn emit(channel: &EventChannel, db: &GameDatabase, session: &str, kind: BattleEventKind) -> BattleEvent {
        let event = db
            .write(|txn| channel.append_in(txn, session, kind))
            .unwrap();
        channel.publish(std::slice::from_ref(&event));
        event
    }

    fn attack(attacker: &str) -> BattleEventKind {
        BattleEventKind::AttackStarted {
            attacker_id: attacker.into(),
            weapon_id: None,
        }
    }

    fn resolved() -> BattleEventKind {
        BattleEventKind::BattleResolved {
            outcome: BattleOutcome::AttackerWins,
            winner_id: "alice".into(),
            stake_transferred: 10,
        }
    }

    #[test]
    fn sequences_are_per_session() {
        let (channel, db, _dir) = channel();
        assert_eq!(emit(&channel, &db, "s1", attack("a")).sequence, 1);
        assert_eq!(emit(&channel, &db, "s1", attack("a")).sequence, 2);
        assert_eq!(emit(&channel, &db, "s2", attack("b")).sequence, 1);

        let replay = channel.replay("s1", 1).unwrap();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].sequence, 2);
    }

    #[tokio::test]
    async fn subscriber_gets_backlog_then_live_then_end() {
        let (channel, db, _dir) = channel();
        emit(&channel, &db, "s1", attack("alice"));

        let mut sub = channel.subscribe("s1", 0).unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 1);

        emit(&channel, &db, "s1", resolved());
        let last = sub.next().await.unwrap().unwrap();
        assert_eq!(last.sequence, 2);
        assert!(last.is_terminal());

        assert!(sub.next().await.unwrap().is_none());
        assert_eq!(channel.live_sessions(), 0);
    }

    #[tokio::test]
    async fn resume_after_cursor_skips_seen_events() {
        let (channel, db, _dir) = channel();
        for _ in 0..3 {
            emit(&channel, &db, "s1", attack("alice"));
        }

        let mut sub = channel.subscribe("s1", 2).unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 3);

        emit(&channel, &db, "s1", attack("alice"));
        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 4);
        assert_eq!(sub.last_sequence(), 4);
    }

    #[tokio::test]
    async fn subscribing_to_ended_session_drains_and_stops() {
        let (channel, db, _dir) = channel();
        emit(&channel, &db, "s1", attack("alice"));
        emit(
            &channel,
            &db,
            "s1",
            BattleEventKind::BattleCancelled {
                reason: CancelReason::Withdrawn,
            },
        );

        let mut sub = channel.subscribe("s1", 0).unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 1);
        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 2);
        assert!(sub.next().await.unwrap().is_none());

        let mut caught_up = channel.subscribe("s1", 2).unwrap();
        let next = tokio::time::timeout(Duration::from_millis(200), caught_up.next())
            .await
            .expect("ended session must not block");
        assert!(next.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_read_before_a_commit_is_not_cached() {
        let (channel, db, _dir) = channel();
        // Committed earlier, never published in this process.
        db.write(|txn| -> GameResult<()> {
            channel.append_in(txn, "s1", attack("alice"))?;
            channel.append_in(txn, "s1", attack("alice"))?;
            Ok(())
        })
        .unwrap();

        let read_before_commit = db.events_after("s1", 0).unwrap();
        emit(&channel, &db, "s1", resolved());
        channel.cache_history("s1", 0, &read_before_commit);

        let replay = channel.replay("s1", 0).unwrap();
        assert_eq!(
            replay.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        // Served from the now-complete cached tail.
        assert_eq!(channel.replay("s1", 0).unwrap().len(), 3);

        let mut sub = channel.subscribe("s1", 0).unwrap();
        for expected in 1..=3 {
            let event = tokio::time::timeout(Duration::from_millis(200), sub.next())
                .await
                .expect("stored events must not block")
                .unwrap()
                .unwrap();
            assert_eq!(event.sequence, expected);
        }
        assert!(sub.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscriber_survives_sender_being_dropped() {
        let (channel, db, _dir) = channel();
        emit(&channel, &db, "s1", attack("alice"));

        let mut sub = channel.subscribe("s1", 0).unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().sequence, 1);

        // A concurrent cleanup removed the sender this subscriber listens on.
        channel.inner.senders.remove("s1");
        emit(&channel, &db, "s1", attack("alice"));

        let second = tokio::time::timeout(Duration::from_millis(200), sub.next())
            .await
            .expect("missed event is refilled from storage")
            .unwrap();
        assert_eq!(second.map(|e| e.sequence), Some(2));

        emit(&channel, &db, "s1", resolved());
        let last = tokio::time::timeout(Duration::from_millis(200), sub.next())
            .await
            .expect("re-registered subscriber receives live events")
            .unwrap()
            .unwrap();
        assert_eq!(last.sequence, 3);
        assert!(sub.next().await.unwrap().is_none());
        assert_eq!(channel.live_sessions(), 0);
    }

    #[tokio::test]
    async fn sender_lives_while_someone_listens() {
        let (channel, db, _dir) = channel();
        emit(&channel, &db, "s1", attack("alice"));
        assert_eq!(channel.live_sessions(), 0);

        let sub = channel.subscribe("s1", 1).unwrap();
        emit(&channel, &db, "s1", attack("alice"));
        assert_eq!(channel.live_sessions(), 1);

        drop(sub);
        emit(&channel, &db, "s1", attack("alice"));
        assert_eq!(channel.live_sessions(), 0);
    }

    #[tokio::test]
    async fn lagged_subscriber_refills_in_order() {
        let (channel, db, _dir) = channel();
        let mut sub = channel.subscribe("s1", 0).unwrap();

        for _ in 0..(SESSION_CHANNEL_CAPACITY + 10) {
            emit(&channel, &db, "s1", attack("alice"));
        }

        for expected in 1..=(SESSION_CHANNEL_CAPACITY as u64 + 10) {
            assert_eq!(sub.next().await.unwrap().unwrap().sequence, expected);
        }
    }
}
