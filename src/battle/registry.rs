// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Battle Session Registry: the single writer of session state.
//!
//! Every transition of a session runs under that session's lock, so two
//! transitions on one session never interleave (a late defense racing the
//! deadline timer resolves exactly once). Transitions that move items or
//! currency additionally take the participants' account locks, always in
//! the order session lock, then account locks.
//!
//! Each transition writes the session row, its ledger and inventory rows
//! and the events it emits in one storage transaction. Notifications and
//! live events go out only after commit.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{GameError, GameResult};
use crate::events::{BattleEvent, BattleEventKind, EventChannel, Subscription};
use crate::inventory::{CatalogItem, Inventory, ItemKind};
use crate::locks::LockRegistry;
use crate::storage::{GameDatabase, GameTxn};
use crate::wallet::{LedgerEntry, LedgerReason, WalletLedger};

use super::model::{
    BattleOutcome, BattleSession, BattleStatus, CancelReason, DeadlineKind, Resolution,
    ResolutionCause, StakePercent, StakeType, StatusChange,
};
use super::outcome;
use super::scheduler::Scheduler;

/// Session timing.
#[derive(Debug, Clone, Copy)]
pub struct BattleConfig {
    pub challenge_ttl: Duration,
    pub countdown: Duration,
    pub defense_window: Duration,
    pub attack_window: Duration,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            challenge_ttl: Duration::seconds(300),
            countdown: Duration::seconds(3),
            defense_window: Duration::seconds(15),
            attack_window: Duration::seconds(60),
        }
    }
}

/// Arguments of a new challenge.
#[derive(Debug, Clone)]
pub struct NewBattle {
    pub challenger_id: String,
    pub opponent_id: String,
    pub stake_type: StakeType,
    pub stake_percent: StakePercent,
    pub arena_name: Option<String>,
    pub weapon_id: Option<String>,
}

/// Result of an accepted defense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OutcomePreview {
    pub session_id: String,
    pub outcome: BattleOutcome,
    pub winner_id: String,
    pub attack_score: u64,
    pub defense_score: u64,
    pub stake_transferred: u64,
}

/// Rows a transition produced, published once it committed.
#[derive(Default)]
struct Effects {
    journal: Vec<LedgerEntry>,
    events: Vec<BattleEvent>,
}

#[derive(Clone)]
pub struct BattleRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    db: Arc<GameDatabase>,
    ledger: Arc<WalletLedger>,
    inventory: Arc<Inventory>,
    events: EventChannel,
    scheduler: Scheduler,
    session_locks: LockRegistry,
    clock: Arc<dyn Clock>,
    config: BattleConfig,
}

impl BattleRegistry {
    pub fn new(
        db: Arc<GameDatabase>,
        ledger: Arc<WalletLedger>,
        inventory: Arc<Inventory>,
        events: EventChannel,
        scheduler: Scheduler,
        clock: Arc<dyn Clock>,
        config: BattleConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                db,
                ledger,
                inventory,
                events,
                scheduler,
                session_locks: LockRegistry::new(),
                clock,
                config,
            }),
        }
    }

    pub fn config(&self) -> &BattleConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn load(&self, session_id: &str) -> GameResult<BattleSession> {
        self.inner
            .db
            .session(session_id)?
            .ok_or_else(|| GameError::NotFound(format!("session {session_id}")))
    }

    /// Full session state, visible to participants only.
    pub fn get(&self, session_id: &str, account_id: &str) -> GameResult<BattleSession> {
        let session = self.load(session_id)?;
        if !session.is_participant(account_id) {
            return Err(GameError::Forbidden("not a participant".into()));
        }
        Ok(session)
    }

    /// Sessions the account takes part in, newest first.
    pub fn list_for(&self, account_id: &str) -> GameResult<Vec<BattleSession>> {
        let mut sessions = self.inner.db.sessions_for(account_id)?;
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Stored events after `after`, for participants.
    pub fn events(
        &self,
        session_id: &str,
        account_id: &str,
        after: u64,
    ) -> GameResult<Vec<BattleEvent>> {
        self.get(session_id, account_id)?;
        self.inner.events.replay(session_id, after)
    }

    pub fn subscribe(
        &self,
        session_id: &str,
        account_id: &str,
        after: u64,
    ) -> GameResult<Subscription> {
        self.get(session_id, account_id)?;
        self.inner.events.subscribe(session_id, after)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    pub async fn create(&self, request: NewBattle) -> GameResult<BattleSession> {
        let NewBattle {
            challenger_id,
            opponent_id,
            stake_type,
            stake_percent,
            arena_name,
            weapon_id,
        } = request;

        if opponent_id.trim().is_empty() {
            return Err(GameError::InvalidInput("opponent_id must not be empty".into()));
        }
        if challenger_id == opponent_id {
            return Err(GameError::InvalidInput("cannot challenge yourself".into()));
        }
        if let Some(weapon_id) = weapon_id.as_deref() {
            self.inner.inventory.item_of_kind(weapon_id, ItemKind::Weapon)?;
            if self.inner.inventory.owned_quantity(&challenger_id, weapon_id)? == 0 {
                return Err(GameError::ItemNotOwned(weapon_id.to_string()));
            }
        }

        let reference_balance = self
            .inner
            .ledger
            .balance(&challenger_id)?
            .min(self.inner.ledger.balance(&opponent_id)?);
        let stake_amount = stake_percent.stake_of(reference_balance);

        let now = self.now();
        let session = BattleSession {
            session_id: Uuid::new_v4().to_string(),
            challenger_id,
            opponent_id,
            status: BattleStatus::Pending,
            stake_type,
            stake_percent,
            reference_balance,
            stake_amount,
            arena_name,
            challenger_weapon_id: weapon_id,
            attack_weapon_id: None,
            defender_defense_id: None,
            created_at: now,
            expires_at: now + self.inner.config.challenge_ttl,
            countdown_ends_at: None,
            attack_deadline: None,
            attack_submitted_at: None,
            defense_deadline: None,
            defense_submitted_at: None,
            winner_id: None,
            resolution: None,
            cancel_reason: None,
            history: vec![StatusChange {
                status: BattleStatus::Pending,
                at: now,
            }],
        };

        self.inner.db.write(|txn| -> GameResult<()> {
            txn.put_session(&session)?;
            Ok(())
        })?;
        self.arm_for(&session);

        info!(
            session_id = %session.session_id,
            challenger_id = %session.challenger_id,
            opponent_id = %session.opponent_id,
            stake_amount,
            "Battle created"
        );
        Ok(session)
    }

    /// Opponent accepts a pending challenge. Moves through `accepted` to `ready`.
    pub async fn accept(&self, session_id: &str, actor_id: &str) -> GameResult<BattleSession> {
        let _session_guard = self.inner.session_locks.lock(session_id).await;
        let mut session = self.load(session_id)?;

        if session.opponent_id != actor_id {
            return Err(GameError::Forbidden("only the opponent can accept".into()));
        }
        self.ensure_pending(&mut session)?;

        let now = self.now();
        session.transition(BattleStatus::Accepted, now)?;
        session.transition(BattleStatus::Ready, now)?;
        self.commit(&session, Effects::default(), |_, _, _| Ok(()))?;
        self.inner.scheduler.disarm(session_id);

        info!(session_id, opponent_id = actor_id, "Battle accepted");
        Ok(session)
    }

    /// Opponent turns down a pending challenge.
    pub async fn decline(&self, session_id: &str, actor_id: &str) -> GameResult<BattleSession> {
        let _session_guard = self.inner.session_locks.lock(session_id).await;
        let mut session = self.load(session_id)?;

        if session.opponent_id != actor_id {
            return Err(GameError::Forbidden("only the opponent can decline".into()));
        }
        self.ensure_pending(&mut session)?;
        self.cancel(&mut session, CancelReason::Declined)?;
        Ok(session)
    }

    /// Challenger takes back a pending challenge.
    pub async fn withdraw(&self, session_id: &str, actor_id: &str) -> GameResult<BattleSession> {
        let _session_guard = self.inner.session_locks.lock(session_id).await;
        let mut session = self.load(session_id)?;

        if session.challenger_id != actor_id {
            return Err(GameError::Forbidden("only the challenger can withdraw".into()));
        }
        self.ensure_pending(&mut session)?;
        self.cancel(&mut session, CancelReason::Withdrawn)?;
        Ok(session)
    }

    /// `ready -> countdown`; the session turns `active` when the countdown ends.
    pub async fn start_countdown(
        &self,
        session_id: &str,
        actor_id: &str,
    ) -> GameResult<BattleSession> {
        let _session_guard = self.inner.session_locks.lock(session_id).await;
        let mut session = self.load(session_id)?;

        if !session.is_participant(actor_id) {
            return Err(GameError::Forbidden("not a participant".into()));
        }
        if session.status != BattleStatus::Ready {
            return Err(GameError::InvalidState(format!(
                "countdown requires ready, session is {}",
                session.status
            )));
        }

        let now = self.now();
        session.transition(BattleStatus::Countdown, now)?;
        session.countdown_ends_at = Some(now + self.inner.config.countdown);
        self.commit(&session, Effects::default(), |_, _, _| Ok(()))?;
        self.arm_for(&session);

        info!(session_id, "Battle countdown started");
        Ok(session)
    }

    /// Challenger attacks, optionally consuming one weapon, and opens the
    /// defense window.
    pub async fn submit_attack(
        &self,
        session_id: &str,
        actor_id: &str,
        weapon_id: Option<&str>,
    ) -> GameResult<BattleSession> {
        let _session_guard = self.inner.session_locks.lock(session_id).await;
        let mut session = self.load(session_id)?;

        if session.challenger_id != actor_id {
            return Err(GameError::Forbidden("only the challenger can attack".into()));
        }
        match session.status {
            BattleStatus::Active => {}
            BattleStatus::AwaitDefense => return Err(GameError::AlreadySubmitted),
            BattleStatus::Resolved if session.attack_submitted_at.is_some() => {
                return Err(GameError::AlreadySubmitted)
            }
            BattleStatus::Resolved => return Err(GameError::AlreadyResolved),
            other => {
                return Err(GameError::InvalidState(format!(
                    "attack requires active, session is {other}"
                )))
            }
        }

        let now = self.now();
        if session.attack_deadline.is_some_and(|deadline| now >= deadline) {
            self.resolve_locked(&mut session, None, ResolutionCause::AttackTimeout)
                .await?;
            return Err(GameError::WindowExpired);
        }

        if let Some(weapon_id) = weapon_id {
            self.inner.inventory.item_of_kind(weapon_id, ItemKind::Weapon)?;
        }

        let _account_guard = self
            .inner
            .ledger
            .lock_accounts(&[&session.challenger_id])
            .await;

        let defense_deadline = now + self.inner.config.defense_window;
        session.transition(BattleStatus::AwaitDefense, now)?;
        session.attack_weapon_id = weapon_id.map(str::to_string);
        session.attack_submitted_at = Some(now);
        session.defense_deadline = Some(defense_deadline);

        let attacker_id = session.challenger_id.clone();
        let defender_id = session.opponent_id.clone();
        let weapon = weapon_id.map(str::to_string);

        self.commit(&session, Effects::default(), |registry, txn, effects| {
            if let Some(weapon_id) = weapon.as_deref() {
                registry.consume_owned(txn, &attacker_id, weapon_id)?;
            }
            effects.events.push(registry.inner.events.append_in(
                txn,
                session_id,
                BattleEventKind::AttackStarted {
                    attacker_id: attacker_id.clone(),
                    weapon_id: weapon.clone(),
                },
            )?);
            effects.events.push(registry.inner.events.append_in(
                txn,
                session_id,
                BattleEventKind::DefenseNeeded {
                    defender_id: defender_id.clone(),
                    defense_deadline,
                },
            )?);
            Ok(())
        })?;
        self.arm_for(&session);

        info!(
            session_id,
            attacker_id = %session.challenger_id,
            weapon_id = ?session.attack_weapon_id,
            defense_deadline = %defense_deadline,
            "Attack submitted, defense window open"
        );
        Ok(session)
    }

    /// Opponent defends, optionally consuming one defense item. Resolves the
    /// battle immediately.
    pub async fn submit_defense(
        &self,
        session_id: &str,
        actor_id: &str,
        defense_item_id: Option<&str>,
    ) -> GameResult<OutcomePreview> {
        let _session_guard = self.inner.session_locks.lock(session_id).await;
        let mut session = self.load(session_id)?;

        if session.opponent_id != actor_id {
            return Err(GameError::Forbidden("only the defender can defend".into()));
        }
        match session.status {
            BattleStatus::AwaitDefense => {}
            BattleStatus::Resolved => {
                return Err(match session.resolution.as_ref().map(|r| r.cause) {
                    Some(ResolutionCause::DefenseTimeout) => GameError::WindowExpired,
                    Some(ResolutionCause::Defended) => GameError::AlreadySubmitted,
                    _ => GameError::AlreadyResolved,
                })
            }
            other => {
                return Err(GameError::InvalidState(format!(
                    "defense requires await_defense, session is {other}"
                )))
            }
        }

        let now = self.now();
        if session.defense_deadline.is_none_or(|deadline| now >= deadline) {
            // Past the window: resolve as undefended, reject this submission.
            self.resolve_locked(&mut session, None, ResolutionCause::DefenseTimeout)
                .await?;
            return Err(GameError::WindowExpired);
        }

        let defense = match defense_item_id {
            Some(item_id) => Some(
                self.inner
                    .inventory
                    .item_of_kind(item_id, ItemKind::Defense)?
                    .clone(),
            ),
            None => None,
        };

        self.resolve_locked(&mut session, defense.as_ref(), ResolutionCause::Defended)
            .await?;
        self.preview(&session)
    }

    // =========================================================================
    // Deadlines
    // =========================================================================

    /// Handle whatever deadline the session is waiting on, if it has passed.
    ///
    /// Called by timers and the sweeper. Safe to call at any time: a session
    /// whose deadline is still ahead is simply re-armed.
    pub async fn on_deadline(&self, session_id: &str) -> GameResult<()> {
        let _session_guard = self.inner.session_locks.lock(session_id).await;
        let Some(mut session) = self.inner.db.session(session_id)? else {
            return Ok(());
        };
        let Some((kind, deadline)) = session.next_deadline() else {
            return Ok(());
        };

        let now = self.now();
        if now < deadline {
            self.arm_for(&session);
            return Ok(());
        }

        match kind {
            DeadlineKind::ChallengeExpiry => {
                self.cancel(&mut session, CancelReason::Expired)?;
            }
            DeadlineKind::CountdownEnd => {
                session.transition(BattleStatus::Active, now)?;
                session.attack_deadline = Some(now + self.inner.config.attack_window);
                self.commit(&session, Effects::default(), |_, _, _| Ok(()))?;
                self.arm_for(&session);
                info!(session_id, "Battle active");
            }
            DeadlineKind::AttackWindow => {
                self.resolve_locked(&mut session, None, ResolutionCause::AttackTimeout)
                    .await?;
            }
            DeadlineKind::DefenseWindow => {
                self.resolve_locked(&mut session, None, ResolutionCause::DefenseTimeout)
                    .await?;
            }
        }
        Ok(())
    }

    /// Handle every overdue session. Returns how many were due.
    pub async fn sweep(&self) -> GameResult<usize> {
        let due = self.inner.db.due_sessions(self.now())?;

        for session_id in &due {
            if let Err(e) = self.on_deadline(session_id).await {
                warn!(session_id = %session_id, error = %e, "Failed to handle overdue session");
            }
        }
        Ok(due.len())
    }

    /// Re-arm timers for every live session, after a restart.
    pub fn rearm_all(&self) -> GameResult<usize> {
        let mut armed = 0;
        for session in self.inner.db.live_sessions()? {
            self.arm_for(&session);
            armed += 1;
        }
        info!(armed, "Session timers recovered");
        Ok(armed)
    }

    fn arm_for(&self, session: &BattleSession) {
        let Some((kind, deadline)) = session.next_deadline() else {
            self.inner.scheduler.disarm(&session.session_id);
            return;
        };

        let delay = (deadline - self.now())
            .to_std()
            .unwrap_or(StdDuration::ZERO);
        let registry = self.clone();
        let session_id = session.session_id.clone();
        self.inner
            .scheduler
            .arm(&session.session_id, kind, delay, async move {
                if let Err(e) = registry.on_deadline(&session_id).await {
                    warn!(session_id = %session_id, error = %e, "Deadline handling failed");
                }
            });
    }

    // =========================================================================
    // Internals (session lock held)
    // =========================================================================

    /// Pending and not yet expired. An expired challenge is cancelled here.
    fn ensure_pending(&self, session: &mut BattleSession) -> GameResult<()> {
        match session.status {
            BattleStatus::Pending => {}
            BattleStatus::Cancelled if session.cancel_reason == Some(CancelReason::Expired) => {
                return Err(GameError::Expired)
            }
            other => {
                return Err(GameError::InvalidState(format!(
                    "challenge is no longer pending ({other})"
                )))
            }
        }

        if self.now() >= session.expires_at {
            self.cancel(session, CancelReason::Expired)?;
            return Err(GameError::Expired);
        }
        Ok(())
    }

    fn cancel(&self, session: &mut BattleSession, reason: CancelReason) -> GameResult<()> {
        session.transition(BattleStatus::Cancelled, self.now())?;
        session.cancel_reason = Some(reason);

        let session_id = session.session_id.clone();
        self.commit(session, Effects::default(), |registry, txn, effects| {
            effects.events.push(registry.inner.events.append_in(
                txn,
                &session_id,
                BattleEventKind::BattleCancelled { reason },
            )?);
            Ok(())
        })?;
        self.inner.scheduler.disarm(&session.session_id);

        info!(session_id = %session.session_id, ?reason, "Battle cancelled");
        Ok(())
    }

    /// Score, settle the stake and close the session.
    async fn resolve_locked(
        &self,
        session: &mut BattleSession,
        defense: Option<&CatalogItem>,
        cause: ResolutionCause,
    ) -> GameResult<()> {
        let _account_guard = self
            .inner
            .ledger
            .lock_accounts(&[&session.challenger_id, &session.opponent_id])
            .await;

        let now = self.now();
        let (outcome, attack_score, defense_score) = match cause {
            ResolutionCause::AttackTimeout => (BattleOutcome::AttackerForfeit, 0, 0),
            ResolutionCause::Defended | ResolutionCause::DefenseTimeout => {
                let weapon = session
                    .attack_weapon_id
                    .as_deref()
                    .and_then(|id| self.inner.inventory.catalog().get(id));
                let attack = outcome::attack_score(weapon);
                let defense = outcome::defense_score(defense);
                (outcome::decide(attack, defense), attack, defense)
            }
        };

        let (winner_id, loser_id) = match outcome {
            BattleOutcome::AttackerWins => (session.challenger_id.clone(), session.opponent_id.clone()),
            BattleOutcome::DefenderWins | BattleOutcome::AttackerForfeit => {
                (session.opponent_id.clone(), session.challenger_id.clone())
            }
        };

        session.transition(BattleStatus::Resolved, now)?;
        if cause == ResolutionCause::Defended {
            session.defense_submitted_at = Some(now);
            session.defender_defense_id = defense.map(|item| item.item_id.clone());
        }
        session.winner_id = Some(winner_id.clone());

        let session_id = session.session_id.clone();
        let stake_amount = session.stake_amount;
        let defender_id = session.opponent_id.clone();
        let defense_item_id = session.defender_defense_id.clone();

        let mut resolution = Resolution {
            outcome,
            cause,
            attack_score,
            defense_score,
            stake_transferred: 0,
            resolved_at: now,
        };

        let (amount, effects) = self.inner.db.write(|txn| -> GameResult<(u64, Effects)> {
            let mut effects = Effects::default();
            if let Some(item_id) = defense_item_id.as_deref() {
                self.consume_owned(txn, &defender_id, item_id)?;
            }

            let loser_balance =
                self.inner
                    .ledger
                    .balance_in(txn, &loser_id, &mut effects.journal)?;
            let amount = outcome::settlement_amount(stake_amount, loser_balance);
            if amount > 0 {
                self.inner.ledger.debit_in(
                    txn,
                    &loser_id,
                    amount,
                    LedgerReason::BattleStake,
                    Some(&session_id),
                    &mut effects.journal,
                )?;
                self.inner.ledger.credit_in(
                    txn,
                    &winner_id,
                    amount,
                    LedgerReason::BattleWinnings,
                    Some(&session_id),
                    &mut effects.journal,
                )?;
            }

            let mut settled = session.clone();
            settled.resolution = Some(Resolution {
                stake_transferred: amount,
                ..resolution.clone()
            });
            txn.put_session(&settled)?;

            effects.events.push(self.inner.events.append_in(
                txn,
                &session_id,
                BattleEventKind::BattleResolved {
                    outcome,
                    winner_id: winner_id.clone(),
                    stake_transferred: amount,
                },
            )?);
            Ok((amount, effects))
        })?;

        resolution.stake_transferred = amount;
        session.resolution = Some(resolution);
        self.publish(effects);
        self.inner.scheduler.disarm(&session_id);

        info!(
            session_id = %session_id,
            ?outcome,
            ?cause,
            winner_id = %winner_id,
            attack_score,
            defense_score,
            stake_transferred = amount,
            "Battle resolved"
        );
        Ok(())
    }

    /// Consume one unit of an item the account must own.
    fn consume_owned(&self, txn: &GameTxn<'_>, account_id: &str, item_id: &str) -> GameResult<()> {
        match self.inner.inventory.consume_in(txn, account_id, item_id, 1) {
            Ok(_) => Ok(()),
            Err(GameError::InsufficientQuantity { .. }) => {
                Err(GameError::ItemNotOwned(item_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Write the session plus whatever `extra` adds, in one transaction, then publish.
    fn commit<F>(&self, session: &BattleSession, mut effects: Effects, extra: F) -> GameResult<()>
    where
        F: FnOnce(&Self, &GameTxn<'_>, &mut Effects) -> GameResult<()>,
    {
        self.inner.db.write(|txn| -> GameResult<()> {
            extra(self, txn, &mut effects)?;
            txn.put_session(session)?;
            Ok(())
        })?;
        self.publish(effects);
        Ok(())
    }

    fn publish(&self, effects: Effects) {
        self.inner.ledger.publish(&effects.journal);
        self.inner.events.publish(&effects.events);
    }

    fn preview(&self, session: &BattleSession) -> GameResult<OutcomePreview> {
        let resolution = session
            .resolution
            .as_ref()
            .ok_or_else(|| GameError::InvalidState("session is not resolved".into()))?;
        Ok(OutcomePreview {
            session_id: session.session_id.clone(),
            outcome: resolution.outcome,
            winner_id: session.winner_id.clone().unwrap_or_default(),
            attack_score: resolution.attack_score,
            defense_score: resolution.defense_score,
            stake_transferred: resolution.stake_transferred,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, TokioClock};
    use crate::inventory::Catalog;
    use crate::shop::{LedgerShopStore, ShopProcessor};
    use crate::wallet::Notifier;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        registry: BattleRegistry,
        ledger: Arc<WalletLedger>,
        inventory: Arc<Inventory>,
        db: Arc<GameDatabase>,
        clock: Arc<ManualClock>,
        _dir: tempfile::TempDir,
    }

    fn build(db: Arc<GameDatabase>, clock: Arc<dyn Clock>) -> (BattleRegistry, Arc<WalletLedger>, Arc<Inventory>) {
        let locks = Arc::new(LockRegistry::new());
        let ledger = Arc::new(WalletLedger::new(
            db.clone(),
            locks.clone(),
            Notifier::new(),
            clock.clone(),
            0,
        ));
        let inventory = Arc::new(Inventory::new(
            db.clone(),
            Arc::new(Catalog::builtin()),
            locks,
            clock.clone(),
        ));
        let registry = BattleRegistry::new(
            db.clone(),
            ledger.clone(),
            inventory.clone(),
            EventChannel::new(db, clock.clone()),
            Scheduler::new(CancellationToken::new()),
            clock,
            BattleConfig::default(),
        );
        (registry, ledger, inventory)
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(GameDatabase::open(&dir.path().join("battle.redb")).unwrap());
        let clock = Arc::new(ManualClock::default());
        let (registry, ledger, inventory) = build(db.clone(), clock.clone());
        Harness {
            registry,
            ledger,
            inventory,
            db,
            clock,
            _dir: dir,
        }
    }

    async fn fund(h: &Harness, account: &str, amount: u64) {
        h.ledger
            .credit(account, amount, LedgerReason::AdminGrant)
            .await
            .unwrap();
    }

    fn challenge(percent: u8) -> NewBattle {
        NewBattle {
            challenger_id: "alice".into(),
            opponent_id: "bob".into(),
            stake_type: StakeType::M1u,
            stake_percent: StakePercent::try_from(percent).unwrap(),
            arena_name: Some("Old Mill".into()),
            weapon_id: None,
        }
    }

    /// Drive a fresh challenge to `active`.
    async fn active_battle(h: &Harness, percent: u8) -> BattleSession {
        let session = h.registry.create(challenge(percent)).await.unwrap();
        let id = session.session_id.clone();
        h.registry.accept(&id, "bob").await.unwrap();
        h.registry.start_countdown(&id, "alice").await.unwrap();
        h.clock.advance(Duration::seconds(3));
        h.registry.on_deadline(&id).await.unwrap();
        let session = h.registry.get(&id, "alice").unwrap();
        assert_eq!(session.status, BattleStatus::Active);
        session
    }

    #[tokio::test]
    async fn full_lifecycle_settles_stake() {
        let h = harness();
        fund(&h, "alice", 1000).await;
        fund(&h, "bob", 1000).await;
        h.inventory.grant_item("alice", "wpn-crossbow", 1).await.unwrap();
        h.inventory.grant_item("bob", "def-buckler", 1).await.unwrap();

        let session = active_battle(&h, 50).await;
        let id = session.session_id.as_str();
        assert_eq!(session.stake_amount, 500);

        let attacked = h
            .registry
            .submit_attack(id, "alice", Some("wpn-crossbow"))
            .await
            .unwrap();
        assert_eq!(attacked.status, BattleStatus::AwaitDefense);
        assert_eq!(
            attacked.defense_deadline,
            Some(h.clock.now() + Duration::seconds(15))
        );
        assert_eq!(h.inventory.owned_quantity("alice", "wpn-crossbow").unwrap(), 0);

        let preview = h
            .registry
            .submit_defense(id, "bob", Some("def-buckler"))
            .await
            .unwrap();
        // crossbow 61 vs buckler 10
        assert_eq!(preview.outcome, BattleOutcome::AttackerWins);
        assert_eq!(preview.winner_id, "alice");
        assert_eq!(preview.attack_score, 61);
        assert_eq!(preview.defense_score, 10);
        assert_eq!(preview.stake_transferred, 500);

        assert_eq!(h.ledger.balance("alice").unwrap(), 1500);
        assert_eq!(h.ledger.balance("bob").unwrap(), 500);
        assert_eq!(h.inventory.owned_quantity("bob", "def-buckler").unwrap(), 0);

        let resolved = h.registry.get(id, "bob").unwrap();
        let visited: Vec<BattleStatus> = resolved.history.iter().map(|c| c.status).collect();
        assert_eq!(
            visited,
            vec![
                BattleStatus::Pending,
                BattleStatus::Accepted,
                BattleStatus::Ready,
                BattleStatus::Countdown,
                BattleStatus::Active,
                BattleStatus::AwaitDefense,
                BattleStatus::Resolved,
            ]
        );
        assert_eq!(resolved.defender_defense_id.as_deref(), Some("def-buckler"));

        let events = h.registry.events(id, "alice", 0).unwrap();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(matches!(events[0].kind, BattleEventKind::AttackStarted { .. }));
        assert!(matches!(events[1].kind, BattleEventKind::DefenseNeeded { .. }));
        assert!(matches!(
            events[2].kind,
            BattleEventKind::BattleResolved { stake_transferred: 500, .. }
        ));
    }

    #[tokio::test]
    async fn stake_is_fixed_at_creation() {
        let h = harness();
        fund(&h, "alice", 1000).await;
        fund(&h, "bob", 1000).await;

        let session = active_battle(&h, 50).await;
        assert_eq!(session.reference_balance, 1000);
        assert_eq!(session.stake_amount, 500);

        fund(&h, "alice", 5000).await;
        fund(&h, "bob", 2000).await;

        let id = session.session_id.as_str();
        h.registry.submit_attack(id, "alice", None).await.unwrap();
        let preview = h.registry.submit_defense(id, "bob", None).await.unwrap();

        // Unarmed 10 beats no defense 0.
        assert_eq!(preview.outcome, BattleOutcome::AttackerWins);
        assert_eq!(preview.stake_transferred, 500);
        assert_eq!(h.ledger.balance("bob").unwrap(), 2500);
    }

    #[tokio::test]
    async fn settlement_never_overdraws_loser() {
        let h = harness();
        fund(&h, "alice", 1000).await;
        fund(&h, "bob", 1000).await;
        let session = active_battle(&h, 75).await;
        let id = session.session_id.as_str();

        // Bob spends most of his balance mid-battle.
        h.ledger.debit("bob", 900, LedgerReason::Purchase).await.unwrap();

        h.registry.submit_attack(id, "alice", None).await.unwrap();
        let preview = h.registry.submit_defense(id, "bob", None).await.unwrap();
        assert_eq!(preview.stake_transferred, 100);
        assert_eq!(h.ledger.balance("bob").unwrap(), 0);
        assert_eq!(h.ledger.balance("alice").unwrap(), 1100);
    }

    #[tokio::test]
    async fn create_validates_input() {
        let h = harness();
        let mut own = challenge(25);
        own.opponent_id = "alice".into();
        assert!(matches!(
            h.registry.create(own).await.unwrap_err(),
            GameError::InvalidInput(_)
        ));

        let mut armed = challenge(25);
        armed.weapon_id = Some("wpn-crossbow".into());
        assert_eq!(
            h.registry.create(armed.clone()).await.unwrap_err(),
            GameError::ItemNotOwned("wpn-crossbow".into())
        );

        h.inventory.grant_item("alice", "wpn-crossbow", 1).await.unwrap();
        let session = h.registry.create(armed).await.unwrap();
        assert_eq!(session.challenger_weapon_id.as_deref(), Some("wpn-crossbow"));
        assert_eq!(session.status, BattleStatus::Pending);
        assert_eq!(session.expires_at, session.created_at + Duration::seconds(300));
    }

    #[tokio::test]
    async fn accept_checks_actor_and_expiry() {
        let h = harness();
        let session = h.registry.create(challenge(25)).await.unwrap();
        let id = session.session_id.as_str();

        assert!(matches!(
            h.registry.accept(id, "alice").await.unwrap_err(),
            GameError::Forbidden(_)
        ));
        assert!(matches!(
            h.registry.accept(id, "mallory").await.unwrap_err(),
            GameError::Forbidden(_)
        ));

        h.clock.advance(Duration::seconds(301));
        assert_eq!(h.registry.accept(id, "bob").await.unwrap_err(), GameError::Expired);
        assert_eq!(h.registry.accept(id, "bob").await.unwrap_err(), GameError::Expired);

        let cancelled = h.registry.get(id, "bob").unwrap();
        assert_eq!(cancelled.status, BattleStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason, Some(CancelReason::Expired));

        let events = h.registry.events(id, "bob", 0).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[tokio::test]
    async fn sweep_cancels_expired_challenges() {
        let h = harness();
        fund(&h, "alice", 100).await;
        let session = h.registry.create(challenge(50)).await.unwrap();

        assert_eq!(h.registry.sweep().await.unwrap(), 0);
        h.clock.advance(Duration::seconds(300));
        assert_eq!(h.registry.sweep().await.unwrap(), 1);

        let cancelled = h.registry.get(&session.session_id, "alice").unwrap();
        assert_eq!(cancelled.status, BattleStatus::Cancelled);
        assert_eq!(h.ledger.balance("alice").unwrap(), 100);
        assert_eq!(h.registry.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn decline_and_withdraw_cancel_pending() {
        let h = harness();
        let first = h.registry.create(challenge(25)).await.unwrap();
        assert!(matches!(
            h.registry.decline(&first.session_id, "alice").await.unwrap_err(),
            GameError::Forbidden(_)
        ));
        let declined = h.registry.decline(&first.session_id, "bob").await.unwrap();
        assert_eq!(declined.cancel_reason, Some(CancelReason::Declined));

        let second = h.registry.create(challenge(25)).await.unwrap();
        let withdrawn = h.registry.withdraw(&second.session_id, "alice").await.unwrap();
        assert_eq!(withdrawn.cancel_reason, Some(CancelReason::Withdrawn));

        // Terminal sessions do not move again.
        assert!(matches!(
            h.registry.accept(&second.session_id, "bob").await.unwrap_err(),
            GameError::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn attack_rules() {
        let h = harness();
        let session = h.registry.create(challenge(25)).await.unwrap();
        let id = session.session_id.as_str();
        assert!(matches!(
            h.registry.submit_attack(id, "alice", None).await.unwrap_err(),
            GameError::InvalidState(_)
        ));
        h.registry.withdraw(id, "alice").await.unwrap();

        let session = active_battle(&h, 25).await;
        let id = session.session_id.as_str();

        assert!(matches!(
            h.registry.submit_attack(id, "bob", None).await.unwrap_err(),
            GameError::Forbidden(_)
        ));
        assert_eq!(
            h.registry
                .submit_attack(id, "alice", Some("wpn-stick"))
                .await
                .unwrap_err(),
            GameError::ItemNotOwned("wpn-stick".into())
        );
        assert!(matches!(
            h.registry
                .submit_attack(id, "alice", Some("def-buckler"))
                .await
                .unwrap_err(),
            GameError::InvalidItem { .. }
        ));
        // Failed attempts leave the session untouched.
        assert_eq!(h.registry.get(id, "alice").unwrap().status, BattleStatus::Active);
        assert!(h.registry.events(id, "alice", 0).unwrap().is_empty());

        h.registry.submit_attack(id, "alice", None).await.unwrap();
        assert_eq!(
            h.registry.submit_attack(id, "alice", None).await.unwrap_err(),
            GameError::AlreadySubmitted
        );
    }

    #[tokio::test]
    async fn second_defense_is_rejected() {
        let h = harness();
        let session = active_battle(&h, 25).await;
        let id = session.session_id.clone();
        h.registry.submit_attack(&id, "alice", None).await.unwrap();

        let a = {
            let registry = h.registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.submit_defense(&id, "bob", None).await })
        };
        let b = {
            let registry = h.registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.submit_defense(&id, "bob", None).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| r.as_ref().err() == Some(&GameError::AlreadySubmitted)));

        // Exactly one resolution event.
        let events = h.registry.events(&id, "bob", 0).unwrap();
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn late_defense_resolves_without_defense() {
        let h = harness();
        fund(&h, "alice", 400).await;
        fund(&h, "bob", 400).await;
        h.inventory.grant_item("bob", "def-aegis", 1).await.unwrap();

        let session = active_battle(&h, 50).await;
        let id = session.session_id.as_str();
        h.registry.submit_attack(id, "alice", None).await.unwrap();

        h.clock.advance(Duration::seconds(20));
        assert_eq!(
            h.registry
                .submit_defense(id, "bob", Some("def-aegis"))
                .await
                .unwrap_err(),
            GameError::WindowExpired
        );

        let resolved = h.registry.get(id, "bob").unwrap();
        assert_eq!(resolved.status, BattleStatus::Resolved);
        let resolution = resolved.resolution.unwrap();
        assert_eq!(resolution.cause, ResolutionCause::DefenseTimeout);
        assert_eq!(resolution.defense_score, 0);
        assert_eq!(resolved.winner_id.as_deref(), Some("alice"));
        // The rejected defense item was not consumed.
        assert_eq!(h.inventory.owned_quantity("bob", "def-aegis").unwrap(), 1);
        assert_eq!(h.ledger.balance("alice").unwrap(), 600);

        assert_eq!(
            h.registry.submit_defense(id, "bob", None).await.unwrap_err(),
            GameError::WindowExpired
        );
    }

    #[tokio::test]
    async fn missing_attack_forfeits() {
        let h = harness();
        fund(&h, "alice", 200).await;
        fund(&h, "bob", 200).await;
        let session = active_battle(&h, 50).await;
        let id = session.session_id.as_str();

        h.clock.advance(Duration::seconds(61));
        assert_eq!(h.registry.sweep().await.unwrap(), 1);

        let resolved = h.registry.get(id, "alice").unwrap();
        assert_eq!(
            resolved.resolution.as_ref().map(|r| r.outcome),
            Some(BattleOutcome::AttackerForfeit)
        );
        assert_eq!(resolved.winner_id.as_deref(), Some("bob"));
        assert_eq!(h.ledger.balance("bob").unwrap(), 300);
        assert_eq!(
            h.registry.submit_defense(id, "bob", None).await.unwrap_err(),
            GameError::AlreadyResolved
        );
        assert_eq!(
            h.registry.submit_attack(id, "alice", None).await.unwrap_err(),
            GameError::AlreadyResolved
        );
    }

    #[tokio::test]
    async fn deadline_index_holds_only_live_sessions() {
        let h = harness();
        let finished = active_battle(&h, 25).await;
        h.registry
            .submit_attack(&finished.session_id, "alice", None)
            .await
            .unwrap();
        h.registry
            .submit_defense(&finished.session_id, "bob", None)
            .await
            .unwrap();
        let pending = h.registry.create(challenge(25)).await.unwrap();

        let live: Vec<String> = h
            .db
            .live_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(live, vec![pending.session_id.clone()]);
        assert_eq!(h.registry.list_for("alice").unwrap().len(), 2);
        assert_eq!(h.registry.list_for("bob").unwrap()[0].session_id, pending.session_id);
        assert!(h.registry.list_for("carol").unwrap().is_empty());

        h.clock.advance(Duration::seconds(301));
        assert_eq!(h.registry.sweep().await.unwrap(), 1);
        assert!(h.db.live_sessions().unwrap().is_empty());
        assert_eq!(h.registry.sweep().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn purchase_and_settlement_do_not_interleave() {
        for _ in 0..10 {
            let h = harness();
            fund(&h, "alice", 1000).await;
            fund(&h, "bob", 1000).await;
            let session = active_battle(&h, 75).await;
            let id = session.session_id.clone();
            assert_eq!(session.stake_amount, 750);
            h.registry.submit_attack(&id, "alice", None).await.unwrap();

            let shop = Arc::new(ShopProcessor::new(
                Arc::new(LedgerShopStore::new(
                    h.db.clone(),
                    h.ledger.clone(),
                    h.inventory.clone(),
                    h.clock.clone(),
                )),
                h.ledger.clone(),
                h.inventory.clone(),
                h.clock.clone(),
            ));

            let purchase = {
                let shop = shop.clone();
                tokio::spawn(async move { shop.purchase("bob", "wpn-storm-lance", 1, None).await })
            };
            let defense = {
                let registry = h.registry.clone();
                tokio::spawn(async move { registry.submit_defense(&id, "bob", None).await })
            };
            let purchase = purchase.await.unwrap();
            let preview = defense.await.unwrap().unwrap();
            assert_eq!(preview.outcome, BattleOutcome::AttackerWins);

            let bob = h.ledger.balance("bob").unwrap();
            match purchase {
                // Bought first: 350 left, all of it moves.
                Ok(_) => {
                    assert_eq!(preview.stake_transferred, 350);
                    assert_eq!(bob, 0);
                    assert_eq!(h.inventory.owned_quantity("bob", "wpn-storm-lance").unwrap(), 1);
                }
                // Settled first: 250 left, the lance costs 650.
                Err(e) => {
                    assert!(matches!(e, GameError::InsufficientFunds { .. }), "{e:?}");
                    assert_eq!(preview.stake_transferred, 750);
                    assert_eq!(bob, 250);
                    assert_eq!(h.inventory.owned_quantity("bob", "wpn-storm-lance").unwrap(), 0);
                }
            }
            assert_eq!(
                h.ledger.balance("alice").unwrap(),
                1000 + preview.stake_transferred
            );

            let net: i64 = h
                .ledger
                .history("bob", 500)
                .unwrap()
                .iter()
                .map(|entry| entry.delta)
                .sum();
            assert_eq!(net, bob as i64);
        }
    }

    #[tokio::test]
    async fn rearm_restores_timers_after_restart() {
        let h = harness();
        let pending = h.registry.create(challenge(25)).await.unwrap();
        let active = active_battle(&h, 25).await;

        let (restarted, _, _) = build(h.db.clone(), h.clock.clone());
        assert!(restarted.scheduler().is_empty());
        assert_eq!(restarted.rearm_all().unwrap(), 2);
        assert_eq!(
            restarted.scheduler().armed(&pending.session_id),
            Some(DeadlineKind::ChallengeExpiry)
        );
        assert_eq!(
            restarted.scheduler().armed(&active.session_id),
            Some(DeadlineKind::AttackWindow)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn defense_window_closes_on_timer() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(GameDatabase::open(&dir.path().join("timer.redb")).unwrap());
        let (registry, ledger, _inventory) = build(db, Arc::new(TokioClock::new()));
        ledger.credit("alice", 100, LedgerReason::AdminGrant).await.unwrap();
        ledger.credit("bob", 100, LedgerReason::AdminGrant).await.unwrap();

        let session = registry.create(challenge(50)).await.unwrap();
        let id = session.session_id.as_str();
        registry.accept(id, "bob").await.unwrap();
        registry.start_countdown(id, "bob").await.unwrap();

        // Countdown timer moves the session to active.
        tokio::time::sleep(std::time::Duration::from_secs(4)).await;
        assert_eq!(registry.get(id, "alice").unwrap().status, BattleStatus::Active);

        registry.submit_attack(id, "alice", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(16)).await;

        let resolved = registry.get(id, "alice").unwrap();
        assert_eq!(resolved.status, BattleStatus::Resolved);
        assert_eq!(
            resolved.resolution.as_ref().map(|r| r.cause),
            Some(ResolutionCause::DefenseTimeout)
        );
        assert_eq!(ledger.balance("alice").unwrap(), 150);
        assert_eq!(
            registry.submit_defense(id, "bob", None).await.unwrap_err(),
            GameError::WindowExpired
        );
        assert!(registry.scheduler().is_empty());
    }
}
