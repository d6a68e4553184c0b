// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Battle session state.
//!
//! ```text
//! pending ─▶ accepted ─▶ ready ─▶ countdown ─▶ active ─▶ await_defense ─▶ resolved
//!    │                                            │
//!    └─▶ cancelled                                └─▶ resolved (attacker forfeit)
//! ```
//!
//! `resolved` and `cancelled` are terminal. Terminal sessions are retained
//! unchanged for history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{GameError, GameResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    Pending,
    Accepted,
    Ready,
    Countdown,
    Active,
    AwaitDefense,
    Resolved,
    Cancelled,
}

impl BattleStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BattleStatus::Resolved | BattleStatus::Cancelled)
    }

    /// Forward-only transition table.
    pub fn can_transition_to(self, next: BattleStatus) -> bool {
        use BattleStatus::*;
        match (self, next) {
            (Pending, Accepted) | (Pending, Cancelled) => true,
            (Accepted, Ready) => true,
            (Ready, Countdown) => true,
            (Countdown, Active) => true,
            (Active, AwaitDefense) | (Active, Resolved) => true,
            (AwaitDefense, Resolved) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BattleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BattleStatus::Pending => "pending",
            BattleStatus::Accepted => "accepted",
            BattleStatus::Ready => "ready",
            BattleStatus::Countdown => "countdown",
            BattleStatus::Active => "active",
            BattleStatus::AwaitDefense => "await_defense",
            BattleStatus::Resolved => "resolved",
            BattleStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Currency wagered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StakeType {
    #[default]
    M1u,
}

/// Share of the reference balance at risk: 25, 50 or 75 percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "u8", into = "u8")]
#[schema(value_type = u8)]
pub struct StakePercent(u8);

impl StakePercent {
    pub fn value(self) -> u8 {
        self.0
    }

    /// Stake derived from a reference balance, rounded down.
    pub fn stake_of(self, reference_balance: u64) -> u64 {
        (u128::from(reference_balance) * u128::from(self.0) / 100) as u64
    }
}

impl TryFrom<u8> for StakePercent {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            25 | 50 | 75 => Ok(Self(value)),
            other => Err(format!("stake_percent must be 25, 50 or 75, got {other}")),
        }
    }
}

impl From<StakePercent> for u8 {
    fn from(value: StakePercent) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BattleOutcome {
    AttackerWins,
    DefenderWins,
    /// No attack arrived within the attack window.
    AttackerForfeit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Expired,
    Declined,
    Withdrawn,
}

/// What closed the battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionCause {
    Defended,
    DefenseTimeout,
    AttackTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Resolution {
    pub outcome: BattleOutcome,
    pub cause: ResolutionCause,
    pub attack_score: u64,
    pub defense_score: u64,
    pub stake_transferred: u64,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusChange {
    pub status: BattleStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BattleSession {
    pub session_id: String,
    pub challenger_id: String,
    pub opponent_id: String,
    pub status: BattleStatus,
    pub stake_type: StakeType,
    pub stake_percent: StakePercent,
    /// min(challenger, opponent) balance captured at creation.
    pub reference_balance: u64,
    /// Fixed at creation; settlement never re-reads balances to size it.
    pub stake_amount: u64,
    pub arena_name: Option<String>,
    /// Weapon the challenger declared when issuing the challenge.
    pub challenger_weapon_id: Option<String>,
    /// Weapon consumed by the attack, if any.
    pub attack_weapon_id: Option<String>,
    pub defender_defense_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub countdown_ends_at: Option<DateTime<Utc>>,
    pub attack_deadline: Option<DateTime<Utc>>,
    pub attack_submitted_at: Option<DateTime<Utc>>,
    pub defense_deadline: Option<DateTime<Utc>>,
    pub defense_submitted_at: Option<DateTime<Utc>>,
    pub winner_id: Option<String>,
    pub resolution: Option<Resolution>,
    pub cancel_reason: Option<CancelReason>,
    pub history: Vec<StatusChange>,
}

/// Which deadline a session is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineKind {
    ChallengeExpiry,
    CountdownEnd,
    AttackWindow,
    DefenseWindow,
}

impl BattleSession {
    pub fn is_participant(&self, account_id: &str) -> bool {
        self.challenger_id == account_id || self.opponent_id == account_id
    }

    /// Move to `next`, recording it in the history.
    pub fn transition(&mut self, next: BattleStatus, at: DateTime<Utc>) -> GameResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(GameError::InvalidState(format!(
                "cannot move from {} to {next}",
                self.status
            )));
        }
        self.status = next;
        self.history.push(StatusChange { status: next, at });
        Ok(())
    }

    /// The deadline the current status is waiting on.
    pub fn next_deadline(&self) -> Option<(DeadlineKind, DateTime<Utc>)> {
        match self.status {
            BattleStatus::Pending => Some((DeadlineKind::ChallengeExpiry, self.expires_at)),
            BattleStatus::Countdown => self
                .countdown_ends_at
                .map(|at| (DeadlineKind::CountdownEnd, at)),
            BattleStatus::Active => self
                .attack_deadline
                .map(|at| (DeadlineKind::AttackWindow, at)),
            BattleStatus::AwaitDefense => self
                .defense_deadline
                .map(|at| (DeadlineKind::DefenseWindow, at)),
            _ => None,
        }
    }
}
