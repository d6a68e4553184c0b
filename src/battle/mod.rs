// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Battle Sessions
//!
//! - [`model`] - session record and state machine
//! - [`outcome`] - deterministic scoring and settlement sizing
//! - [`registry`] - single writer of session state
//! - [`scheduler`] - per-session deadline timers
//! - [`sweeper`] - periodic backstop for missed deadlines

pub mod model;
pub mod outcome;
pub mod registry;
pub mod scheduler;
pub mod sweeper;

pub use model::{
    BattleOutcome, BattleSession, BattleStatus, CancelReason, DeadlineKind, Resolution,
    ResolutionCause, StakePercent, StakeType, StatusChange,
};
pub use registry::{BattleConfig, BattleRegistry, NewBattle, OutcomePreview};
pub use scheduler::Scheduler;
pub use sweeper::ExpirySweeper;
