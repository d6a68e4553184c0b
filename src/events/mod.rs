// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Realtime Event Channel
//!
//! Every battle session has an append-only event log with a per-session
//! `sequence`. Subscribers receive events in order, exactly once, and can
//! resume from the last sequence they saw.
//!
//! | Type | Role |
//! |------|------|
//! | [`BattleEvent`] | persisted lifecycle event |
//! | [`EventChannel`] | append inside a transaction, publish after commit |
//! | [`Subscription`] | ordered, de-duplicated stream for one subscriber |
//! | [`SequenceTracker`] | fresh / duplicate / gap classification |

pub mod channel;
pub mod model;
pub mod tracker;

pub use channel::{EventChannel, Subscription};
pub use model::{BattleEvent, BattleEventKind};
pub use tracker::{Delivery, SequenceTracker};
