// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wallet Ledger
//!
//! One integer M1U balance per account. Every mutation appends a signed
//! ledger row tagged with a [`LedgerReason`] and, once committed, publishes a
//! [`BalanceNotification`] for UI consumers.
//!
//! Writers of an account serialize on the account lock held by
//! [`WalletLedger`]. Shop purchases and battle settlement take the same lock,
//! so the balance can never be driven negative by interleaving.

pub mod ledger;
pub mod notifications;

pub use ledger::{AccountGuard, LedgerEntry, LedgerReason, WalletLedger};
pub use notifications::{BalanceNotification, Notifier};
