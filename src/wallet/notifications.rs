// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Balance change notifications.
//!
//! These are display-only signals. Nothing inside the engine consumes them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use utoipa::ToSchema;

use super::ledger::{LedgerEntry, LedgerReason};

const CHANNEL_CAPACITY: usize = 256;

/// Client-visible balance notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BalanceNotification {
    BalanceCredited {
        account_id: String,
        amount: u64,
        new_balance: u64,
        reason: LedgerReason,
    },
    BalanceSpent {
        account_id: String,
        amount: u64,
        new_balance: u64,
        reason: LedgerReason,
    },
}

impl BalanceNotification {
    pub fn account_id(&self) -> &str {
        match self {
            BalanceNotification::BalanceCredited { account_id, .. }
            | BalanceNotification::BalanceSpent { account_id, .. } => account_id,
        }
    }
}

impl From<&LedgerEntry> for BalanceNotification {
    fn from(entry: &LedgerEntry) -> Self {
        let amount = entry.delta.unsigned_abs();
        if entry.delta < 0 {
            BalanceNotification::BalanceSpent {
                account_id: entry.account_id.clone(),
                amount,
                new_balance: entry.balance_after,
                reason: entry.reason,
            }
        } else {
            BalanceNotification::BalanceCredited {
                account_id: entry.account_id.clone(),
                amount,
                new_balance: entry.balance_after,
                reason: entry.reason,
            }
        }
    }
}

/// Fan-out of balance notifications to any number of listeners.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<BalanceNotification>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish a notification. Having no listeners is not an error.
    pub fn publish(&self, notification: BalanceNotification) {
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalanceNotification> {
        self.tx.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
