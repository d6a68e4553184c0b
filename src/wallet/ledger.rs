// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account balances and the signed ledger behind them.
//!
//! Two layers:
//!
//! - `debit` / `credit` take the account lock, run one write transaction and
//!   publish notifications after commit.
//! - `debit_in` / `credit_in` run inside a caller-owned [`GameTxn`]. The
//!   caller must already hold the account lock (see [`WalletLedger::lock_accounts`])
//!   and is responsible for calling [`WalletLedger::publish`] once the
//!   transaction has committed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::clock::Clock;
use crate::error::{GameError, GameResult};
use crate::locks::{KeyGuard, LockRegistry};
use crate::storage::{GameDatabase, GameTxn};

use super::notifications::{BalanceNotification, Notifier};

/// Why a balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    Purchase,
    Refund,
    BattleStake,
    BattleWinnings,
    AdminGrant,
    StartingBalance,
}

/// One signed balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntry {
    pub account_id: String,
    /// Per-account sequence, starting at 1.
    pub seq: u64,
    pub delta: i64,
    pub balance_after: u64,
    pub reason: LedgerReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Held account locks. Dropping it releases every account.
pub struct AccountGuard {
    _guards: Vec<KeyGuard>,
}

pub struct WalletLedger {
    db: Arc<GameDatabase>,
    locks: Arc<LockRegistry>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    starting_balance: u64,
}

impl WalletLedger {
    pub fn new(
        db: Arc<GameDatabase>,
        locks: Arc<LockRegistry>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        starting_balance: u64,
    ) -> Self {
        Self {
            db,
            locks,
            notifier,
            clock,
            starting_balance,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Serialize with every other writer of the given accounts.
    pub async fn lock_accounts(&self, account_ids: &[&str]) -> AccountGuard {
        AccountGuard {
            _guards: self.locks.lock_many(account_ids).await,
        }
    }

    /// Current balance. Accounts never written report the starting balance.
    pub fn balance(&self, account_id: &str) -> GameResult<u64> {
        Ok(self
            .db
            .balance(account_id)?
            .unwrap_or(self.starting_balance))
    }

    /// Ledger rows, newest first.
    pub fn history(&self, account_id: &str, limit: usize) -> GameResult<Vec<LedgerEntry>> {
        Ok(self.db.ledger(account_id, limit)?)
    }

    /// Debit `amount`, failing with `InsufficientFunds` on underflow.
    pub async fn debit(
        &self,
        account_id: &str,
        amount: u64,
        reason: LedgerReason,
    ) -> GameResult<u64> {
        let _guard = self.lock_accounts(&[account_id]).await;
        let mut journal = Vec::new();
        let new_balance = self
            .db
            .write(|txn| self.debit_in(txn, account_id, amount, reason, None, &mut journal))?;
        self.publish(&journal);
        Ok(new_balance)
    }

    /// Credit `amount`. There is no upper bound.
    pub async fn credit(
        &self,
        account_id: &str,
        amount: u64,
        reason: LedgerReason,
    ) -> GameResult<u64> {
        let _guard = self.lock_accounts(&[account_id]).await;
        let mut journal = Vec::new();
        let new_balance = self
            .db
            .write(|txn| self.credit_in(txn, account_id, amount, reason, None, &mut journal))?;
        self.publish(&journal);
        Ok(new_balance)
    }

    /// Balance inside a transaction, materializing first-seen accounts.
    pub fn balance_in(
        &self,
        txn: &GameTxn<'_>,
        account_id: &str,
        journal: &mut Vec<LedgerEntry>,
    ) -> GameResult<u64> {
        if let Some(balance) = txn.balance(account_id)? {
            return Ok(balance);
        }

        txn.set_balance(account_id, self.starting_balance)?;
        if self.starting_balance > 0 {
            let entry = self.append(
                txn,
                account_id,
                self.starting_balance as i64,
                self.starting_balance,
                LedgerReason::StartingBalance,
                None,
            )?;
            journal.push(entry);
        }
        debug!(account_id, balance = self.starting_balance, "Account materialized");
        Ok(self.starting_balance)
    }

    pub fn debit_in(
        &self,
        txn: &GameTxn<'_>,
        account_id: &str,
        amount: u64,
        reason: LedgerReason,
        correlation_id: Option<&str>,
        journal: &mut Vec<LedgerEntry>,
    ) -> GameResult<u64> {
        let delta = signed_amount(amount)?;
        let balance = self.balance_in(txn, account_id, journal)?;
        if balance < amount {
            return Err(GameError::InsufficientFunds {
                balance,
                required: amount,
            });
        }

        let new_balance = balance - amount;
        txn.set_balance(account_id, new_balance)?;
        let entry = self.append(txn, account_id, -delta, new_balance, reason, correlation_id)?;
        journal.push(entry);

        info!(account_id, amount, new_balance, ?reason, "Wallet debited");
        Ok(new_balance)
    }

    pub fn credit_in(
        &self,
        txn: &GameTxn<'_>,
        account_id: &str,
        amount: u64,
        reason: LedgerReason,
        correlation_id: Option<&str>,
        journal: &mut Vec<LedgerEntry>,
    ) -> GameResult<u64> {
        let delta = signed_amount(amount)?;
        let balance = self.balance_in(txn, account_id, journal)?;
        let new_balance = balance
            .checked_add(amount)
            .ok_or_else(|| GameError::InvalidInput("balance overflow".into()))?;

        txn.set_balance(account_id, new_balance)?;
        let entry = self.append(txn, account_id, delta, new_balance, reason, correlation_id)?;
        journal.push(entry);

        info!(account_id, amount, new_balance, ?reason, "Wallet credited");
        Ok(new_balance)
    }

    /// Publish notifications for committed ledger rows.
    pub fn publish(&self, journal: &[LedgerEntry]) {
        for entry in journal {
            self.notifier.publish(BalanceNotification::from(entry));
        }
    }

    fn append(
        &self,
        txn: &GameTxn<'_>,
        account_id: &str,
        delta: i64,
        balance_after: u64,
        reason: LedgerReason,
        correlation_id: Option<&str>,
    ) -> GameResult<LedgerEntry> {
        let entry = LedgerEntry {
            account_id: account_id.to_string(),
            seq: txn.last_ledger_seq(account_id)? + 1,
            delta,
            balance_after,
            reason,
            correlation_id: correlation_id.map(str::to_string),
            recorded_at: self.clock.now(),
        };
        txn.append_ledger(&entry)?;
        Ok(entry)
    }
}

fn signed_amount(amount: u64) -> GameResult<i64> {
    if amount == 0 {
        return Err(GameError::InvalidInput("amount must be positive".into()));
    }
    i64::try_from(amount).map_err(|_| GameError::InvalidInput("amount too large".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn ledger_with(starting_balance: u64) -> (Arc<WalletLedger>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(GameDatabase::open(&dir.path().join("ledger.redb")).unwrap());
        let ledger = WalletLedger::new(
            db,
            Arc::new(LockRegistry::new()),
            Notifier::new(),
            Arc::new(SystemClock),
            starting_balance,
        );
        (Arc::new(ledger), dir)
    }

    #[tokio::test]
    async fn debit_rejects_underflow_without_mutation() {
        let (ledger, _dir) = ledger_with(0);
        ledger.credit("acct-1", 100, LedgerReason::AdminGrant).await.unwrap();

        let err = ledger
            .debit("acct-1", 150, LedgerReason::Purchase)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GameError::InsufficientFunds {
                balance: 100,
                required: 150
            }
        );
        assert_eq!(ledger.balance("acct-1").unwrap(), 100);
        assert_eq!(ledger.history("acct-1", 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ledger_rows_are_signed_and_ordered() {
        let (ledger, _dir) = ledger_with(0);
        ledger.credit("acct-1", 300, LedgerReason::AdminGrant).await.unwrap();
        let after = ledger.debit("acct-1", 200, LedgerReason::Purchase).await.unwrap();
        assert_eq!(after, 100);

        let rows = ledger.history("acct-1", 10).unwrap();
        assert_eq!(rows[0].delta, -200);
        assert_eq!(rows[0].balance_after, 100);
        assert_eq!(rows[0].seq, 2);
        assert_eq!(rows[1].delta, 300);
    }

    #[tokio::test]
    async fn zero_amount_is_invalid() {
        let (ledger, _dir) = ledger_with(0);
        let err = ledger
            .credit("acct-1", 0, LedgerReason::AdminGrant)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn starting_balance_is_materialized_once() {
        let (ledger, _dir) = ledger_with(500);
        assert_eq!(ledger.balance("fresh").unwrap(), 500);
        assert!(ledger.history("fresh", 10).unwrap().is_empty());

        ledger.debit("fresh", 100, LedgerReason::Purchase).await.unwrap();
        ledger.debit("fresh", 100, LedgerReason::Purchase).await.unwrap();

        let rows = ledger.history("fresh", 10).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].reason, LedgerReason::StartingBalance);
        assert_eq!(ledger.balance("fresh").unwrap(), 300);
    }

    #[tokio::test]
    async fn concurrent_debits_never_underflow() {
        let (ledger, _dir) = ledger_with(0);
        ledger.credit("acct-1", 100, LedgerReason::AdminGrant).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.debit("acct-1", 30, LedgerReason::Purchase).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 3);
        assert_eq!(ledger.balance("acct-1").unwrap(), 10);
    }

    #[tokio::test]
    async fn committed_mutations_notify() {
        let (ledger, _dir) = ledger_with(0);
        let mut rx = ledger.notifier().subscribe();

        ledger.credit("acct-1", 40, LedgerReason::AdminGrant).await.unwrap();
        ledger.debit("acct-1", 15, LedgerReason::Purchase).await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            BalanceNotification::BalanceCredited { amount: 40, new_balance: 40, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            BalanceNotification::BalanceSpent { amount: 15, new_balance: 25, .. }
        ));
    }
}
