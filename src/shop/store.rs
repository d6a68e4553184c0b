// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persistence steps of a purchase.
//!
//! [`ShopStore`] is the seam between the purchase saga and storage. The
//! primary path is a single call ([`ShopStore::commit_purchase`]); the
//! fallback path is the three-step sequence debit, grant, refund.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::clock::Clock;
use crate::error::{GameError, GameResult};
use crate::inventory::Inventory;
use crate::storage::GameDatabase;
use crate::wallet::{LedgerEntry, LedgerReason, WalletLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PurchasePath {
    Primary,
    Fallback,
}

/// A validated purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    pub correlation_id: String,
    pub account_id: String,
    pub item_id: String,
    pub qty: u32,
    pub total_cost: u64,
}

impl PurchaseOrder {
    fn receipt(&self, new_balance: u64, path: PurchasePath, at: DateTime<Utc>) -> PurchaseReceipt {
        PurchaseReceipt {
            correlation_id: self.correlation_id.clone(),
            account_id: self.account_id.clone(),
            item_id: self.item_id.clone(),
            qty: self.qty,
            total_cost: self.total_cost,
            new_balance,
            path,
            purchased_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PurchaseReceipt {
    pub correlation_id: String,
    pub account_id: String,
    pub item_id: String,
    pub qty: u32,
    pub total_cost: u64,
    pub new_balance: u64,
    pub path: PurchasePath,
    pub purchased_at: DateTime<Utc>,
}

/// Proof that a purchase attempt was refunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRecord {
    pub correlation_id: String,
    pub account_id: String,
    pub amount: u64,
    pub ledger_seq: u64,
    pub compensated_at: DateTime<Utc>,
}

/// A debit that could not be refunded automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReconciliationRecord {
    pub correlation_id: String,
    pub account_id: String,
    pub item_id: String,
    pub qty: u32,
    pub amount: u64,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

impl ReconciliationRecord {
    pub fn order(&self) -> PurchaseOrder {
        PurchaseOrder {
            correlation_id: self.correlation_id.clone(),
            account_id: self.account_id.clone(),
            item_id: self.item_id.clone(),
            qty: self.qty,
            total_cost: self.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded(LedgerEntry),
    AlreadyRefunded,
}

/// Ledger rows a step committed. Notifications are published from these.
pub type Journal = Vec<LedgerEntry>;

pub trait ShopStore: Send + Sync {
    /// Debit, grant and receipt in one atomic unit.
    fn commit_purchase(&self, order: &PurchaseOrder) -> GameResult<(PurchaseReceipt, Journal)>;

    /// Fallback step 1: debit only. Returns the new balance.
    fn debit(&self, order: &PurchaseOrder) -> GameResult<(u64, Journal)>;

    /// Fallback step 2: grant the item and store the receipt together.
    fn grant_and_record(&self, order: &PurchaseOrder, new_balance: u64) -> GameResult<PurchaseReceipt>;

    /// Compensating credit, applied at most once per correlation id.
    fn refund(&self, order: &PurchaseOrder) -> GameResult<(RefundOutcome, Journal)>;

    fn flag_reconciliation(&self, record: &ReconciliationRecord) -> GameResult<()>;

    fn receipt(&self, correlation_id: &str) -> GameResult<Option<PurchaseReceipt>>;

    fn compensation(&self, correlation_id: &str) -> GameResult<Option<CompensationRecord>>;

    fn reconciliation(&self, correlation_id: &str) -> GameResult<Option<ReconciliationRecord>>;
}

/// [`ShopStore`] over the game database, wallet ledger and inventory.
pub struct LedgerShopStore {
    db: Arc<GameDatabase>,
    ledger: Arc<WalletLedger>,
    inventory: Arc<Inventory>,
    clock: Arc<dyn Clock>,
}

impl LedgerShopStore {
    pub fn new(
        db: Arc<GameDatabase>,
        ledger: Arc<WalletLedger>,
        inventory: Arc<Inventory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            ledger,
            inventory,
            clock,
        }
    }
}

impl ShopStore for LedgerShopStore {
    fn commit_purchase(&self, order: &PurchaseOrder) -> GameResult<(PurchaseReceipt, Journal)> {
        let mut journal = Vec::new();
        let receipt = self.db.write(|txn| -> GameResult<PurchaseReceipt> {
            let new_balance = self.ledger.debit_in(
                txn,
                &order.account_id,
                order.total_cost,
                LedgerReason::Purchase,
                Some(&order.correlation_id),
                &mut journal,
            )?;
            self.inventory
                .grant_in(txn, &order.account_id, &order.item_id, order.qty)?;
            let receipt = order.receipt(new_balance, PurchasePath::Primary, self.clock.now());
            txn.put_purchase(&receipt)?;
            Ok(receipt)
        })?;
        Ok((receipt, journal))
    }

    fn debit(&self, order: &PurchaseOrder) -> GameResult<(u64, Journal)> {
        let mut journal = Vec::new();
        let new_balance = self.db.write(|txn| {
            self.ledger.debit_in(
                txn,
                &order.account_id,
                order.total_cost,
                LedgerReason::Purchase,
                Some(&order.correlation_id),
                &mut journal,
            )
        })?;
        Ok((new_balance, journal))
    }

    fn grant_and_record(&self, order: &PurchaseOrder, new_balance: u64) -> GameResult<PurchaseReceipt> {
        self.db.write(|txn| {
            self.inventory
                .grant_in(txn, &order.account_id, &order.item_id, order.qty)?;
            let receipt = order.receipt(new_balance, PurchasePath::Fallback, self.clock.now());
            txn.put_purchase(&receipt)?;
            Ok(receipt)
        })
    }

    fn refund(&self, order: &PurchaseOrder) -> GameResult<(RefundOutcome, Journal)> {
        let mut journal = Vec::new();
        let outcome = self.db.write(|txn| -> GameResult<RefundOutcome> {
            if txn.compensation(&order.correlation_id)?.is_some() {
                return Ok(RefundOutcome::AlreadyRefunded);
            }

            self.ledger.credit_in(
                txn,
                &order.account_id,
                order.total_cost,
                LedgerReason::Refund,
                Some(&order.correlation_id),
                &mut journal,
            )?;
            let Some(entry) = journal.last().cloned() else {
                return Err(GameError::Inconsistent(
                    "refund produced no ledger row".into(),
                ));
            };

            txn.put_compensation(&CompensationRecord {
                correlation_id: order.correlation_id.clone(),
                account_id: order.account_id.clone(),
                amount: order.total_cost,
                ledger_seq: entry.seq,
                compensated_at: self.clock.now(),
            })?;
            txn.resolve_reconciliation(&order.correlation_id)?;
            Ok(RefundOutcome::Refunded(entry))
        })?;
        Ok((outcome, journal))
    }

    fn flag_reconciliation(&self, record: &ReconciliationRecord) -> GameResult<()> {
        self.db.write(|txn| {
            txn.put_reconciliation(record)?;
            Ok(())
        })
    }

    fn receipt(&self, correlation_id: &str) -> GameResult<Option<PurchaseReceipt>> {
        Ok(self.db.purchase(correlation_id)?)
    }

    fn compensation(&self, correlation_id: &str) -> GameResult<Option<CompensationRecord>> {
        Ok(self.db.compensation(correlation_id)?)
    }

    fn reconciliation(&self, correlation_id: &str) -> GameResult<Option<ReconciliationRecord>> {
        Ok(self.db.reconciliation(correlation_id)?)
    }
}
