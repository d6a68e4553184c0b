// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Purchase saga.
//!
//! ```text
//! validate ──▶ primary (debit + grant, one txn) ──▶ receipt
//!                  │ transient failure
//!                  ▼
//!              fallback: debit ──▶ grant ──▶ receipt
//!                                    │ failure
//!                                    ▼
//!                              compensating credit (once per correlation id)
//!                                    │ failure
//!                                    ▼
//!                              reconciliation record + Inconsistent
//! ```
//!
//! After any attempt the balance moved by exactly `0` or `price * qty`,
//! except when compensation itself fails, which is escalated.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{GameError, GameResult};
use crate::inventory::{Inventory, ShopItem};
use crate::wallet::WalletLedger;

use super::store::{
    PurchaseOrder, PurchaseReceipt, ReconciliationRecord, RefundOutcome, ShopStore,
};

pub struct ShopProcessor {
    store: Arc<dyn ShopStore>,
    ledger: Arc<WalletLedger>,
    inventory: Arc<Inventory>,
    clock: Arc<dyn Clock>,
}

impl ShopProcessor {
    pub fn new(
        store: Arc<dyn ShopStore>,
        ledger: Arc<WalletLedger>,
        inventory: Arc<Inventory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            inventory,
            clock,
        }
    }

    pub fn list_items(&self, account_id: &str) -> GameResult<Vec<ShopItem>> {
        self.inventory.list_available_items(account_id)
    }

    /// Purchase `qty` units of `item_id` for `account_id`.
    ///
    /// Re-submitting a completed `correlation_id` returns the stored receipt
    /// without charging again.
    pub async fn purchase(
        &self,
        account_id: &str,
        item_id: &str,
        qty: u32,
        correlation_id: Option<String>,
    ) -> GameResult<PurchaseReceipt> {
        if qty == 0 {
            return Err(GameError::InvalidInput("quantity must be positive".into()));
        }
        let item = self.inventory.item(item_id)?;
        let total_cost = item
            .base_price
            .checked_mul(u64::from(qty))
            .ok_or_else(|| GameError::InvalidInput("total cost overflow".into()))?;

        let correlation_id = match correlation_id {
            Some(id) if id.trim().is_empty() => {
                return Err(GameError::InvalidInput("correlation_id must not be empty".into()))
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        let _guard = self.ledger.lock_accounts(&[account_id]).await;

        if let Some(receipt) = self.store.receipt(&correlation_id)? {
            if receipt.account_id != account_id || receipt.item_id != item_id || receipt.qty != qty {
                return Err(GameError::InvalidInput(format!(
                    "correlation_id {correlation_id} belongs to a different purchase"
                )));
            }
            info!(account_id, correlation_id = %correlation_id, "Purchase replayed from receipt");
            return Ok(receipt);
        }
        if self.store.compensation(&correlation_id)?.is_some() {
            return Err(GameError::InvalidInput(format!(
                "purchase attempt {correlation_id} was refunded; retry with a new correlation_id"
            )));
        }

        // Fail fast before touching state.
        let balance = self.ledger.balance(account_id)?;
        if balance < total_cost {
            return Err(GameError::InsufficientFunds {
                balance,
                required: total_cost,
            });
        }
        let owned = self.inventory.owned_quantity(account_id, item_id)?;
        self.inventory.check_grant(owned, item, qty)?;

        let order = PurchaseOrder {
            correlation_id,
            account_id: account_id.to_string(),
            item_id: item_id.to_string(),
            qty,
            total_cost,
        };

        match self.store.commit_purchase(&order) {
            Ok((receipt, journal)) => {
                self.ledger.publish(&journal);
                info!(
                    account_id,
                    item_id,
                    qty,
                    total_cost,
                    new_balance = receipt.new_balance,
                    correlation_id = %order.correlation_id,
                    "Purchase committed (primary)"
                );
                Ok(receipt)
            }
            Err(e) if e.is_transient() => {
                warn!(
                    account_id,
                    item_id,
                    correlation_id = %order.correlation_id,
                    error = %e,
                    "Primary purchase path failed, using fallback"
                );
                self.purchase_fallback(&order).await
            }
            Err(e) => Err(e),
        }
    }

    async fn purchase_fallback(&self, order: &PurchaseOrder) -> GameResult<PurchaseReceipt> {
        let (new_balance, journal) = self.store.debit(order)?;
        self.ledger.publish(&journal);

        match self.store.grant_and_record(order, new_balance) {
            Ok(receipt) => {
                info!(
                    account_id = %order.account_id,
                    item_id = %order.item_id,
                    qty = order.qty,
                    total_cost = order.total_cost,
                    new_balance,
                    correlation_id = %order.correlation_id,
                    "Purchase committed (fallback)"
                );
                Ok(receipt)
            }
            Err(grant_err) => {
                warn!(
                    account_id = %order.account_id,
                    correlation_id = %order.correlation_id,
                    error = %grant_err,
                    "Grant failed after debit, compensating"
                );
                self.compensate(order, &grant_err)?;
                Err(grant_err)
            }
        }
    }

    fn compensate(&self, order: &PurchaseOrder, cause: &GameError) -> GameResult<RefundOutcome> {
        match self.store.refund(order) {
            Ok((outcome, journal)) => {
                self.ledger.publish(&journal);
                info!(
                    account_id = %order.account_id,
                    amount = order.total_cost,
                    correlation_id = %order.correlation_id,
                    already_refunded = matches!(outcome, RefundOutcome::AlreadyRefunded),
                    "Compensating credit applied"
                );
                Ok(outcome)
            }
            Err(refund_err) => {
                error!(
                    account_id = %order.account_id,
                    item_id = %order.item_id,
                    qty = order.qty,
                    amount = order.total_cost,
                    correlation_id = %order.correlation_id,
                    cause = %cause,
                    error = %refund_err,
                    "Compensating credit failed, manual reconciliation required"
                );
                let record = ReconciliationRecord {
                    correlation_id: order.correlation_id.clone(),
                    account_id: order.account_id.clone(),
                    item_id: order.item_id.clone(),
                    qty: order.qty,
                    amount: order.total_cost,
                    error: refund_err.to_string(),
                    recorded_at: self.clock.now(),
                };
                if let Err(flag_err) = self.store.flag_reconciliation(&record) {
                    error!(
                        correlation_id = %order.correlation_id,
                        error = %flag_err,
                        "Failed to persist reconciliation record"
                    );
                }
                Err(GameError::Inconsistent(format!(
                    "refund of {} for purchase {} failed: {refund_err}",
                    order.total_cost, order.correlation_id
                )))
            }
        }
    }

    /// Re-run the compensating credit for a flagged purchase attempt.
    ///
    /// Safe to call repeatedly: a refund that already landed is reported as
    /// [`RefundOutcome::AlreadyRefunded`].
    pub async fn retry_compensation(&self, correlation_id: &str) -> GameResult<RefundOutcome> {
        let record = match self.store.reconciliation(correlation_id)? {
            Some(record) => record,
            None if self.store.compensation(correlation_id)?.is_some() => {
                return Ok(RefundOutcome::AlreadyRefunded)
            }
            None => {
                return Err(GameError::NotFound(format!(
                    "reconciliation record {correlation_id}"
                )))
            }
        };

        let _guard = self.ledger.lock_accounts(&[&record.account_id]).await;
        let cause = GameError::Inconsistent(record.error.clone());
        self.compensate(&record.order(), &cause)
    }
}
