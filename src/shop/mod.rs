// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Shop Transaction Processor
//!
//! Purchases debit the wallet and grant inventory for the same account. See
//! [`processor`] for the primary/fallback/compensation flow and [`store`] for
//! the persistence steps it is built from.

pub mod processor;
pub mod store;

pub use processor::ShopProcessor;
pub use store::{
    CompensationRecord, LedgerShopStore, PurchaseOrder, PurchasePath, PurchaseReceipt,
    ReconciliationRecord, RefundOutcome, ShopStore,
};
