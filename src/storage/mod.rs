// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state lives in a single embedded redb database
//! (`{DATA_DIR}/battle.redb`):
//!
//! ```text
//! wallets         account_id            -> balance
//! ledger          (account_id, seq)     -> LedgerEntry
//! inventory       (account_id, item_id) -> InventoryEntry
//! sessions        session_id            -> BattleSession
//! events          (session_id, seq)     -> BattleEvent
//! purchases       correlation_id        -> PurchaseReceipt
//! compensations   correlation_id        -> CompensationRecord
//! reconciliation  correlation_id        -> ReconciliationRecord
//! ```
//!
//! Multi-row mutations go through [`GameDatabase::write`], which runs a
//! closure inside one redb write transaction and commits only if the closure
//! returns `Ok`.

pub mod event_cache;
pub mod game_db;

pub use event_cache::EventCache;
pub use game_db::{GameDatabase, GameTxn, StorageError, StorageResult};
