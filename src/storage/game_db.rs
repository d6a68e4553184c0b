// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded game database backed by redb (pure Rust, ACID).
//!
//! Reads go straight through [`GameDatabase`]. Writes are grouped with
//! [`GameDatabase::write`] so a transition, its ledger rows and its events
//! land in the same commit.

use std::path::Path;

use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::battle::BattleSession;
use crate::events::BattleEvent;
use crate::inventory::InventoryEntry;
use crate::shop::{CompensationRecord, PurchaseReceipt, ReconciliationRecord};
use crate::wallet::LedgerEntry;

// =============================================================================
// Table Definitions
// =============================================================================

/// account_id → balance.
const WALLETS: TableDefinition<&str, u64> = TableDefinition::new("wallets");

/// (account_id, seq) → serialized LedgerEntry.
const LEDGER: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("ledger");

/// (account_id, item_id) → serialized InventoryEntry.
const INVENTORY: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("inventory");

/// session_id → serialized BattleSession.
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// session_id → next deadline (unix millis). Only sessions waiting on a
/// deadline have a row, so deadline scans never touch finished history.
const SESSION_DEADLINES: TableDefinition<&str, i64> = TableDefinition::new("session_deadlines");

/// (account_id, session_id) → session creation time (unix millis).
const ACCOUNT_SESSIONS: TableDefinition<(&str, &str), i64> =
    TableDefinition::new("account_sessions");

/// (session_id, sequence) → serialized BattleEvent.
const EVENTS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("events");

/// correlation_id → serialized PurchaseReceipt.
const PURCHASES: TableDefinition<&str, &[u8]> = TableDefinition::new("purchases");

/// correlation_id → serialized CompensationRecord.
const COMPENSATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("compensations");

/// correlation_id → serialized ReconciliationRecord.
const RECONCILIATION: TableDefinition<&str, &[u8]> = TableDefinition::new("reconciliation");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn read_json<T: DeserializeOwned>(
    txn: &ReadTransaction,
    def: TableDefinition<&str, &[u8]>,
    key: &str,
) -> StorageResult<Option<T>> {
    let table = txn.open_table(def)?;
    let row = match table.get(key)? {
        Some(guard) => Some(decode(guard.value())?),
        None => None,
    };
    Ok(row)
}

fn read_sessions<'k>(
    txn: &ReadTransaction,
    ids: impl IntoIterator<Item = &'k str>,
) -> StorageResult<Vec<BattleSession>> {
    let table = txn.open_table(SESSIONS)?;
    let mut sessions = Vec::new();
    for id in ids {
        match table.get(id)? {
            Some(guard) => sessions.push(decode(guard.value())?),
            None => return Err(StorageError::Corrupt(format!("indexed session {id} is missing"))),
        }
    }
    Ok(sessions)
}

fn read_all_json<T: DeserializeOwned>(
    txn: &ReadTransaction,
    def: TableDefinition<&str, &[u8]>,
) -> StorageResult<Vec<T>> {
    let table = txn.open_table(def)?;
    let mut rows = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        rows.push(decode(value.value())?);
    }
    Ok(rows)
}

// =============================================================================
// GameDatabase
// =============================================================================

/// Embedded ACID game database.
pub struct GameDatabase {
    db: Database,
}

impl GameDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(WALLETS)?;
            let _ = write_txn.open_table(LEDGER)?;
            let _ = write_txn.open_table(INVENTORY)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(SESSION_DEADLINES)?;
            let _ = write_txn.open_table(ACCOUNT_SESSIONS)?;
            let _ = write_txn.open_table(EVENTS)?;
            let _ = write_txn.open_table(PURCHASES)?;
            let _ = write_txn.open_table(COMPENSATIONS)?;
            let _ = write_txn.open_table(RECONCILIATION)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Run `f` inside a single write transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and is aborted otherwise,
    /// so either every row written by `f` becomes visible or none does.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&GameTxn<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let result = {
            let txn = GameTxn { txn: &write_txn };
            f(&txn)
        };

        match result {
            Ok(value) => {
                write_txn.commit().map_err(StorageError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = write_txn.abort() {
                    tracing::warn!(error = %abort_err, "Failed to abort write transaction");
                }
                Err(e)
            }
        }
    }

    /// Verify the database can serve a read transaction.
    pub fn health_check(&self) -> StorageResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(WALLETS)?;
        Ok(())
    }

    // =========================================================================
    // Wallets & ledger
    // =========================================================================

    pub fn balance(&self, account_id: &str) -> StorageResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WALLETS)?;
        let balance = table.get(account_id)?.map(|v| v.value());
        Ok(balance)
    }

    /// Ledger rows for an account, newest first.
    pub fn ledger(&self, account_id: &str, limit: usize) -> StorageResult<Vec<LedgerEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LEDGER)?;
        let mut rows = Vec::with_capacity(limit.min(256));
        for entry in table.range((account_id, 0u64)..=(account_id, u64::MAX))?.rev() {
            if rows.len() >= limit {
                break;
            }
            let (_, value) = entry?;
            rows.push(decode(value.value())?);
        }
        Ok(rows)
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    pub fn inventory(&self, account_id: &str) -> StorageResult<Vec<InventoryEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(INVENTORY)?;
        let mut rows = Vec::new();
        for entry in table.range((account_id, "")..)? {
            let (key, value) = entry?;
            if key.value().0 != account_id {
                break;
            }
            rows.push(decode(value.value())?);
        }
        Ok(rows)
    }

    pub fn inventory_entry(
        &self,
        account_id: &str,
        item_id: &str,
    ) -> StorageResult<Option<InventoryEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(INVENTORY)?;
        let row = match table.get((account_id, item_id))? {
            Some(guard) => Some(decode(guard.value())?),
            None => None,
        };
        Ok(row)
    }

    // =========================================================================
    // Sessions & events
    // =========================================================================

    pub fn session(&self, session_id: &str) -> StorageResult<Option<BattleSession>> {
        let read_txn = self.db.begin_read()?;
        read_json(&read_txn, SESSIONS, session_id)
    }

    /// Sessions an account takes part in, terminal ones included.
    pub fn sessions_for(&self, account_id: &str) -> StorageResult<Vec<BattleSession>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ACCOUNT_SESSIONS)?;
        let mut ids = Vec::new();
        for entry in index.range((account_id, "")..)? {
            let (key, _) = entry?;
            let (owner, session_id) = key.value();
            if owner != account_id {
                break;
            }
            ids.push(session_id.to_string());
        }
        read_sessions(&read_txn, ids.iter().map(String::as_str))
    }

    /// Sessions currently waiting on a deadline.
    pub fn live_sessions(&self) -> StorageResult<Vec<BattleSession>> {
        let read_txn = self.db.begin_read()?;
        let ids = Self::deadline_rows(&read_txn)?
            .into_iter()
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        read_sessions(&read_txn, ids.iter().map(String::as_str))
    }

    /// Ids of sessions whose deadline is at or before `now`.
    pub fn due_sessions(&self, now: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let cutoff = now.timestamp_millis();
        Ok(Self::deadline_rows(&read_txn)?
            .into_iter()
            .filter(|(_, deadline)| *deadline <= cutoff)
            .map(|(id, _)| id)
            .collect())
    }

    fn deadline_rows(txn: &ReadTransaction) -> StorageResult<Vec<(String, i64)>> {
        let table = txn.open_table(SESSION_DEADLINES)?;
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            rows.push((key.value().to_string(), value.value()));
        }
        Ok(rows)
    }

    /// Highest event sequence for a session (0 when none emitted yet).
    pub fn last_event_seq(&self, session_id: &str) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EVENTS)?;
        let last = match table.range((session_id, 0u64)..=(session_id, u64::MAX))?.next_back() {
            Some(entry) => entry?.0.value().1,
            None => 0,
        };
        Ok(last)
    }

    /// Events of a session with `sequence > after`, in sequence order.
    pub fn events_after(&self, session_id: &str, after: u64) -> StorageResult<Vec<BattleEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EVENTS)?;
        let start = after.saturating_add(1);
        let mut events = Vec::new();
        for entry in table.range((session_id, start)..=(session_id, u64::MAX))? {
            let (_, value) = entry?;
            events.push(decode(value.value())?);
        }
        Ok(events)
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    pub fn purchase(&self, correlation_id: &str) -> StorageResult<Option<PurchaseReceipt>> {
        let read_txn = self.db.begin_read()?;
        read_json(&read_txn, PURCHASES, correlation_id)
    }

    pub fn compensation(&self, correlation_id: &str) -> StorageResult<Option<CompensationRecord>> {
        let read_txn = self.db.begin_read()?;
        read_json(&read_txn, COMPENSATIONS, correlation_id)
    }

    pub fn reconciliation(
        &self,
        correlation_id: &str,
    ) -> StorageResult<Option<ReconciliationRecord>> {
        let read_txn = self.db.begin_read()?;
        read_json(&read_txn, RECONCILIATION, correlation_id)
    }

    pub fn reconciliations(&self) -> StorageResult<Vec<ReconciliationRecord>> {
        let read_txn = self.db.begin_read()?;
        read_all_json(&read_txn, RECONCILIATION)
    }
}

// =============================================================================
// GameTxn
// =============================================================================

/// Typed view over an open write transaction.
///
/// Reads through a `GameTxn` observe the writes made earlier in the same
/// transaction.
pub struct GameTxn<'a> {
    txn: &'a WriteTransaction,
}

impl GameTxn<'_> {
    fn get_json<T: DeserializeOwned>(
        &self,
        def: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let table = self.txn.open_table(def)?;
        let row = match table.get(key)? {
            Some(guard) => Some(decode(guard.value())?),
            None => None,
        };
        Ok(row)
    }

    fn put_json<T: Serialize>(
        &self,
        def: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> StorageResult<()> {
        let bytes = encode(value)?;
        let mut table = self.txn.open_table(def)?;
        table.insert(key, bytes.as_slice())?;
        Ok(())
    }

    // ----- wallets & ledger -----

    pub fn balance(&self, account_id: &str) -> StorageResult<Option<u64>> {
        let table = self.txn.open_table(WALLETS)?;
        let balance = table.get(account_id)?.map(|v| v.value());
        Ok(balance)
    }

    pub fn set_balance(&self, account_id: &str, balance: u64) -> StorageResult<()> {
        let mut table = self.txn.open_table(WALLETS)?;
        table.insert(account_id, balance)?;
        Ok(())
    }

    /// Highest ledger sequence for an account (0 when empty).
    pub fn last_ledger_seq(&self, account_id: &str) -> StorageResult<u64> {
        let table = self.txn.open_table(LEDGER)?;
        let last = match table.range((account_id, 0u64)..=(account_id, u64::MAX))?.next_back() {
            Some(entry) => entry?.0.value().1,
            None => 0,
        };
        Ok(last)
    }

    pub fn append_ledger(&self, entry: &LedgerEntry) -> StorageResult<()> {
        let bytes = encode(entry)?;
        let mut table = self.txn.open_table(LEDGER)?;
        table.insert((entry.account_id.as_str(), entry.seq), bytes.as_slice())?;
        Ok(())
    }

    // ----- inventory -----

    pub fn inventory_entry(
        &self,
        account_id: &str,
        item_id: &str,
    ) -> StorageResult<Option<InventoryEntry>> {
        let table = self.txn.open_table(INVENTORY)?;
        let row = match table.get((account_id, item_id))? {
            Some(guard) => Some(decode(guard.value())?),
            None => None,
        };
        Ok(row)
    }

    pub fn put_inventory_entry(&self, entry: &InventoryEntry) -> StorageResult<()> {
        let bytes = encode(entry)?;
        let mut table = self.txn.open_table(INVENTORY)?;
        table.insert(
            (entry.account_id.as_str(), entry.item_id.as_str()),
            bytes.as_slice(),
        )?;
        Ok(())
    }

    /// All inventory rows of an account.
    pub fn inventory(&self, account_id: &str) -> StorageResult<Vec<InventoryEntry>> {
        let table = self.txn.open_table(INVENTORY)?;
        let mut rows = Vec::new();
        for entry in table.range((account_id, "")..)? {
            let (key, value) = entry?;
            if key.value().0 != account_id {
                break;
            }
            rows.push(decode(value.value())?);
        }
        Ok(rows)
    }

    // ----- sessions & events -----

    pub fn session(&self, session_id: &str) -> StorageResult<Option<BattleSession>> {
        self.get_json(SESSIONS, session_id)
    }

    /// Store a session and keep the account and deadline indexes in step.
    pub fn put_session(&self, session: &BattleSession) -> StorageResult<()> {
        let id = session.session_id.as_str();
        self.put_json(SESSIONS, id, session)?;

        let created = session.created_at.timestamp_millis();
        let mut by_account = self.txn.open_table(ACCOUNT_SESSIONS)?;
        by_account.insert((session.challenger_id.as_str(), id), created)?;
        by_account.insert((session.opponent_id.as_str(), id), created)?;

        let mut deadlines = self.txn.open_table(SESSION_DEADLINES)?;
        match session.next_deadline() {
            Some((_, at)) => {
                deadlines.insert(id, at.timestamp_millis())?;
            }
            None => {
                deadlines.remove(id)?;
            }
        }
        Ok(())
    }

    /// Highest event sequence for a session (0 when none emitted yet).
    pub fn last_event_seq(&self, session_id: &str) -> StorageResult<u64> {
        let table = self.txn.open_table(EVENTS)?;
        let last = match table.range((session_id, 0u64)..=(session_id, u64::MAX))?.next_back() {
            Some(entry) => entry?.0.value().1,
            None => 0,
        };
        Ok(last)
    }

    pub fn append_event(&self, event: &BattleEvent) -> StorageResult<()> {
        let bytes = encode(event)?;
        let mut table = self.txn.open_table(EVENTS)?;
        let key = (event.session_id.as_str(), event.sequence);
        if table.get(key)?.is_some() {
            return Err(StorageError::Corrupt(format!(
                "event {} of session {} already exists",
                event.sequence, event.session_id
            )));
        }
        table.insert(key, bytes.as_slice())?;
        Ok(())
    }

    // ----- purchases -----

    pub fn purchase(&self, correlation_id: &str) -> StorageResult<Option<PurchaseReceipt>> {
        self.get_json(PURCHASES, correlation_id)
    }

    pub fn put_purchase(&self, receipt: &PurchaseReceipt) -> StorageResult<()> {
        self.put_json(PURCHASES, &receipt.correlation_id, receipt)
    }

    pub fn compensation(&self, correlation_id: &str) -> StorageResult<Option<CompensationRecord>> {
        self.get_json(COMPENSATIONS, correlation_id)
    }

    pub fn put_compensation(&self, record: &CompensationRecord) -> StorageResult<()> {
        self.put_json(COMPENSATIONS, &record.correlation_id, record)
    }

    pub fn put_reconciliation(&self, record: &ReconciliationRecord) -> StorageResult<()> {
        self.put_json(RECONCILIATION, &record.correlation_id, record)
    }

    pub fn resolve_reconciliation(&self, correlation_id: &str) -> StorageResult<bool> {
        let mut table = self.txn.open_table(RECONCILIATION)?;
        let removed = table.remove(correlation_id)?.is_some();
        Ok(removed)
    }
}

// =============================================================================
// Tests
// =============================================================================
