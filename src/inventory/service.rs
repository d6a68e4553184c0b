// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-account item ownership.
//!
//! InventoryEntry rows are only written through this module. As with the
//! wallet, the `*_in` variants run inside a caller-owned transaction and
//! assume the account lock is already held.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::clock::Clock;
use crate::error::{GameError, GameResult};
use crate::locks::LockRegistry;
use crate::storage::{GameDatabase, GameTxn};

use super::catalog::{Catalog, CatalogItem, ItemKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InventoryEntry {
    pub account_id: String,
    pub item_id: String,
    pub quantity: u32,
    pub is_equipped: bool,
    pub updated_at: DateTime<Utc>,
}

/// Catalog item joined with the caller's ownership.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShopItem {
    #[serde(flatten)]
    pub item: CatalogItem,
    pub is_owned: bool,
    pub owned_quantity: u32,
}

pub struct Inventory {
    db: Arc<GameDatabase>,
    catalog: Arc<Catalog>,
    locks: Arc<LockRegistry>,
    clock: Arc<dyn Clock>,
}

impl Inventory {
    pub fn new(
        db: Arc<GameDatabase>,
        catalog: Arc<Catalog>,
        locks: Arc<LockRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            catalog,
            locks,
            clock,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn item(&self, item_id: &str) -> GameResult<&CatalogItem> {
        self.catalog
            .get(item_id)
            .ok_or_else(|| GameError::NotFound(format!("item {item_id}")))
    }

    /// Catalog item that must be of `kind`.
    pub fn item_of_kind(&self, item_id: &str, kind: ItemKind) -> GameResult<&CatalogItem> {
        let item = self.item(item_id)?;
        if item.kind != kind {
            return Err(GameError::InvalidItem {
                item_id: item_id.to_string(),
                expected: kind.to_string(),
            });
        }
        Ok(item)
    }

    /// Every catalog item with the account's ownership.
    pub fn list_available_items(&self, account_id: &str) -> GameResult<Vec<ShopItem>> {
        let owned = self.db.inventory(account_id)?;
        Ok(self
            .catalog
            .items()
            .iter()
            .map(|item| {
                let owned_quantity = owned
                    .iter()
                    .find(|entry| entry.item_id == item.item_id)
                    .map_or(0, |entry| entry.quantity);
                ShopItem {
                    item: item.clone(),
                    is_owned: owned_quantity > 0,
                    owned_quantity,
                }
            })
            .collect())
    }

    pub fn list(&self, account_id: &str) -> GameResult<Vec<InventoryEntry>> {
        Ok(self.db.inventory(account_id)?)
    }

    pub fn owned_quantity(&self, account_id: &str, item_id: &str) -> GameResult<u32> {
        Ok(self
            .db
            .inventory_entry(account_id, item_id)?
            .map_or(0, |entry| entry.quantity))
    }

    pub async fn grant_item(
        &self,
        account_id: &str,
        item_id: &str,
        qty: u32,
    ) -> GameResult<InventoryEntry> {
        let _guard = self.locks.lock(account_id).await;
        self.db
            .write(|txn| self.grant_in(txn, account_id, item_id, qty))
    }

    pub async fn consume_item(
        &self,
        account_id: &str,
        item_id: &str,
        qty: u32,
    ) -> GameResult<InventoryEntry> {
        let _guard = self.locks.lock(account_id).await;
        self.db
            .write(|txn| self.consume_in(txn, account_id, item_id, qty))
    }

    /// Mark an owned item as equipped, unequipping others of the same kind.
    pub async fn equip(
        &self,
        account_id: &str,
        item_id: &str,
        equipped: bool,
    ) -> GameResult<InventoryEntry> {
        let kind = self.item(item_id)?.kind;
        let _guard = self.locks.lock(account_id).await;
        let now = self.clock.now();

        self.db.write(|txn| {
            let mut target = match txn.inventory_entry(account_id, item_id)? {
                Some(entry) if entry.quantity > 0 => entry,
                _ => return Err(GameError::ItemNotOwned(item_id.to_string())),
            };

            if equipped {
                for mut other in txn.inventory(account_id)? {
                    let same_kind = self.catalog.get(&other.item_id).map(|i| i.kind) == Some(kind);
                    if other.item_id != item_id && other.is_equipped && same_kind {
                        other.is_equipped = false;
                        other.updated_at = now;
                        txn.put_inventory_entry(&other)?;
                    }
                }
            }

            target.is_equipped = equipped;
            target.updated_at = now;
            txn.put_inventory_entry(&target)?;
            Ok(target)
        })
    }

    /// Check a grant without writing, for fail-fast validation.
    pub fn check_grant(&self, owned: u32, item: &CatalogItem, qty: u32) -> GameResult<()> {
        if qty == 0 {
            return Err(GameError::InvalidInput("quantity must be positive".into()));
        }
        match owned.checked_add(qty) {
            Some(total) if total <= item.max_stack => Ok(()),
            _ => Err(GameError::StackLimitExceeded {
                item_id: item.item_id.clone(),
                owned,
                requested: qty,
                max_stack: item.max_stack,
            }),
        }
    }

    pub fn grant_in(
        &self,
        txn: &GameTxn<'_>,
        account_id: &str,
        item_id: &str,
        qty: u32,
    ) -> GameResult<InventoryEntry> {
        let item = self.item(item_id)?;
        let existing = txn.inventory_entry(account_id, item_id)?;
        let owned = existing.as_ref().map_or(0, |entry| entry.quantity);
        self.check_grant(owned, item, qty)?;

        let entry = InventoryEntry {
            account_id: account_id.to_string(),
            item_id: item_id.to_string(),
            quantity: owned + qty,
            is_equipped: existing.is_some_and(|entry| entry.is_equipped),
            updated_at: self.clock.now(),
        };
        txn.put_inventory_entry(&entry)?;

        info!(account_id, item_id, qty, quantity = entry.quantity, "Item granted");
        Ok(entry)
    }

    pub fn consume_in(
        &self,
        txn: &GameTxn<'_>,
        account_id: &str,
        item_id: &str,
        qty: u32,
    ) -> GameResult<InventoryEntry> {
        if qty == 0 {
            return Err(GameError::InvalidInput("quantity must be positive".into()));
        }
        let mut entry = match txn.inventory_entry(account_id, item_id)? {
            Some(entry) => entry,
            None => {
                return Err(GameError::InsufficientQuantity {
                    item_id: item_id.to_string(),
                    owned: 0,
                    requested: qty,
                })
            }
        };
        if entry.quantity < qty {
            return Err(GameError::InsufficientQuantity {
                item_id: item_id.to_string(),
                owned: entry.quantity,
                requested: qty,
            });
        }

        entry.quantity -= qty;
        if entry.quantity == 0 {
            entry.is_equipped = false;
        }
        entry.updated_at = self.clock.now();
        txn.put_inventory_entry(&entry)?;

        info!(account_id, item_id, qty, quantity = entry.quantity, "Item consumed");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn inventory() -> (Inventory, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(GameDatabase::open(&dir.path().join("inv.redb")).unwrap());
        let inventory = Inventory::new(
            db,
            Arc::new(Catalog::builtin()),
            Arc::new(LockRegistry::new()),
            Arc::new(SystemClock),
        );
        (inventory, dir)
    }

    #[tokio::test]
    async fn grant_respects_max_stack() {
        let (inv, _dir) = inventory();
        // max_stack 1
        inv.grant_item("acct-1", "def-aegis", 1).await.unwrap();

        let err = inv.grant_item("acct-1", "def-aegis", 1).await.unwrap_err();
        assert_eq!(
            err,
            GameError::StackLimitExceeded {
                item_id: "def-aegis".into(),
                owned: 1,
                requested: 1,
                max_stack: 1
            }
        );
        assert_eq!(inv.owned_quantity("acct-1", "def-aegis").unwrap(), 1);
    }

    #[tokio::test]
    async fn consume_decrements_and_rejects_shortfall() {
        let (inv, _dir) = inventory();
        inv.grant_item("acct-1", "wpn-stick", 2).await.unwrap();

        let entry = inv.consume_item("acct-1", "wpn-stick", 1).await.unwrap();
        assert_eq!(entry.quantity, 1);

        let err = inv.consume_item("acct-1", "wpn-stick", 2).await.unwrap_err();
        assert!(matches!(
            err,
            GameError::InsufficientQuantity { owned: 1, requested: 2, .. }
        ));

        let err = inv.consume_item("acct-1", "def-buckler", 1).await.unwrap_err();
        assert!(matches!(err, GameError::InsufficientQuantity { owned: 0, .. }));
    }

    #[tokio::test]
    async fn listing_joins_ownership() {
        let (inv, _dir) = inventory();
        inv.grant_item("acct-1", "wpn-slingshot", 2).await.unwrap();

        let items = inv.list_available_items("acct-1").unwrap();
        assert_eq!(items.len(), Catalog::builtin().items().len());

        let sling = items
            .iter()
            .find(|i| i.item.item_id == "wpn-slingshot")
            .unwrap();
        assert!(sling.is_owned);
        assert_eq!(sling.owned_quantity, 2);

        let stick = items.iter().find(|i| i.item.item_id == "wpn-stick").unwrap();
        assert!(!stick.is_owned);
    }

    #[tokio::test]
    async fn equip_is_exclusive_per_kind() {
        let (inv, _dir) = inventory();
        inv.grant_item("acct-1", "wpn-stick", 1).await.unwrap();
        inv.grant_item("acct-1", "wpn-slingshot", 1).await.unwrap();
        inv.grant_item("acct-1", "def-buckler", 1).await.unwrap();

        inv.equip("acct-1", "wpn-stick", true).await.unwrap();
        inv.equip("acct-1", "def-buckler", true).await.unwrap();
        inv.equip("acct-1", "wpn-slingshot", true).await.unwrap();

        let equipped: Vec<String> = inv
            .list("acct-1")
            .unwrap()
            .into_iter()
            .filter(|e| e.is_equipped)
            .map(|e| e.item_id)
            .collect();
        assert_eq!(equipped.len(), 2);
        assert!(equipped.contains(&"wpn-slingshot".to_string()));
        assert!(equipped.contains(&"def-buckler".to_string()));

        let err = inv.equip("acct-1", "def-aegis", true).await.unwrap_err();
        assert_eq!(err, GameError::ItemNotOwned("def-aegis".into()));
    }

    #[test]
    fn wrong_kind_is_invalid_item() {
        let (inv, _dir) = inventory();
        let err = inv.item_of_kind("def-buckler", ItemKind::Weapon).unwrap_err();
        assert!(matches!(err, GameError::InvalidItem { .. }));
    }
}
