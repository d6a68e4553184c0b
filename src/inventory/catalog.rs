// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Static catalog of purchasable combat items.
//!
//! The catalog is reference data: it is loaded once at startup (built-in
//! seed or a JSON file named by `CATALOG_PATH`) and never mutated.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Weapon,
    Defense,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Weapon => write!(f, "weapon"),
            ItemKind::Defense => write!(f, "defense"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    /// Score multiplier in percent.
    pub fn modifier_pct(self) -> u64 {
        match self {
            Rarity::Common => 100,
            Rarity::Rare => 115,
            Rarity::Epic => 130,
            Rarity::Legendary => 150,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CatalogItem {
    pub item_id: String,
    pub kind: ItemKind,
    /// Stable symbolic name.
    pub code: String,
    pub base_price: u64,
    pub power: u64,
    pub rarity: Rarity,
    pub min_rank: u32,
    pub max_stack: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid catalog item {item_id}: {reason}")]
    Invalid { item_id: String, reason: String },
}

/// Immutable item catalog indexed by `item_id`.
#[derive(Debug, Clone)]
pub struct Catalog {
    items: Vec<CatalogItem>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(items: Vec<CatalogItem>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(items.len());
        for (pos, item) in items.iter().enumerate() {
            validate(item)?;
            if index.insert(item.item_id.clone(), pos).is_some() {
                return Err(CatalogError::Invalid {
                    item_id: item.item_id.clone(),
                    reason: "duplicate item_id".into(),
                });
            }
        }
        Ok(Self { items, index })
    }

    /// Load a catalog from a JSON array of items.
    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let items: Vec<CatalogItem> = serde_json::from_str(&raw)?;
        Self::new(items)
    }

    /// Built-in seed catalog.
    pub fn builtin() -> Self {
        let items = vec![
            item("wpn-stick", ItemKind::Weapon, "STICK", 50, 10, Rarity::Common, 0, 5),
            item("wpn-slingshot", ItemKind::Weapon, "SLINGSHOT", 120, 25, Rarity::Common, 0, 3),
            item("wpn-crossbow", ItemKind::Weapon, "CROSSBOW", 300, 45, Rarity::Rare, 2, 2),
            item("wpn-storm-lance", ItemKind::Weapon, "STORM_LANCE", 650, 60, Rarity::Epic, 4, 1),
            item("wpn-thunder-hammer", ItemKind::Weapon, "THUNDER_HAMMER", 1000, 80, Rarity::Legendary, 5, 1),
            item("def-buckler", ItemKind::Defense, "BUCKLER", 50, 10, Rarity::Common, 0, 5),
            item("def-kite-shield", ItemKind::Defense, "KITE_SHIELD", 200, 30, Rarity::Rare, 1, 3),
            item("def-mirror-ward", ItemKind::Defense, "MIRROR_WARD", 450, 50, Rarity::Epic, 3, 2),
            item("def-aegis", ItemKind::Defense, "AEGIS", 900, 70, Rarity::Legendary, 5, 1),
        ];
        let index = items
            .iter()
            .enumerate()
            .map(|(pos, item)| (item.item_id.clone(), pos))
            .collect();
        Self { items, index }
    }

    pub fn get(&self, item_id: &str) -> Option<&CatalogItem> {
        self.index.get(item_id).map(|&pos| &self.items[pos])
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }
}

fn validate(item: &CatalogItem) -> Result<(), CatalogError> {
    let reason = if item.item_id.trim().is_empty() {
        "item_id must not be empty"
    } else if item.base_price == 0 {
        "base_price must be positive"
    } else if item.max_stack == 0 {
        "max_stack must be at least 1"
    } else {
        return Ok(());
    };
    Err(CatalogError::Invalid {
        item_id: item.item_id.clone(),
        reason: reason.into(),
    })
}

#[allow(clippy::too_many_arguments)]
fn item(
    item_id: &str,
    kind: ItemKind,
    code: &str,
    base_price: u64,
    power: u64,
    rarity: Rarity,
    min_rank: u32,
    max_stack: u32,
) -> CatalogItem {
    CatalogItem {
        item_id: item_id.into(),
        kind,
        code: code.into(),
        base_price,
        power,
        rarity,
        min_rank,
        max_stack,
    }
}
