// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Item Catalog & Inventory
//!
//! - [`Catalog`] - immutable weapon/defense reference data
//! - [`Inventory`] - per-account ownership with stack limits

pub mod catalog;
pub mod service;

pub use catalog::{Catalog, CatalogError, CatalogItem, ItemKind, Rarity};
pub use service::{Inventory, InventoryEntry, ShopItem};
