// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state handed to every handler.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthConfig;
use crate::battle::{BattleConfig, BattleRegistry, Scheduler};
use crate::clock::Clock;
use crate::events::EventChannel;
use crate::inventory::{Catalog, Inventory};
use crate::locks::LockRegistry;
use crate::shop::{LedgerShopStore, ShopProcessor};
use crate::storage::GameDatabase;
use crate::wallet::{Notifier, WalletLedger};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<GameDatabase>,
    pub ledger: Arc<WalletLedger>,
    pub inventory: Arc<Inventory>,
    pub shop: Arc<ShopProcessor>,
    pub battles: BattleRegistry,
    pub auth_config: AuthConfig,
    /// Cancelled on shutdown; long-lived streams end with it.
    pub shutdown: CancellationToken,
}

/// Engine settings that are not part of any single component.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub battle: BattleConfig,
    pub starting_balance: u64,
}

impl AppState {
    /// Wire every component over one database and one account lock registry.
    pub fn new(
        db: Arc<GameDatabase>,
        catalog: Catalog,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let account_locks = Arc::new(LockRegistry::new());

        let ledger = Arc::new(WalletLedger::new(
            db.clone(),
            account_locks.clone(),
            Notifier::new(),
            clock.clone(),
            settings.starting_balance,
        ));
        let inventory = Arc::new(Inventory::new(
            db.clone(),
            Arc::new(catalog),
            account_locks,
            clock.clone(),
        ));
        let store = Arc::new(LedgerShopStore::new(
            db.clone(),
            ledger.clone(),
            inventory.clone(),
            clock.clone(),
        ));
        let shop = Arc::new(ShopProcessor::new(
            store,
            ledger.clone(),
            inventory.clone(),
            clock.clone(),
        ));
        let battles = BattleRegistry::new(
            db.clone(),
            ledger.clone(),
            inventory.clone(),
            EventChannel::new(db.clone(), clock.clone()),
            Scheduler::new(shutdown.clone()),
            clock,
            settings.battle,
        );

        Self {
            db,
            ledger,
            inventory,
            shop,
            battles,
            auth_config: AuthConfig::default(),
            shutdown,
        }
    }

    pub fn with_auth_config(mut self, auth_config: AuthConfig) -> Self {
        self.auth_config = auth_config;
        self
    }
}
