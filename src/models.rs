// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. Domain records
//! ([`BattleSession`], [`BattleEvent`], [`LedgerEntry`], ...) are returned as
//! they are; the types here only wrap or narrow them.
//!
//! Account ids never appear in request bodies: the acting account is always
//! the authenticated token subject.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::battle::{BattleSession, BattleStatus, StakePercent, StakeType};
use crate::events::BattleEvent;
use crate::inventory::{InventoryEntry, ShopItem};
use crate::shop::ReconciliationRecord;
use crate::wallet::LedgerEntry;

/// Ledger page size when `limit` is not given.
pub const DEFAULT_LEDGER_LIMIT: usize = 50;

/// Largest ledger page.
pub const MAX_LEDGER_LIMIT: usize = 500;

// =============================================================================
// Battles
// =============================================================================

/// Challenge another player.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateBattleRequest {
    pub opponent_id: String,
    #[serde(default)]
    pub stake_type: StakeType,
    /// 25, 50 or 75.
    pub stake_percent: StakePercent,
    #[serde(default)]
    pub arena_name: Option<String>,
    /// Weapon the challenger brings; must be owned.
    #[serde(default)]
    pub weapon_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateBattleResponse {
    pub session_id: String,
    pub status: BattleStatus,
    /// Stake fixed at creation.
    pub stake_amount: u64,
    pub expires_at: DateTime<Utc>,
}

impl From<&BattleSession> for CreateBattleResponse {
    fn from(session: &BattleSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            status: session.status,
            stake_amount: session.stake_amount,
            expires_at: session.expires_at,
        }
    }
}

/// Status after a transition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BattleStatusResponse {
    pub session_id: String,
    pub status: BattleStatus,
}

impl From<&BattleSession> for BattleStatusResponse {
    fn from(session: &BattleSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            status: session.status,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SubmitAttackRequest {
    /// Weapon to use; one unit is consumed. Omit to attack unarmed.
    #[serde(default)]
    pub weapon_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitAttackResponse {
    pub session_id: String,
    pub status: BattleStatus,
    pub defense_deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SubmitDefenseRequest {
    /// Defense item to use; one unit is consumed. Omit to defend empty-handed.
    #[serde(default)]
    pub defense_item_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BattleListResponse {
    pub battles: Vec<BattleSession>,
    pub total: usize,
}

/// Resume point for event replay and subscription.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Last sequence already seen; 0 or absent replays everything.
    pub after: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventsResponse {
    pub session_id: String,
    pub events: Vec<BattleEvent>,
    /// Highest sequence returned, or the requested `after` if none.
    pub last_sequence: u64,
}

// =============================================================================
// Shop & Inventory
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShopItemsResponse {
    pub items: Vec<ShopItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PurchaseRequest {
    pub item_id: String,
    #[serde(default = "default_qty")]
    pub qty: u32,
    /// Idempotency key. Re-sending a completed key returns the original receipt.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

fn default_qty() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InventoryResponse {
    pub items: Vec<InventoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EquipRequest {
    #[serde(default = "default_equipped")]
    pub equipped: bool,
}

fn default_equipped() -> bool {
    true
}

// =============================================================================
// Wallet
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    pub account_id: String,
    pub balance: u64,
    pub currency: String,
}

impl WalletResponse {
    pub fn new(account_id: impl Into<String>, balance: u64) -> Self {
        Self {
            account_id: account_id.into(),
            balance,
            currency: "M1U".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct LedgerQuery {
    /// Maximum entries, newest first (default 50, max 500).
    pub limit: Option<usize>,
}

impl LedgerQuery {
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_LEDGER_LIMIT)
            .clamp(1, MAX_LEDGER_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerResponse {
    pub account_id: String,
    pub entries: Vec<LedgerEntry>,
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminCreditRequest {
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReconciliationListResponse {
    pub records: Vec<ReconciliationRecord>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Refunded,
    AlreadyRefunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetryCompensationResponse {
    pub correlation_id: String,
    pub status: RefundStatus,
}
