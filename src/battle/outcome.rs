// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deterministic combat scoring.
//!
//! ```text
//! score(item) = power * rarity_pct / 100 + min_rank * 5
//! rarity_pct  = common 100 | rare 115 | epic 130 | legendary 150
//! ```
//!
//! An unarmed attack scores [`UNARMED_ATTACK_SCORE`]; no defense scores 0.
//! The attacker wins only with a strictly higher score.

use crate::inventory::CatalogItem;

use super::model::BattleOutcome;

pub const UNARMED_ATTACK_SCORE: u64 = 10;
const RANK_BONUS: u64 = 5;

pub fn item_score(item: &CatalogItem) -> u64 {
    item.power.saturating_mul(item.rarity.modifier_pct()) / 100
        + u64::from(item.min_rank) * RANK_BONUS
}

pub fn attack_score(weapon: Option<&CatalogItem>) -> u64 {
    weapon.map_or(UNARMED_ATTACK_SCORE, item_score)
}

pub fn defense_score(defense: Option<&CatalogItem>) -> u64 {
    defense.map_or(0, item_score)
}

pub fn decide(attack_score: u64, defense_score: u64) -> BattleOutcome {
    if attack_score > defense_score {
        BattleOutcome::AttackerWins
    } else {
        BattleOutcome::DefenderWins
    }
}

/// Amount actually moved: the fixed stake, capped by what the loser holds.
pub fn settlement_amount(stake_amount: u64, loser_balance: u64) -> u64 {
    stake_amount.min(loser_balance)
}
