// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::battle::{BattleOutcome, CancelReason};

/// Lifecycle event of one battle session.
///
/// `sequence` starts at 1 and increases by exactly one per event of the
/// session. Events are never mutated after emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BattleEvent {
    pub session_id: String,
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: BattleEventKind,
}

impl BattleEvent {
    /// No event follows a terminal one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            BattleEventKind::BattleResolved { .. } | BattleEventKind::BattleCancelled { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BattleEventKind {
    AttackStarted {
        attacker_id: String,
        weapon_id: Option<String>,
    },
    DefenseNeeded {
        defender_id: String,
        defense_deadline: DateTime<Utc>,
    },
    BattleResolved {
        outcome: BattleOutcome,
        winner_id: String,
        stake_transferred: u64,
    },
    BattleCancelled {
        reason: CancelReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_is_flattened_into_event() {
        let event = BattleEvent {
            session_id: "s1".into(),
            sequence: 2,
            emitted_at: Utc::now(),
            kind: BattleEventKind::DefenseNeeded {
                defender_id: "bob".into(),
                defense_deadline: Utc::now(),
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "defense_needed");
        assert_eq!(json["defender_id"], "bob");
        assert_eq!(json["sequence"], 2);

        let back: BattleEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert!(!back.is_terminal());
    }
}
