// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Expiry Sweeper
//!
//! Background backstop for session timers. Every `interval` it scans stored
//! sessions and handles any whose deadline has passed: pending challenges
//! are cancelled, finished countdowns go active, and overdue attack or
//! defense windows are resolved. Timers normally get there first, in which
//! case the sweep finds nothing to do.
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::registry::BattleRegistry;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

pub struct ExpirySweeper {
    registry: BattleRegistry,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(registry: BattleRegistry, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Expiry sweeper starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Expiry sweeper shutting down");
                    return;
                }
            }

            match self.registry.sweep().await {
                Ok(0) => {}
                Ok(handled) => info!(handled, "Expiry sweeper: handled overdue sessions"),
                Err(e) => warn!(error = %e, "Expiry sweeper: scan failed"),
            }
        }
    }
}
