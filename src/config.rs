// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the typed [`AppConfig`] loaded
//! from them at startup. Unset variables take their default; unparsable
//! numeric values fall back to the default with a warning.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding `battle.redb` | `./data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `CHALLENGE_TTL_SECS` | Lifetime of a pending challenge | `300` |
//! | `COUNTDOWN_SECS` | Delay between countdown and active | `3` |
//! | `DEFENSE_WINDOW_SECS` | Defense window length | `15` |
//! | `ATTACK_WINDOW_SECS` | Time allowed to attack before forfeit | `60` |
//! | `SWEEP_INTERVAL_SECS` | Expiry sweeper period | `5` |
//! | `CATALOG_PATH` | JSON catalog seed file | built-in catalog |
//! | `STARTING_BALANCE` | Balance of a first-seen account | `0` |
//! | `AUTH_JWT_SECRET` | HS256 secret for bearer tokens | unset (dev mode) |
//! | `AUTH_ISSUER` | Expected JWT issuer claim | Optional |
//! | `AUTH_AUDIENCE` | Expected JWT audience claim | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::auth::AuthConfig;
use crate::battle::BattleConfig;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const CHALLENGE_TTL_ENV: &str = "CHALLENGE_TTL_SECS";
pub const COUNTDOWN_ENV: &str = "COUNTDOWN_SECS";
pub const DEFENSE_WINDOW_ENV: &str = "DEFENSE_WINDOW_SECS";
pub const ATTACK_WINDOW_ENV: &str = "ATTACK_WINDOW_SECS";
pub const SWEEP_INTERVAL_ENV: &str = "SWEEP_INTERVAL_SECS";
pub const CATALOG_PATH_ENV: &str = "CATALOG_PATH";
pub const STARTING_BALANCE_ENV: &str = "STARTING_BALANCE";
pub const AUTH_SECRET_ENV: &str = "AUTH_JWT_SECRET";
pub const AUTH_ISSUER_ENV: &str = "AUTH_ISSUER";
pub const AUTH_AUDIENCE_ENV: &str = "AUTH_AUDIENCE";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Database file inside the data directory.
pub const DATABASE_FILE: &str = "battle.redb";

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    /// `json` (any case) selects JSON; anything else is pretty.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }

    /// Read before the rest of the configuration, so that configuration
    /// warnings are already logged in the right format.
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub battle: BattleConfig,
    pub sweep_interval: Duration,
    pub catalog_path: Option<PathBuf>,
    pub starting_balance: u64,
    pub auth: AuthConfig,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            host: "0.0.0.0".to_string(),
            port: 8080,
            battle: BattleConfig::default(),
            sweep_interval: Duration::from_secs(5),
            catalog_path: None,
            starting_balance: 0,
            auth: AuthConfig::default(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let secs = |name: &str, default: chrono::Duration| -> chrono::Duration {
            match var(name).map(|v| v.trim().parse::<u32>()) {
                Some(Ok(value)) if value > 0 => chrono::Duration::seconds(i64::from(value)),
                Some(_) => {
                    warn!(variable = name, "Invalid duration, using default");
                    default
                }
                None => default,
            }
        };

        let battle = BattleConfig {
            challenge_ttl: secs(CHALLENGE_TTL_ENV, defaults.battle.challenge_ttl),
            countdown: secs(COUNTDOWN_ENV, defaults.battle.countdown),
            defense_window: secs(DEFENSE_WINDOW_ENV, defaults.battle.defense_window),
            attack_window: secs(ATTACK_WINDOW_ENV, defaults.battle.attack_window),
        };

        let sweep_secs: u64 = parse_or(
            var(SWEEP_INTERVAL_ENV),
            SWEEP_INTERVAL_ENV,
            defaults.sweep_interval.as_secs(),
        )
        .max(1);

        let log_format = LogFormat::parse(var(LOG_FORMAT_ENV).as_deref());

        Self {
            data_dir: var(DATA_DIR_ENV).map(PathBuf::from).unwrap_or(defaults.data_dir),
            host: var(HOST_ENV).unwrap_or(defaults.host),
            port: parse_or(var(PORT_ENV), PORT_ENV, defaults.port),
            battle,
            sweep_interval: Duration::from_secs(sweep_secs),
            catalog_path: var(CATALOG_PATH_ENV).map(PathBuf::from),
            starting_balance: parse_or(
                var(STARTING_BALANCE_ENV),
                STARTING_BALANCE_ENV,
                defaults.starting_balance,
            ),
            auth: AuthConfig {
                secret: var(AUTH_SECRET_ENV),
                issuer: var(AUTH_ISSUER_ENV),
                audience: var(AUTH_AUDIENCE_ENV),
            },
            log_format,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, name: &str, default: T) -> T {
    match value {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "Invalid value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.battle.defense_window, chrono::Duration::seconds(15));
        assert_eq!(config.battle.challenge_ttl, chrono::Duration::seconds(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.database_path(), PathBuf::from("./data/battle.redb"));
        assert!(!config.auth.is_production());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn values_are_read() {
        let config = config_from(&[
            ("DATA_DIR", "/srv/battle"),
            ("PORT", "9090"),
            ("DEFENSE_WINDOW_SECS", "20"),
            ("STARTING_BALANCE", "250"),
            ("AUTH_JWT_SECRET", "s3cret"),
            ("AUTH_ISSUER", "hunt-auth"),
            ("LOG_FORMAT", "JSON"),
            ("CATALOG_PATH", "/srv/catalog.json"),
        ]);
        assert_eq!(config.database_path(), PathBuf::from("/srv/battle/battle.redb"));
        assert_eq!(config.bind_address(), "0.0.0.0:9090");
        assert_eq!(config.battle.defense_window, chrono::Duration::seconds(20));
        assert_eq!(config.starting_balance, 250);
        assert!(config.auth.is_production());
        assert_eq!(config.auth.issuer.as_deref(), Some("hunt-auth"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.catalog_path, Some(PathBuf::from("/srv/catalog.json")));
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = config_from(&[
            ("PORT", "eighty"),
            ("DEFENSE_WINDOW_SECS", "0"),
            ("SWEEP_INTERVAL_SECS", "-3"),
            ("AUTH_JWT_SECRET", "  "),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.battle.defense_window, chrono::Duration::seconds(15));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert!(config.auth.secret.is_none());
    }
}
