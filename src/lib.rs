// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Hunt Battle Server - Battle Session Engine
//!
//! Two-player battle sessions with a timed defense window, an M1U wallet
//! ledger, and an item shop, served over HTTP and WebSocket.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Bearer-token authentication and roles
//! - `battle` - Session state machine, scoring, deadline timers
//! - `events` - Per-session event log and live streams
//! - `inventory` - Item catalog and per-account ownership
//! - `shop` - Purchases with fallback and compensation
//! - `wallet` - Balances, ledger history, balance notifications
//! - `storage` - Embedded redb database and event cache

pub mod api;
pub mod auth;
pub mod battle;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod inventory;
pub mod locks;
pub mod models;
pub mod shop;
pub mod state;
pub mod storage;
pub mod wallet;
