// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet endpoints: balance and ledger history.

use axum::{
    extract::{Query, State},
    Json,
};

use crate::{
    auth::Auth,
    error::ApiError,
    models::{LedgerQuery, LedgerResponse, WalletResponse},
    state::AppState,
};

/// The caller's M1U balance.
#[utoipa::path(
    get,
    path = "/v1/wallet",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current balance", body = WalletResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<WalletResponse>, ApiError> {
    let balance = state.ledger.balance(&user.account_id)?;
    Ok(Json(WalletResponse::new(user.account_id, balance)))
}

/// Ledger rows of the caller, newest first.
#[utoipa::path(
    get,
    path = "/v1/wallet/ledger",
    tag = "Wallet",
    params(LedgerQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Ledger history", body = LedgerResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_ledger(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerResponse>, ApiError> {
    let entries = state.ledger.history(&user.account_id, query.limit())?;
    Ok(Json(LedgerResponse {
        account_id: user.account_id,
        entries,
    }))
}
