// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only API endpoints.
//!
//! These endpoints require the Admin role and provide:
//! - Balance seeding (ledger reason `admin_grant`)
//! - The list of purchase attempts whose refund failed
//! - Manual retry of such a refund

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use crate::{
    auth::AdminOnly,
    error::ApiError,
    models::{
        AdminCreditRequest, ReconciliationListResponse, RefundStatus, RetryCompensationResponse,
        WalletResponse,
    },
    shop::RefundOutcome,
    state::AppState,
    wallet::LedgerReason,
};

/// Credit an account.
#[utoipa::path(
    post,
    path = "/v1/admin/wallets/{account_id}/credit",
    tag = "Admin",
    params(("account_id" = String, Path, description = "Account to credit")),
    request_body = AdminCreditRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Credited", body = WalletResponse),
        (status = 400, description = "Amount must be positive"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn credit_wallet(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(request): Json<AdminCreditRequest>,
) -> Result<Json<WalletResponse>, ApiError> {
    let balance = state
        .ledger
        .credit(&account_id, request.amount, LedgerReason::AdminGrant)
        .await?;

    info!(
        admin_id = %admin.account_id,
        account_id = %account_id,
        amount = request.amount,
        new_balance = balance,
        "Admin credit"
    );
    Ok(Json(WalletResponse::new(account_id, balance)))
}

/// Purchase attempts whose refund could not be applied.
#[utoipa::path(
    get,
    path = "/v1/admin/reconciliations",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Open reconciliation records", body = ReconciliationListResponse),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn list_reconciliations(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<ReconciliationListResponse>, ApiError> {
    let records = state
        .db
        .reconciliations()
        .map_err(crate::error::GameError::from)?;
    let total = records.len();
    Ok(Json(ReconciliationListResponse { records, total }))
}

/// Re-apply the refund of a flagged purchase attempt. Idempotent.
#[utoipa::path(
    post,
    path = "/v1/admin/reconciliations/{correlation_id}/retry",
    tag = "Admin",
    params(("correlation_id" = String, Path, description = "Purchase correlation ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Refund applied or already applied", body = RetryCompensationResponse),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "No such record"),
        (status = 500, description = "Refund failed again")
    )
)]
pub async fn retry_compensation(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Result<Json<RetryCompensationResponse>, ApiError> {
    let status = match state.shop.retry_compensation(&correlation_id).await? {
        RefundOutcome::Refunded(_) => RefundStatus::Refunded,
        RefundOutcome::AlreadyRefunded => RefundStatus::AlreadyRefunded,
    };

    info!(
        admin_id = %admin.account_id,
        correlation_id = %correlation_id,
        ?status,
        "Compensation retried"
    );
    Ok(Json(RetryCompensationResponse {
        correlation_id,
        status,
    }))
}
