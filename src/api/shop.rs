// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shop endpoints.

use axum::{extract::State, Json};
use tracing::info;

use crate::{
    auth::Auth,
    error::ApiError,
    models::{PurchaseRequest, ShopItemsResponse},
    shop::PurchaseReceipt,
    state::AppState,
};

/// Catalog with the caller's ownership flags.
#[utoipa::path(
    get,
    path = "/v1/shop/items",
    tag = "Shop",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Shop catalog", body = ShopItemsResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_items(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<ShopItemsResponse>, ApiError> {
    let items = state.shop.list_items(&user.account_id)?;
    Ok(Json(ShopItemsResponse { items }))
}

/// Buy `qty` units of an item.
///
/// Debit and grant either both happen or neither does. Re-sending a
/// completed `correlation_id` returns the original receipt.
#[utoipa::path(
    post,
    path = "/v1/shop/purchase",
    tag = "Shop",
    request_body = PurchaseRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Purchase completed", body = PurchaseReceipt),
        (status = 400, description = "Invalid quantity or reused correlation id"),
        (status = 404, description = "Unknown item"),
        (status = 422, description = "Insufficient funds or stack limit exceeded"),
        (status = 503, description = "Storage unavailable, nothing was charged")
    )
)]
pub async fn purchase_item(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> Result<Json<PurchaseReceipt>, ApiError> {
    let receipt = state
        .shop
        .purchase(
            &user.account_id,
            &request.item_id,
            request.qty,
            request.correlation_id,
        )
        .await?;

    info!(
        account_id = %receipt.account_id,
        correlation_id = %receipt.correlation_id,
        item_id = %receipt.item_id,
        "Purchase request served"
    );
    Ok(Json(receipt))
}
