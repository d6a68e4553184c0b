// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Inventory endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    auth::Auth,
    error::ApiError,
    inventory::InventoryEntry,
    models::{EquipRequest, InventoryResponse},
    state::AppState,
};

/// Items the caller owns.
#[utoipa::path(
    get,
    path = "/v1/inventory",
    tag = "Inventory",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Owned items", body = InventoryResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_inventory(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<InventoryResponse>, ApiError> {
    let items = state.inventory.list(&user.account_id)?;
    Ok(Json(InventoryResponse { items }))
}

/// Equip or unequip an owned item. Equipping unequips other items of the
/// same kind.
#[utoipa::path(
    post,
    path = "/v1/inventory/{item_id}/equip",
    tag = "Inventory",
    params(("item_id" = String, Path, description = "Catalog item ID")),
    request_body = EquipRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Updated entry", body = InventoryEntry),
        (status = 404, description = "Unknown item"),
        (status = 422, description = "Item not owned")
    )
)]
pub async fn equip_item(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Json(request): Json<EquipRequest>,
) -> Result<Json<InventoryEntry>, ApiError> {
    let entry = state
        .inventory
        .equip(&user.account_id, &item_id, request.equipped)
        .await?;
    Ok(Json(entry))
}
