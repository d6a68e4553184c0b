// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    battle::{
        BattleOutcome, BattleSession, BattleStatus, CancelReason, OutcomePreview, Resolution,
        ResolutionCause, StakePercent, StakeType, StatusChange,
    },
    events::{BattleEvent, BattleEventKind},
    inventory::{CatalogItem, InventoryEntry, ItemKind, Rarity, ShopItem},
    models::{
        AdminCreditRequest, BattleListResponse, BattleStatusResponse, CreateBattleRequest,
        CreateBattleResponse, EquipRequest, EventsResponse, InventoryResponse, LedgerResponse,
        PurchaseRequest, ReconciliationListResponse, RefundStatus, RetryCompensationResponse,
        ShopItemsResponse, SubmitAttackRequest, SubmitAttackResponse, SubmitDefenseRequest,
        WalletResponse,
    },
    shop::{PurchasePath, PurchaseReceipt, ReconciliationRecord},
    state::AppState,
    wallet::{BalanceNotification, LedgerEntry, LedgerReason},
};

pub mod admin;
pub mod battles;
pub mod health;
pub mod inventory;
pub mod realtime;
pub mod shop;
pub mod wallet;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route(
            "/battles",
            get(battles::list_battles).post(battles::create_battle),
        )
        .route("/battles/{session_id}", get(battles::get_battle))
        .route("/battles/{session_id}/accept", post(battles::accept_battle))
        .route("/battles/{session_id}/decline", post(battles::decline_battle))
        .route("/battles/{session_id}/withdraw", post(battles::withdraw_battle))
        .route("/battles/{session_id}/countdown", post(battles::start_countdown))
        .route("/battles/{session_id}/attack", post(battles::submit_attack))
        .route("/battles/{session_id}/defense", post(battles::submit_defense))
        .route("/battles/{session_id}/events", get(battles::list_events))
        .route(
            "/battles/{session_id}/events/ws",
            get(realtime::battle_events_ws),
        )
        .route("/shop/items", get(shop::list_items))
        .route("/shop/purchase", post(shop::purchase_item))
        .route("/inventory", get(inventory::list_inventory))
        .route("/inventory/{item_id}/equip", post(inventory::equip_item))
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/ledger", get(wallet::get_ledger))
        .route("/wallet/notifications/ws", get(realtime::notifications_ws))
        .route(
            "/admin/wallets/{account_id}/credit",
            post(admin::credit_wallet),
        )
        .route("/admin/reconciliations", get(admin::list_reconciliations))
        .route(
            "/admin/reconciliations/{correlation_id}/retry",
            post(admin::retry_compensation),
        );

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        battles::create_battle,
        battles::list_battles,
        battles::get_battle,
        battles::accept_battle,
        battles::decline_battle,
        battles::withdraw_battle,
        battles::start_countdown,
        battles::submit_attack,
        battles::submit_defense,
        battles::list_events,
        realtime::battle_events_ws,
        realtime::notifications_ws,
        shop::list_items,
        shop::purchase_item,
        inventory::list_inventory,
        inventory::equip_item,
        wallet::get_wallet,
        wallet::get_ledger,
        admin::credit_wallet,
        admin::list_reconciliations,
        admin::retry_compensation
    ),
    components(
        schemas(
            BattleSession,
            BattleStatus,
            StakeType,
            StakePercent,
            BattleOutcome,
            CancelReason,
            ResolutionCause,
            Resolution,
            StatusChange,
            OutcomePreview,
            BattleEvent,
            BattleEventKind,
            CatalogItem,
            ItemKind,
            Rarity,
            ShopItem,
            InventoryEntry,
            PurchasePath,
            PurchaseReceipt,
            ReconciliationRecord,
            LedgerEntry,
            LedgerReason,
            BalanceNotification,
            CreateBattleRequest,
            CreateBattleResponse,
            BattleStatusResponse,
            BattleListResponse,
            SubmitAttackRequest,
            SubmitAttackResponse,
            SubmitDefenseRequest,
            EventsResponse,
            ShopItemsResponse,
            PurchaseRequest,
            InventoryResponse,
            EquipRequest,
            WalletResponse,
            LedgerResponse,
            AdminCreditRequest,
            ReconciliationListResponse,
            RefundStatus,
            RetryCompensationResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Battles", description = "Two-player battle sessions"),
        (name = "Shop", description = "Item purchases"),
        (name = "Inventory", description = "Owned items"),
        (name = "Wallet", description = "M1U balance and ledger"),
        (name = "Admin", description = "Operational tooling"),
        (name = "Health", description = "Liveness and readiness checks")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let (state, _dir) = test_state();
        let app = router(state);
        // Ensure the router can be converted into a service without panicking.
        let _ = app.into_make_service();
    }

    #[test]
    fn openapi_lists_battle_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/battles"));
        assert!(doc.paths.paths.contains_key("/v1/battles/{session_id}/defense"));
        assert!(doc.paths.paths.contains_key("/v1/shop/purchase"));
    }

    #[tokio::test]
    async fn health_is_public_and_v1_is_not() {
        let (state, _dir) = test_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["checks"]["database"], "ok");
        assert_eq!(body["checks"]["auth_mode"], "development");

        let response = app
            .oneshot(Request::get("/v1/wallet").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
