// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Battle session endpoints.
//!
//! The acting account is always the token subject. Role checks (who may
//! accept, attack or defend) are enforced by the registry and surface as
//! `403 forbidden`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    auth::Auth,
    battle::{BattleSession, NewBattle, OutcomePreview},
    error::ApiError,
    models::{
        BattleListResponse, BattleStatusResponse, CreateBattleRequest, CreateBattleResponse,
        EventsQuery, EventsResponse, SubmitAttackRequest, SubmitAttackResponse,
        SubmitDefenseRequest,
    },
    state::AppState,
};

/// Challenge another player.
///
/// The stake is fixed now: `stake_percent` of the lower of the two balances.
#[utoipa::path(
    post,
    path = "/v1/battles",
    tag = "Battles",
    request_body = CreateBattleRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "Challenge created", body = CreateBattleResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Not authenticated"),
        (status = 422, description = "Declared weapon not owned")
    )
)]
pub async fn create_battle(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CreateBattleRequest>,
) -> Result<(StatusCode, Json<CreateBattleResponse>), ApiError> {
    let session = state
        .battles
        .create(NewBattle {
            challenger_id: user.account_id,
            opponent_id: request.opponent_id,
            stake_type: request.stake_type,
            stake_percent: request.stake_percent,
            arena_name: request.arena_name,
            weapon_id: request.weapon_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CreateBattleResponse::from(&session))))
}

/// Battles the caller takes part in, newest first.
#[utoipa::path(
    get,
    path = "/v1/battles",
    tag = "Battles",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Battle history", body = BattleListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_battles(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<BattleListResponse>, ApiError> {
    let battles = state.battles.list_for(&user.account_id)?;
    let total = battles.len();
    Ok(Json(BattleListResponse { battles, total }))
}

/// Full session state, for re-fetching after a reconnect.
#[utoipa::path(
    get,
    path = "/v1/battles/{session_id}",
    tag = "Battles",
    params(("session_id" = String, Path, description = "Battle session ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Session state", body = BattleSession),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn get_battle(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<BattleSession>, ApiError> {
    Ok(Json(state.battles.get(&session_id, &user.account_id)?))
}

/// Accept a pending challenge (opponent only).
#[utoipa::path(
    post,
    path = "/v1/battles/{session_id}/accept",
    tag = "Battles",
    params(("session_id" = String, Path, description = "Battle session ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Challenge accepted", body = BattleStatusResponse),
        (status = 403, description = "Caller is not the opponent"),
        (status = 409, description = "Challenge is no longer pending"),
        (status = 410, description = "Challenge expired")
    )
)]
pub async fn accept_battle(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<BattleStatusResponse>, ApiError> {
    let session = state.battles.accept(&session_id, &user.account_id).await?;
    Ok(Json(BattleStatusResponse::from(&session)))
}

/// Decline a pending challenge (opponent only).
#[utoipa::path(
    post,
    path = "/v1/battles/{session_id}/decline",
    tag = "Battles",
    params(("session_id" = String, Path, description = "Battle session ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Challenge declined", body = BattleStatusResponse),
        (status = 403, description = "Caller is not the opponent"),
        (status = 409, description = "Challenge is no longer pending"),
        (status = 410, description = "Challenge expired")
    )
)]
pub async fn decline_battle(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<BattleStatusResponse>, ApiError> {
    let session = state.battles.decline(&session_id, &user.account_id).await?;
    Ok(Json(BattleStatusResponse::from(&session)))
}

/// Withdraw a pending challenge (challenger only).
#[utoipa::path(
    post,
    path = "/v1/battles/{session_id}/withdraw",
    tag = "Battles",
    params(("session_id" = String, Path, description = "Battle session ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Challenge withdrawn", body = BattleStatusResponse),
        (status = 403, description = "Caller is not the challenger"),
        (status = 409, description = "Challenge is no longer pending"),
        (status = 410, description = "Challenge expired")
    )
)]
pub async fn withdraw_battle(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<BattleStatusResponse>, ApiError> {
    let session = state.battles.withdraw(&session_id, &user.account_id).await?;
    Ok(Json(BattleStatusResponse::from(&session)))
}

/// Start the pre-battle countdown of a ready session.
#[utoipa::path(
    post,
    path = "/v1/battles/{session_id}/countdown",
    tag = "Battles",
    params(("session_id" = String, Path, description = "Battle session ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Countdown started", body = BattleStatusResponse),
        (status = 403, description = "Not a participant"),
        (status = 409, description = "Session is not ready")
    )
)]
pub async fn start_countdown(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<BattleStatusResponse>, ApiError> {
    let session = state
        .battles
        .start_countdown(&session_id, &user.account_id)
        .await?;
    Ok(Json(BattleStatusResponse::from(&session)))
}

/// Attack (challenger only). Opens the defense window.
#[utoipa::path(
    post,
    path = "/v1/battles/{session_id}/attack",
    tag = "Battles",
    params(("session_id" = String, Path, description = "Battle session ID")),
    request_body = SubmitAttackRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Attack accepted", body = SubmitAttackResponse),
        (status = 403, description = "Caller is not the attacker"),
        (status = 409, description = "Already attacked or not active"),
        (status = 410, description = "Attack window expired"),
        (status = 422, description = "Weapon not owned or not a weapon")
    )
)]
pub async fn submit_attack(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SubmitAttackRequest>,
) -> Result<Json<SubmitAttackResponse>, ApiError> {
    let session = state
        .battles
        .submit_attack(&session_id, &user.account_id, request.weapon_id.as_deref())
        .await?;
    let defense_deadline = session
        .defense_deadline
        .ok_or_else(|| ApiError::internal("defense window was not opened"))?;

    Ok(Json(SubmitAttackResponse {
        session_id: session.session_id,
        status: session.status,
        defense_deadline,
    }))
}

/// Defend (opponent only). Resolves the battle.
#[utoipa::path(
    post,
    path = "/v1/battles/{session_id}/defense",
    tag = "Battles",
    params(("session_id" = String, Path, description = "Battle session ID")),
    request_body = SubmitDefenseRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Battle resolved", body = OutcomePreview),
        (status = 403, description = "Caller is not the defender"),
        (status = 409, description = "Already defended or already resolved"),
        (status = 410, description = "Defense window expired"),
        (status = 422, description = "Defense item not owned or not a defense item")
    )
)]
pub async fn submit_defense(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SubmitDefenseRequest>,
) -> Result<Json<OutcomePreview>, ApiError> {
    let preview = state
        .battles
        .submit_defense(
            &session_id,
            &user.account_id,
            request.defense_item_id.as_deref(),
        )
        .await?;
    Ok(Json(preview))
}

/// Stored events after `after`, in sequence order.
#[utoipa::path(
    get,
    path = "/v1/battles/{session_id}/events",
    tag = "Battles",
    params(
        ("session_id" = String, Path, description = "Battle session ID"),
        EventsQuery
    ),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Event replay", body = EventsResponse),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn list_events(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let after = query.after.unwrap_or(0);
    let events = state
        .battles
        .events(&session_id, &user.account_id, after)?;
    let last_sequence = events.last().map_or(after, |e| e.sequence);

    Ok(Json(EventsResponse {
        session_id,
        events,
        last_sequence,
    }))
}
