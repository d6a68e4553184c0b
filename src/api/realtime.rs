// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! WebSocket streams: battle events per session and balance notifications
//! per account.
//!
//! Authorization happens before the upgrade, so a rejected caller gets a
//! normal JSON error. Each frame is one JSON-encoded event or notification.
//! Battle streams close after the terminal event; both streams close on
//! server shutdown.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    auth::Auth,
    error::ApiError,
    events::Subscription,
    models::EventsQuery,
    state::AppState,
    wallet::BalanceNotification,
};

/// Live battle events, starting after `after`.
#[utoipa::path(
    get,
    path = "/v1/battles/{session_id}/events/ws",
    tag = "Battles",
    params(
        ("session_id" = String, Path, description = "Battle session ID"),
        EventsQuery
    ),
    security(("bearer_auth" = [])),
    responses(
        (status = 101, description = "Switching to a WebSocket of BattleEvent frames"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn battle_events_ws(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let subscription =
        state
            .battles
            .subscribe(&session_id, &user.account_id, query.after.unwrap_or(0))?;
    let shutdown = state.shutdown.clone();

    debug!(session_id = %session_id, account_id = %user.account_id, "Event stream opened");
    Ok(ws.on_upgrade(move |socket| stream_events(socket, subscription, shutdown)))
}

/// Balance notifications of the caller.
#[utoipa::path(
    get,
    path = "/v1/wallet/notifications/ws",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    responses(
        (status = 101, description = "Switching to a WebSocket of BalanceNotification frames"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn notifications_ws(
    Auth(user): Auth,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let rx = state.ledger.notifier().subscribe();
    let shutdown = state.shutdown.clone();
    let account_id = user.account_id;

    ws.on_upgrade(move |socket| stream_notifications(socket, rx, account_id, shutdown))
}

async fn stream_events(
    mut socket: WebSocket,
    mut subscription: Subscription,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            next = subscription.next() => match next {
                Ok(Some(event)) => {
                    if send_json(&mut socket, &event).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(session_id = %subscription.session_id(), error = %e, "Event stream failed");
                    break;
                }
            },
        }
    }

    debug!(
        session_id = %subscription.session_id(),
        last_sequence = subscription.last_sequence(),
        "Event stream closed"
    );
    let _ = socket.send(Message::Close(None)).await;
}

async fn stream_notifications(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<BalanceNotification>,
    account_id: String,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            received = rx.recv() => match received {
                Ok(notification) if notification.account_id() == account_id => {
                    if send_json(&mut socket, &notification).await.is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(account_id = %account_id, skipped, "Notification stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    match serde_json::to_string(value) {
        Ok(text) => socket.send(Message::Text(text.into())).await,
        Err(e) => {
            warn!(error = %e, "Failed to encode stream frame");
            Ok(())
        }
    }
}
