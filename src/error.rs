// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Domain and HTTP error types.
//!
//! [`GameError`] is the engine's error taxonomy. Validation failures are
//! returned before any state is touched; [`GameError::TransientStorageFailure`]
//! is the only retryable class; [`GameError::Inconsistent`] means a refund
//! could not be applied and needs manual reconciliation.
//!
//! [`ApiError`] is what handlers return. Every `GameError` maps onto a status
//! code and a stable `error_code` string.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::storage::StorageError;

/// Engine error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: u64, required: u64 },

    #[error("stack limit exceeded for {item_id}: owned {owned}, requested {requested}, max {max_stack}")]
    StackLimitExceeded {
        item_id: String,
        owned: u32,
        requested: u32,
        max_stack: u32,
    },

    #[error("insufficient quantity of {item_id}: owned {owned}, requested {requested}")]
    InsufficientQuantity {
        item_id: String,
        owned: u32,
        requested: u32,
    },

    #[error("item {0} is not owned")]
    ItemNotOwned(String),

    #[error("item {item_id} cannot be used as {expected}")]
    InvalidItem { item_id: String, expected: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("challenge expired")]
    Expired,

    #[error("already submitted")]
    AlreadySubmitted,

    #[error("defense window expired")]
    WindowExpired,

    #[error("battle already resolved")]
    AlreadyResolved,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transient storage failure: {0}")]
    TransientStorageFailure(String),

    #[error("inconsistent state requires reconciliation: {0}")]
    Inconsistent(String),
}

impl GameError {
    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            GameError::InsufficientFunds { .. } => "insufficient_funds",
            GameError::StackLimitExceeded { .. } => "stack_limit_exceeded",
            GameError::InsufficientQuantity { .. } => "insufficient_quantity",
            GameError::ItemNotOwned(_) => "item_not_owned",
            GameError::InvalidItem { .. } => "invalid_item",
            GameError::Forbidden(_) => "forbidden",
            GameError::Expired => "expired",
            GameError::AlreadySubmitted => "already_submitted",
            GameError::WindowExpired => "window_expired",
            GameError::AlreadyResolved => "already_resolved",
            GameError::InvalidState(_) => "invalid_state",
            GameError::NotFound(_) => "not_found",
            GameError::InvalidInput(_) => "invalid_input",
            GameError::TransientStorageFailure(_) => "transient_storage_failure",
            GameError::Inconsistent(_) => "inconsistent",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GameError::InsufficientFunds { .. }
            | GameError::StackLimitExceeded { .. }
            | GameError::InsufficientQuantity { .. }
            | GameError::ItemNotOwned(_)
            | GameError::InvalidItem { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            GameError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GameError::Forbidden(_) => StatusCode::FORBIDDEN,
            GameError::NotFound(_) => StatusCode::NOT_FOUND,
            GameError::AlreadySubmitted
            | GameError::AlreadyResolved
            | GameError::InvalidState(_) => StatusCode::CONFLICT,
            GameError::Expired | GameError::WindowExpired => StatusCode::GONE,
            GameError::TransientStorageFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            GameError::Inconsistent(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the operation may succeed if retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, GameError::TransientStorageFailure(_))
    }
}

impl From<StorageError> for GameError {
    fn from(e: StorageError) -> Self {
        GameError::TransientStorageFailure(e.to_string())
    }
}

pub type GameResult<T> = Result<T, GameError>;

/// HTTP error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    error_code: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<GameError> for ApiError {
    fn from(e: GameError) -> Self {
        Self::new(e.status_code(), e.error_code(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.code,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_message() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);

        let denied = ApiError::forbidden("nope");
        assert_eq!(denied.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn game_errors_map_to_statuses() {
        let cases = [
            (
                GameError::InsufficientFunds {
                    balance: 1,
                    required: 2,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (GameError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (GameError::Expired, StatusCode::GONE),
            (GameError::WindowExpired, StatusCode::GONE),
            (GameError::AlreadySubmitted, StatusCode::CONFLICT),
            (GameError::AlreadyResolved, StatusCode::CONFLICT),
            (
                GameError::TransientStorageFailure("io".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                GameError::Inconsistent("refund".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status, status);
        }
    }

    #[test]
    fn storage_errors_are_transient() {
        let err: GameError = StorageError::Corrupt("bad row".into()).into();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::from(GameError::WindowExpired).into_response();
        assert_eq!(response.status(), StatusCode::GONE);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error_code"], "window_expired");
        assert_eq!(body["error"], "defense window expired");
    }
}
