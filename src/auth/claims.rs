// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::roles::Role;

/// Claims carried by a bearer token.
///
/// `aud` is checked by `jsonwebtoken` when an audience is configured and is
/// otherwise ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the account id.
    pub sub: String,

    /// Expiration timestamp (Unix seconds).
    pub exp: i64,

    #[serde(default)]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// `admin` or `player`; anything else is treated as `player`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The caller of a request, taken from a verified token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Canonical account id (`sub` claim).
    pub account_id: String,

    pub role: Role,

    /// Token expiration (Unix timestamp).
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: TokenClaims) -> Self {
        let role = claims
            .role
            .as_deref()
            .and_then(Role::parse)
            .unwrap_or_default();

        Self {
            account_id: claims.sub,
            role,
            expires_at: claims.exp,
        }
    }

    pub fn has_role(&self, required: Role) -> bool {
        self.role.has_privilege(required)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_claims() -> TokenClaims {
        TokenClaims {
            sub: "player_123".to_string(),
            exp: 1700003600,
            iat: Some(1700000000),
            iss: Some("hunt-auth".to_string()),
            aud: None,
            role: Some("admin".to_string()),
        }
    }

    #[test]
    fn from_claims_extracts_account_and_role() {
        let user = AuthenticatedUser::from_claims(sample_claims());
        assert_eq!(user.account_id, "player_123");
        assert_eq!(user.role, Role::Admin);
        assert!(user.is_admin());
        assert!(user.has_role(Role::Player));
    }

    #[test]
    fn unknown_or_missing_role_is_player() {
        let mut claims = sample_claims();
        claims.role = None;
        assert_eq!(AuthenticatedUser::from_claims(claims.clone()).role, Role::Player);

        claims.role = Some("superuser".into());
        let user = AuthenticatedUser::from_claims(claims);
        assert_eq!(user.role, Role::Player);
        assert!(!user.has_role(Role::Admin));
    }
}
