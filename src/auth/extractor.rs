// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated users.
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user.account_id is the token subject
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{
        header::{AUTHORIZATION, UPGRADE},
        request::Parts,
    },
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};

use super::{claims::TokenClaims, AuthError, AuthenticatedUser};
use crate::state::AppState;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Query parameter carrying the token on WebSocket upgrades, where browsers
/// cannot set an `Authorization` header.
const WS_TOKEN_PARAM: &str = "access_token";

/// Token verification settings.
///
/// With a `secret`, tokens must carry a valid HS256 signature. Without one,
/// unsigned development tokens are accepted in test builds and with the `dev`
/// feature; every other build rejects all tokens.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl AuthConfig {
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            ..Self::default()
        }
    }

    pub fn is_production(&self) -> bool {
        self.secret.is_some()
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

/// Extractor for authenticated users.
///
/// ```rust,ignore
/// async fn get_wallet(
///     Auth(user): Auth,
///     State(state): State<AppState>,
/// ) -> Result<Json<WalletResponse>, ApiError> {
///     // user.account_id, user.role
/// }
/// ```
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        let token = bearer_token(parts)?;
        let user = verify_token(&token, &state.auth_config)?;
        parts.extensions.insert(user.clone());
        Ok(Auth(user))
    }
}

/// Extractor that requires the admin role.
pub struct AdminOnly(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(AdminOnly(user))
    }
}

/// Token from the `Authorization` header, or from the `access_token` query
/// parameter on WebSocket upgrades.
fn bearer_token(parts: &Parts) -> Result<String, AuthError> {
    if let Some(header) = parts.headers.get(AUTHORIZATION) {
        let header = header.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
        return header
            .strip_prefix("Bearer ")
            .map(|token| token.trim().to_string())
            .ok_or(AuthError::InvalidAuthHeader);
    }

    let is_upgrade = parts
        .headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if is_upgrade {
        let from_query = parts.uri.query().and_then(|query| {
            query.split('&').find_map(|pair| {
                pair.strip_prefix(WS_TOKEN_PARAM)
                    .and_then(|rest| rest.strip_prefix('='))
                    .filter(|token| !token.is_empty())
                    .map(str::to_string)
            })
        });
        if let Some(token) = from_query {
            return Ok(token);
        }
    }

    Err(AuthError::MissingAuthHeader)
}

/// Verify a token and extract the caller.
pub fn verify_token(token: &str, config: &AuthConfig) -> Result<AuthenticatedUser, AuthError> {
    match config.secret.as_deref() {
        Some(secret) => verify_signed(token, secret, config),
        None => verify_unsigned(token),
    }
}

fn verify_signed(
    token: &str,
    secret: &str,
    config: &AuthConfig,
) -> Result<AuthenticatedUser, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = CLOCK_SKEW_LEEWAY;

    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }
    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }

    let token_data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
        _ => AuthError::MalformedToken,
    })?;

    Ok(AuthenticatedUser::from_claims(token_data.claims))
}

/// Development verification: structure and expiry only, no signature check.
#[cfg(any(test, feature = "dev"))]
fn verify_unsigned(token: &str) -> Result<AuthenticatedUser, AuthError> {
    let token_data = jsonwebtoken::dangerous::insecure_decode::<TokenClaims>(token)
        .map_err(|_| AuthError::MalformedToken)?;
    let claims = token_data.claims;

    let now = chrono::Utc::now().timestamp();
    if claims.exp < now - CLOCK_SKEW_LEEWAY as i64 {
        return Err(AuthError::TokenExpired);
    }

    Ok(AuthenticatedUser::from_claims(claims))
}

#[cfg(not(any(test, feature = "dev")))]
fn verify_unsigned(_token: &str) -> Result<AuthenticatedUser, AuthError> {
    Err(AuthError::NotConfigured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::state::test_support::test_state;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn claims(sub: &str, role: Option<&str>, exp_offset: i64) -> TokenClaims {
        let now = chrono::Utc::now().timestamp();
        TokenClaims {
            sub: sub.to_string(),
            exp: now + exp_offset,
            iat: Some(now),
            iss: Some("hunt-auth".to_string()),
            aud: None,
            role: role.map(str::to_string),
        }
    }

    fn signed(claims: &TokenClaims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    /// Unsigned token for development mode.
    fn unsigned(user_id: &str) -> String {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

        let header = r#"{"alg":"HS256","typ":"JWT"}"#;
        let claims = format!(r#"{{"sub":"{user_id}","exp":9999999999,"role":"player"}}"#);
        format!(
            "{}.{}.fake_signature",
            URL_SAFE_NO_PAD.encode(header.as_bytes()),
            URL_SAFE_NO_PAD.encode(claims.as_bytes())
        )
    }

    fn parts_with(uri: &str, headers: &[(&str, String)]) -> Parts {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn signed_token_is_verified() {
        let config = AuthConfig::with_secret(SECRET);
        let user = verify_token(&signed(&claims("alice", Some("admin"), 600), SECRET), &config)
            .unwrap();
        assert_eq!(user.account_id, "alice");
        assert_eq!(user.role, Role::Admin);
    }

    #[test]
    fn signed_token_rejections() {
        let config = AuthConfig::with_secret(SECRET);

        let forged = signed(&claims("alice", None, 600), "other-secret");
        assert!(matches!(
            verify_token(&forged, &config),
            Err(AuthError::InvalidSignature)
        ));

        let expired = signed(&claims("alice", None, -3600), SECRET);
        assert!(matches!(
            verify_token(&expired, &config),
            Err(AuthError::TokenExpired)
        ));

        assert!(matches!(
            verify_token("not-a-jwt", &config),
            Err(AuthError::MalformedToken)
        ));

        let strict = AuthConfig {
            issuer: Some("someone-else".into()),
            ..AuthConfig::with_secret(SECRET)
        };
        let token = signed(&claims("alice", None, 600), SECRET);
        assert!(matches!(
            verify_token(&token, &strict),
            Err(AuthError::InvalidIssuer)
        ));
    }

    #[test]
    fn unsigned_token_accepted_without_secret() {
        let user = verify_token(&unsigned("bob"), &AuthConfig::default()).unwrap();
        assert_eq!(user.account_id, "bob");
        assert_eq!(user.role, Role::Player);

        // With a secret configured the same token fails.
        assert!(verify_token(&unsigned("bob"), &AuthConfig::with_secret(SECRET)).is_err());
    }

    #[test]
    fn debug_output_hides_secret() {
        let rendered = format!("{:?}", AuthConfig::with_secret(SECRET));
        assert!(!rendered.contains(SECRET));
    }

    #[tokio::test]
    async fn auth_extractor_requires_auth_header() {
        let (state, _dir) = test_state();
        let mut parts = parts_with("/v1/wallet", &[]);

        let result = Auth::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::MissingAuthHeader)));

        let mut parts = parts_with("/v1/wallet", &[("Authorization", "Token abc".into())]);
        let result = Auth::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::InvalidAuthHeader)));
    }

    #[tokio::test]
    async fn auth_extractor_succeeds_with_jwt() {
        let (state, _dir) = test_state();
        let mut parts = parts_with(
            "/v1/wallet",
            &[("Authorization", format!("Bearer {}", unsigned("player_123")))],
        );

        let Auth(user) = Auth::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(user.account_id, "player_123");
        assert!(parts.extensions.get::<AuthenticatedUser>().is_some());
    }

    #[tokio::test]
    async fn websocket_upgrade_reads_query_token() {
        let (state, _dir) = test_state();
        let uri = format!("/v1/wallet/notifications/ws?access_token={}", unsigned("carol"));

        let mut parts = parts_with(&uri, &[("Upgrade", "websocket".into())]);
        let Auth(user) = Auth::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(user.account_id, "carol");

        // Plain requests never read the query.
        let mut parts = parts_with(&uri, &[]);
        assert!(matches!(
            Auth::from_request_parts(&mut parts, &state).await,
            Err(AuthError::MissingAuthHeader)
        ));
    }

    #[tokio::test]
    async fn admin_only_rejects_player() {
        let (state, _dir) = test_state();
        let mut parts = parts_with("/v1/admin", &[]);
        parts.extensions.insert(AuthenticatedUser {
            account_id: "player_123".to_string(),
            role: Role::Player,
            expires_at: 0,
        });

        let result = AdminOnly::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::InsufficientPermissions)));
    }
}
