// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Bearer-token authentication for the battle API.
//!
//! ## Auth Flow
//!
//! 1. The game client obtains a JWT from the account service
//! 2. The client sends `Authorization: Bearer <JWT>`
//! 3. The server:
//!    - Verifies the HS256 signature against `AUTH_JWT_SECRET`
//!    - Checks expiry, and issuer / audience when configured
//!    - Extracts:
//!      - `sub` → canonical `account_id`
//!      - `role` claim (`admin` or `player`)
//!
//! ## Security
//!
//! - All non-health endpoints require authentication
//! - The account acting on a battle or purchase is always the token subject,
//!   never an id taken from the request body
//! - Clock skew tolerance is 60 seconds
//! - Unsigned development tokens are accepted only in test builds or with the
//!   `dev` feature, and only when no secret is configured

pub mod claims;
pub mod error;
pub mod extractor;
pub mod roles;

pub use claims::{AuthenticatedUser, TokenClaims};
pub use error::AuthError;
pub use extractor::{verify_token, AdminOnly, Auth, AuthConfig};
pub use roles::Role;
