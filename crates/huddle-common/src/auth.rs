//! JWT verification for realtime connections.
//!
//! Tokens are issued by the HTTP login service; the gateway only verifies them.
//! `issue_token` exists for the development CLI and tests.

use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::HuddleError;
use crate::models::UserId;

/// JWT claims embedded in access tokens.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as string)
    pub sub: String,
    pub email: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Numeric user id carried in `sub`.
    pub fn user_id(&self) -> Result<UserId, HuddleError> {
        self.sub.parse().map_err(|_| HuddleError::InvalidToken)
    }
}

/// Validate and decode a JWT token.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, HuddleError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => HuddleError::TokenExpired,
        _ => HuddleError::InvalidToken,
    })?;
    Ok(token_data.claims)
}

/// Sign an access token for `user_id` valid for `ttl_secs`.
pub fn issue_token(
    user_id: UserId,
    email: &str,
    secret: &str,
    ttl_secs: i64,
) -> Result<String, HuddleError> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| HuddleError::Internal(e.into()))
}
