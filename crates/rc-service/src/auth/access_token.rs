//! Access-token verification.
//!
//! Participants connect with an opaque access token minted by the room
//! API. The callout only needs to learn which room and user the token was
//! issued for; anything else about it is the issuer's business.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted, with `iss` pinned to the configured API key
//! - `exp` is enforced and `iat` is bounded by the clock skew tolerance
//! - Every failure renders the same generic message

use crate::errors::INVALID_ACCESS_TOKEN_MESSAGE;
use common::jwt::{check_token_size, validate_iat};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// The room and user an access token was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAccess {
    pub room_id: String,
    pub user_id: String,
    pub name: Option<String>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessTokenError {
    #[error("{INVALID_ACCESS_TOKEN_MESSAGE}")]
    Invalid,
}

/// Verifies opaque access tokens.
#[async_trait::async_trait]
pub trait AccessTokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedAccess, AccessTokenError>;
}

/// Claims carried by an access token. `sub` is the user id.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl fmt::Debug for AccessTokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenClaims")
            .field("iss", &self.iss)
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("room_id", &self.room_id)
            .field("is_admin", &self.is_admin)
            .finish_non_exhaustive()
    }
}

/// HS256 verifier keyed by the room API key and secret.
pub struct JwtAccessTokenVerifier {
    api_key: String,
    secret: SecretString,
    clock_skew: Duration,
}

impl JwtAccessTokenVerifier {
    pub fn new(api_key: String, secret: SecretString, clock_skew: Duration) -> Self {
        Self {
            api_key,
            secret,
            clock_skew,
        }
    }

    fn verify_sync(&self, token: &str) -> Result<VerifiedAccess, AccessTokenError> {
        check_token_size(token).map_err(|_| AccessTokenError::Invalid)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_issuer(&[self.api_key.as_str()]);

        let decoding_key = DecodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let token_data =
            decode::<AccessTokenClaims>(token, &decoding_key, &validation).map_err(|e| {
                tracing::debug!(target: "rc.auth.access_token", error = %e, "Access token verification failed");
                AccessTokenError::Invalid
            })?;

        let claims = token_data.claims;
        if let Err(e) = validate_iat(claims.iat, self.clock_skew) {
            tracing::debug!(target: "rc.auth.access_token", error = ?e, "Access token iat validation failed");
            return Err(AccessTokenError::Invalid);
        }

        if claims.room_id.is_empty() || claims.sub.is_empty() {
            tracing::debug!(target: "rc.auth.access_token", "Access token missing room or user");
            return Err(AccessTokenError::Invalid);
        }

        Ok(VerifiedAccess {
            room_id: claims.room_id,
            user_id: claims.sub,
            name: claims.name,
            is_admin: claims.is_admin,
        })
    }
}

#[async_trait::async_trait]
impl AccessTokenVerifier for JwtAccessTokenVerifier {
    #[instrument(skip_all)]
    async fn verify(&self, token: &str) -> Result<VerifiedAccess, AccessTokenError> {
        self.verify_sync(token)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn verifier() -> JwtAccessTokenVerifier {
        JwtAccessTokenVerifier::new(
            "plugin-key".to_string(),
            SecretString::from(SECRET),
            Duration::from_secs(300),
        )
    }

    fn claims() -> AccessTokenClaims {
        let now = chrono::Utc::now().timestamp();
        AccessTokenClaims {
            iss: "plugin-key".to_string(),
            sub: "user42".to_string(),
            exp: now + 600,
            iat: now,
            room_id: "room1".to_string(),
            name: Some("Ada".to_string()),
            is_admin: false,
        }
    }

    fn sign(claims: &AccessTokenClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token() {
        let access = verifier().verify(&sign(&claims(), SECRET)).await.unwrap();

        assert_eq!(access.room_id, "room1");
        assert_eq!(access.user_id, "user42");
        assert_eq!(access.name.as_deref(), Some("Ada"));
        assert!(!access.is_admin);
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let token = sign(&claims(), "another-secret-another-secret-xx");
        assert_eq!(
            verifier().verify(&token).await,
            Err(AccessTokenError::Invalid)
        );
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let mut c = claims();
        c.iss = "someone-else".to_string();
        assert_eq!(
            verifier().verify(&sign(&c, SECRET)).await,
            Err(AccessTokenError::Invalid)
        );
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let mut c = claims();
        c.iat -= 7200;
        c.exp = chrono::Utc::now().timestamp() - 3600;
        assert_eq!(
            verifier().verify(&sign(&c, SECRET)).await,
            Err(AccessTokenError::Invalid)
        );
    }

    #[tokio::test]
    async fn test_future_iat_rejected() {
        let mut c = claims();
        c.iat += 3600;
        assert_eq!(
            verifier().verify(&sign(&c, SECRET)).await,
            Err(AccessTokenError::Invalid)
        );
    }

    #[tokio::test]
    async fn test_empty_room_rejected() {
        let mut c = claims();
        c.room_id = String::new();
        assert_eq!(
            verifier().verify(&sign(&c, SECRET)).await,
            Err(AccessTokenError::Invalid)
        );
    }

    #[tokio::test]
    async fn test_oversized_token_rejected() {
        let token = "a".repeat(9000);
        assert_eq!(
            verifier().verify(&token).await,
            Err(AccessTokenError::Invalid)
        );
    }

    #[test]
    fn test_error_message_is_generic() {
        assert_eq!(
            AccessTokenError::Invalid.to_string(),
            "The access token is invalid or expired"
        );
    }

    #[test]
    fn test_claims_debug_redacts_subject() {
        let debug = format!("{:?}", claims());
        assert!(!debug.contains("user42"));
        assert!(debug.contains("room1"));
    }
}
