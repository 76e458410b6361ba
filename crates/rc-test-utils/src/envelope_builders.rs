//! Builder patterns for request envelopes and access tokens.

use crate::crypto_fixtures::{test_user_nkey, TestServerKey};
use chrono::{Duration, Utc};
use common::secret::SecretString;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rc_service::auth::{AccessTokenClaims, JwtAccessTokenVerifier};
use rc_service::crypto::claims::{
    AuthorizationRequestData, ConnectOptions, ServerIdentity, AUTH_REQUEST_AUDIENCE,
    AUTH_REQUEST_TYPE, CLAIMS_VERSION,
};
use rc_service::crypto::AuthorizationRequestClaims;

/// Server id used by [`AuthRequestBuilder`] unless overridden.
pub const TEST_SERVER_ID: &str = "NTESTSERVER";

/// Builder for signed authorization request envelopes
///
/// # Example
/// ```rust,ignore
/// let envelope = AuthRequestBuilder::new(&TestServerKey::new(11))
///     .with_access_token("token-1")
///     .build();
/// ```
pub struct AuthRequestBuilder<'a> {
    server: &'a TestServerKey,
    claims: AuthorizationRequestClaims,
}

impl<'a> AuthRequestBuilder<'a> {
    pub fn new(server: &'a TestServerKey) -> Self {
        let claims = AuthorizationRequestClaims {
            iss: server.public_id().to_string(),
            sub: String::new(),
            aud: AUTH_REQUEST_AUDIENCE.to_string(),
            iat: Utc::now().timestamp(),
            exp: None,
            jti: "test-request".to_string(),
            nats: AuthorizationRequestData {
                server_id: ServerIdentity {
                    name: "test-bus".to_string(),
                    host: "127.0.0.1".to_string(),
                    id: TEST_SERVER_ID.to_string(),
                },
                user_nkey: test_user_nkey(1),
                connect_opts: ConnectOptions {
                    auth_token: Some("test-access-token".to_string()),
                    name: None,
                    lang: Some("rust".to_string()),
                },
                kind: AUTH_REQUEST_TYPE.to_string(),
                version: CLAIMS_VERSION,
            },
        };
        Self { server, claims }
    }

    pub fn with_access_token(mut self, token: &str) -> Self {
        self.claims.nats.connect_opts.auth_token = Some(token.to_string());
        self
    }

    pub fn without_access_token(mut self) -> Self {
        self.claims.nats.connect_opts.auth_token = None;
        self
    }

    pub fn with_user_nkey(mut self, user_nkey: &str) -> Self {
        self.claims.nats.user_nkey = user_nkey.to_string();
        self
    }

    pub fn with_server_id(mut self, server_id: &str) -> Self {
        self.claims.nats.server_id.id = server_id.to_string();
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.claims.aud = audience.to_string();
        self
    }

    /// Sign with the builder's server key.
    pub fn build(self) -> String {
        self.sign_with(&self.server.encoding_key())
    }

    /// Sign with a different key than the one named in `iss`.
    pub fn build_signed_by(self, other: &TestServerKey) -> String {
        self.sign_with(&other.encoding_key())
    }

    fn sign_with(&self, key: &EncodingKey) -> String {
        encode(&Header::new(Algorithm::EdDSA), &self.claims, key)
            .expect("request envelope signs")
    }
}

/// API key accepted by [`access_token_verifier`].
pub const TEST_ACCESS_TOKEN_API_KEY: &str = "test-api-key";

/// HS256 secret accepted by [`access_token_verifier`].
pub const TEST_ACCESS_TOKEN_SECRET: &str = "test-access-token-secret-at-least-32-bytes";

/// Verifier that accepts tokens from [`AccessTokenBuilder`] defaults.
pub fn access_token_verifier() -> JwtAccessTokenVerifier {
    JwtAccessTokenVerifier::new(
        TEST_ACCESS_TOKEN_API_KEY.to_string(),
        SecretString::from(TEST_ACCESS_TOKEN_SECRET.to_string()),
        std::time::Duration::from_secs(300),
    )
}

/// Builder for HS256 access tokens
pub struct AccessTokenBuilder {
    claims: AccessTokenClaims,
    secret: String,
}

impl AccessTokenBuilder {
    pub fn new(room_id: &str, user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            claims: AccessTokenClaims {
                iss: TEST_ACCESS_TOKEN_API_KEY.to_string(),
                sub: user_id.to_string(),
                exp: (now + Duration::seconds(3600)).timestamp(),
                iat: now.timestamp(),
                room_id: room_id.to_string(),
                name: None,
                is_admin: false,
            },
            secret: TEST_ACCESS_TOKEN_SECRET.to_string(),
        }
    }

    pub fn issued_by(mut self, api_key: &str) -> Self {
        self.claims.iss = api_key.to_string();
        self
    }

    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.claims.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.claims.iat = timestamp;
        self
    }

    pub fn signed_with(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    pub fn admin(mut self) -> Self {
        self.claims.is_admin = true;
        self
    }

    pub fn build(self) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &self.claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .expect("access token signs")
    }
}
