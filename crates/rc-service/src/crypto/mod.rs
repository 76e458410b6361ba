//! Token codec for the authorization callout.
//!
//! Decodes server-signed request envelopes, signs capability grants with the
//! issuer key after validating them, and signs the response envelope that
//! carries either the grant or an error.

pub mod claims;
pub mod keys;
pub mod validation;

pub use claims::{
    AuthorizationRequest, AuthorizationRequestClaims, AuthorizationResponse,
    AuthorizationResponseClaims, PartialIdentity, UserClaims,
};
pub use keys::{decode_public_key, encode_public_key, IssuerKeyPair, KeyError, KeyKind};
pub use validation::{validate_subject, validate_user_claims, ValidationFault, ValidationFaults};

use claims::{IdentityPeek, IssuerPeek, AUTH_REQUEST_AUDIENCE, AUTH_REQUEST_TYPE};
use common::jwt::{decode_unverified_payload, validate_iat};
use common::secret::SecretString;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, Header, Validation};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Grant could not be signed.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The grant failed semantic validation. Display joins every fault with
    /// a newline.
    #[error("{0}")]
    Validation(ValidationFaults),

    #[error("failed to encode token: {0}")]
    Encoding(String),
}

/// Why a request envelope was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("envelope is not a well-formed token")]
    Malformed,

    #[error("envelope issuer is not a server public key")]
    InvalidIssuer,

    #[error("envelope rejected: {0}")]
    Rejected(String),

    #[error("unexpected envelope type {0:?}")]
    WrongType(String),

    #[error("user_nkey is not a user public key")]
    InvalidUserKey,

    #[error("server id is missing")]
    MissingServerId,

    #[error("connect options carry no access token")]
    MissingAccessToken,
}

/// A rejected envelope together with whatever identity could still be read
/// from it, for addressing the error response.
#[derive(Debug)]
pub struct DecodeFailure {
    pub error: DecodeError,
    pub identity: PartialIdentity,
}

/// Encodes and decodes the callout envelopes.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    issuer: Arc<IssuerKeyPair>,
    clock_skew: Duration,
}

impl TokenCodec {
    pub fn new(issuer: Arc<IssuerKeyPair>, clock_skew: Duration) -> Self {
        Self { issuer, clock_skew }
    }

    pub fn issuer(&self) -> &IssuerKeyPair {
        &self.issuer
    }

    /// Verify and decode a request envelope.
    ///
    /// # Errors
    ///
    /// Returns a `DecodeFailure` for any size, structure, signature, audience,
    /// or content problem. Its `identity` is a best-effort unverified read.
    #[instrument(skip_all)]
    pub fn decode_request(&self, envelope: &str) -> Result<AuthorizationRequest, DecodeFailure> {
        self.verify_request(envelope).map_err(|error| {
            tracing::debug!(target: "rc.callout", error = %error, "Authorization request rejected");
            DecodeFailure {
                error,
                identity: peek_identity(envelope),
            }
        })
    }

    fn verify_request(&self, envelope: &str) -> Result<AuthorizationRequest, DecodeError> {
        let peek: IssuerPeek =
            decode_unverified_payload(envelope).map_err(|_| DecodeError::Malformed)?;
        let server_key = decode_public_key(KeyKind::Server, &peek.iss)
            .map_err(|_| DecodeError::InvalidIssuer)?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.required_spec_claims.clear();
        validation.set_audience(&[AUTH_REQUEST_AUDIENCE]);
        validation.leeway = self.clock_skew.as_secs();

        let token_data = decode::<AuthorizationRequestClaims>(
            envelope,
            &DecodingKey::from_ed_der(&server_key),
            &validation,
        )
        .map_err(|e| DecodeError::Rejected(e.to_string()))?;

        let claims = token_data.claims;
        validate_iat(claims.iat, self.clock_skew)
            .map_err(|_| DecodeError::Rejected("issued in the future".to_string()))?;

        let nats = claims.nats;
        if nats.kind != AUTH_REQUEST_TYPE {
            return Err(DecodeError::WrongType(nats.kind));
        }
        decode_public_key(KeyKind::User, &nats.user_nkey)
            .map_err(|_| DecodeError::InvalidUserKey)?;
        if nats.server_id.id.is_empty() {
            return Err(DecodeError::MissingServerId);
        }
        let access_token = nats
            .connect_opts
            .auth_token
            .filter(|token| !token.is_empty())
            .ok_or(DecodeError::MissingAccessToken)?;

        Ok(AuthorizationRequest {
            user_nkey: nats.user_nkey,
            server_id: nats.server_id.id,
            access_token: SecretString::from(access_token),
        })
    }

    /// Stamp, validate, and sign a capability grant.
    ///
    /// `iss` is set to the issuer public key, `iat` to now, and `jti` to a
    /// fresh id before validation runs.
    ///
    /// # Errors
    ///
    /// `SigningError::Validation` with every fault found, or
    /// `SigningError::Encoding` if the signer fails.
    #[instrument(skip_all, fields(name = %claims.name))]
    pub fn sign_user_claims(&self, mut claims: UserClaims) -> Result<String, SigningError> {
        claims.iss = self.issuer.public_id().to_string();
        claims.iat = chrono::Utc::now().timestamp();
        claims.jti = uuid::Uuid::new_v4().to_string();

        validate_user_claims(&claims).map_err(SigningError::Validation)?;
        self.sign(&claims)
    }

    /// Sign the response envelope addressed to `server_id` about `user_nkey`.
    ///
    /// # Errors
    ///
    /// `SigningError::Encoding` if the signer fails.
    #[instrument(skip_all)]
    pub fn encode_response(
        &self,
        user_nkey: &str,
        server_id: &str,
        response: AuthorizationResponse,
    ) -> Result<String, SigningError> {
        let claims = AuthorizationResponseClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            iat: chrono::Utc::now().timestamp(),
            iss: self.issuer.public_id().to_string(),
            sub: user_nkey.to_string(),
            aud: server_id.to_string(),
            nats: response,
        };
        self.sign(&claims)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, SigningError> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());

        encode(&header, claims, &self.issuer.encoding_key())
            .map_err(|e| SigningError::Encoding(e.to_string()))
    }
}

/// Unverified identity read, for addressing an error reply only.
fn peek_identity(envelope: &str) -> PartialIdentity {
    let peek: IdentityPeek = decode_unverified_payload(envelope).unwrap_or_default();
    PartialIdentity {
        user_nkey: peek.nats.user_nkey,
        server_id: peek.nats.server_id.and_then(|server| server.id),
    }
}
