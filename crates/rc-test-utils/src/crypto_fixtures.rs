//! Deterministic cryptographic fixtures for testing
//!
//! The same seed always produces the same key, so envelopes and grants are
//! reproducible across runs.

use jsonwebtoken::{decode, Algorithm, Validation};
use rc_service::crypto::keys::pkcs8_from_seed;
use rc_service::crypto::{
    encode_public_key, AuthorizationResponseClaims, IssuerKeyPair, KeyKind, TokenCodec, UserClaims,
};
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::sync::Arc;
use std::time::Duration;

/// Expand a one-byte seed into a 32-byte Ed25519 seed.
pub fn test_seed(seed: u8) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = seed.wrapping_mul(i as u8 + 1).wrapping_add(i as u8);
    }
    bytes
}

/// Issuer key pair derived from `seed`.
pub fn test_issuer(seed: u8) -> Arc<IssuerKeyPair> {
    Arc::new(IssuerKeyPair::from_seed(&test_seed(seed)).expect("test issuer seed is valid"))
}

/// Codec over [`test_issuer`] with the default clock skew.
pub fn test_codec(seed: u8) -> TokenCodec {
    TokenCodec::new(test_issuer(seed), Duration::from_secs(300))
}

/// A connecting client's public key (`U…`).
pub fn test_user_nkey(seed: u8) -> String {
    encode_public_key(KeyKind::User, &test_seed(seed))
}

/// Key of a message-bus server that signs request envelopes.
pub struct TestServerKey {
    pkcs8: Vec<u8>,
    public_id: String,
}

impl TestServerKey {
    pub fn new(seed: u8) -> Self {
        let pkcs8 = pkcs8_from_seed(&test_seed(seed)).expect("test server seed is valid");
        let pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(&pkcs8).expect("valid pkcs8");
        let public_id = encode_public_key(KeyKind::Server, pair.public_key().as_ref());
        Self { pkcs8, public_id }
    }

    /// Prefixed server public key (`N…`).
    pub fn public_id(&self) -> &str {
        &self.public_id
    }

    pub fn encoding_key(&self) -> jsonwebtoken::EncodingKey {
        jsonwebtoken::EncodingKey::from_ed_der(&self.pkcs8)
    }
}

fn issuer_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.required_spec_claims.clear();
    validation.validate_aud = false;
    validation
}

/// Verify a response envelope against `issuer` and return its claims.
///
/// Panics if the envelope was not signed by `issuer`.
pub fn decode_response(envelope: &str, issuer: &IssuerKeyPair) -> AuthorizationResponseClaims {
    decode::<AuthorizationResponseClaims>(envelope, &issuer.decoding_key(), &issuer_validation())
        .expect("response envelope must be signed by the issuer")
        .claims
}

/// Verify a capability grant against `issuer` and return its claims.
///
/// Panics if the grant was not signed by `issuer`.
pub fn decode_grant(jwt: &str, issuer: &IssuerKeyPair) -> UserClaims {
    decode::<UserClaims>(jwt, &issuer.decoding_key(), &issuer_validation())
        .expect("grant must be signed by the issuer")
        .claims
}
