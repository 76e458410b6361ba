//! Ed25519 key material and the prefixed public-key text encoding.
//!
//! Public keys travel as a one-letter role prefix followed by the unpadded
//! URL-safe base64 of the 32 raw key bytes: `A` for the account (issuer)
//! key, `U` for connecting clients, `N` for message-bus servers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::secret::{ExposeSecret, SecretBox};
use jsonwebtoken::{DecodingKey, EncodingKey};
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::fmt;
use thiserror::Error;

/// Length of an Ed25519 seed and of an Ed25519 public key.
pub const ED25519_KEY_LEN: usize = 32;

/// PKCS#8 v1 prefix for a bare Ed25519 private key (RFC 8410).
const PKCS8_ED25519_V1_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20,
];

/// Role encoded in a public key's prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Account,
    User,
    Server,
}

impl KeyKind {
    pub fn prefix(self) -> char {
        match self {
            KeyKind::Account => 'A',
            KeyKind::User => 'U',
            KeyKind::Server => 'N',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("public key must start with '{expected}'")]
    WrongPrefix { expected: char },

    #[error("public key is not valid base64")]
    Encoding,

    #[error("key must be {ED25519_KEY_LEN} bytes, got {0}")]
    Length(usize),

    #[error("invalid key material: {0}")]
    Material(String),
}

/// Encode raw public-key bytes with the role prefix.
pub fn encode_public_key(kind: KeyKind, key: &[u8]) -> String {
    let mut encoded = String::with_capacity(1 + key.len() * 4 / 3 + 2);
    encoded.push(kind.prefix());
    encoded.push_str(&URL_SAFE_NO_PAD.encode(key));
    encoded
}

/// Parse a prefixed public key of the expected role.
///
/// # Errors
///
/// Fails when the prefix does not match `kind`, the remainder is not base64,
/// or the decoded key is not 32 bytes.
pub fn decode_public_key(kind: KeyKind, encoded: &str) -> Result<[u8; ED25519_KEY_LEN], KeyError> {
    let body = encoded
        .strip_prefix(kind.prefix())
        .ok_or(KeyError::WrongPrefix {
            expected: kind.prefix(),
        })?;

    let bytes = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| KeyError::Encoding)?;

    <[u8; ED25519_KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| KeyError::Length(bytes.len()))
}

/// Wrap a 32-byte seed in a PKCS#8 v1 document.
pub fn pkcs8_from_seed(seed: &[u8]) -> Result<Vec<u8>, KeyError> {
    if seed.len() != ED25519_KEY_LEN {
        return Err(KeyError::Length(seed.len()));
    }
    let mut document = Vec::with_capacity(PKCS8_ED25519_V1_PREFIX.len() + ED25519_KEY_LEN);
    document.extend_from_slice(&PKCS8_ED25519_V1_PREFIX);
    document.extend_from_slice(seed);
    Ok(document)
}

/// The account key pair that signs every grant and response.
///
/// The PKCS#8 document is held in a `SecretBox` and never logged.
pub struct IssuerKeyPair {
    pkcs8: SecretBox<Vec<u8>>,
    public_key: [u8; ED25519_KEY_LEN],
    public_id: String,
}

impl IssuerKeyPair {
    /// Build the issuer from a 32-byte Ed25519 seed.
    ///
    /// # Errors
    ///
    /// Returns `KeyError` when the seed has the wrong length or ring rejects
    /// the resulting key.
    pub fn from_seed(seed: &[u8]) -> Result<Self, KeyError> {
        Self::from_pkcs8(pkcs8_from_seed(seed)?)
    }

    /// Generate a fresh issuer with the system CSPRNG.
    #[cfg(test)]
    pub(crate) fn generate() -> Result<Self, KeyError> {
        let rng = ring::rand::SystemRandom::new();
        let document = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|e| KeyError::Material(format!("key generation failed: {e}")))?;
        Self::from_pkcs8(document.as_ref().to_vec())
    }

    fn from_pkcs8(document: Vec<u8>) -> Result<Self, KeyError> {
        let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(&document)
            .map_err(|e| KeyError::Material(e.to_string()))?;

        let public_key = <[u8; ED25519_KEY_LEN]>::try_from(key_pair.public_key().as_ref())
            .map_err(|_| KeyError::Length(key_pair.public_key().as_ref().len()))?;

        Ok(Self {
            pkcs8: SecretBox::new(Box::new(document)),
            public_key,
            public_id: encode_public_key(KeyKind::Account, &public_key),
        })
    }

    /// Prefixed account public key (`A…`), written as `iss` of every token.
    pub fn public_id(&self) -> &str {
        &self.public_id
    }

    #[cfg(test)]
    pub(crate) fn public_key_bytes(&self) -> &[u8; ED25519_KEY_LEN] {
        &self.public_key
    }

    pub(crate) fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ed_der(self.pkcs8.expose_secret())
    }

    /// Key for verifying tokens this issuer signed.
    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_ed_der(&self.public_key)
    }
}

impl fmt::Debug for IssuerKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerKeyPair")
            .field("public_id", &self.public_id)
            .field("pkcs8", &"[REDACTED]")
            .finish()
    }
}
