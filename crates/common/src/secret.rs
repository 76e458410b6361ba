//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for every credential the room
//! controller handles: the access-token HMAC secret, the issuer key seed,
//! and connection URLs that may embed passwords.
//!
//! `SecretString` and `SecretBox<T>` implement `Debug` with redaction, so a
//! `#[derive(Debug)]` on a config struct stays safe to log. Values are
//! zeroized on drop.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct AccessTokenSettings {
//!     api_key: String,
//!     secret: SecretString,
//! }
//!
//! let settings = AccessTokenSettings {
//!     api_key: "plugin-key".to_string(),
//!     secret: SecretString::from("0123456789abcdef0123456789abcdef"),
//! };
//!
//! assert!(!format!("{settings:?}").contains("0123456789abcdef"));
//! assert_eq!(settings.secret.expose_secret().len(), 32);
//! ```
//!
//! Use `SecretBox<Vec<u8>>` for binary key material such as the PKCS#8
//! document of the issuer key pair.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("redis://:hunter2@redis:6379");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_secret_box_bytes_are_redacted() {
        let seed = SecretBox::new(Box::new(vec![7u8; 32]));
        let debug_str = format!("{seed:?}");

        assert!(debug_str.contains("REDACTED"));
        assert_eq!(seed.expose_secret().len(), 32);
    }

    #[test]
    fn test_clone_keeps_value() {
        let secret = SecretString::from("access-token-secret");
        let cloned = secret.clone();
        assert_eq!(cloned.expose_secret(), "access-token-secret");
    }
}
