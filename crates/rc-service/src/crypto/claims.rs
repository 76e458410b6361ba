//! Claim shapes for the three envelopes of the authorization callout.
//!
//! - [`AuthorizationRequestClaims`]: sent by a message-bus server, self-signed
//!   with the server key named in `iss`.
//! - [`UserClaims`]: the capability grant, signed by the issuer key.
//! - [`AuthorizationResponseClaims`]: the reply, signed by the issuer key,
//!   carrying either a grant or an error.

use common::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audience of every authorization request envelope.
pub const AUTH_REQUEST_AUDIENCE: &str = "nats-authorization-request";

/// `nats.type` of a request envelope.
pub const AUTH_REQUEST_TYPE: &str = "authorization_request";

/// `nats.type` of a response envelope.
pub const AUTH_RESPONSE_TYPE: &str = "authorization_response";

/// `nats.type` of a capability grant.
pub const USER_CLAIMS_TYPE: &str = "user";

/// Claims format version written into every envelope.
pub const CLAIMS_VERSION: u32 = 2;

// =============================================================================
// Request
// =============================================================================

/// Raw request envelope claims, as signed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequestClaims {
    pub iss: String,
    #[serde(default)]
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default)]
    pub jti: String,
    pub nats: AuthorizationRequestData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequestData {
    pub server_id: ServerIdentity,
    pub user_nkey: String,
    #[serde(default)]
    pub connect_opts: ConnectOptions,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
}

/// Identity of the server asking for a decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerIdentity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    pub id: String,
}

/// Connect options forwarded by the server. Only the opaque token matters.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ConnectOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("name", &self.name)
            .field("lang", &self.lang)
            .finish()
    }
}

/// A decoded, signature-verified authorization request.
#[derive(Debug)]
pub struct AuthorizationRequest {
    /// Public key of the connecting client (`U…`).
    pub user_nkey: String,
    /// Id of the server that must receive the response.
    pub server_id: String,
    /// Opaque access token presented by the client.
    pub access_token: SecretString,
}

/// Identity fields read from an envelope that failed to decode.
///
/// Never trusted for a decision; used only to address the error reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialIdentity {
    pub user_nkey: Option<String>,
    pub server_id: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct IssuerPeek {
    pub iss: String,
}

#[derive(Deserialize, Default)]
pub(crate) struct IdentityPeek {
    #[serde(default)]
    pub nats: IdentityPeekData,
}

#[derive(Deserialize, Default)]
pub(crate) struct IdentityPeekData {
    #[serde(default)]
    pub user_nkey: Option<String>,
    #[serde(default)]
    pub server_id: Option<IdentityPeekServer>,
}

#[derive(Deserialize, Default)]
pub(crate) struct IdentityPeekServer {
    #[serde(default)]
    pub id: Option<String>,
}

// =============================================================================
// Capability grant
// =============================================================================

/// Allow/deny subject lists for one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermissions {
    #[serde(rename = "pub", default)]
    pub publish: Permission,
    #[serde(rename = "sub", default)]
    pub subscribe: Permission,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
}

/// The capability grant handed to a connecting client.
///
/// `iss`, `iat` and `jti` are stamped by the codec at signing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    #[serde(default)]
    pub jti: String,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub name: String,
    pub nats: UserPermissions,
}

impl UserClaims {
    /// Build a grant for `user_nkey` scoped to `account`, allowing publish on
    /// `allow`.
    pub fn new(user_nkey: &str, account: &str, name: String, allow: Vec<String>) -> Self {
        Self {
            jti: String::new(),
            iat: 0,
            iss: String::new(),
            sub: user_nkey.to_string(),
            aud: account.to_string(),
            name,
            nats: UserPermissions {
                publish: Permission {
                    allow,
                    deny: Vec::new(),
                },
                subscribe: Permission::default(),
                kind: USER_CLAIMS_TYPE.to_string(),
                version: CLAIMS_VERSION,
            },
        }
    }

    /// `"{room_id}:{user_id}"`, the display name every grant carries.
    pub fn display_name(room_id: &str, user_id: &str) -> String {
        format!("{room_id}:{user_id}")
    }
}

// =============================================================================
// Response
// =============================================================================

/// Body of a response envelope: a grant or an error, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    version: u32,
}

impl AuthorizationResponse {
    pub fn granted(user_jwt: String) -> Self {
        Self {
            jwt: Some(user_jwt),
            error: None,
            kind: AUTH_RESPONSE_TYPE.to_string(),
            version: CLAIMS_VERSION,
        }
    }

    pub fn denied(error: String) -> Self {
        Self {
            jwt: None,
            error: Some(error),
            kind: AUTH_RESPONSE_TYPE.to_string(),
            version: CLAIMS_VERSION,
        }
    }

    pub fn jwt(&self) -> Option<&str> {
        self.jwt.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationResponseClaims {
    pub jti: String,
    pub iat: i64,
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub nats: AuthorizationResponse,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_format() {
        assert_eq!(UserClaims::display_name("room1", "user42"), "room1:user42");
    }

    #[test]
    fn test_user_claims_serialize_pub_allow() {
        let claims = UserClaims::new(
            "Uabc",
            "PNM",
            "room1:user42".to_string(),
            vec!["$JS.API.INFO".to_string()],
        );
        let json = serde_json::to_value(&claims).unwrap();

        assert_eq!(json["nats"]["pub"]["allow"][0], "$JS.API.INFO");
        assert_eq!(json["nats"]["type"], "user");
        assert_eq!(json["aud"], "PNM");
        assert!(json["nats"]["pub"].get("deny").is_none());
    }

    #[test]
    fn test_response_denied_has_no_jwt() {
        let response = AuthorizationResponse::denied("nope".to_string());
        let json = serde_json::to_value(&response).unwrap();

        assert!(json.get("jwt").is_none());
        assert_eq!(json["error"], "nope");
        assert_eq!(json["type"], "authorization_response");
    }

    #[test]
    fn test_response_granted_has_no_error() {
        let response = AuthorizationResponse::granted("a.b.c".to_string());
        assert_eq!(response.jwt(), Some("a.b.c"));
        assert!(response.error().is_none());
    }

    #[test]
    fn test_connect_options_debug_redacts_token() {
        let opts = ConnectOptions {
            auth_token: Some("secret-access-token".to_string()),
            name: Some("web".to_string()),
            lang: None,
        };
        let debug = format!("{opts:?}");
        assert!(!debug.contains("secret-access-token"));
        assert!(debug.contains("REDACTED"));
    }
}
