pub mod access_token;

pub use access_token::{
    AccessTokenClaims, AccessTokenError, AccessTokenVerifier, JwtAccessTokenVerifier,
    VerifiedAccess,
};
