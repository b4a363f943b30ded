//! Token strategies: generation and verification per token kind.
//!
//! Authorization codes and refresh tokens are opaque HMAC-signed values;
//! access tokens are signed JWTs; ID tokens are signed and, when the client
//! negotiated it, subsequently encrypted JWTs.

pub mod hmac;
pub mod id_token;
pub mod jwt;

pub use hmac::HmacTokenStrategy;
pub use id_token::IdTokenStrategy;
pub use jwt::JwtAccessTokenStrategy;

/// Claim names the session's extra claims may not override on issued tokens
pub const RESERVED_CLAIMS: &[&str] = &[
    "iss", "sub", "aud", "exp", "nbf", "iat", "jti", "scope", "client_id",
];
