//! Signed-JWT access token strategy.

use chrono::Duration;
use jsonwebtoken::{Algorithm, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{ProtocolError, TokenError};
use crate::oidc::keys::ServerKeySet;
use crate::oidc::request::OidcRequest;
use crate::oidc::token::RESERVED_CLAIMS;
use crate::oidc::types::{SigningAlgorithm, Token, TokenKind, join_scopes};

/// Access token claim set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
    pub scope: String,
    pub client_id: String,
    /// Extra claims staged on the session, reserved names already filtered
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Generates and verifies signed-JWT access tokens with the server's key
pub struct JwtAccessTokenStrategy {
    keys: Arc<ServerKeySet>,
    issuer: String,
    lifespan: Duration,
}

impl JwtAccessTokenStrategy {
    pub fn new(keys: Arc<ServerKeySet>, issuer: impl Into<String>, lifespan: Duration) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            lifespan,
        }
    }

    pub fn lifespan(&self) -> Duration {
        self.lifespan
    }

    /// Generate an access token for a request, returning the token and its
    /// identifier (the `jti`, used as the repository key)
    pub fn generate<R: OidcRequest>(&self, request: &R) -> Result<(Token, String), ProtocolError> {
        let client = request.client();
        let session = request.session();

        // client-credentials grants act on behalf of the client itself
        let subject = session
            .subject
            .clone()
            .unwrap_or_else(|| client.client_id.clone());

        let mut audience = vec![client.client_id.clone()];
        audience.extend(client.audience.iter().cloned());

        let now = request.requested_at();
        let jti = Uuid::new_v4().to_string();

        let extra: BTreeMap<String, serde_json::Value> = session
            .claims
            .extra
            .iter()
            .filter(|(name, _)| !RESERVED_CLAIMS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: subject,
            aud: audience,
            exp: (now + self.lifespan).timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: jti.clone(),
            scope: join_scopes(session.granted_scopes()),
            client_id: client.client_id.clone(),
            extra,
        };

        let key = self.keys.signing_key(SigningAlgorithm::RS256)?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());

        let value = encode(&header, &claims, key.encoding_key())
            .map_err(|e| ProtocolError::ServerError(format!("access token signing: {}", e)))?;
        Ok((Token::new(value, TokenKind::AccessToken), jti))
    }

    /// Verify a presented access token; expiry is a distinct failure kind
    pub fn verify(&self, raw: &str) -> Result<AccessTokenClaims, TokenError> {
        let key = self
            .keys
            .signing_key(SigningAlgorithm::RS256)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        // jti and iat are enforced by the claim struct itself; a token
        // missing either fails deserialization
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.validate_aud = false;

        let data = decode::<AccessTokenClaims>(raw, key.decoding_key(), &validation)
            .map_err(translate_jwt_error)?;
        Ok(data.claims)
    }

    /// Extract the `jti` identifier without verifying the signature; used
    /// only for repository index lookups
    pub fn compute_identifier(raw: &str) -> Result<String, TokenError> {
        let claims = decode_claims_unverified(raw)?;
        claims
            .get("jti")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| TokenError::Malformed("missing jti claim".to_string()))
    }
}

/// Decode the claims segment of a compact JWS without signature verification
pub fn decode_claims_unverified(raw: &str) -> Result<serde_json::Value, TokenError> {
    use base64::prelude::*;
    let mut parts = raw.split('.');
    let (Some(_), Some(claims), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed(
            "expected three dot-separated parts".to_string(),
        ));
    };
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(claims)
        .map_err(|e| TokenError::Malformed(format!("claims encoding: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(format!("claims JSON: {}", e)))
}

/// Translate `jsonwebtoken` failures to the narrowest token error kind
pub fn translate_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::BadSignature,
        ErrorKind::InvalidToken => TokenError::Malformed(err.to_string()),
        _ => TokenError::Invalid(err.to_string()),
    }
}
