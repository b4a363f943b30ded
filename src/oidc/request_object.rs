//! Request object (JAR) resolution.
//!
//! Resolves `request` (by value) and `request_uri` (by reference)
//! parameters into a claims map for the overlay producer. Failures collapse
//! into the `invalid_request_object` / `invalid_request_uri` families;
//! protocol errors raised by collaborators pass through unchanged.

use base64::prelude::*;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, Validation, decode};
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::oidc::fetch::CachedFetcher;
use crate::oidc::jose::{self, JweDecryptKey};
use crate::oidc::keys::{KeySource, ServerKeySet, decoding_key_from_jwks};
use crate::oidc::types::{Client, EncryptionAlgorithm, Params, SigningAlgorithm};

/// Maximum accepted `request_uri` length
const MAX_REQUEST_URI_LEN: usize = 512;

/// Claims carried by a resolved request object
pub type RequestObjectClaims = serde_json::Map<String, serde_json::Value>;

/// Resolves detached request objects by value or by reference
pub struct RequestObjectResolver {
    fetcher: CachedFetcher,
    key_source: Arc<KeySource>,
    keys: Arc<ServerKeySet>,
    issuer: String,
    allow_unsigned: bool,
}

impl RequestObjectResolver {
    pub fn new(
        fetcher: CachedFetcher,
        key_source: Arc<KeySource>,
        keys: Arc<ServerKeySet>,
        issuer: impl Into<String>,
        allow_unsigned: bool,
    ) -> Self {
        Self {
            fetcher,
            key_source,
            keys,
            issuer: issuer.into(),
            allow_unsigned,
        }
    }

    /// Resolve the request object referenced by `params`, if any
    pub async fn resolve(
        &self,
        client: &Client,
        params: &Params,
    ) -> Result<Option<RequestObjectClaims>, ProtocolError> {
        let by_value = params.get("request");
        let by_reference = params.get("request_uri");

        match (by_value, by_reference) {
            (None, None) => Ok(None),
            (Some(_), Some(_)) => Err(ProtocolError::InvalidRequest(
                "request and request_uri are mutually exclusive".to_string(),
            )),
            (Some(value), None) => self.process_value(client, value).await.map(Some),
            (None, Some(uri)) => {
                let document = self.fetch_reference(client, uri).await?;
                self.process_value(client, &document).await.map(Some).map_err(
                    // by-reference failures surface as the URI family
                    |err| match err {
                        ProtocolError::InvalidRequestObject(d) => {
                            ProtocolError::InvalidRequestUri(d)
                        }
                        other => other,
                    },
                )
            }
        }
    }

    async fn fetch_reference(&self, client: &Client, uri: &str) -> Result<String, ProtocolError> {
        if uri.len() > MAX_REQUEST_URI_LEN {
            return Err(ProtocolError::InvalidRequestUri(format!(
                "request_uri exceeds {} characters",
                MAX_REQUEST_URI_LEN
            )));
        }
        if !client.request_uri_registered(uri) {
            return Err(ProtocolError::InvalidRequestUri(
                "request_uri is not registered for this client".to_string(),
            ));
        }
        self.fetcher
            .fetch(uri)
            .await
            .map_err(|e| ProtocolError::InvalidRequestUri(e.to_string()))
    }

    /// Decrypt (when negotiated) and verify a by-value request object
    async fn process_value(
        &self,
        client: &Client,
        value: &str,
    ) -> Result<RequestObjectClaims, ProtocolError> {
        let signed = match client.request_object_encryption_alg {
            None => value.to_string(),
            Some(algorithm) => self.decrypt(client, algorithm, value)?,
        };
        self.verify_signature(client, &signed).await
    }

    fn decrypt(
        &self,
        client: &Client,
        algorithm: EncryptionAlgorithm,
        value: &str,
    ) -> Result<String, ProtocolError> {
        let key = match algorithm {
            EncryptionAlgorithm::Dir => {
                let secret = client.client_secret.as_deref().ok_or_else(|| {
                    ProtocolError::InvalidRequestObject(
                        "client negotiated dir encryption without a secret".to_string(),
                    )
                })?;
                JweDecryptKey::Direct(jose::client_secret_key(secret))
            }
            EncryptionAlgorithm::RsaOaep256 => {
                let server_key = self.keys.encryption_key()?;
                let private_key = server_key.rsa_private_key().ok_or_else(|| {
                    ProtocolError::ServerError(
                        "server encryption key has no RSA material".to_string(),
                    )
                })?;
                return jose::decrypt_compact(value, algorithm, JweDecryptKey::Rsa(private_key))
                    .map_err(|e| ProtocolError::InvalidRequestObject(e.to_string()));
            }
        };
        jose::decrypt_compact(value, algorithm, key)
            .map_err(|e| ProtocolError::InvalidRequestObject(e.to_string()))
    }

    async fn verify_signature(
        &self,
        client: &Client,
        signed: &str,
    ) -> Result<RequestObjectClaims, ProtocolError> {
        let header_algorithm = peek_algorithm(signed)?;

        // the registered algorithm is binding; absent registration accepts
        // whatever the header declares
        let algorithm = match client.request_object_signing_alg {
            Some(registered) => {
                if registered.as_str() != header_algorithm {
                    return Err(ProtocolError::InvalidRequestObject(format!(
                        "request object is signed with {} but the client registered {}",
                        header_algorithm,
                        registered.as_str()
                    )));
                }
                registered
            }
            None => match header_algorithm.as_str() {
                "HS256" => SigningAlgorithm::HS256,
                "RS256" => SigningAlgorithm::RS256,
                "ES256" => SigningAlgorithm::ES256,
                "none" => SigningAlgorithm::None,
                other => {
                    return Err(ProtocolError::InvalidRequestObject(format!(
                        "unsupported request object algorithm {}",
                        other
                    )));
                }
            },
        };

        let claims = match algorithm {
            SigningAlgorithm::None => self.accept_unsigned(signed)?,
            SigningAlgorithm::HS256 => {
                let secret = client.client_secret.as_deref().ok_or_else(|| {
                    ProtocolError::InvalidRequestObject(
                        "symmetric request object but the client has no secret".to_string(),
                    )
                })?;
                self.decode_signed(signed, algorithm, DecodingKey::from_secret(secret.as_bytes()))?
            }
            SigningAlgorithm::RS256 | SigningAlgorithm::ES256 => {
                let jwks = self.key_source.client_jwks(client).await?;
                let key = decoding_key_from_jwks(&jwks, algorithm)?;
                self.decode_signed(signed, algorithm, key)?
            }
        };

        match claims.get("client_id").and_then(|v| v.as_str()) {
            Some(id) if id == client.client_id => {}
            Some(_) => {
                return Err(ProtocolError::InvalidRequestObject(
                    "request object client_id does not match the requesting client".to_string(),
                ));
            }
            None => {}
        }

        if let Some(exp) = claims.get("exp").and_then(|v| v.as_i64()) {
            if exp < Utc::now().timestamp() {
                return Err(ProtocolError::InvalidRequestObject(
                    "request object expired".to_string(),
                ));
            }
        }

        Ok(claims)
    }

    fn decode_signed(
        &self,
        signed: &str,
        algorithm: SigningAlgorithm,
        key: DecodingKey,
    ) -> Result<RequestObjectClaims, ProtocolError> {
        let jwt_algorithm = algorithm.to_jwt_algorithm().ok_or_else(|| {
            ProtocolError::ServerError(
                "non-signing algorithm reached the signed decode path".to_string(),
            )
        })?;
        let mut validation = Validation::new(jwt_algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<serde_json::Map<String, serde_json::Value>>(signed, &key, &validation)
            .map_err(|e| ProtocolError::InvalidRequestObject(e.to_string()))?;
        Ok(data.claims)
    }

    /// `alg=none` objects carry no issuer trust; the audience must name this
    /// server, and the deployment must have opted in
    fn accept_unsigned(&self, token: &str) -> Result<RequestObjectClaims, ProtocolError> {
        if !self.allow_unsigned {
            return Err(ProtocolError::InvalidRequestObject(
                "unsigned request objects are not accepted".to_string(),
            ));
        }

        let mut parts = token.split('.');
        let (Some(_), Some(payload), trailing_signature) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ProtocolError::InvalidRequestObject(
                "malformed unsigned request object".to_string(),
            ));
        };
        if !matches!(trailing_signature, None | Some("")) || parts.next().is_some() {
            return Err(ProtocolError::InvalidRequestObject(
                "unsigned request object carries a signature".to_string(),
            ));
        }

        let bytes = BASE64_URL_SAFE_NO_PAD.decode(payload).map_err(|e| {
            ProtocolError::InvalidRequestObject(format!("payload encoding: {}", e))
        })?;
        let claims: RequestObjectClaims = serde_json::from_slice(&bytes).map_err(|e| {
            ProtocolError::InvalidRequestObject(format!("payload JSON: {}", e))
        })?;

        let audience_matches = match claims.get("aud") {
            Some(serde_json::Value::String(aud)) => *aud == self.issuer,
            Some(serde_json::Value::Array(auds)) => {
                auds.iter().any(|v| v.as_str() == Some(self.issuer.as_str()))
            }
            _ => false,
        };
        if !audience_matches {
            return Err(ProtocolError::InvalidRequestObject(
                "unsigned request object must be addressed to this server".to_string(),
            ));
        }

        Ok(claims)
    }
}

fn peek_algorithm(token: &str) -> Result<String, ProtocolError> {
    let header_part = token.split('.').next().unwrap_or_default();
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(header_part)
        .map_err(|e| ProtocolError::InvalidRequestObject(format!("header encoding: {}", e)))?;
    let header: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| ProtocolError::InvalidRequestObject(format!("header JSON: {}", e)))?;
    header
        .get("alg")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ProtocolError::InvalidRequestObject("request object header has no alg".to_string())
        })
}
