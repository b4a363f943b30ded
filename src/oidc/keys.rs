//! Server key material and client key-set resolution.
//!
//! The server signs with keys flagged for signature use and decrypts
//! inbound JWE with its encryption key; clients bring their own key sets,
//! inline or behind a `jwks_uri` resolved through the same cached-fetch
//! policy as request objects.

use base64::prelude::*;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use uuid::Uuid;

use crate::errors::{ConfigError, ProtocolError};
use crate::oidc::fetch::CachedFetcher;
use crate::oidc::types::{Client, ClientJwks, SigningAlgorithm};

/// What a server key may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUse {
    Signature,
    Encryption,
}

/// One server key with its JOSE material
pub struct ServerKey {
    pub kid: String,
    pub algorithm: SigningAlgorithm,
    pub key_use: KeyUse,
    encoding: EncodingKey,
    decoding: DecodingKey,
    /// Present on RSA keys; required for JWE key-transport decryption
    rsa_private: Option<RsaPrivateKey>,
}

impl std::fmt::Debug for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("key_use", &self.key_use)
            .field("rsa_private", &self.rsa_private.is_some())
            .finish_non_exhaustive()
    }
}

impl ServerKey {
    /// Generate a fresh RSA-2048 key
    pub fn generate_rsa(algorithm: SigningAlgorithm, key_use: KeyUse) -> Result<Self, ConfigError> {
        if algorithm != SigningAlgorithm::RS256 {
            return Err(ConfigError::SigningKeySetupFailed(format!(
                "cannot generate an RSA key for {}",
                algorithm.as_str()
            )));
        }
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048)
            .map_err(|e| ConfigError::SigningKeySetupFailed(e.to_string()))?;
        Self::from_rsa_private(private_key, algorithm, key_use)
    }

    fn from_rsa_private(
        private_key: RsaPrivateKey,
        algorithm: SigningAlgorithm,
        key_use: KeyUse,
    ) -> Result<Self, ConfigError> {
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| ConfigError::SigningKeySetupFailed(e.to_string()))?;
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ConfigError::SigningKeySetupFailed(e.to_string()))?;

        let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| ConfigError::SigningKeySetupFailed(e.to_string()))?;
        let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| ConfigError::SigningKeySetupFailed(e.to_string()))?;

        Ok(Self {
            kid: Uuid::new_v4().to_string(),
            algorithm,
            key_use,
            encoding,
            decoding,
            rsa_private: Some(private_key),
        })
    }

    /// Load an RSA key pair from a PKCS#8 PEM private key
    pub fn from_rsa_pem(
        private_pem: &str,
        algorithm: SigningAlgorithm,
        key_use: KeyUse,
    ) -> Result<Self, ConfigError> {
        use rsa::pkcs8::DecodePrivateKey;
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .map_err(|e| ConfigError::SigningKeySetupFailed(e.to_string()))?;
        Self::from_rsa_private(private_key, algorithm, key_use)
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    pub fn rsa_private_key(&self) -> Option<&RsaPrivateKey> {
        self.rsa_private.as_ref()
    }

    pub fn rsa_public_key(&self) -> Option<RsaPublicKey> {
        self.rsa_private.as_ref().map(RsaPrivateKey::to_public_key)
    }
}

/// The server's key set
pub struct ServerKeySet {
    keys: Vec<ServerKey>,
}

impl ServerKeySet {
    pub fn new(keys: Vec<ServerKey>) -> Self {
        Self { keys }
    }

    /// Generate a default set: one RS256 signature key, one RSA encryption key
    pub fn generate() -> Result<Self, ConfigError> {
        Ok(Self {
            keys: vec![
                ServerKey::generate_rsa(SigningAlgorithm::RS256, KeyUse::Signature)?,
                ServerKey::generate_rsa(SigningAlgorithm::RS256, KeyUse::Encryption)?,
            ],
        })
    }

    /// Resolve the signing key for an algorithm.
    ///
    /// Absence is a configuration bug: the server advertised an algorithm it
    /// cannot honor, so this is a hard server error rather than a client one.
    pub fn signing_key(&self, algorithm: SigningAlgorithm) -> Result<&ServerKey, ProtocolError> {
        self.keys
            .iter()
            .find(|key| key.key_use == KeyUse::Signature && key.algorithm == algorithm)
            .ok_or_else(|| {
                ProtocolError::ServerError(format!(
                    "no signing key available for {}",
                    algorithm.as_str()
                ))
            })
    }

    /// Resolve the server's decryption key for inbound JWE
    pub fn encryption_key(&self) -> Result<&ServerKey, ProtocolError> {
        self.keys
            .iter()
            .find(|key| key.key_use == KeyUse::Encryption)
            .ok_or_else(|| {
                ProtocolError::ServerError("no encryption key configured".to_string())
            })
    }
}

/// Resolves client key sets, fetching and caching `jwks_uri` documents
pub struct KeySource {
    fetcher: CachedFetcher,
}

impl KeySource {
    pub fn new(fetcher: CachedFetcher) -> Self {
        Self { fetcher }
    }

    /// Resolve a client's key set by value or by URI
    pub async fn client_jwks(&self, client: &Client) -> Result<JwkSet, ProtocolError> {
        match &client.jwks {
            Some(ClientJwks::Value(set)) => Ok(set.clone()),
            Some(ClientJwks::Uri(uri)) => {
                let body = self.fetcher.fetch(uri).await.map_err(|e| {
                    ProtocolError::InvalidClient(format!("client key set fetch failed: {}", e))
                })?;
                serde_json::from_str(&body).map_err(|e| {
                    ProtocolError::InvalidClient(format!("client key set is not a JWK set: {}", e))
                })
            }
            None => Err(ProtocolError::InvalidClient(format!(
                "client {} has no registered key set",
                client.client_id
            ))),
        }
    }
}

/// Pick a verification key for `algorithm` out of a client key set
pub fn decoding_key_from_jwks(
    jwks: &JwkSet,
    algorithm: SigningAlgorithm,
) -> Result<DecodingKey, ProtocolError> {
    let wanted = algorithm.as_str();
    let jwk = jwks
        .keys
        .iter()
        .find(|key| jwk_matches_algorithm(key, wanted))
        .ok_or_else(|| {
            ProtocolError::InvalidClient(format!("client key set has no {} key", wanted))
        })?;
    DecodingKey::from_jwk(jwk)
        .map_err(|e| ProtocolError::InvalidClient(format!("unusable client key: {}", e)))
}

fn jwk_matches_algorithm(jwk: &Jwk, algorithm: &str) -> bool {
    match (&jwk.common.key_algorithm, algorithm) {
        (Some(alg), _) => format!("{:?}", alg) == algorithm,
        (None, "RS256") => matches!(jwk.algorithm, AlgorithmParameters::RSA(_)),
        (None, "ES256") => matches!(jwk.algorithm, AlgorithmParameters::EllipticCurve(_)),
        _ => false,
    }
}

/// Extract an RSA public key (for JWE key transport) from a client key set
pub fn rsa_public_key_from_jwks(jwks: &JwkSet) -> Result<RsaPublicKey, ProtocolError> {
    let params = jwks
        .keys
        .iter()
        .find_map(|key| match &key.algorithm {
            AlgorithmParameters::RSA(params) => Some(params),
            _ => None,
        })
        .ok_or_else(|| {
            ProtocolError::InvalidClient("client key set has no RSA key".to_string())
        })?;
    let n = BASE64_URL_SAFE_NO_PAD
        .decode(&params.n)
        .map_err(|e| ProtocolError::InvalidClient(format!("bad RSA modulus: {}", e)))?;
    let e = BASE64_URL_SAFE_NO_PAD
        .decode(&params.e)
        .map_err(|e| ProtocolError::InvalidClient(format!("bad RSA exponent: {}", e)))?;
    RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|e| ProtocolError::InvalidClient(format!("unusable RSA key: {}", e)))
}

/// Export an RSA public key as a JWK set document, the inverse of
/// [`rsa_public_key_from_jwks`]
pub fn jwks_from_rsa_public_key(public_key: &RsaPublicKey) -> serde_json::Value {
    serde_json::json!({
        "keys": [{
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "n": BASE64_URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            "e": BASE64_URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }]
    })
}
