//! ID token strategy: signed, optionally nested-encrypted JWTs.

use chrono::Duration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{ProtocolError, TokenError};
use crate::oidc::jose::{self, JweEncryptKey};
use crate::oidc::keys::{KeySource, ServerKeySet, rsa_public_key_from_jwks};
use crate::oidc::request::OidcRequest;
use crate::oidc::token::RESERVED_CLAIMS;
use crate::oidc::token::jwt::translate_jwt_error;
use crate::oidc::types::{Client, EncryptionAlgorithm, SigningAlgorithm, Token, TokenKind};

/// ID token claim set (OIDC Core §2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amr: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Generates ID tokens under the client's negotiated algorithms
pub struct IdTokenStrategy {
    keys: Arc<ServerKeySet>,
    key_source: Arc<KeySource>,
    issuer: String,
    lifespan: Duration,
}

impl IdTokenStrategy {
    pub fn new(
        keys: Arc<ServerKeySet>,
        key_source: Arc<KeySource>,
        issuer: impl Into<String>,
        lifespan: Duration,
    ) -> Self {
        Self {
            keys,
            key_source,
            issuer: issuer.into(),
            lifespan,
        }
    }

    /// Build, sign, and (when negotiated) encrypt an ID token from the
    /// session staged on the request.
    ///
    /// The subject must already be established; its absence here is a
    /// sequencing bug in the handler chain, not a client fault.
    pub async fn generate<R: OidcRequest>(&self, request: &R) -> Result<Token, ProtocolError> {
        let client = request.client();
        let session = request.session();

        let subject = session.subject.clone().ok_or_else(|| {
            ProtocolError::ServerError(
                "ID token requested but no subject is set on the session".to_string(),
            )
        })?;

        let now = request.requested_at();
        let extra: BTreeMap<String, serde_json::Value> = session
            .claims
            .extra
            .iter()
            .filter(|(name, _)| !RESERVED_CLAIMS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: subject,
            aud: client.client_id.clone(),
            exp: (now + self.lifespan).timestamp(),
            iat: now.timestamp(),
            auth_time: session.auth_time.map(|t| t.timestamp()),
            nonce: session.claims.nonce.clone(),
            acr: session.acr.clone(),
            amr: session.claims.amr.clone(),
            at_hash: session.claims.at_hash.clone(),
            c_hash: session.claims.c_hash.clone(),
            extra,
        };

        let signed = self.sign(client, &claims)?;

        let value = match client.id_token_encrypted_response_alg {
            None => signed,
            Some(algorithm) => self.encrypt(client, algorithm, &signed).await?,
        };
        Ok(Token::new(value, TokenKind::IdToken))
    }

    fn sign(&self, client: &Client, claims: &IdTokenClaims) -> Result<String, ProtocolError> {
        let algorithm = client.id_token_signed_response_alg;
        let jwt_algorithm = algorithm.to_jwt_algorithm().ok_or_else(|| {
            ProtocolError::ServerError(format!(
                "client {} negotiated non-signing ID token algorithm",
                client.client_id
            ))
        })?;

        let mut header = Header::new(jwt_algorithm);
        let encoding_key = if algorithm.is_symmetric() {
            let secret = client.client_secret.as_deref().ok_or_else(|| {
                ProtocolError::ServerError(format!(
                    "client {} negotiated HS256 without a secret",
                    client.client_id
                ))
            })?;
            EncodingKey::from_secret(secret.as_bytes())
        } else {
            let key = self.keys.signing_key(algorithm)?;
            header.kid = Some(key.kid.clone());
            key.encoding_key().clone()
        };

        encode(&header, claims, &encoding_key)
            .map_err(|e| ProtocolError::ServerError(format!("ID token signing: {}", e)))
    }

    async fn encrypt(
        &self,
        client: &Client,
        algorithm: EncryptionAlgorithm,
        signed: &str,
    ) -> Result<String, ProtocolError> {
        let key = match algorithm {
            EncryptionAlgorithm::Dir => {
                let secret = client.client_secret.as_deref().ok_or_else(|| {
                    ProtocolError::ServerError(format!(
                        "client {} negotiated dir encryption without a secret",
                        client.client_id
                    ))
                })?;
                JweEncryptKey::Direct(jose::client_secret_key(secret))
            }
            EncryptionAlgorithm::RsaOaep256 => {
                let jwks = self.key_source.client_jwks(client).await?;
                let public_key = rsa_public_key_from_jwks(&jwks)?;
                return jose::encrypt_compact(signed, algorithm, JweEncryptKey::Rsa(&public_key))
                    .map_err(|e| {
                        ProtocolError::ServerError(format!("ID token encryption: {}", e))
                    });
            }
        };
        jose::encrypt_compact(signed, algorithm, key)
            .map_err(|e| ProtocolError::ServerError(format!("ID token encryption: {}", e)))
    }

    /// Decode an `id_token_hint` previously issued by this server.
    ///
    /// Expiry is ignored: an expired hint still names the user it was
    /// issued to. The signature must still verify.
    pub fn verify_hint(&self, raw: &str, client: &Client) -> Result<IdTokenClaims, TokenError> {
        let algorithm = client.id_token_signed_response_alg;
        let jwt_algorithm = algorithm
            .to_jwt_algorithm()
            .ok_or_else(|| TokenError::Invalid("hint algorithm cannot verify".to_string()))?;

        let decoding_key = if algorithm.is_symmetric() {
            let secret = client
                .client_secret
                .as_deref()
                .ok_or_else(|| TokenError::Invalid("client has no secret".to_string()))?;
            DecodingKey::from_secret(secret.as_bytes())
        } else {
            self.keys
                .signing_key(algorithm)
                .map_err(|e| TokenError::Invalid(e.to_string()))?
                .decoding_key()
                .clone()
        };

        let mut validation = Validation::new(jwt_algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = false;
        validation.validate_aud = false;

        let data = decode::<IdTokenClaims>(raw, &decoding_key, &validation)
            .map_err(translate_jwt_error)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::fetch::CachedFetcher;
    use crate::oidc::jose::JweDecryptKey;
    use crate::oidc::request::RequestFactory;
    use crate::oidc::types::{
        Client, ClientAuthMethod, ClientJwks, ClientType, GrantType, Params, ResponseType,
    };
    use crate::storage::MemoryStorage;
    use chrono::Utc;

    fn test_client() -> Client {
        let now = Utc::now();
        Client {
            client_id: "client-1".to_string(),
            client_secret: Some("a-sufficiently-long-client-secret".to_string()),
            client_name: None,
            client_type: ClientType::Confidential,
            redirect_uris: vec!["https://app.example.com/cb".to_string()],
            grant_types: vec![GrantType::AuthorizationCode],
            response_types: vec![ResponseType::Code, ResponseType::IdToken],
            scope: Some("openid foo".to_string()),
            token_endpoint_auth_method: ClientAuthMethod::ClientSecretBasic,
            audience: vec![],
            id_token_signed_response_alg: SigningAlgorithm::RS256,
            id_token_encrypted_response_alg: None,
            request_object_signing_alg: None,
            request_object_encryption_alg: None,
            jwks: None,
            request_uris: vec![],
            default_max_age: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn strategy() -> (IdTokenStrategy, Arc<ServerKeySet>) {
        let keys = Arc::new(ServerKeySet::generate().unwrap());
        let storage = Arc::new(MemoryStorage::new());
        let key_source = Arc::new(KeySource::new(CachedFetcher::new(
            reqwest::Client::new(),
            storage,
            Duration::minutes(5),
            std::time::Duration::from_secs(5),
        )));
        (
            IdTokenStrategy::new(
                keys.clone(),
                key_source,
                "https://issuer.example.com",
                Duration::hours(1),
            ),
            keys,
        )
    }

    fn authorize_request(client: Client) -> crate::oidc::request::AuthorizeRequest {
        let params = Params::from_pairs([
            ("response_type", "code id_token"),
            ("redirect_uri", "https://app.example.com/cb"),
            ("scope", "openid"),
            ("nonce", "n-0S6_WzA2Mj"),
        ]);
        let mut request = RequestFactory::authorize_request(&params, client).unwrap();
        request.session.set_authenticated("alice", Utc::now());
        request.session.claims.c_hash = Some("c-hash-value".to_string());
        request
    }

    #[tokio::test]
    async fn signed_id_token_carries_oidc_claims() {
        let (strategy, _) = strategy();
        let request = authorize_request(test_client());

        let token = strategy.generate(&request).await.unwrap();
        let claims = strategy.verify_hint(&token.value, request.client()).unwrap();

        assert_eq!(claims.iss, "https://issuer.example.com");
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.aud, "client-1");
        assert_eq!(claims.nonce.as_deref(), Some("n-0S6_WzA2Mj"));
        assert_eq!(claims.c_hash.as_deref(), Some("c-hash-value"));
        assert!(claims.auth_time.is_some());
    }

    #[tokio::test]
    async fn hs256_signing_uses_the_client_secret() {
        let (strategy, _) = strategy();
        let mut client = test_client();
        client.id_token_signed_response_alg = SigningAlgorithm::HS256;
        let request = authorize_request(client.clone());

        let token = strategy.generate(&request).await.unwrap();
        assert!(strategy.verify_hint(&token.value, &client).is_ok());

        let mut other = client.clone();
        other.client_secret = Some("a-different-secret-entirely".to_string());
        assert!(strategy.verify_hint(&token.value, &other).is_err());
    }

    #[tokio::test]
    async fn dir_encryption_produces_a_nested_jwt() {
        let (strategy, _) = strategy();
        let mut client = test_client();
        client.id_token_encrypted_response_alg = Some(EncryptionAlgorithm::Dir);
        let request = authorize_request(client.clone());

        let token = strategy.generate(&request).await.unwrap();
        assert_eq!(token.value.split('.').count(), 5);

        let secret = client.client_secret.as_deref().unwrap();
        let signed = jose::decrypt_compact(
            &token.value,
            EncryptionAlgorithm::Dir,
            JweDecryptKey::Direct(jose::client_secret_key(secret)),
        )
        .unwrap();
        let claims = strategy.verify_hint(&signed, &client).unwrap();
        assert_eq!(claims.sub, "alice");
    }

    #[tokio::test]
    async fn rsa_encryption_uses_the_client_key_set() {
        let (strategy, _) = strategy();
        let client_private = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let jwks_json =
            crate::oidc::keys::jwks_from_rsa_public_key(&client_private.to_public_key());

        let mut client = test_client();
        client.id_token_encrypted_response_alg = Some(EncryptionAlgorithm::RsaOaep256);
        client.jwks = Some(ClientJwks::Value(serde_json::from_value(jwks_json).unwrap()));
        let request = authorize_request(client.clone());

        let token = strategy.generate(&request).await.unwrap();
        let signed = jose::decrypt_compact(
            &token.value,
            EncryptionAlgorithm::RsaOaep256,
            JweDecryptKey::Rsa(&client_private),
        )
        .unwrap();
        let claims = strategy.verify_hint(&signed, &client).unwrap();
        assert_eq!(claims.aud, "client-1");
    }

    #[tokio::test]
    async fn missing_subject_is_a_server_error() {
        let (strategy, _) = strategy();
        let params = Params::from_pairs([
            ("response_type", "id_token"),
            ("redirect_uri", "https://app.example.com/cb"),
            ("nonce", "n"),
        ]);
        let request = RequestFactory::authorize_request(&params, test_client()).unwrap();

        let err = strategy.generate(&request).await.unwrap_err();
        assert_eq!(err.code(), "server_error");
    }

    #[tokio::test]
    async fn missing_es256_server_key_is_a_server_error() {
        let (strategy, _) = strategy();
        let mut client = test_client();
        client.id_token_signed_response_alg = SigningAlgorithm::ES256;
        let request = authorize_request(client);

        let err = strategy.generate(&request).await.unwrap_err();
        assert_eq!(err.code(), "server_error");
    }
}
