//! OAuth 2.0 / OpenID Connect core types and data structures.
//!
//! Defines enums, structs, and helpers for grants, response types, clients,
//! and normalized request parameters.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// OAuth 2.0 Grant Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    RefreshToken,
}

impl GrantType {
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "client_credentials" => Some(Self::ClientCredentials),
            "refresh_token" => Some(Self::RefreshToken),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// OAuth 2.0 / OIDC Response Types
///
/// Hybrid flows are represented as sets of these, e.g. `{Code, IdToken}`
/// for `response_type="code id_token"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
    Token,
    IdToken,
}

impl ResponseType {
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "code" => Some(Self::Code),
            "token" => Some(Self::Token),
            "id_token" => Some(Self::IdToken),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
            Self::IdToken => "id_token",
        }
    }
}

/// Parse a space-separated `response_type` parameter into a set
pub fn parse_response_types(value: &str) -> Option<HashSet<ResponseType>> {
    let mut set = HashSet::new();
    for part in value.split_whitespace() {
        set.insert(ResponseType::from_param(part)?);
    }
    if set.is_empty() { None } else { Some(set) }
}

/// Token kinds issued and verified by the token strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AuthorizeCode,
    AccessToken,
    RefreshToken,
    IdToken,
}

/// A generated or presented token value tagged with its kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    pub kind: TokenKind,
}

impl Token {
    pub fn new(value: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            value: value.into(),
            kind,
        }
    }
}

/// Client Authentication Methods at the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
    None,
}

/// Client Type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Public,
    Confidential,
}

/// JWS algorithms negotiated per client
///
/// `None` is only meaningful for request objects and only when the server
/// explicitly permits unsigned objects; the token strategies reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    #[serde(rename = "HS256")]
    HS256,
    #[serde(rename = "RS256")]
    RS256,
    #[serde(rename = "ES256")]
    ES256,
    #[serde(rename = "none")]
    None,
}

impl SigningAlgorithm {
    /// The corresponding `jsonwebtoken` algorithm, if the value signs at all
    pub fn to_jwt_algorithm(self) -> Option<jsonwebtoken::Algorithm> {
        match self {
            Self::HS256 => Some(jsonwebtoken::Algorithm::HS256),
            Self::RS256 => Some(jsonwebtoken::Algorithm::RS256),
            Self::ES256 => Some(jsonwebtoken::Algorithm::ES256),
            Self::None => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
            Self::ES256 => "ES256",
            Self::None => "none",
        }
    }

    /// Symmetric algorithms key off the client secret
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::HS256)
    }
}

/// JWE key management algorithms for nested ID tokens and request objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    /// Direct symmetric encryption; the key is derived from the client secret
    #[serde(rename = "dir")]
    Dir,
    /// RSA-OAEP-256 key transport against an RSA public key
    #[serde(rename = "RSA-OAEP-256")]
    RsaOaep256,
}

impl EncryptionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::RsaOaep256 => "RSA-OAEP-256",
        }
    }

    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::Dir)
    }
}

/// OIDC `prompt` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
    None,
    Login,
    Consent,
    SelectAccount,
}

impl Prompt {
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "login" => Some(Self::Login),
            "consent" => Some(Self::Consent),
            "select_account" => Some(Self::SelectAccount),
            _ => None,
        }
    }
}

/// OIDC `display` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Display {
    Page,
    Popup,
    Touch,
    Wap,
}

impl Display {
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "page" => Some(Self::Page),
            "popup" => Some(Self::Popup),
            "touch" => Some(Self::Touch),
            "wap" => Some(Self::Wap),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Popup => "popup",
            Self::Touch => "touch",
            Self::Wap => "wap",
        }
    }
}

/// How authorize-endpoint response parameters are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Query,
    Fragment,
}

impl ResponseMode {
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "query" => Some(Self::Query),
            "fragment" => Some(Self::Fragment),
            _ => None,
        }
    }
}

/// Client key material for request-object and ID-token cryptography
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientJwks {
    /// Inline key set
    Value(JwkSet),
    /// Fetched from the client's `jwks_uri`
    Uri(String),
}

/// Registered OAuth / OIDC client
///
/// Immutable after registration; looked up by id through [`crate::storage::traits::ClientStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Unique client identifier
    pub client_id: String,
    /// Client secret (absent for public clients)
    pub client_secret: Option<String>,
    /// Client name
    pub client_name: Option<String>,
    /// Client type (public or confidential)
    pub client_type: ClientType,
    /// Redirect URIs
    pub redirect_uris: Vec<String>,
    /// Grant types allowed for this client
    pub grant_types: Vec<GrantType>,
    /// Response types allowed for this client
    pub response_types: Vec<ResponseType>,
    /// Scopes that can be requested by this client, space-separated
    pub scope: Option<String>,
    /// Client authentication method
    pub token_endpoint_auth_method: ClientAuthMethod,
    /// Audience values granted tokens carry in addition to the client id
    pub audience: Vec<String>,
    /// Signing algorithm for ID tokens issued to this client
    pub id_token_signed_response_alg: SigningAlgorithm,
    /// When set, ID tokens are signed then encrypted with this algorithm
    pub id_token_encrypted_response_alg: Option<EncryptionAlgorithm>,
    /// Required signing algorithm for request objects from this client
    pub request_object_signing_alg: Option<SigningAlgorithm>,
    /// When set, request objects from this client arrive encrypted
    pub request_object_encryption_alg: Option<EncryptionAlgorithm>,
    /// Client key set for asymmetric request-object signatures and ID-token encryption
    pub jwks: Option<ClientJwks>,
    /// Pre-registered `request_uri` values
    pub request_uris: Vec<String>,
    /// Default max authentication age in seconds
    pub default_max_age: Option<i64>,
    /// Registration timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Client {
    /// Whether every scope in `requested` is registered for this client
    pub fn allows_scopes(&self, requested: &[String]) -> bool {
        let registered = self
            .scope
            .as_deref()
            .map(parse_scope)
            .unwrap_or_default();
        requested.iter().all(|s| registered.contains(s))
    }

    pub fn allows_response_types(&self, requested: &HashSet<ResponseType>) -> bool {
        requested.iter().all(|rt| self.response_types.contains(rt))
    }

    pub fn allows_grant_type(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Redirect URIs are bound by exact match
    pub fn redirect_uri_registered(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| registered == uri)
    }

    pub fn request_uri_registered(&self, uri: &str) -> bool {
        self.request_uris.iter().any(|registered| registered == uri)
    }

    pub fn is_public(&self) -> bool {
        self.client_type == ClientType::Public
    }
}

/// Normalized key to value-list parameter map handed to the core by the
/// transport layer
///
/// Both the authorize endpoint (query) and the token endpoint (form body)
/// are delivered through this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Params(HashMap<String, Vec<String>>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in pairs {
            map.entry(k.into()).or_default().push(v.into());
        }
        Self(map)
    }

    /// First value for a key, empty strings treated as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), vec![value.into()]);
    }

    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Copy of this map reduced to the given keys
    pub fn retain_keys(&self, allowed: &[&str]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| allowed.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Parse a space-separated scope string into an ordered list, dropping duplicates
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    scope
        .split_whitespace()
        .filter(|s| seen.insert(s.to_string()))
        .map(|s| s.to_string())
        .collect()
}

/// Join scopes into a space-separated string
pub fn join_scopes(scopes: &[String]) -> String {
    scopes.join(" ")
}

/// Generate a secure random value, base64url without padding
pub fn generate_random(bytes: usize) -> String {
    use rand::RngCore;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    BASE64_URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> Client {
        let now = Utc::now();
        Client {
            client_id: "client-1".to_string(),
            client_secret: Some("secret".to_string()),
            client_name: None,
            client_type: ClientType::Confidential,
            redirect_uris: vec!["https://app.example.com/cb".to_string()],
            grant_types: vec![GrantType::AuthorizationCode],
            response_types: vec![ResponseType::Code],
            scope: Some("foo bar openid".to_string()),
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

    #[test]
    fn response_type_sets_parse_hybrid_values() {
        let set = parse_response_types("code id_token").unwrap();
        assert!(set.contains(&ResponseType::Code));
        assert!(set.contains(&ResponseType::IdToken));
        assert_eq!(set.len(), 2);

        assert!(parse_response_types("code nonsense").is_none());
        assert!(parse_response_types("").is_none());
    }

    #[test]
    fn client_scope_checks_are_subset_based() {
        let client = test_client();
        assert!(client.allows_scopes(&["foo".to_string(), "bar".to_string()]));
        assert!(!client.allows_scopes(&["foo".to_string(), "admin".to_string()]));
        assert!(client.allows_scopes(&[]));
    }

    #[test]
    fn redirect_uri_binding_is_exact() {
        let client = test_client();
        assert!(client.redirect_uri_registered("https://app.example.com/cb"));
        assert!(!client.redirect_uri_registered("https://app.example.com/cb/extra"));
    }

    #[test]
    fn params_first_value_and_empty_filtering() {
        let params = Params::from_pairs([("scope", "foo bar"), ("state", ""), ("scope", "other")]);
        assert_eq!(params.get("scope"), Some("foo bar"));
        assert_eq!(params.get("state"), None);
        assert!(!params.contains("missing"));
    }

    #[test]
    fn scope_parsing_dedupes_and_preserves_order() {
        let scopes = parse_scope("foo bar foo baz");
        assert_eq!(scopes, vec!["foo", "bar", "baz"]);
        assert_eq!(join_scopes(&scopes), "foo bar baz");
    }
}
