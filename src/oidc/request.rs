//! Typed request records for the authorize and token endpoints.
//!
//! Requests are built complete by [`RequestFactory`] and never exist in a
//! partially-valid state; validation beyond shape (scope subsets, redirect
//! binding, type registration) belongs to the validator chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::errors::ProtocolError;
use crate::oidc::session::Session;
use crate::oidc::types::{
    Client, Display, GrantType, Params, Prompt, ResponseMode, ResponseType, parse_response_types,
    parse_scope,
};

/// Parameters preserved when a request is sanitized for persistence
///
/// Everything else (request objects, hints, round-trip tokens) is stripped.
pub const SAFE_PARAMETERS: &[&str] = &[
    "client_id",
    "response_type",
    "redirect_uri",
    "scope",
    "state",
    "nonce",
    "prompt",
    "max_age",
    "acr_values",
    "display",
    "response_mode",
    "ui_locales",
];

/// Common view over both request shapes, the seam the token strategies and
/// providers work against
pub trait OidcRequest {
    fn id(&self) -> &str;
    fn requested_at(&self) -> DateTime<Utc>;
    fn client(&self) -> &Client;
    fn session(&self) -> &Session;
    fn session_mut(&mut self) -> &mut Session;
}

/// Authorize-endpoint request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    /// Unique per instance; a revived request receives a fresh one
    pub id: String,
    pub requested_at: DateTime<Utc>,
    pub client: Client,
    pub session: Session,
    /// Requested response types, e.g. `{Code, IdToken}` for a hybrid flow
    pub response_types: HashSet<ResponseType>,
    pub redirect_uri: String,
    pub state: Option<String>,
    pub requested_scopes: Vec<String>,
    pub nonce: Option<String>,
    pub prompts: Vec<Prompt>,
    pub max_age: Option<i64>,
    pub acr_values: Vec<String>,
    /// OIDC `claims` request parameter, passed through as JSON
    pub claims_request: Option<serde_json::Value>,
    pub display: Option<Display>,
    pub response_mode: Option<ResponseMode>,
    pub login_hint: Option<String>,
    pub id_token_hint: Option<String>,
    pub ui_locales: Option<String>,
    /// Raw parameter snapshot the request was built from
    pub form: Params,
    /// Response types some handler has claimed in this pass
    handled_types: HashSet<ResponseType>,
}

impl AuthorizeRequest {
    pub fn mark_handled(&mut self, response_type: ResponseType) {
        self.handled_types.insert(response_type);
    }

    pub fn is_handled(&self, response_type: ResponseType) -> bool {
        self.handled_types.contains(&response_type)
    }

    /// Terminal condition: every requested response type has an owner
    pub fn did_handle_all_response_types(&self) -> bool {
        self.response_types
            .iter()
            .all(|rt| self.handled_types.contains(rt))
    }

    pub fn has_prompt(&self, prompt: Prompt) -> bool {
        self.prompts.contains(&prompt)
    }

    /// A request revived from the suspension store; detected through the
    /// session's original-request timestamp
    pub fn is_resumption(&self) -> bool {
        self.session.original_request_time.is_some()
    }

    /// The OIDC flows require a nonce for any token issued from the
    /// authorize endpoint
    pub fn is_oidc_implicit_or_hybrid(&self) -> bool {
        self.response_types.contains(&ResponseType::IdToken)
            || (self.response_types.contains(&ResponseType::Token)
                && self.requested_scopes.iter().any(|s| s == "openid"))
    }

    /// Copy with the raw form reduced to a safe parameter subset; used
    /// before persisting a suspended request
    pub fn sanitize(&self) -> Self {
        let mut sanitized = self.clone();
        sanitized.form = self.form.retain_keys(SAFE_PARAMETERS);
        sanitized.id_token_hint = None;
        sanitized
    }

    /// Fill empty fields from `other`, union scopes and response types, and
    /// merge sessions. Used when resumption combines the revived request
    /// with data produced since suspension.
    pub fn merge(&mut self, other: &AuthorizeRequest) {
        if self.state.is_none() {
            self.state = other.state.clone();
        }
        if self.nonce.is_none() {
            self.nonce = other.nonce.clone();
        }
        if self.max_age.is_none() {
            self.max_age = other.max_age;
        }
        if self.display.is_none() {
            self.display = other.display;
        }
        if self.response_mode.is_none() {
            self.response_mode = other.response_mode;
        }
        if self.login_hint.is_none() {
            self.login_hint = other.login_hint.clone();
        }
        if self.ui_locales.is_none() {
            self.ui_locales = other.ui_locales.clone();
        }
        if self.claims_request.is_none() {
            self.claims_request = other.claims_request.clone();
        }
        if self.redirect_uri.is_empty() {
            self.redirect_uri = other.redirect_uri.clone();
        }
        for rt in &other.response_types {
            self.response_types.insert(*rt);
        }
        for scope in &other.requested_scopes {
            if !self.requested_scopes.contains(scope) {
                self.requested_scopes.push(scope.clone());
            }
        }
        self.session.merge(&other.session);
    }

    /// Build a fresh request instance from a persisted one.
    ///
    /// The revived request gets a new id and timestamp; the original
    /// timestamp moves into the session so downstream logic can tell a
    /// resumption from a first pass.
    pub fn revive(stored: AuthorizeRequest) -> AuthorizeRequest {
        let original_requested_at = stored.requested_at;
        let mut revived = stored;
        revived.id = Uuid::new_v4().to_string();
        revived.requested_at = Utc::now();
        revived.handled_types.clear();
        revived.session.original_request_time = Some(original_requested_at);
        revived
    }

    /// Effective delivery of response parameters: fragment whenever a token
    /// is returned directly, query for the plain code flow
    pub fn effective_response_mode(&self) -> ResponseMode {
        if let Some(mode) = self.response_mode {
            return mode;
        }
        if self.response_types.contains(&ResponseType::Token)
            || self.response_types.contains(&ResponseType::IdToken)
        {
            ResponseMode::Fragment
        } else {
            ResponseMode::Query
        }
    }
}

impl OidcRequest for AuthorizeRequest {
    fn id(&self) -> &str {
        &self.id
    }
    fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }
    fn client(&self) -> &Client {
        &self.client
    }
    fn session(&self) -> &Session {
        &self.session
    }
    fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

/// Token-endpoint request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: String,
    pub requested_at: DateTime<Utc>,
    pub client: Client,
    pub session: Session,
    pub grant_types: HashSet<GrantType>,
    /// Authorization code presented for the code grant
    pub code: Option<String>,
    /// Refresh token presented for the refresh grant
    pub refresh_token: Option<String>,
    /// Redirect URI for code-flow binding
    pub redirect_uri: Option<String>,
    pub requested_scopes: Vec<String>,
    pub form: Params,
    /// Id of the request the presented grant was issued for; set by the
    /// handler that validated the grant and used to keep one active token
    /// family per refresh chain
    pub grant_request_id: Option<String>,
}

impl AccessRequest {
    pub fn has_grant_type(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }
}

impl OidcRequest for AccessRequest {
    fn id(&self) -> &str {
        &self.id
    }
    fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }
    fn client(&self) -> &Client {
        &self.client
    }
    fn session(&self) -> &Session {
        &self.session
    }
    fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

/// Builds complete request records from normalized parameters and a
/// resolved client
pub struct RequestFactory;

impl RequestFactory {
    /// Build an [`AuthorizeRequest`]; all required fields are taken up
    /// front, malformed values fail with `invalid_request`
    pub fn authorize_request(
        params: &Params,
        client: Client,
    ) -> Result<AuthorizeRequest, ProtocolError> {
        let response_type = params.get("response_type").ok_or_else(|| {
            ProtocolError::InvalidRequest("response_type is required".to_string())
        })?;
        let response_types = parse_response_types(response_type).ok_or_else(|| {
            ProtocolError::UnsupportedResponseType(format!(
                "unrecognized response_type '{}'",
                response_type
            ))
        })?;

        let redirect_uri = match params.get("redirect_uri") {
            Some(uri) => uri.to_string(),
            // a sole registered URI may be implied
            None if client.redirect_uris.len() == 1 => client.redirect_uris[0].clone(),
            None => {
                return Err(ProtocolError::InvalidRequest(
                    "redirect_uri is required".to_string(),
                ));
            }
        };

        let requested_scopes = params.get("scope").map(parse_scope).unwrap_or_default();

        let prompts = match params.get("prompt") {
            Some(raw) => raw
                .split_whitespace()
                .map(|p| {
                    Prompt::from_param(p).ok_or_else(|| {
                        ProtocolError::InvalidRequest(format!("unrecognized prompt '{}'", p))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let max_age = params
            .get("max_age")
            .map(|raw| {
                raw.parse::<i64>().map_err(|_| {
                    ProtocolError::InvalidRequest(format!("max_age '{}' is not an integer", raw))
                })
            })
            .transpose()?;

        let claims_request = params
            .get("claims")
            .map(|raw| {
                serde_json::from_str::<serde_json::Value>(raw).map_err(|e| {
                    ProtocolError::InvalidRequest(format!("claims is not valid JSON: {}", e))
                })
            })
            .transpose()?;

        let display = params
            .get("display")
            .map(|raw| {
                Display::from_param(raw).ok_or_else(|| {
                    ProtocolError::InvalidRequest(format!("unrecognized display '{}'", raw))
                })
            })
            .transpose()?;

        let response_mode = params
            .get("response_mode")
            .map(|raw| {
                ResponseMode::from_param(raw).ok_or_else(|| {
                    ProtocolError::InvalidRequest(format!("unrecognized response_mode '{}'", raw))
                })
            })
            .transpose()?;

        let mut session = Session::new();
        session.claims.nonce = params.get("nonce").map(str::to_string);

        Ok(AuthorizeRequest {
            id: Uuid::new_v4().to_string(),
            requested_at: Utc::now(),
            client,
            session,
            response_types,
            redirect_uri,
            state: params.get("state").map(str::to_string),
            requested_scopes,
            nonce: params.get("nonce").map(str::to_string),
            prompts,
            max_age,
            acr_values: params
                .get("acr_values")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            claims_request,
            display,
            response_mode,
            login_hint: params.get("login_hint").map(str::to_string),
            id_token_hint: params.get("id_token_hint").map(str::to_string),
            ui_locales: params.get("ui_locales").map(str::to_string),
            form: params.clone(),
            handled_types: HashSet::new(),
        })
    }

    /// Build an [`AccessRequest`] from token-endpoint form parameters
    pub fn access_request(params: &Params, client: Client) -> Result<AccessRequest, ProtocolError> {
        let grant_type_raw = params
            .get("grant_type")
            .ok_or_else(|| ProtocolError::InvalidRequest("grant_type is required".to_string()))?;
        let grant_type = GrantType::from_param(grant_type_raw).ok_or_else(|| {
            ProtocolError::UnsupportedGrantType(format!(
                "unrecognized grant_type '{}'",
                grant_type_raw
            ))
        })?;

        match grant_type {
            GrantType::AuthorizationCode if !params.contains("code") => {
                return Err(ProtocolError::InvalidRequest(
                    "code is required for the authorization_code grant".to_string(),
                ));
            }
            GrantType::RefreshToken if !params.contains("refresh_token") => {
                return Err(ProtocolError::InvalidRequest(
                    "refresh_token is required for the refresh_token grant".to_string(),
                ));
            }
            _ => {}
        }

        Ok(AccessRequest {
            id: Uuid::new_v4().to_string(),
            requested_at: Utc::now(),
            client,
            session: Session::new(),
            grant_types: HashSet::from([grant_type]),
            code: params.get("code").map(str::to_string),
            refresh_token: params.get("refresh_token").map(str::to_string),
            redirect_uri: params.get("redirect_uri").map(str::to_string),
            requested_scopes: params.get("scope").map(parse_scope).unwrap_or_default(),
            form: params.clone(),
            grant_request_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::types::{ClientAuthMethod, ClientType, SigningAlgorithm};

    fn test_client() -> Client {
        let now = Utc::now();
        Client {
            client_id: "client-1".to_string(),
            client_secret: Some("secret".to_string()),
            client_name: None,
            client_type: ClientType::Confidential,
            redirect_uris: vec!["https://app.example.com/cb".to_string()],
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
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

    fn authorize_params() -> Params {
        Params::from_pairs([
            ("response_type", "code"),
            ("client_id", "client-1"),
            ("redirect_uri", "https://app.example.com/cb"),
            ("scope", "foo bar"),
            ("state", "12345678"),
        ])
    }

    #[test]
    fn factory_builds_complete_authorize_request() {
        let request = RequestFactory::authorize_request(&authorize_params(), test_client()).unwrap();
        assert!(request.response_types.contains(&ResponseType::Code));
        assert_eq!(request.redirect_uri, "https://app.example.com/cb");
        assert_eq!(request.state.as_deref(), Some("12345678"));
        assert_eq!(request.requested_scopes, vec!["foo", "bar"]);
        assert!(!request.is_resumption());
        assert!(!request.id.is_empty());
    }

    #[test]
    fn factory_rejects_missing_response_type() {
        let mut params = authorize_params();
        params.remove("response_type");
        let err = RequestFactory::authorize_request(&params, test_client()).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn factory_rejects_unknown_prompt() {
        let mut params = authorize_params();
        params.set("prompt", "login nonsense");
        let err = RequestFactory::authorize_request(&params, test_client()).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn sole_registered_redirect_uri_is_implied() {
        let mut params = authorize_params();
        params.remove("redirect_uri");
        let request = RequestFactory::authorize_request(&params, test_client()).unwrap();
        assert_eq!(request.redirect_uri, "https://app.example.com/cb");
    }

    #[test]
    fn handled_types_reach_terminal_state() {
        let mut params = authorize_params();
        params.set("response_type", "code id_token");
        params.set("nonce", "n-1");
        let mut request = RequestFactory::authorize_request(&params, test_client()).unwrap();

        assert!(!request.did_handle_all_response_types());
        request.mark_handled(ResponseType::Code);
        assert!(!request.did_handle_all_response_types());
        request.mark_handled(ResponseType::IdToken);
        assert!(request.did_handle_all_response_types());
    }

    #[test]
    fn revive_issues_new_identity_and_marks_resumption() {
        let request = RequestFactory::authorize_request(&authorize_params(), test_client()).unwrap();
        let original_id = request.id.clone();
        let original_time = request.requested_at;

        let revived = AuthorizeRequest::revive(request);
        assert_ne!(revived.id, original_id);
        assert!(revived.requested_at >= original_time);
        assert_eq!(revived.session.original_request_time, Some(original_time));
        assert!(revived.is_resumption());
    }

    #[test]
    fn merge_fills_gaps_and_unions_sets() {
        let mut params = authorize_params();
        params.remove("state");
        params.remove("scope");
        let mut request = RequestFactory::authorize_request(&params, test_client()).unwrap();

        let mut other_params = authorize_params();
        other_params.set("response_type", "code id_token");
        other_params.set("nonce", "n-1");
        let mut other = RequestFactory::authorize_request(&other_params, test_client()).unwrap();
        other.session.set_authenticated("alice", Utc::now());

        request.merge(&other);
        assert_eq!(request.state.as_deref(), Some("12345678"));
        assert_eq!(request.nonce.as_deref(), Some("n-1"));
        assert!(request.response_types.contains(&ResponseType::IdToken));
        assert_eq!(request.requested_scopes, vec!["foo", "bar"]);
        assert_eq!(request.session.subject.as_deref(), Some("alice"));
    }

    #[test]
    fn sanitize_strips_unsafe_parameters() {
        let mut params = authorize_params();
        params.set("request", "eyJhbGciOi...");
        params.set("id_token_hint", "eyJhbGciOi...");
        let request = RequestFactory::authorize_request(&params, test_client()).unwrap();

        let sanitized = request.sanitize();
        assert!(!sanitized.form.contains("request"));
        assert!(!sanitized.form.contains("id_token_hint"));
        assert!(sanitized.id_token_hint.is_none());
        assert_eq!(sanitized.form.get("state"), Some("12345678"));
    }

    #[test]
    fn response_mode_defaults_follow_the_flow() {
        let request = RequestFactory::authorize_request(&authorize_params(), test_client()).unwrap();
        assert_eq!(request.effective_response_mode(), ResponseMode::Query);

        let mut params = authorize_params();
        params.set("response_type", "code id_token");
        let request = RequestFactory::authorize_request(&params, test_client()).unwrap();
        assert_eq!(request.effective_response_mode(), ResponseMode::Fragment);
    }

    #[test]
    fn access_request_requires_grant_material() {
        let params = Params::from_pairs([("grant_type", "authorization_code")]);
        let err = RequestFactory::access_request(&params, test_client()).unwrap_err();
        assert_eq!(err.code(), "invalid_request");

        let params = Params::from_pairs([
            ("grant_type", "authorization_code"),
            ("code", "abc.def"),
            ("redirect_uri", "https://app.example.com/cb"),
        ]);
        let request = RequestFactory::access_request(&params, test_client()).unwrap();
        assert!(request.has_grant_type(GrantType::AuthorizationCode));
        assert_eq!(request.code.as_deref(), Some("abc.def"));
    }
}
