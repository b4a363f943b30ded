//! Producers: raw parameters to typed requests.

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::oidc::request::{AuthorizeRequest, RequestFactory};
use crate::oidc::request_object::{RequestObjectClaims, RequestObjectResolver};
use crate::oidc::types::Params;
use crate::storage::traits::{ClientStore, SuspendedRequestStore};

/// Resumption identifier parameter names carried on the follow-up request
pub const RESUME_ID_PARAM: &str = "resume_id";
pub const RESUME_NONCE_PARAM: &str = "resume_nonce";

/// Request-object parameters the overlay uses only when the top-level
/// parameter is absent
const OVERLAY_IF_ABSENT: &[&str] = &[
    "redirect_uri",
    "state",
    "nonce",
    "display",
    "max_age",
    "id_token_hint",
    "login_hint",
    "ui_locales",
    "claims",
];

/// Request-object parameters that replace the top-level value when present
const OVERLAY_REPLACE: &[&str] = &["response_type", "scope", "prompt", "acr_values"];

/// Outcome of one producer step
#[derive(Debug)]
pub enum Produced {
    /// Chain is done; downstream producers are bypassed
    Final(AuthorizeRequest),
    /// Chain continues with this state
    Continue(Option<AuthorizeRequest>),
}

#[async_trait]
pub trait AuthorizeRequestProducer: Send + Sync {
    async fn produce(
        &self,
        params: &Params,
        current: Option<AuthorizeRequest>,
    ) -> Result<Produced, ProtocolError>;
}

/// Revives a suspended request when the parameters carry a resumption
/// identifier; bypasses every downstream producer
pub struct ResumeProducer {
    suspended: Arc<dyn SuspendedRequestStore>,
}

impl ResumeProducer {
    pub fn new(suspended: Arc<dyn SuspendedRequestStore>) -> Self {
        Self { suspended }
    }
}

#[async_trait]
impl AuthorizeRequestProducer for ResumeProducer {
    async fn produce(
        &self,
        params: &Params,
        current: Option<AuthorizeRequest>,
    ) -> Result<Produced, ProtocolError> {
        let (Some(resume_id), Some(nonce)) =
            (params.get(RESUME_ID_PARAM), params.get(RESUME_NONCE_PARAM))
        else {
            return Ok(Produced::Continue(current));
        };

        let stored = self
            .suspended
            .find_suspended_request(resume_id, nonce)
            .await
            .map_err(|e| ProtocolError::ServerError(e.to_string()))?
            .ok_or_else(|| {
                ProtocolError::InvalidRequest(
                    "unknown or expired resumption identifier".to_string(),
                )
            })?;

        // one-shot: a resumption identifier cannot be replayed
        self.suspended
            .evict_suspended_request(resume_id, nonce)
            .await
            .map_err(|e| ProtocolError::ServerError(e.to_string()))?;

        tracing::debug!(resume_id = %resume_id, "revived suspended authorize request");
        Ok(Produced::Final(AuthorizeRequest::revive(stored)))
    }
}

/// Builds the typed request from raw parameters, resolving the client
pub struct BaseProducer {
    clients: Arc<dyn ClientStore>,
}

impl BaseProducer {
    pub fn new(clients: Arc<dyn ClientStore>) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl AuthorizeRequestProducer for BaseProducer {
    async fn produce(
        &self,
        params: &Params,
        _current: Option<AuthorizeRequest>,
    ) -> Result<Produced, ProtocolError> {
        let client_id = params
            .get("client_id")
            .ok_or_else(|| ProtocolError::InvalidRequest("client_id is required".to_string()))?;

        let client = self
            .clients
            .get_client(client_id)
            .await
            .map_err(|e| ProtocolError::ServerError(e.to_string()))?
            .ok_or_else(|| {
                ProtocolError::InvalidClient(format!("unknown client {}", client_id))
            })?;

        let request = RequestFactory::authorize_request(params, client)?;
        Ok(Produced::Continue(Some(request)))
    }
}

/// Expands `request` / `request_uri` parameters and overlays the resolved
/// claims onto the built request
///
/// Merge policy: simple-valued parameters from the object fill gaps only;
/// composite parameters (`response_type`, `scope`, `prompt`, `acr_values`)
/// replace the top-level value outright.
pub struct RequestObjectProducer {
    resolver: Arc<RequestObjectResolver>,
}

impl RequestObjectProducer {
    pub fn new(resolver: Arc<RequestObjectResolver>) -> Self {
        Self { resolver }
    }

    fn overlay(params: &Params, claims: &RequestObjectClaims) -> Params {
        let mut merged = params.clone();
        merged.remove("request");
        merged.remove("request_uri");

        for key in OVERLAY_IF_ABSENT {
            if !merged.contains(key) {
                if let Some(value) = claim_as_string(claims, key) {
                    merged.set(*key, value);
                }
            }
        }
        for key in OVERLAY_REPLACE {
            if let Some(value) = claim_as_string(claims, key) {
                merged.set(*key, value);
            }
        }
        merged
    }
}

#[async_trait]
impl AuthorizeRequestProducer for RequestObjectProducer {
    async fn produce(
        &self,
        params: &Params,
        current: Option<AuthorizeRequest>,
    ) -> Result<Produced, ProtocolError> {
        let Some(request) = current else {
            return Err(ProtocolError::ServerError(
                "request object producer ran before the base producer".to_string(),
            ));
        };

        let Some(claims) = self.resolver.resolve(&request.client, params).await? else {
            return Ok(Produced::Continue(Some(request)));
        };

        let merged = Self::overlay(params, &claims);
        let rebuilt = RequestFactory::authorize_request(&merged, request.client)?;
        Ok(Produced::Continue(Some(rebuilt)))
    }
}

fn claim_as_string(claims: &RequestObjectClaims, key: &str) -> Option<String> {
    match claims.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        value @ serde_json::Value::Object(_) => Some(value.to_string()),
        _ => None,
    }
}
