//! Consent provider: decides whether the request's scopes are authorized
//! or the flow must be suspended behind the external consent step.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::oidc::keys::ServerKeySet;
use crate::oidc::provider::{
    InteractionKind, Negotiation, suspend_and_redirect, verify_round_trip_token,
};
use crate::oidc::request::AuthorizeRequest;
use crate::oidc::types::{Params, Prompt, parse_scope};
use crate::storage::traits::SuspendedRequestStore;

/// One way of establishing authorization; handlers run in priority order
#[async_trait]
pub trait ConsentHandler: Send + Sync {
    async fn authorize(
        &self,
        params: &Params,
        request: &mut AuthorizeRequest,
    ) -> Result<bool, ProtocolError>;
}

/// Claims minted into the outbound consent challenge token
#[derive(Debug, Serialize)]
struct ConsentChallengeClaims {
    iss: String,
    aud: String,
    exp: i64,
    iat: i64,
    jti: String,
    /// Scopes awaiting the user's decision
    scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_name: Option<String>,
}

/// Claims expected on the round-trip token the consent step sends back
#[derive(Debug, Deserialize)]
struct ConsentResponseClaims {
    /// Space-separated scopes the user granted
    #[serde(default)]
    scope: Option<String>,
    /// Claims the consent step collected for token issuance
    #[serde(default)]
    claims: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Trusted round-trip consent token, highest priority
pub struct ConsentTokenHandler {
    keys: Arc<ServerKeySet>,
    issuer: String,
    consent_endpoint: String,
}

impl ConsentTokenHandler {
    pub fn new(
        keys: Arc<ServerKeySet>,
        issuer: impl Into<String>,
        consent_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            consent_endpoint: consent_endpoint.into(),
        }
    }
}

#[async_trait]
impl ConsentHandler for ConsentTokenHandler {
    async fn authorize(
        &self,
        params: &Params,
        request: &mut AuthorizeRequest,
    ) -> Result<bool, ProtocolError> {
        let Some(raw) = params.get("consent_token") else {
            return Ok(false);
        };

        let claims: ConsentResponseClaims =
            verify_round_trip_token(&self.keys, raw, &self.consent_endpoint, &self.issuer)?;

        // the user can only grant what was requested; anything else in the
        // token is dropped silently
        let granted = claims.scope.as_deref().map(parse_scope).unwrap_or_default();
        for scope in granted {
            if request.requested_scopes.contains(&scope) {
                request.session.grant_scope(scope);
            }
        }
        if let Some(collected) = claims.claims {
            for (name, value) in collected {
                request.session.claims.extra.entry(name).or_insert(value);
            }
        }

        Ok(!request.session.granted_scopes().is_empty())
    }
}

/// Requests without scopes need no consent; a session that already carries
/// grants (restored by resumption or a remembered session) is authorized
pub struct ImpliedConsentHandler;

#[async_trait]
impl ConsentHandler for ImpliedConsentHandler {
    async fn authorize(
        &self,
        _params: &Params,
        request: &mut AuthorizeRequest,
    ) -> Result<bool, ProtocolError> {
        Ok(request.requested_scopes.is_empty()
            || !request.session.granted_scopes().is_empty())
    }
}

/// The consent state machine; mirrors the authentication provider
pub struct ConsentProvider {
    handlers: Vec<Box<dyn ConsentHandler>>,
    suspended: Arc<dyn SuspendedRequestStore>,
    keys: Arc<ServerKeySet>,
    issuer: String,
    consent_endpoint: String,
    challenge_lifespan: Duration,
    suspension_ttl: Duration,
}

impl ConsentProvider {
    pub fn new(
        handlers: Vec<Box<dyn ConsentHandler>>,
        suspended: Arc<dyn SuspendedRequestStore>,
        keys: Arc<ServerKeySet>,
        issuer: impl Into<String>,
        consent_endpoint: impl Into<String>,
        challenge_lifespan: Duration,
        suspension_ttl: Duration,
    ) -> Self {
        Self {
            handlers,
            suspended,
            keys,
            issuer: issuer.into(),
            consent_endpoint: consent_endpoint.into(),
            challenge_lifespan,
            suspension_ttl,
        }
    }

    pub async fn negotiate(
        &self,
        params: &Params,
        request: &mut AuthorizeRequest,
    ) -> Result<Negotiation, ProtocolError> {
        // consent presupposes authentication; reaching this point without a
        // subject is a sequencing bug in the caller
        if !request.session.is_authenticated() {
            return Err(ProtocolError::ServerError(
                "consent negotiation reached without authentication".to_string(),
            ));
        }

        let mut authorized = false;
        for handler in &self.handlers {
            if handler.authorize(params, request).await? {
                authorized = true;
                break;
            }
        }
        // a resumption is only a consent re-entry when it carries the
        // consent round-trip token; a login resumption that has not been to
        // the consent step yet must still be redirected there
        let consent_reentry = params.contains("consent_token");

        if request.has_prompt(Prompt::None) {
            if !authorized {
                return Err(ProtocolError::InteractionRequired(
                    "prompt=none but the requested scopes are not authorized".to_string(),
                ));
            }
            return Ok(Negotiation::Proceed);
        }

        if request.has_prompt(Prompt::Consent) && authorized && !consent_reentry {
            // the user explicitly asked to re-consent
            return self.redirect(request).await;
        }

        if !authorized {
            if consent_reentry {
                // the flow already went to the consent step and came back
                // with nothing; looping would never terminate
                return Err(ProtocolError::AccessDenied(
                    "resumed request still carries no authorization".to_string(),
                ));
            }
            return self.redirect(request).await;
        }
        Ok(Negotiation::Proceed)
    }

    async fn redirect(&self, request: &AuthorizeRequest) -> Result<Negotiation, ProtocolError> {
        let now = Utc::now();
        let claims = ConsentChallengeClaims {
            iss: self.issuer.clone(),
            aud: self.consent_endpoint.clone(),
            exp: (now + self.challenge_lifespan).timestamp(),
            iat: now.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            scope: request.requested_scopes.join(" "),
            claims: request.claims_request.clone(),
            client_name: request.client.client_name.clone(),
        };
        let signal = suspend_and_redirect(
            self.suspended.as_ref(),
            &self.keys,
            request,
            InteractionKind::Consent,
            &self.consent_endpoint,
            &claims,
            self.suspension_ttl,
        )
        .await?;
        tracing::debug!(request_id = %request.id, "suspending for consent");
        Ok(Negotiation::Redirect(signal))
    }
}
