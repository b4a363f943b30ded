//! Authentication provider: decides whether a request carries a trusted
//! login or must be suspended behind the external login step.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::oidc::keys::ServerKeySet;
use crate::oidc::provider::{
    InteractionKind, Negotiation, suspend_and_redirect, verify_round_trip_token,
};
use crate::oidc::request::AuthorizeRequest;
use crate::oidc::token::IdTokenStrategy;
use crate::oidc::types::{Params, Prompt, generate_random};
use crate::storage::traits::{AuthSession, AuthSessionStore, SuspendedRequestStore};

/// One way of establishing who the user is; handlers run in priority order
/// until one succeeds
#[async_trait]
pub trait AuthenticationHandler: Send + Sync {
    async fn authenticate(
        &self,
        params: &Params,
        request: &mut AuthorizeRequest,
    ) -> Result<bool, ProtocolError>;
}

/// Claims minted into the outbound login challenge token
#[derive(Debug, Serialize)]
struct LoginChallengeClaims {
    iss: String,
    aud: String,
    exp: i64,
    iat: i64,
    jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_age: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ui_locales: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    login_hint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    acr_values: Vec<String>,
}

/// Claims expected on the round-trip token the login step sends back
#[derive(Debug, Deserialize)]
struct LoginResponseClaims {
    sub: String,
    auth_time: i64,
    #[serde(default)]
    acr: Option<String>,
    #[serde(default)]
    amr: Option<Vec<String>>,
    /// Seconds to persist a remembered login; absent or zero means none
    #[serde(default)]
    remember_for: Option<i64>,
}

/// Trusted round-trip login token, highest priority
pub struct LoginTokenHandler {
    keys: Arc<ServerKeySet>,
    issuer: String,
    login_endpoint: String,
    auth_sessions: Arc<dyn AuthSessionStore>,
}

impl LoginTokenHandler {
    pub fn new(
        keys: Arc<ServerKeySet>,
        issuer: impl Into<String>,
        login_endpoint: impl Into<String>,
        auth_sessions: Arc<dyn AuthSessionStore>,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            login_endpoint: login_endpoint.into(),
            auth_sessions,
        }
    }
}

#[async_trait]
impl AuthenticationHandler for LoginTokenHandler {
    async fn authenticate(
        &self,
        params: &Params,
        request: &mut AuthorizeRequest,
    ) -> Result<bool, ProtocolError> {
        let Some(raw) = params.get("login_token") else {
            return Ok(false);
        };

        let claims: LoginResponseClaims =
            verify_round_trip_token(&self.keys, raw, &self.login_endpoint, &self.issuer)?;

        let auth_time = Utc
            .timestamp_opt(claims.auth_time, 0)
            .single()
            .ok_or_else(|| {
                ProtocolError::AccessDenied("login token carries an invalid auth_time".to_string())
            })?;

        request.session.set_authenticated(&claims.sub, auth_time);
        request.session.acr = claims.acr.clone();
        request.session.claims.amr = claims.amr.clone();

        // a remember duration upgrades the login to a stored session; the
        // sid claim carries the handle back to the user agent
        if let Some(remember_for) = claims.remember_for.filter(|seconds| *seconds > 0) {
            let session_id = generate_random(16);
            self.auth_sessions
                .create_auth_session(
                    &session_id,
                    &AuthSession {
                        subject: claims.sub.clone(),
                        auth_time,
                        acr: claims.acr.clone(),
                        expires_at: Utc::now() + Duration::seconds(remember_for),
                    },
                )
                .await
                .map_err(|e| ProtocolError::ServerError(e.to_string()))?;
            request
                .session
                .claims
                .extra
                .insert("sid".to_string(), session_id.into());
        }

        Ok(true)
    }
}

/// Remembered login session, middle priority
pub struct AuthSessionHandler {
    auth_sessions: Arc<dyn AuthSessionStore>,
}

impl AuthSessionHandler {
    pub fn new(auth_sessions: Arc<dyn AuthSessionStore>) -> Self {
        Self { auth_sessions }
    }
}

#[async_trait]
impl AuthenticationHandler for AuthSessionHandler {
    async fn authenticate(
        &self,
        params: &Params,
        request: &mut AuthorizeRequest,
    ) -> Result<bool, ProtocolError> {
        let Some(session_id) = params.get("session_id") else {
            return Ok(false);
        };
        let Some(session) = self
            .auth_sessions
            .find_auth_session(session_id)
            .await
            .map_err(|e| ProtocolError::ServerError(e.to_string()))?
        else {
            return Ok(false);
        };

        request
            .session
            .set_authenticated(&session.subject, session.auth_time);
        request.session.acr = session.acr.clone();
        request
            .session
            .claims
            .extra
            .insert("sid".to_string(), session_id.into());
        Ok(true)
    }
}

/// `id_token_hint` heuristic, lowest priority: a verified hint names the
/// user a client believes is logged in
pub struct IdTokenHintHandler {
    strategy: Arc<IdTokenStrategy>,
}

impl IdTokenHintHandler {
    pub fn new(strategy: Arc<IdTokenStrategy>) -> Self {
        Self { strategy }
    }
}

#[async_trait]
impl AuthenticationHandler for IdTokenHintHandler {
    async fn authenticate(
        &self,
        _params: &Params,
        request: &mut AuthorizeRequest,
    ) -> Result<bool, ProtocolError> {
        let Some(hint) = request.id_token_hint.clone() else {
            return Ok(false);
        };
        let Ok(claims) = self.strategy.verify_hint(&hint, &request.client) else {
            // a bad hint is ignored, not fatal; later handlers may still apply
            return Ok(false);
        };
        let Some(auth_time) = claims
            .auth_time
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
        else {
            return Ok(false);
        };

        request.session.set_authenticated(&claims.sub, auth_time);
        request.session.acr = claims.acr;
        Ok(true)
    }
}

/// The authentication state machine
pub struct AuthenticationProvider {
    handlers: Vec<Box<dyn AuthenticationHandler>>,
    suspended: Arc<dyn SuspendedRequestStore>,
    keys: Arc<ServerKeySet>,
    issuer: String,
    login_endpoint: String,
    challenge_lifespan: Duration,
    suspension_ttl: Duration,
}

impl AuthenticationProvider {
    pub fn new(
        handlers: Vec<Box<dyn AuthenticationHandler>>,
        suspended: Arc<dyn SuspendedRequestStore>,
        keys: Arc<ServerKeySet>,
        issuer: impl Into<String>,
        login_endpoint: impl Into<String>,
        challenge_lifespan: Duration,
        suspension_ttl: Duration,
    ) -> Self {
        Self {
            handlers,
            suspended,
            keys,
            issuer: issuer.into(),
            login_endpoint: login_endpoint.into(),
            challenge_lifespan,
            suspension_ttl,
        }
    }

    /// Run the handler chain, then evaluate the prompt contract
    pub async fn negotiate(
        &self,
        params: &Params,
        request: &mut AuthorizeRequest,
    ) -> Result<Negotiation, ProtocolError> {
        for handler in &self.handlers {
            if handler.authenticate(params, request).await? {
                break;
            }
        }

        let authenticated = request.session.is_authenticated() && !self.auth_is_stale(request);
        let resumption = request.is_resumption();

        if request.has_prompt(Prompt::None) {
            if !authenticated {
                return Err(ProtocolError::LoginRequired(
                    "prompt=none but no authentication is present".to_string(),
                ));
            }
            // authentication established after the request started cannot
            // satisfy prompt=none; the user was interacted with
            let threshold = self.original_request_time(request);
            if request.session.auth_time.map(|t| t > threshold).unwrap_or(false) {
                return Err(ProtocolError::AccessDenied(
                    "prompt=none cannot accept authentication fresher than the request"
                        .to_string(),
                ));
            }
            return Ok(Negotiation::Proceed);
        }

        if request.has_prompt(Prompt::Login) {
            if authenticated && !resumption {
                // the user explicitly asked to re-authenticate
                return self.redirect(request).await;
            }
            if !authenticated && resumption {
                // the flow already went to the login step and came back
                // with nothing; looping would never terminate
                return Err(ProtocolError::AccessDenied(
                    "resumed request still carries no authentication".to_string(),
                ));
            }
            if !authenticated {
                return self.redirect(request).await;
            }
            return Ok(Negotiation::Proceed);
        }

        if !authenticated {
            if resumption {
                return Err(ProtocolError::AccessDenied(
                    "resumed request still carries no authentication".to_string(),
                ));
            }
            return self.redirect(request).await;
        }
        Ok(Negotiation::Proceed)
    }

    /// An established login older than the requested max age does not count
    fn auth_is_stale(&self, request: &AuthorizeRequest) -> bool {
        let max_age = request.max_age.or(request.client.default_max_age);
        match (max_age, request.session.auth_time) {
            (Some(max_age), Some(auth_time)) => {
                auth_time + Duration::seconds(max_age) < Utc::now()
            }
            _ => false,
        }
    }

    fn original_request_time(&self, request: &AuthorizeRequest) -> DateTime<Utc> {
        request
            .session
            .original_request_time
            .unwrap_or(request.requested_at)
    }

    async fn redirect(&self, request: &AuthorizeRequest) -> Result<Negotiation, ProtocolError> {
        let now = Utc::now();
        let claims = LoginChallengeClaims {
            iss: self.issuer.clone(),
            aud: self.login_endpoint.clone(),
            exp: (now + self.challenge_lifespan).timestamp(),
            iat: now.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            max_age: request.max_age.or(request.client.default_max_age),
            display: request.display.map(|d| d.as_str().to_string()),
            ui_locales: request.ui_locales.clone(),
            login_hint: request.login_hint.clone(),
            acr_values: request.acr_values.clone(),
        };
        let signal = suspend_and_redirect(
            self.suspended.as_ref(),
            &self.keys,
            request,
            InteractionKind::Login,
            &self.login_endpoint,
            &claims,
            self.suspension_ttl,
        )
        .await?;
        tracing::debug!(request_id = %request.id, "suspending for login");
        Ok(Negotiation::Redirect(signal))
    }
}
