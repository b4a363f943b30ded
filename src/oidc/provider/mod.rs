//! Authentication and consent negotiation.
//!
//! Both providers are state machines that either let the flow proceed or
//! suspend it behind an external interaction step. The suspension is a
//! designed control-flow exit, expressed as a tagged result; it is not an
//! error and is never logged as a failure.

pub mod authn;
pub mod consent;

pub use authn::{
    AuthSessionHandler, AuthenticationHandler, AuthenticationProvider, IdTokenHintHandler,
    LoginTokenHandler,
};
pub use consent::{ConsentHandler, ConsentProvider, ConsentTokenHandler, ImpliedConsentHandler};

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, Header, Validation, decode, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::oidc::keys::ServerKeySet;
use crate::oidc::request::AuthorizeRequest;
use crate::oidc::types::{SigningAlgorithm, generate_random};
use crate::storage::traits::SuspendedRequestStore;

/// Which external interaction a redirect signal points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Login,
    Consent,
}

impl InteractionKind {
    /// Query parameter carrying the round-trip token
    pub fn token_param(&self) -> &'static str {
        match self {
            Self::Login => "login_token",
            Self::Consent => "consent_token",
        }
    }
}

/// The redirect raised when a flow suspends for login or consent
#[derive(Debug, Clone)]
pub struct RedirectSignal {
    pub kind: InteractionKind,
    pub endpoint: String,
    pub token: String,
    pub request_id: String,
    pub nonce: String,
}

impl RedirectSignal {
    /// Render the full interaction location
    pub fn location(&self) -> Result<String, ProtocolError> {
        let mut url = url::Url::parse(&self.endpoint).map_err(|e| {
            ProtocolError::ServerError(format!("interaction endpoint failed to parse: {}", e))
        })?;
        url.query_pairs_mut()
            .append_pair(self.kind.token_param(), &self.token)
            .append_pair("resume_id", &self.request_id)
            .append_pair("resume_nonce", &self.nonce);
        Ok(url.to_string())
    }
}

/// Outcome of a provider negotiation
#[derive(Debug, Clone)]
pub enum Negotiation {
    Proceed,
    Redirect(RedirectSignal),
}

/// Suspend the request and build the redirect signal.
///
/// A fresh nonce keys the suspension together with the request id; the
/// sanitized request is persisted with a TTL so the follow-up request can
/// revive it from any process instance.
pub(crate) async fn suspend_and_redirect<C: Serialize>(
    suspended: &dyn SuspendedRequestStore,
    keys: &ServerKeySet,
    request: &AuthorizeRequest,
    kind: InteractionKind,
    endpoint: &str,
    claims: &C,
    suspension_ttl: Duration,
) -> Result<RedirectSignal, ProtocolError> {
    let nonce = generate_random(16);
    suspended
        .create_suspended_request(
            &request.id,
            &nonce,
            &request.sanitize(),
            Utc::now() + suspension_ttl,
        )
        .await
        .map_err(|e| ProtocolError::ServerError(e.to_string()))?;

    let token = mint_round_trip_token(keys, claims)?;
    Ok(RedirectSignal {
        kind,
        endpoint: endpoint.to_string(),
        token,
        request_id: request.id.clone(),
        nonce,
    })
}

/// Sign a round-trip token with the server's RS256 key.
///
/// Public so interaction services sharing the key set (and tests driving
/// resumption) can mint login and consent response tokens.
pub fn mint_round_trip_token<C: Serialize>(
    keys: &ServerKeySet,
    claims: &C,
) -> Result<String, ProtocolError> {
    let key = keys.signing_key(SigningAlgorithm::RS256)?;
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(key.kid.clone());
    encode(&header, claims, key.encoding_key())
        .map_err(|e| ProtocolError::ServerError(format!("round-trip token signing: {}", e)))
}

/// Verify a round-trip token: issuer is the interaction endpoint it came
/// back from, audience is this server
pub(crate) fn verify_round_trip_token<C: DeserializeOwned>(
    keys: &Arc<ServerKeySet>,
    raw: &str,
    expected_issuer: &str,
    audience: &str,
) -> Result<C, ProtocolError> {
    let key = keys.signing_key(SigningAlgorithm::RS256)?;
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[expected_issuer]);
    validation.set_audience(&[audience]);

    let data = decode::<C>(raw, key.decoding_key(), &validation).map_err(|e| {
        ProtocolError::AccessDenied(format!("round-trip token rejected: {}", e))
    })?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_signal_location_carries_resumption_keys() {
        let signal = RedirectSignal {
            kind: InteractionKind::Login,
            endpoint: "https://login.example.com/".to_string(),
            token: "tok".to_string(),
            request_id: "req-1".to_string(),
            nonce: "n-1".to_string(),
        };
        let location = signal.location().unwrap();
        assert!(location.starts_with("https://login.example.com/?"));
        assert!(location.contains("login_token=tok"));
        assert!(location.contains("resume_id=req-1"));
        assert!(location.contains("resume_nonce=n-1"));
    }

    #[test]
    fn round_trip_token_verification_checks_audience() {
        let keys = Arc::new(ServerKeySet::generate().unwrap());
        let claims = serde_json::json!({
            "iss": "https://login.example.com",
            "aud": "https://issuer.example.com",
            "sub": "alice",
            "exp": (Utc::now() + Duration::minutes(5)).timestamp(),
        });
        let token = mint_round_trip_token(&keys, &claims).unwrap();

        let decoded: serde_json::Value = verify_round_trip_token(
            &keys,
            &token,
            "https://login.example.com",
            "https://issuer.example.com",
        )
        .unwrap();
        assert_eq!(decoded["sub"], "alice");

        let err = verify_round_trip_token::<serde_json::Value>(
            &keys,
            &token,
            "https://login.example.com",
            "https://someone-else.example.com",
        )
        .unwrap_err();
        assert_eq!(err.code(), "access_denied");
    }
}
