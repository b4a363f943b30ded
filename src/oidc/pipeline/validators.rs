//! Validators: independent, ordered, fail-fast checks over a produced
//! request.

use crate::errors::ProtocolError;
use crate::oidc::request::{AccessRequest, AuthorizeRequest};
use crate::oidc::types::{Prompt, ResponseType};

/// Minimum length for the `state` parameter when one is supplied
const MIN_STATE_ENTROPY: usize = 8;

pub trait AuthorizeRequestValidator: Send + Sync {
    fn validate(&self, request: &AuthorizeRequest) -> Result<(), ProtocolError>;
}

/// Redirect URI must be registered, bound by exact match
pub struct RedirectUriValidator;

impl AuthorizeRequestValidator for RedirectUriValidator {
    fn validate(&self, request: &AuthorizeRequest) -> Result<(), ProtocolError> {
        if request.client.redirect_uri_registered(&request.redirect_uri) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidRequest(format!(
                "redirect_uri {} is not registered",
                request.redirect_uri
            )))
        }
    }
}

/// Requested response types must all be registered for the client, and the
/// code flow additionally requires the authorization_code grant
pub struct ResponseTypeAllowedValidator;

impl AuthorizeRequestValidator for ResponseTypeAllowedValidator {
    fn validate(&self, request: &AuthorizeRequest) -> Result<(), ProtocolError> {
        if !request.client.allows_response_types(&request.response_types) {
            return Err(ProtocolError::UnsupportedResponseType(format!(
                "client {} may not request {:?}",
                request.client.client_id, request.response_types
            )));
        }
        if request.response_types.contains(&ResponseType::Code)
            && !request
                .client
                .allows_grant_type(crate::oidc::types::GrantType::AuthorizationCode)
        {
            return Err(ProtocolError::UnauthorizedClient(format!(
                "client {} requests a code without the authorization_code grant",
                request.client.client_id
            )));
        }
        Ok(())
    }
}

/// Requested scopes must be a subset of the client's registered scopes
pub struct ScopeValidator;

impl AuthorizeRequestValidator for ScopeValidator {
    fn validate(&self, request: &AuthorizeRequest) -> Result<(), ProtocolError> {
        if request.client.allows_scopes(&request.requested_scopes) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidScope(format!(
                "requested scopes exceed the client's registration: {}",
                request.requested_scopes.join(" ")
            )))
        }
    }
}

/// A supplied state parameter must carry minimum entropy
pub struct StateEntropyValidator;

impl AuthorizeRequestValidator for StateEntropyValidator {
    fn validate(&self, request: &AuthorizeRequest) -> Result<(), ProtocolError> {
        match &request.state {
            Some(state) if state.len() < MIN_STATE_ENTROPY => Err(ProtocolError::InvalidRequest(
                format!("state must be at least {} characters", MIN_STATE_ENTROPY),
            )),
            _ => Ok(()),
        }
    }
}

/// `prompt=none` tolerates no companions
pub struct PromptValidator;

impl AuthorizeRequestValidator for PromptValidator {
    fn validate(&self, request: &AuthorizeRequest) -> Result<(), ProtocolError> {
        if request.has_prompt(Prompt::None) && request.prompts.len() > 1 {
            return Err(ProtocolError::InvalidRequest(
                "prompt=none may not be combined with other prompts".to_string(),
            ));
        }
        Ok(())
    }
}

/// OIDC flows that issue tokens from the authorize endpoint require a nonce
pub struct NonceRequiredValidator;

impl AuthorizeRequestValidator for NonceRequiredValidator {
    fn validate(&self, request: &AuthorizeRequest) -> Result<(), ProtocolError> {
        if request.is_oidc_implicit_or_hybrid() && request.nonce.is_none() {
            return Err(ProtocolError::InvalidRequest(
                "nonce is required for implicit and hybrid flows".to_string(),
            ));
        }
        Ok(())
    }
}

/// The default validator chain in its contractual order
pub fn default_validators() -> Vec<Box<dyn AuthorizeRequestValidator>> {
    vec![
        Box::new(RedirectUriValidator),
        Box::new(ResponseTypeAllowedValidator),
        Box::new(ScopeValidator),
        Box::new(StateEntropyValidator),
        Box::new(PromptValidator),
        Box::new(NonceRequiredValidator),
    ]
}

/// Token-endpoint request checks, applied after production
pub fn validate_access_request(request: &AccessRequest) -> Result<(), ProtocolError> {
    for grant_type in &request.grant_types {
        if !request.client.allows_grant_type(*grant_type) {
            return Err(ProtocolError::UnauthorizedClient(format!(
                "client {} is not registered for {}",
                request.client.client_id,
                grant_type.as_str()
            )));
        }
    }
    if !request.client.allows_scopes(&request.requested_scopes) {
        return Err(ProtocolError::InvalidScope(format!(
            "requested scopes exceed the client's registration: {}",
            request.requested_scopes.join(" ")
        )));
    }
    Ok(())
}
