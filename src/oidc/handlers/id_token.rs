//! ID token issuance, at the authorize endpoint (implicit and hybrid) and
//! on token-endpoint responses for `openid` grants.

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::oidc::fetch::left_most_hash;
use crate::oidc::handlers::{AccessFlowHandler, AuthorizeFlowHandler};
use crate::oidc::request::{AccessRequest, AuthorizeRequest};
use crate::oidc::response::{AccessResponse, AuthorizeResponse};
use crate::oidc::token::IdTokenStrategy;
use crate::oidc::types::{GrantType, ResponseType};

/// Issues ID tokens from the authorize endpoint.
///
/// Runs after the code and implicit handlers: whatever they placed in the
/// response is hashed into `c_hash` / `at_hash` before signing.
pub struct IdTokenFlowHandler {
    strategy: Arc<IdTokenStrategy>,
}

impl IdTokenFlowHandler {
    pub fn new(strategy: Arc<IdTokenStrategy>) -> Self {
        Self { strategy }
    }
}

#[async_trait]
impl AuthorizeFlowHandler for IdTokenFlowHandler {
    async fn handle(
        &self,
        request: &mut AuthorizeRequest,
        response: &mut AuthorizeResponse,
    ) -> Result<(), ProtocolError> {
        if !request.response_types.contains(&ResponseType::IdToken) {
            return Ok(());
        }

        if let Some(code) = response.code() {
            request.session.claims.c_hash = Some(left_most_hash(code));
        }
        if let Some(access_token) = response.access_token() {
            request.session.claims.at_hash = Some(left_most_hash(access_token));
        }

        let id_token = self.strategy.generate(request).await?;
        response.add_parameter("id_token", id_token.value);
        request.mark_handled(ResponseType::IdToken);
        tracing::debug!(request_id = %request.id, "issued ID token");
        Ok(())
    }
}

/// Adds an ID token to token-endpoint responses when the grant carries the
/// `openid` scope
///
/// Owns the authorization_code and refresh_token grants; runs after the
/// handler that issued the access token.
pub struct OidcTokenResponseHandler {
    strategy: Arc<IdTokenStrategy>,
}

impl OidcTokenResponseHandler {
    pub fn new(strategy: Arc<IdTokenStrategy>) -> Self {
        Self { strategy }
    }

    fn applies(request: &AccessRequest) -> bool {
        (request.has_grant_type(GrantType::AuthorizationCode)
            || request.has_grant_type(GrantType::RefreshToken))
            && request.session.has_granted_scope("openid")
    }
}

#[async_trait]
impl AccessFlowHandler for OidcTokenResponseHandler {
    async fn update_session(&self, _request: &mut AccessRequest) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn handle_access_request(
        &self,
        request: &mut AccessRequest,
        response: &mut AccessResponse,
    ) -> Result<(), ProtocolError> {
        if !Self::applies(request) {
            return Ok(());
        }
        let Some(access_token) = response.get_str("access_token") else {
            return Err(ProtocolError::ServerError(
                "ID token handler ran before any access token was issued".to_string(),
            ));
        };

        request.session.claims.at_hash = Some(left_most_hash(access_token));
        let id_token = self.strategy.generate(request).await?;
        response.set("id_token", id_token.value);
        Ok(())
    }
}
