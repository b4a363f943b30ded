//! Authorization code flow: code issuance at the authorize endpoint and
//! code exchange at the token endpoint.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::oidc::handlers::{AccessFlowHandler, AuthorizeFlowHandler, issue_token_response};
use crate::oidc::request::{AccessRequest, AuthorizeRequest};
use crate::oidc::response::{AccessResponse, AuthorizeResponse};
use crate::oidc::token::{HmacTokenStrategy, JwtAccessTokenStrategy};
use crate::oidc::types::{GrantType, ResponseType};
use crate::storage::traits::{
    AccessTokenStore, AuthorizeCodeStore, GrantSession, RefreshTokenStore,
};

/// Issues authorization codes for `response_type=code`
pub struct AuthorizeCodeFlowHandler {
    strategy: Arc<HmacTokenStrategy>,
    codes: Arc<dyn AuthorizeCodeStore>,
    lifespan: Duration,
}

impl AuthorizeCodeFlowHandler {
    pub fn new(
        strategy: Arc<HmacTokenStrategy>,
        codes: Arc<dyn AuthorizeCodeStore>,
        lifespan: Duration,
    ) -> Self {
        Self {
            strategy,
            codes,
            lifespan,
        }
    }
}

#[async_trait]
impl AuthorizeFlowHandler for AuthorizeCodeFlowHandler {
    async fn handle(
        &self,
        request: &mut AuthorizeRequest,
        response: &mut AuthorizeResponse,
    ) -> Result<(), ProtocolError> {
        if !request.response_types.contains(&ResponseType::Code) {
            return Ok(());
        }

        let (code, signature) = self.strategy.generate();
        let grant = GrantSession {
            request_id: request.id.clone(),
            client_id: request.client.client_id.clone(),
            requested_at: request.requested_at,
            requested_scopes: request.requested_scopes.clone(),
            redirect_uri: Some(request.redirect_uri.clone()),
            session: request.session.clone(),
            expires_at: Utc::now() + self.lifespan,
        };
        self.codes
            .create_authorize_code_session(&signature, &grant)
            .await
            .map_err(|e| ProtocolError::ServerError(e.to_string()))?;

        response.add_parameter("code", code);
        request.mark_handled(ResponseType::Code);
        tracing::debug!(request_id = %request.id, "issued authorization code");
        Ok(())
    }
}

/// Exchanges authorization codes for tokens at the token endpoint
pub struct AuthorizeCodeGrantHandler {
    code_strategy: Arc<HmacTokenStrategy>,
    codes: Arc<dyn AuthorizeCodeStore>,
    access_strategy: Arc<JwtAccessTokenStrategy>,
    access_tokens: Arc<dyn AccessTokenStore>,
    refresh_strategy: Arc<HmacTokenStrategy>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    refresh_lifespan: Duration,
}

impl AuthorizeCodeGrantHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        code_strategy: Arc<HmacTokenStrategy>,
        codes: Arc<dyn AuthorizeCodeStore>,
        access_strategy: Arc<JwtAccessTokenStrategy>,
        access_tokens: Arc<dyn AccessTokenStore>,
        refresh_strategy: Arc<HmacTokenStrategy>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        refresh_lifespan: Duration,
    ) -> Self {
        Self {
            code_strategy,
            codes,
            access_strategy,
            access_tokens,
            refresh_strategy,
            refresh_tokens,
            refresh_lifespan,
        }
    }
}

#[async_trait]
impl AccessFlowHandler for AuthorizeCodeGrantHandler {
    async fn update_session(&self, request: &mut AccessRequest) -> Result<(), ProtocolError> {
        if !request.has_grant_type(GrantType::AuthorizationCode) {
            return Ok(());
        }

        let code = request.code.clone().ok_or_else(|| {
            ProtocolError::InvalidRequest("code is required".to_string())
        })?;
        let signature = self.code_strategy.verify(&code)?;

        let grant = self
            .codes
            .get_authorize_code_session(&signature)
            .await
            .map_err(ProtocolError::from)?;

        if grant.client_id != request.client.client_id {
            return Err(ProtocolError::InvalidGrant(
                "authorization code was issued to another client".to_string(),
            ));
        }
        if grant.redirect_uri.as_deref() != request.redirect_uri.as_deref() {
            return Err(ProtocolError::InvalidGrant(
                "redirect_uri does not match the authorization request".to_string(),
            ));
        }

        // single use: a second presentation must read as inactive
        self.codes
            .invalidate_authorize_code_session(&signature)
            .await
            .map_err(|e| ProtocolError::ServerError(e.to_string()))?;

        request.session.merge(&grant.session);
        request.grant_request_id = Some(grant.request_id);
        Ok(())
    }

    async fn handle_access_request(
        &self,
        request: &mut AccessRequest,
        response: &mut AccessResponse,
    ) -> Result<(), ProtocolError> {
        if !request.has_grant_type(GrantType::AuthorizationCode) {
            return Ok(());
        }

        let include_refresh = request.session.has_granted_scope("offline_access");
        issue_token_response(
            request,
            response,
            &self.access_strategy,
            self.access_tokens.as_ref(),
            &self.refresh_strategy,
            self.refresh_tokens.as_ref(),
            self.refresh_lifespan,
            include_refresh,
        )
        .await
    }
}
