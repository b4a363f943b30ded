//! Refresh token grant: rotation with at-most-one-active-family semantics.

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::oidc::handlers::{AccessFlowHandler, issue_token_response};
use crate::oidc::request::AccessRequest;
use crate::oidc::response::AccessResponse;
use crate::oidc::token::{HmacTokenStrategy, JwtAccessTokenStrategy};
use crate::oidc::types::GrantType;
use crate::storage::traits::{AccessTokenStore, RefreshTokenStore};

pub struct RefreshFlowHandler {
    refresh_strategy: Arc<HmacTokenStrategy>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    access_strategy: Arc<JwtAccessTokenStrategy>,
    access_tokens: Arc<dyn AccessTokenStore>,
    refresh_lifespan: Duration,
}

impl RefreshFlowHandler {
    pub fn new(
        refresh_strategy: Arc<HmacTokenStrategy>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        access_strategy: Arc<JwtAccessTokenStrategy>,
        access_tokens: Arc<dyn AccessTokenStore>,
        refresh_lifespan: Duration,
    ) -> Self {
        Self {
            refresh_strategy,
            refresh_tokens,
            access_strategy,
            access_tokens,
            refresh_lifespan,
        }
    }
}

#[async_trait]
impl AccessFlowHandler for RefreshFlowHandler {
    async fn update_session(&self, request: &mut AccessRequest) -> Result<(), ProtocolError> {
        if !request.has_grant_type(GrantType::RefreshToken) {
            return Ok(());
        }

        let refresh_token = request.refresh_token.clone().ok_or_else(|| {
            ProtocolError::InvalidRequest("refresh_token is required".to_string())
        })?;
        let signature = self.refresh_strategy.verify(&refresh_token)?;

        // gating read: everything below depends on the stored grant
        let grant = self
            .refresh_tokens
            .get_refresh_token_session(&signature)
            .await
            .map_err(ProtocolError::from)?;

        if grant.client_id != request.client.client_id {
            return Err(ProtocolError::InvalidGrant(
                "refresh token was issued to another client".to_string(),
            ));
        }

        // narrowing is allowed, widening is not
        if !request.requested_scopes.is_empty() {
            let granted = &grant.session;
            if !request
                .requested_scopes
                .iter()
                .all(|scope| granted.has_granted_scope(scope))
            {
                return Err(ProtocolError::InvalidScope(
                    "requested scopes exceed the original grant".to_string(),
                ));
            }
        }

        // the session is inherited from the original grant
        request.session.merge(&grant.session);
        request.grant_request_id = Some(grant.request_id);
        Ok(())
    }

    async fn handle_access_request(
        &self,
        request: &mut AccessRequest,
        response: &mut AccessResponse,
    ) -> Result<(), ProtocolError> {
        if !request.has_grant_type(GrantType::RefreshToken) {
            return Ok(());
        }

        let family_id = request.grant_request_id.clone().ok_or_else(|| {
            ProtocolError::ServerError(
                "refresh handler issuing without a validated grant".to_string(),
            )
        })?;

        // retire the previous generation before issuing its replacement;
        // this also deletes the presented refresh token
        tokio::try_join!(
            self.access_tokens.revoke_access_tokens(&family_id),
            self.refresh_tokens.revoke_refresh_tokens(&family_id),
        )
        .map_err(|e| ProtocolError::ServerError(e.to_string()))?;

        issue_token_response(
            request,
            response,
            &self.access_strategy,
            self.access_tokens.as_ref(),
            &self.refresh_strategy,
            self.refresh_tokens.as_ref(),
            self.refresh_lifespan,
            true,
        )
        .await
    }
}
