//! Client credentials grant.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::oidc::handlers::AccessFlowHandler;
use crate::oidc::request::AccessRequest;
use crate::oidc::response::AccessResponse;
use crate::oidc::token::JwtAccessTokenStrategy;
use crate::oidc::types::{ClientType, GrantType, join_scopes, parse_scope};
use crate::storage::traits::{AccessTokenStore, GrantSession};

pub struct ClientCredentialsFlowHandler {
    access_strategy: Arc<JwtAccessTokenStrategy>,
    access_tokens: Arc<dyn AccessTokenStore>,
}

impl ClientCredentialsFlowHandler {
    pub fn new(
        access_strategy: Arc<JwtAccessTokenStrategy>,
        access_tokens: Arc<dyn AccessTokenStore>,
    ) -> Self {
        Self {
            access_strategy,
            access_tokens,
        }
    }
}

#[async_trait]
impl AccessFlowHandler for ClientCredentialsFlowHandler {
    async fn update_session(&self, request: &mut AccessRequest) -> Result<(), ProtocolError> {
        if !request.has_grant_type(GrantType::ClientCredentials) {
            return Ok(());
        }

        // a public client has nothing to authenticate with
        if request.client.client_type == ClientType::Public {
            return Err(ProtocolError::UnauthorizedClient(
                "public clients may not use the client_credentials grant".to_string(),
            ));
        }

        // granted scopes: the requested set, or everything registered
        let scopes = if request.requested_scopes.is_empty() {
            request
                .client
                .scope
                .as_deref()
                .map(parse_scope)
                .unwrap_or_default()
        } else {
            request.requested_scopes.clone()
        };
        for scope in scopes {
            request.session.grant_scope(scope);
        }
        Ok(())
    }

    async fn handle_access_request(
        &self,
        request: &mut AccessRequest,
        response: &mut AccessResponse,
    ) -> Result<(), ProtocolError> {
        if !request.has_grant_type(GrantType::ClientCredentials) {
            return Ok(());
        }

        let (access_token, identifier) = self.access_strategy.generate(request)?;
        let grant = GrantSession {
            request_id: request.id.clone(),
            client_id: request.client.client_id.clone(),
            requested_at: request.requested_at,
            requested_scopes: request.requested_scopes.clone(),
            redirect_uri: None,
            session: request.session.clone(),
            expires_at: Utc::now() + self.access_strategy.lifespan(),
        };
        self.access_tokens
            .create_access_token_session(&identifier, &grant)
            .await
            .map_err(|e| ProtocolError::ServerError(e.to_string()))?;

        response.set("access_token", access_token.value);
        response.set("token_type", "bearer");
        response.set("expires_in", self.access_strategy.lifespan().num_seconds());
        response.set("scope", join_scopes(request.session.granted_scopes()));
        Ok(())
    }
}
