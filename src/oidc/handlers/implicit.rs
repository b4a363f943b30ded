//! Implicit flow: access tokens issued directly from the authorize
//! endpoint.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::oidc::handlers::AuthorizeFlowHandler;
use crate::oidc::request::AuthorizeRequest;
use crate::oidc::response::AuthorizeResponse;
use crate::oidc::token::JwtAccessTokenStrategy;
use crate::oidc::types::ResponseType;
use crate::storage::traits::{AccessTokenStore, GrantSession};

pub struct ImplicitFlowHandler {
    access_strategy: Arc<JwtAccessTokenStrategy>,
    access_tokens: Arc<dyn AccessTokenStore>,
}

impl ImplicitFlowHandler {
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
impl AuthorizeFlowHandler for ImplicitFlowHandler {
    async fn handle(
        &self,
        request: &mut AuthorizeRequest,
        response: &mut AuthorizeResponse,
    ) -> Result<(), ProtocolError> {
        if !request.response_types.contains(&ResponseType::Token) {
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

        response.add_parameter("access_token", access_token.value);
        response.add_parameter("token_type", "bearer");
        response.add_parameter(
            "expires_in",
            self.access_strategy.lifespan().num_seconds().to_string(),
        );
        request.mark_handled(ResponseType::Token);
        tracing::debug!(request_id = %request.id, "issued implicit access token");
        Ok(())
    }
}
