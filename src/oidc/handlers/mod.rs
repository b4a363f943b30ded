//! Grant and response-type flow handlers.
//!
//! Each handler owns one or more response types (authorize endpoint) or
//! grant types (token endpoint) and returns immediately when the request's
//! declared set does not contain its types; that guard is always the first
//! action, so a handler invoked off its flow leaves the response untouched.
//!
//! Authorize handlers run in a fixed, correctness-relevant order: the code
//! handler, then the implicit handler, then the ID-token handler, which
//! hashes whatever codes and tokens the earlier handlers placed in the
//! response. Access handlers follow a two-phase contract: every handler's
//! `update_session` runs before any handler issues tokens.

pub mod authorize_code;
pub mod client_credentials;
pub mod id_token;
pub mod implicit;
pub mod refresh;

pub use authorize_code::{AuthorizeCodeFlowHandler, AuthorizeCodeGrantHandler};
pub use client_credentials::ClientCredentialsFlowHandler;
pub use id_token::{IdTokenFlowHandler, OidcTokenResponseHandler};
pub use implicit::ImplicitFlowHandler;
pub use refresh::RefreshFlowHandler;

use async_trait::async_trait;

use crate::errors::ProtocolError;
use crate::oidc::request::{AccessRequest, AuthorizeRequest};
use crate::oidc::response::{AccessResponse, AuthorizeResponse};

#[async_trait]
pub trait AuthorizeFlowHandler: Send + Sync {
    async fn handle(
        &self,
        request: &mut AuthorizeRequest,
        response: &mut AuthorizeResponse,
    ) -> Result<(), ProtocolError>;
}

#[async_trait]
pub trait AccessFlowHandler: Send + Sync {
    /// Validate the presented grant against its repository, bind it to the
    /// session, and invalidate single-use grants
    async fn update_session(&self, request: &mut AccessRequest) -> Result<(), ProtocolError>;

    /// Issue new tokens into the response
    async fn handle_access_request(
        &self,
        request: &mut AccessRequest,
        response: &mut AccessResponse,
    ) -> Result<(), ProtocolError>;
}

/// Run the authorize handler chain and enforce the terminal condition
///
/// A requested response type no handler claims is a configuration
/// inconsistency, reported as a server error rather than a client fault.
pub async fn run_authorize_handlers(
    handlers: &[Box<dyn AuthorizeFlowHandler>],
    request: &mut AuthorizeRequest,
    response: &mut AuthorizeResponse,
) -> Result<(), ProtocolError> {
    for handler in handlers {
        handler.handle(request, response).await?;
    }
    if !request.did_handle_all_response_types() {
        return Err(ProtocolError::ServerError(format!(
            "no handler claimed every requested response type: {:?}",
            request.response_types
        )));
    }
    Ok(())
}

/// Issue an access token (and optionally a rotated refresh token) into a
/// token-endpoint response
///
/// The two grant-session writes are independent of each other, so they are
/// issued concurrently and joined before returning.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn issue_token_response(
    request: &mut AccessRequest,
    response: &mut AccessResponse,
    access_strategy: &crate::oidc::token::JwtAccessTokenStrategy,
    access_tokens: &dyn crate::storage::traits::AccessTokenStore,
    refresh_strategy: &crate::oidc::token::HmacTokenStrategy,
    refresh_tokens: &dyn crate::storage::traits::RefreshTokenStore,
    refresh_lifespan: chrono::Duration,
    include_refresh: bool,
) -> Result<(), ProtocolError> {
    use crate::storage::traits::GrantSession;
    use chrono::Utc;

    let family_id = request
        .grant_request_id
        .clone()
        .unwrap_or_else(|| request.id.clone());

    let (access_token, access_identifier) = access_strategy.generate(request)?;
    let access_grant = GrantSession {
        request_id: family_id.clone(),
        client_id: request.client.client_id.clone(),
        requested_at: request.requested_at,
        requested_scopes: request.requested_scopes.clone(),
        redirect_uri: None,
        session: request.session.clone(),
        expires_at: Utc::now() + access_strategy.lifespan(),
    };

    let refresh = if include_refresh {
        let (token, signature) = refresh_strategy.generate();
        let grant = GrantSession {
            expires_at: Utc::now() + refresh_lifespan,
            ..access_grant.clone()
        };
        Some((token, signature, grant))
    } else {
        None
    };

    match &refresh {
        Some((_, signature, refresh_grant)) => {
            tokio::try_join!(
                access_tokens.create_access_token_session(&access_identifier, &access_grant),
                refresh_tokens.create_refresh_token_session(signature, refresh_grant),
            )
            .map_err(|e| ProtocolError::ServerError(e.to_string()))?;
        }
        None => {
            access_tokens
                .create_access_token_session(&access_identifier, &access_grant)
                .await
                .map_err(|e| ProtocolError::ServerError(e.to_string()))?;
        }
    }

    response.set("access_token", access_token.value);
    response.set("token_type", "bearer");
    response.set("expires_in", access_strategy.lifespan().num_seconds());
    response.set(
        "scope",
        crate::oidc::types::join_scopes(request.session.granted_scopes()),
    );
    if let Some((token, _, _)) = refresh {
        response.set("refresh_token", token);
    }
    Ok(())
}

/// Run the access handler chain through both phases
pub async fn run_access_handlers(
    handlers: &[Box<dyn AccessFlowHandler>],
    request: &mut AccessRequest,
    response: &mut AccessResponse,
) -> Result<(), ProtocolError> {
    for handler in handlers {
        handler.update_session(request).await?;
    }
    for handler in handlers {
        handler.handle_access_request(request, response).await?;
    }
    if !response.has_access_token() {
        return Err(ProtocolError::ServerError(format!(
            "no handler produced a token response for {:?}",
            request.grant_types
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::request::RequestFactory;
    use crate::oidc::token::HmacTokenStrategy;
    use crate::oidc::types::{
        Client, ClientAuthMethod, ClientType, GrantType, Params, ResponseType, SigningAlgorithm,
    };
    use crate::storage::MemoryStorage;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn test_client() -> Client {
        let now = Utc::now();
        Client {
            client_id: "client-1".to_string(),
            client_secret: Some("secret".to_string()),
            client_name: None,
            client_type: ClientType::Confidential,
            redirect_uris: vec!["https://app.example.com/cb".to_string()],
            grant_types: vec![GrantType::AuthorizationCode],
            response_types: vec![ResponseType::Code, ResponseType::Token],
            scope: Some("foo".to_string()),
            token_endpoint_auth_method: ClientAuthMethod::ClientSecretBasic,
            audience: vec![],
            id_token_signed_response_alg: SigningAlgorithm::RS256,
            id_token_encrypted_response_alg: None,
            request_object_signing_alg: None,
            request_object_encryption_alg: None,
            jwks: None,
            request_uris: vec![],
            default_max_age: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn handler_is_a_no_op_off_its_flow() {
        // token-only request: the code handler owns nothing here and must
        // leave the response completely unmodified
        let params = Params::from_pairs([
            ("response_type", "token"),
            ("redirect_uri", "https://app.example.com/cb"),
        ]);
        let mut request = RequestFactory::authorize_request(&params, test_client()).unwrap();
        let mut response = AuthorizeResponse::new();

        let handler = AuthorizeCodeFlowHandler::new(
            Arc::new(HmacTokenStrategy::new(b"secret".to_vec())),
            Arc::new(MemoryStorage::new()),
            Duration::minutes(10),
        );
        handler.handle(&mut request, &mut response).await.unwrap();

        assert!(response.code().is_none());
        assert!(response.is_empty());
        assert!(!request.is_handled(ResponseType::Code));
    }

    #[tokio::test]
    async fn unclaimed_response_type_is_a_server_error() {
        // only the code handler is registered but a token is requested:
        // that is a configuration inconsistency, not a client fault
        let params = Params::from_pairs([
            ("response_type", "code token"),
            ("redirect_uri", "https://app.example.com/cb"),
        ]);
        let mut request = RequestFactory::authorize_request(&params, test_client()).unwrap();
        let mut response = AuthorizeResponse::new();

        let handlers: Vec<Box<dyn AuthorizeFlowHandler>> =
            vec![Box::new(AuthorizeCodeFlowHandler::new(
                Arc::new(HmacTokenStrategy::new(b"secret".to_vec())),
                Arc::new(MemoryStorage::new()),
                Duration::minutes(10),
            ))];
        let err = run_authorize_handlers(&handlers, &mut request, &mut response)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "server_error");
    }
}
