//! The authorization server core: pipeline, negotiation providers, and
//! handler engine wired into the authorize and token entry points.

use std::sync::Arc;

use crate::config::Config;
use crate::errors::ProtocolError;
use crate::oidc::fetch::CachedFetcher;
use crate::oidc::handlers::{
    AccessFlowHandler, AuthorizeCodeFlowHandler, AuthorizeCodeGrantHandler,
    AuthorizeFlowHandler, ClientCredentialsFlowHandler, IdTokenFlowHandler, ImplicitFlowHandler,
    OidcTokenResponseHandler, RefreshFlowHandler, run_access_handlers, run_authorize_handlers,
};
use crate::oidc::keys::{KeySource, ServerKeySet};
use crate::oidc::pipeline::{
    AuthorizePipeline, BaseProducer, RequestObjectProducer, ResumeProducer, default_validators,
    validators::validate_access_request,
};
use crate::oidc::provider::{
    AuthSessionHandler, AuthenticationProvider, ConsentProvider, ConsentTokenHandler,
    IdTokenHintHandler, ImpliedConsentHandler, LoginTokenHandler, Negotiation, RedirectSignal,
};
use crate::oidc::request::RequestFactory;
use crate::oidc::request_object::RequestObjectResolver;
use crate::oidc::response::{AccessResponse, AuthorizeResponse};
use crate::oidc::token::{HmacTokenStrategy, IdTokenStrategy, JwtAccessTokenStrategy};
use crate::oidc::types::{Client, ClientAuthMethod, Params};
use crate::storage::traits::{ClientStore, OidcStorage};

/// Client credentials extracted from the transport layer
#[derive(Clone)]
pub struct ClientAuthentication {
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// Outcome of the authorize endpoint
#[derive(Debug)]
pub enum AuthorizeOutcome {
    /// Final redirect back to the client, success or error parameters
    /// appended per the response mode
    Redirect(String),
    /// The flow suspended for an external login or consent step
    Interaction(RedirectSignal),
}

/// The assembled authorization server
pub struct OidcServer {
    config: Config,
    clients: Arc<dyn ClientStore>,
    pipeline: AuthorizePipeline,
    authn: AuthenticationProvider,
    consent: ConsentProvider,
    authorize_handlers: Vec<Box<dyn AuthorizeFlowHandler>>,
    access_handlers: Vec<Box<dyn AccessFlowHandler>>,
}

impl OidcServer {
    /// Wire the core once at startup; chain order is part of the contract
    pub fn new<S>(config: Config, storage: Arc<S>, keys: Arc<ServerKeySet>) -> Self
    where
        S: OidcStorage + 'static,
    {
        let http = reqwest::Client::new();
        let cache_ttl = config.document_cache_ttl;
        let timeout = config.http_client_timeout;

        let key_source = Arc::new(KeySource::new(CachedFetcher::new(
            http.clone(),
            storage.clone(),
            cache_ttl,
            timeout,
        )));
        let resolver = Arc::new(RequestObjectResolver::new(
            CachedFetcher::new(http, storage.clone(), cache_ttl, timeout),
            key_source.clone(),
            keys.clone(),
            config.issuer.clone(),
            config.allow_unsigned_request_objects,
        ));

        let opaque_strategy = Arc::new(HmacTokenStrategy::new(
            config.global_secret.as_bytes().to_vec(),
        ));
        let access_strategy = Arc::new(JwtAccessTokenStrategy::new(
            keys.clone(),
            config.issuer.clone(),
            config.access_token_lifespan,
        ));
        let id_token_strategy = Arc::new(IdTokenStrategy::new(
            keys.clone(),
            key_source,
            config.issuer.clone(),
            config.id_token_lifespan,
        ));

        let pipeline = AuthorizePipeline::new(
            vec![
                Box::new(ResumeProducer::new(storage.clone())),
                Box::new(BaseProducer::new(storage.clone())),
                Box::new(RequestObjectProducer::new(resolver)),
            ],
            default_validators(),
        );

        let authn = AuthenticationProvider::new(
            vec![
                Box::new(LoginTokenHandler::new(
                    keys.clone(),
                    config.issuer.clone(),
                    config.login_endpoint.clone(),
                    storage.clone(),
                )),
                Box::new(AuthSessionHandler::new(storage.clone())),
                Box::new(IdTokenHintHandler::new(id_token_strategy.clone())),
            ],
            storage.clone(),
            keys.clone(),
            config.issuer.clone(),
            config.login_endpoint.clone(),
            config.challenge_token_lifespan,
            config.suspension_ttl,
        );
        let consent = ConsentProvider::new(
            vec![
                Box::new(ConsentTokenHandler::new(
                    keys.clone(),
                    config.issuer.clone(),
                    config.consent_endpoint.clone(),
                )),
                Box::new(ImpliedConsentHandler),
            ],
            storage.clone(),
            keys,
            config.issuer.clone(),
            config.consent_endpoint.clone(),
            config.challenge_token_lifespan,
            config.suspension_ttl,
        );

        // fixed order: code, then implicit, then the ID-token handler that
        // hashes what the first two produced
        let authorize_handlers: Vec<Box<dyn AuthorizeFlowHandler>> = vec![
            Box::new(AuthorizeCodeFlowHandler::new(
                opaque_strategy.clone(),
                storage.clone(),
                config.authorize_code_lifespan,
            )),
            Box::new(ImplicitFlowHandler::new(
                access_strategy.clone(),
                storage.clone(),
            )),
            Box::new(IdTokenFlowHandler::new(id_token_strategy.clone())),
        ];

        let access_handlers: Vec<Box<dyn AccessFlowHandler>> = vec![
            Box::new(AuthorizeCodeGrantHandler::new(
                opaque_strategy.clone(),
                storage.clone(),
                access_strategy.clone(),
                storage.clone(),
                opaque_strategy.clone(),
                storage.clone(),
                config.refresh_token_lifespan,
            )),
            Box::new(RefreshFlowHandler::new(
                opaque_strategy,
                storage.clone(),
                access_strategy.clone(),
                storage.clone(),
                config.refresh_token_lifespan,
            )),
            Box::new(ClientCredentialsFlowHandler::new(
                access_strategy,
                storage.clone(),
            )),
            Box::new(OidcTokenResponseHandler::new(id_token_strategy)),
        ];

        Self {
            config,
            clients: storage,
            pipeline,
            authn,
            consent,
            authorize_handlers,
            access_handlers,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle an authorize-endpoint request
    pub async fn authorize(&self, params: &Params) -> Result<AuthorizeOutcome, ProtocolError> {
        // failures before the redirect URI is validated must never be
        // redirected anywhere
        let mut request = self.pipeline.produce(params).await?;
        let redirect_bound = request.client.redirect_uri_registered(&request.redirect_uri);

        let result: Result<Option<AuthorizeOutcome>, ProtocolError> = async {
            self.pipeline.validate(&request)?;

            match self.authn.negotiate(params, &mut request).await? {
                Negotiation::Proceed => {}
                Negotiation::Redirect(signal) => {
                    return Ok(Some(AuthorizeOutcome::Interaction(signal)));
                }
            }
            match self.consent.negotiate(params, &mut request).await? {
                Negotiation::Proceed => {}
                Negotiation::Redirect(signal) => {
                    return Ok(Some(AuthorizeOutcome::Interaction(signal)));
                }
            }
            Ok(None)
        }
        .await;

        match result {
            Ok(Some(interaction)) => return Ok(interaction),
            Ok(None) => {}
            Err(err) => return self.authorize_error(&request, redirect_bound, err),
        }

        let mut response = AuthorizeResponse::new();
        let handled =
            run_authorize_handlers(&self.authorize_handlers, &mut request, &mut response).await;
        if let Err(err) = handled {
            return self.authorize_error(&request, redirect_bound, err);
        }

        if let Some(state) = &request.state {
            response.add_parameter("state", state);
        }
        let location =
            response.redirect_location(&request.redirect_uri, request.effective_response_mode())?;
        tracing::info!(
            client_id = %request.client.client_id,
            request_id = %request.id,
            "authorize request completed"
        );
        Ok(AuthorizeOutcome::Redirect(location))
    }

    /// Render a protocol error back to the client when the redirect URI is
    /// trusted, or surface it directly when it is not
    fn authorize_error(
        &self,
        request: &crate::oidc::request::AuthorizeRequest,
        redirect_bound: bool,
        err: ProtocolError,
    ) -> Result<AuthorizeOutcome, ProtocolError> {
        if !redirect_bound {
            return Err(err);
        }
        if matches!(err, ProtocolError::ServerError(_)) {
            tracing::error!(error = %err, request_id = %request.id, "authorize request failed");
        }

        let mut response = AuthorizeResponse::new();
        response.add_parameter("error", err.code());
        response.add_parameter("error_description", err.description());
        if let Some(state) = &request.state {
            response.add_parameter("state", state);
        }
        let location =
            response.redirect_location(&request.redirect_uri, request.effective_response_mode())?;
        Ok(AuthorizeOutcome::Redirect(location))
    }

    /// Handle a token-endpoint request
    pub async fn token(
        &self,
        params: &Params,
        client_auth: Option<ClientAuthentication>,
    ) -> Result<AccessResponse, ProtocolError> {
        let client_id = client_auth
            .as_ref()
            .map(|auth| auth.client_id.clone())
            .or_else(|| params.get("client_id").map(str::to_string))
            .ok_or_else(|| {
                ProtocolError::InvalidClient("no client identification presented".to_string())
            })?;

        let client = self
            .clients
            .get_client(&client_id)
            .await
            .map_err(|e| ProtocolError::ServerError(e.to_string()))?
            .ok_or_else(|| ProtocolError::InvalidClient(format!("unknown client {}", client_id)))?;

        self.authenticate_client(&client, client_auth.as_ref(), params)?;

        let mut request = RequestFactory::access_request(params, client)?;
        validate_access_request(&request)?;

        let mut response = AccessResponse::new();
        run_access_handlers(&self.access_handlers, &mut request, &mut response).await?;

        tracing::info!(
            client_id = %request.client.client_id,
            request_id = %request.id,
            grant_types = ?request.grant_types,
            "token request completed"
        );
        Ok(response)
    }

    /// Authenticate a client at the token endpoint
    fn authenticate_client(
        &self,
        client: &Client,
        client_auth: Option<&ClientAuthentication>,
        params: &Params,
    ) -> Result<(), ProtocolError> {
        match client.token_endpoint_auth_method {
            ClientAuthMethod::None => Ok(()),
            ClientAuthMethod::ClientSecretBasic | ClientAuthMethod::ClientSecretPost => {
                let presented = client_auth
                    .and_then(|auth| auth.client_secret.as_deref())
                    .or_else(|| params.get("client_secret"))
                    .ok_or_else(|| {
                        ProtocolError::InvalidClient("missing client secret".to_string())
                    })?;
                let expected = client.client_secret.as_deref().ok_or_else(|| {
                    ProtocolError::InvalidClient(
                        "client has no secret configured".to_string(),
                    )
                })?;
                if presented != expected {
                    return Err(ProtocolError::InvalidClient(
                        "invalid client secret".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}
