//! Request production and validation pipeline.
//!
//! Producers run as an ordered chain: the resume producer short-circuits
//! when a suspended request is being revived, otherwise the base producer
//! builds a typed request and the request-object producer overlays any
//! detached JAR claims. Validators then run fail-fast.
//!
//! Validator ordering is a documented contract, not an artifact of
//! registration: validators are independent (no shared mutable state), so
//! order only decides which violation surfaces first. The shipped order is
//! redirect binding first (errors before it must never be redirected back),
//! then type registration, scopes, and OIDC parameter rules.

pub mod producers;
pub mod validators;

pub use producers::{
    AuthorizeRequestProducer, BaseProducer, Produced, RequestObjectProducer, ResumeProducer,
};
pub use validators::{
    AuthorizeRequestValidator, NonceRequiredValidator, PromptValidator, RedirectUriValidator,
    ResponseTypeAllowedValidator, ScopeValidator, StateEntropyValidator, default_validators,
};

use crate::errors::ProtocolError;
use crate::oidc::request::AuthorizeRequest;
use crate::oidc::types::Params;

/// The assembled pipeline, constructed once at startup
pub struct AuthorizePipeline {
    producers: Vec<Box<dyn AuthorizeRequestProducer>>,
    validators: Vec<Box<dyn AuthorizeRequestValidator>>,
}

impl AuthorizePipeline {
    pub fn new(
        producers: Vec<Box<dyn AuthorizeRequestProducer>>,
        validators: Vec<Box<dyn AuthorizeRequestValidator>>,
    ) -> Self {
        Self {
            producers,
            validators,
        }
    }

    /// Run the producer chain to a typed request
    pub async fn produce(&self, params: &Params) -> Result<AuthorizeRequest, ProtocolError> {
        let mut current: Option<AuthorizeRequest> = None;
        for producer in &self.producers {
            match producer.produce(params, current).await? {
                Produced::Final(request) => return Ok(request),
                Produced::Continue(next) => current = next,
            }
        }
        current.ok_or_else(|| {
            ProtocolError::ServerError("producer chain yielded no request".to_string())
        })
    }

    /// Run the validator chain, first violation wins
    pub fn validate(&self, request: &AuthorizeRequest) -> Result<(), ProtocolError> {
        for validator in &self.validators {
            validator.validate(request)?;
        }
        Ok(())
    }
}
