//! OAuth 2.0 / OpenID Connect authorization server core.

pub mod fetch;
pub mod handlers;
pub mod jose;
pub mod keys;
pub mod pipeline;
pub mod provider;
pub mod request;
pub mod request_object;
pub mod response;
pub mod server;
pub mod session;
pub mod token;
pub mod types;

// Re-export frequently used items from each module
pub use keys::{KeySource, KeyUse, ServerKey, ServerKeySet};
pub use provider::{Negotiation, RedirectSignal};
pub use request::{AccessRequest, AuthorizeRequest, OidcRequest, RequestFactory};
pub use request_object::RequestObjectResolver;
pub use response::{AccessResponse, AuthorizeResponse};
pub use server::{AuthorizeOutcome, ClientAuthentication, OidcServer};
pub use session::{OidcClaims, Session};
pub use token::{HmacTokenStrategy, IdTokenStrategy, JwtAccessTokenStrategy};
pub use types::{
    Client, ClientAuthMethod, ClientJwks, ClientType, Display, EncryptionAlgorithm, GrantType,
    Params, Prompt, ResponseMode, ResponseType, SigningAlgorithm, Token, TokenKind, join_scopes,
    parse_scope,
};
