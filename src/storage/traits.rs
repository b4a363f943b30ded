//! Storage trait definitions for clients, grants, caches, and sessions.
//!
//! Defines async storage interfaces the core consumes; implementations must
//! provide atomic per-key create/get/delete semantics. The core performs no
//! locking of its own.

use crate::errors::StorageError;
use crate::oidc::request::AuthorizeRequest;
use crate::oidc::session::Session;
use crate::oidc::types::Client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for looking up registered clients
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Retrieve a client by id
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>>;

    /// Store a client registration
    async fn store_client(&self, client: &Client) -> Result<()>;
}

/// Persisted snapshot of the request a grant was issued for
///
/// Keyed by the token strategy's identifier (the HMAC signature part), never
/// by the full token value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantSession {
    /// Id of the request that produced the grant
    pub request_id: String,
    pub client_id: String,
    pub requested_at: DateTime<Utc>,
    pub requested_scopes: Vec<String>,
    /// Redirect URI the authorization code is bound to
    pub redirect_uri: Option<String>,
    pub session: Session,
    pub expires_at: DateTime<Utc>,
}

/// Trait for storing authorization-code grant sessions
///
/// Invalidation keeps the record but marks it inactive, so a replayed code
/// is distinguishable from an unknown one.
#[async_trait]
pub trait AuthorizeCodeStore: Send + Sync {
    /// Store a new authorization-code session under the code's identifier
    async fn create_authorize_code_session(
        &self,
        signature: &str,
        grant: &GrantSession,
    ) -> Result<()>;

    /// Retrieve an authorization-code session
    ///
    /// Fails with [`StorageError::NotFound`] for unknown or expired codes and
    /// [`StorageError::Inactive`] for invalidated ones.
    async fn get_authorize_code_session(&self, signature: &str) -> Result<GrantSession>;

    /// Mark a code as used; the record remains for replay detection
    async fn invalidate_authorize_code_session(&self, signature: &str) -> Result<()>;
}

/// Trait for storing access-token grant sessions
#[async_trait]
pub trait AccessTokenStore: Send + Sync {
    async fn create_access_token_session(
        &self,
        signature: &str,
        grant: &GrantSession,
    ) -> Result<()>;

    async fn get_access_token_session(&self, signature: &str) -> Result<GrantSession>;

    async fn delete_access_token_session(&self, signature: &str) -> Result<()>;

    /// Delete every access-token session issued for a request id
    async fn revoke_access_tokens(&self, request_id: &str) -> Result<()>;
}

/// Trait for storing refresh-token grant sessions
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create_refresh_token_session(
        &self,
        signature: &str,
        grant: &GrantSession,
    ) -> Result<()>;

    async fn get_refresh_token_session(&self, signature: &str) -> Result<GrantSession>;

    async fn delete_refresh_token_session(&self, signature: &str) -> Result<()>;

    /// Delete every refresh-token session issued for a request id
    async fn revoke_refresh_tokens(&self, request_id: &str) -> Result<()>;
}

/// A fetched remote document (request object or client key set) keyed by its
/// fragment-stripped URI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDocument {
    /// Source URI with any fragment stripped
    pub uri: String,
    /// Raw document body
    pub body: String,
    /// Hex SHA-256 of the body, compared against URI fragments
    pub sha256: String,
    /// When the cache entry stops being served
    pub expires_at: Option<DateTime<Utc>>,
}

/// Trait for caching fetched remote documents
#[async_trait]
pub trait DocumentCache: Send + Sync {
    async fn write_document(&self, document: &CachedDocument) -> Result<()>;

    async fn find_document(&self, uri: &str) -> Result<Option<CachedDocument>>;

    async fn evict_document(&self, uri: &str) -> Result<()>;
}

/// Trait for storing suspended authorize requests awaiting login or consent
///
/// Keyed by (request id, nonce); the nonce is minted per redirect so a
/// stolen request id alone cannot resume a flow.
#[async_trait]
pub trait SuspendedRequestStore: Send + Sync {
    async fn create_suspended_request(
        &self,
        request_id: &str,
        nonce: &str,
        request: &AuthorizeRequest,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn find_suspended_request(
        &self,
        request_id: &str,
        nonce: &str,
    ) -> Result<Option<AuthorizeRequest>>;

    async fn evict_suspended_request(&self, request_id: &str, nonce: &str) -> Result<()>;
}

/// A remembered login established through a "remember me" duration on the
/// login round-trip token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub subject: String,
    pub auth_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Trait for storing remembered authentication sessions
#[async_trait]
pub trait AuthSessionStore: Send + Sync {
    async fn create_auth_session(&self, session_id: &str, session: &AuthSession) -> Result<()>;

    async fn find_auth_session(&self, session_id: &str) -> Result<Option<AuthSession>>;

    async fn evict_auth_session(&self, session_id: &str) -> Result<()>;
}

/// Combined storage trait the server is wired against
pub trait OidcStorage:
    ClientStore
    + AuthorizeCodeStore
    + AccessTokenStore
    + RefreshTokenStore
    + DocumentCache
    + SuspendedRequestStore
    + AuthSessionStore
    + Send
    + Sync
{
}
