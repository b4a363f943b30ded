//! In-memory storage implementation
//!
//! Reference implementation of the storage traits, suitable for tests and
//! single-process deployments.

use crate::errors::StorageError;
use crate::oidc::request::AuthorizeRequest;
use crate::oidc::types::Client;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Authorization-code record with the invalidation marker kept alongside the
/// grant, so replayed codes stay distinguishable from unknown ones
#[derive(Clone)]
struct CodeRecord {
    grant: GrantSession,
    active: bool,
}

/// In-memory implementation of the combined storage trait
#[derive(Default)]
pub struct MemoryStorage {
    clients: Mutex<HashMap<String, Client>>,
    authorize_codes: Mutex<HashMap<String, CodeRecord>>,
    access_tokens: Mutex<HashMap<String, GrantSession>>,
    refresh_tokens: Mutex<HashMap<String, GrantSession>>,
    documents: Mutex<HashMap<String, CachedDocument>>,
    suspended: Mutex<HashMap<String, (AuthorizeRequest, chrono::DateTime<Utc>)>>,
    auth_sessions: Mutex<HashMap<String, AuthSession>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn suspension_key(request_id: &str, nonce: &str) -> String {
        format!("{}:{}", request_id, nonce)
    }
}

fn lock_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::OperationFailed(format!("lock error: {}", e))
}

#[async_trait]
impl ClientStore for MemoryStorage {
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        let clients = self.clients.lock().map_err(lock_err)?;
        Ok(clients.get(client_id).cloned())
    }

    async fn store_client(&self, client: &Client) -> Result<()> {
        let mut clients = self.clients.lock().map_err(lock_err)?;
        clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }
}

#[async_trait]
impl AuthorizeCodeStore for MemoryStorage {
    async fn create_authorize_code_session(
        &self,
        signature: &str,
        grant: &GrantSession,
    ) -> Result<()> {
        let mut codes = self.authorize_codes.lock().map_err(lock_err)?;
        codes.insert(
            signature.to_string(),
            CodeRecord {
                grant: grant.clone(),
                active: true,
            },
        );
        Ok(())
    }

    async fn get_authorize_code_session(&self, signature: &str) -> Result<GrantSession> {
        let codes = self.authorize_codes.lock().map_err(lock_err)?;
        let record = codes
            .get(signature)
            .ok_or_else(|| StorageError::NotFound(format!("authorize code {}", signature)))?;
        if !record.active {
            return Err(StorageError::Inactive(format!(
                "authorize code {}",
                signature
            )));
        }
        if record.grant.expires_at < Utc::now() {
            return Err(StorageError::NotFound(format!(
                "authorize code {} expired",
                signature
            )));
        }
        Ok(record.grant.clone())
    }

    async fn invalidate_authorize_code_session(&self, signature: &str) -> Result<()> {
        let mut codes = self.authorize_codes.lock().map_err(lock_err)?;
        match codes.get_mut(signature) {
            Some(record) => {
                record.active = false;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!(
                "authorize code {}",
                signature
            ))),
        }
    }
}

#[async_trait]
impl AccessTokenStore for MemoryStorage {
    async fn create_access_token_session(
        &self,
        signature: &str,
        grant: &GrantSession,
    ) -> Result<()> {
        let mut tokens = self.access_tokens.lock().map_err(lock_err)?;
        tokens.insert(signature.to_string(), grant.clone());
        Ok(())
    }

    async fn get_access_token_session(&self, signature: &str) -> Result<GrantSession> {
        let tokens = self.access_tokens.lock().map_err(lock_err)?;
        let grant = tokens
            .get(signature)
            .ok_or_else(|| StorageError::NotFound(format!("access token {}", signature)))?;
        if grant.expires_at < Utc::now() {
            return Err(StorageError::NotFound(format!(
                "access token {} expired",
                signature
            )));
        }
        Ok(grant.clone())
    }

    async fn delete_access_token_session(&self, signature: &str) -> Result<()> {
        let mut tokens = self.access_tokens.lock().map_err(lock_err)?;
        tokens.remove(signature);
        Ok(())
    }

    async fn revoke_access_tokens(&self, request_id: &str) -> Result<()> {
        let mut tokens = self.access_tokens.lock().map_err(lock_err)?;
        tokens.retain(|_, grant| grant.request_id != request_id);
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStorage {
    async fn create_refresh_token_session(
        &self,
        signature: &str,
        grant: &GrantSession,
    ) -> Result<()> {
        let mut tokens = self.refresh_tokens.lock().map_err(lock_err)?;
        tokens.insert(signature.to_string(), grant.clone());
        Ok(())
    }

    async fn get_refresh_token_session(&self, signature: &str) -> Result<GrantSession> {
        let tokens = self.refresh_tokens.lock().map_err(lock_err)?;
        let grant = tokens
            .get(signature)
            .ok_or_else(|| StorageError::NotFound(format!("refresh token {}", signature)))?;
        if grant.expires_at < Utc::now() {
            return Err(StorageError::NotFound(format!(
                "refresh token {} expired",
                signature
            )));
        }
        Ok(grant.clone())
    }

    async fn delete_refresh_token_session(&self, signature: &str) -> Result<()> {
        let mut tokens = self.refresh_tokens.lock().map_err(lock_err)?;
        tokens.remove(signature);
        Ok(())
    }

    async fn revoke_refresh_tokens(&self, request_id: &str) -> Result<()> {
        let mut tokens = self.refresh_tokens.lock().map_err(lock_err)?;
        tokens.retain(|_, grant| grant.request_id != request_id);
        Ok(())
    }
}

#[async_trait]
impl DocumentCache for MemoryStorage {
    async fn write_document(&self, document: &CachedDocument) -> Result<()> {
        let mut documents = self.documents.lock().map_err(lock_err)?;
        documents.insert(document.uri.clone(), document.clone());
        Ok(())
    }

    async fn find_document(&self, uri: &str) -> Result<Option<CachedDocument>> {
        let documents = self.documents.lock().map_err(lock_err)?;
        Ok(documents.get(uri).cloned())
    }

    async fn evict_document(&self, uri: &str) -> Result<()> {
        let mut documents = self.documents.lock().map_err(lock_err)?;
        documents.remove(uri);
        Ok(())
    }
}

#[async_trait]
impl SuspendedRequestStore for MemoryStorage {
    async fn create_suspended_request(
        &self,
        request_id: &str,
        nonce: &str,
        request: &AuthorizeRequest,
        expires_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let mut suspended = self.suspended.lock().map_err(lock_err)?;
        suspended.insert(
            Self::suspension_key(request_id, nonce),
            (request.clone(), expires_at),
        );
        Ok(())
    }

    async fn find_suspended_request(
        &self,
        request_id: &str,
        nonce: &str,
    ) -> Result<Option<AuthorizeRequest>> {
        let mut suspended = self.suspended.lock().map_err(lock_err)?;
        let key = Self::suspension_key(request_id, nonce);
        if let Some((_, expires_at)) = suspended.get(&key) {
            if *expires_at < Utc::now() {
                suspended.remove(&key);
                return Ok(None);
            }
        }
        Ok(suspended.get(&key).map(|(request, _)| request.clone()))
    }

    async fn evict_suspended_request(&self, request_id: &str, nonce: &str) -> Result<()> {
        let mut suspended = self.suspended.lock().map_err(lock_err)?;
        suspended.remove(&Self::suspension_key(request_id, nonce));
        Ok(())
    }
}

#[async_trait]
impl AuthSessionStore for MemoryStorage {
    async fn create_auth_session(&self, session_id: &str, session: &AuthSession) -> Result<()> {
        let mut sessions = self.auth_sessions.lock().map_err(lock_err)?;
        sessions.insert(session_id.to_string(), session.clone());
        Ok(())
    }

    async fn find_auth_session(&self, session_id: &str) -> Result<Option<AuthSession>> {
        let mut sessions = self.auth_sessions.lock().map_err(lock_err)?;
        if let Some(session) = sessions.get(session_id) {
            if session.expires_at < Utc::now() {
                sessions.remove(session_id);
                return Ok(None);
            }
        }
        Ok(sessions.get(session_id).cloned())
    }

    async fn evict_auth_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.auth_sessions.lock().map_err(lock_err)?;
        sessions.remove(session_id);
        Ok(())
    }
}

impl OidcStorage for MemoryStorage {}
