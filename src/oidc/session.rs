//! Session state carried by a request across authentication, consent, and
//! token issuance.
//!
//! A session survives its originating request: code and refresh-token
//! repositories persist it, and resumption after a login or consent
//! redirect merges the stored copy back into the revived request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed OIDC claims staged on a session, plus a residual extension map
///
/// The known fields are the ones validators and token strategies depend on;
/// everything else rides in `extra` and flows into issued tokens unmodified
/// (reserved names filtered at issuance).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OidcClaims {
    /// Replay nonce echoed into the ID token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Left-most hash of the access token issued alongside an ID token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
    /// Left-most hash of the authorization code issued alongside an ID token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,
    /// Authentication methods references
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amr: Option<Vec<String>>,
    /// Additional claims for ID tokens and access tokens
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl OidcClaims {
    /// Fill only unset fields from `other`; `extra` unions without overwriting
    pub fn merge(&mut self, other: &OidcClaims) {
        if self.nonce.is_none() {
            self.nonce = other.nonce.clone();
        }
        if self.at_hash.is_none() {
            self.at_hash = other.at_hash.clone();
        }
        if self.c_hash.is_none() {
            self.c_hash = other.c_hash.clone();
        }
        if self.amr.is_none() {
            self.amr = other.amr.clone();
        }
        for (key, value) in &other.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Mutable per-request session: who authenticated, when, and what they granted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Authenticated subject identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Timestamp of the original request, set only when a suspended request
    /// is revived; its presence marks the request as a resumption
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_request_time: Option<DateTime<Utc>>,
    /// When the subject last authenticated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<DateTime<Utc>>,
    /// Authentication Context Class Reference satisfied by the login
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
    /// Scopes granted so far, grown monotonically through [`Session::grant_scope`]
    #[serde(default)]
    granted_scopes: Vec<String>,
    /// Claims staged for token issuance
    #[serde(default)]
    pub claims: OidcClaims,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an authenticated subject
    pub fn set_authenticated(&mut self, subject: impl Into<String>, auth_time: DateTime<Utc>) {
        self.subject = Some(subject.into());
        self.auth_time = Some(auth_time);
    }

    pub fn is_authenticated(&self) -> bool {
        self.subject.is_some()
    }

    /// Grant a scope; granting twice is a no-op
    pub fn grant_scope(&mut self, scope: impl Into<String>) {
        let scope = scope.into();
        if !self.granted_scopes.contains(&scope) {
            self.granted_scopes.push(scope);
        }
    }

    pub fn granted_scopes(&self) -> &[String] {
        &self.granted_scopes
    }

    pub fn has_granted_scope(&self, scope: &str) -> bool {
        self.granted_scopes.iter().any(|s| s == scope)
    }

    /// Combine with another session: fill only empty fields, union scopes and
    /// claims. An already-set subject or auth time is never overwritten, so
    /// merging cannot weaken an established authentication.
    pub fn merge(&mut self, other: &Session) {
        if self.subject.is_none() {
            self.subject = other.subject.clone();
        }
        if self.auth_time.is_none() {
            self.auth_time = other.auth_time;
        }
        if self.original_request_time.is_none() {
            self.original_request_time = other.original_request_time;
        }
        if self.acr.is_none() {
            self.acr = other.acr.clone();
        }
        for scope in &other.granted_scopes {
            self.grant_scope(scope.clone());
        }
        self.claims.merge(&other.claims);
    }
}
