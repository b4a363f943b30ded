//! Cached remote document fetching.
//!
//! One fetch policy serves both request-object URIs and client `jwks_uri`
//! resolution: cache by fragment-stripped URI, verify the SHA-256 fragment
//! when one is present, evict on mismatch or expiry, bound every network
//! round trip with the configured timeout.

use base64::prelude::*;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

use crate::storage::traits::{CachedDocument, DocumentCache};

/// Failure kinds surfaced by [`CachedFetcher::fetch`]; callers translate
/// them into their own protocol error family
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out after {0} seconds")]
    Timeout(u64),

    #[error("fetch failed: {0}")]
    Http(String),

    #[error("document hash does not match URI fragment")]
    HashMismatch,

    #[error("cache failure: {0}")]
    Cache(String),
}

/// Fetches remote documents through a [`DocumentCache`]
pub struct CachedFetcher {
    http: reqwest::Client,
    cache: Arc<dyn DocumentCache>,
    cache_ttl: Duration,
    fetch_timeout: std::time::Duration,
}

impl CachedFetcher {
    pub fn new(
        http: reqwest::Client,
        cache: Arc<dyn DocumentCache>,
        cache_ttl: Duration,
        fetch_timeout: std::time::Duration,
    ) -> Self {
        Self {
            http,
            cache,
            cache_ttl,
            fetch_timeout,
        }
    }

    /// Resolve `uri` to a document body.
    ///
    /// The URI's fragment, when present, must be the hex SHA-256 of the
    /// document; a cached entry whose hash no longer matches the fragment is
    /// evicted and refetched.
    pub async fn fetch(&self, uri: &str) -> Result<String, FetchError> {
        let (cache_key, expected_hash) = split_fragment(uri);

        if let Some(cached) = self
            .cache
            .find_document(cache_key)
            .await
            .map_err(|e| FetchError::Cache(e.to_string()))?
        {
            let expired = cached
                .expires_at
                .map(|at| at < Utc::now())
                .unwrap_or(false);
            let hash_mismatch = expected_hash
                .map(|h| !h.eq_ignore_ascii_case(&cached.sha256))
                .unwrap_or(false);
            if expired || hash_mismatch {
                self.cache
                    .evict_document(cache_key)
                    .await
                    .map_err(|e| FetchError::Cache(e.to_string()))?;
            } else {
                return Ok(cached.body);
            }
        }

        let response = self
            .http
            .get(cache_key)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.fetch_timeout.as_secs())
                } else {
                    FetchError::Http(e.to_string())
                }
            })?;
        if !response.status().is_success() {
            return Err(FetchError::Http(format!(
                "unexpected status {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let sha256 = hex_sha256(body.as_bytes());
        if let Some(expected) = expected_hash {
            if !expected.eq_ignore_ascii_case(&sha256) {
                return Err(FetchError::HashMismatch);
            }
        }

        self.cache
            .write_document(&CachedDocument {
                uri: cache_key.to_string(),
                body: body.clone(),
                sha256,
                expires_at: Some(Utc::now() + self.cache_ttl),
            })
            .await
            .map_err(|e| FetchError::Cache(e.to_string()))?;

        Ok(body)
    }
}

/// Strip the fragment from a URI, returning it separately
pub fn split_fragment(uri: &str) -> (&str, Option<&str>) {
    match uri.split_once('#') {
        Some((base, fragment)) if !fragment.is_empty() => (base, Some(fragment)),
        Some((base, _)) => (base, None),
        None => (uri, None),
    }
}

/// Hex SHA-256 of a byte slice
pub fn hex_sha256(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Left-most-half hash per OIDC Core §3.3.2.11: SHA-256, take the first
/// half, base64url encode. Used for `at_hash` and `c_hash` claims.
pub fn left_most_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    BASE64_URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_splitting() {
        assert_eq!(
            split_fragment("https://example.com/ro.jwt#abcd"),
            ("https://example.com/ro.jwt", Some("abcd"))
        );
        assert_eq!(
            split_fragment("https://example.com/ro.jwt#"),
            ("https://example.com/ro.jwt", None)
        );
        assert_eq!(
            split_fragment("https://example.com/ro.jwt"),
            ("https://example.com/ro.jwt", None)
        );
    }

    #[test]
    fn hex_sha256_matches_known_vector() {
        // sha256("abc")
        assert_eq!(
            hex_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn left_most_hash_is_half_digest() {
        let hash = left_most_hash("some-token");
        let raw = BASE64_URL_SAFE_NO_PAD.decode(hash).unwrap();
        assert_eq!(raw.len(), 16);
    }
}
