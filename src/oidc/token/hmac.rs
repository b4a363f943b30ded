//! Opaque HMAC-signed token strategy for authorization codes and refresh
//! tokens.
//!
//! Wire format: `base64url(random bytes) "." base64url(HMAC-SHA256(random
//! bytes))`. The signature part doubles as the repository lookup
//! identifier, so storage never indexes raw entropy.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::TokenError;

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: char = '.';

/// Generates and verifies two-part opaque tokens under a shared secret
pub struct HmacTokenStrategy {
    secret: Vec<u8>,
    entropy: usize,
}

impl HmacTokenStrategy {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            entropy: 32,
        }
    }

    /// Generate a fresh token, returning `(token, signature)`; the
    /// signature is the repository key
    pub fn generate(&self) -> (String, String) {
        use rand::RngCore;
        let mut random = vec![0u8; self.entropy];
        rand::thread_rng().fill_bytes(&mut random);

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(&random);
        let signature = BASE64_URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        let token = format!(
            "{}{}{}",
            BASE64_URL_SAFE_NO_PAD.encode(&random),
            SEPARATOR,
            signature
        );
        (token, signature)
    }

    /// Extract the lookup identifier without verifying the signature
    pub fn signature(token: &str) -> Result<&str, TokenError> {
        let (_, signature) = Self::split(token)?;
        Ok(signature)
    }

    /// Verify a presented token, returning its identifier on success.
    ///
    /// The HMAC comparison is constant time; a wrong part count never
    /// reaches it and is reported as a distinct kind.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        let (entropy_part, signature_part) = Self::split(token)?;

        let random = BASE64_URL_SAFE_NO_PAD
            .decode(entropy_part)
            .map_err(|e| TokenError::Malformed(format!("entropy part: {}", e)))?;
        let signature = BASE64_URL_SAFE_NO_PAD
            .decode(signature_part)
            .map_err(|e| TokenError::Malformed(format!("signature part: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(&random);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        Ok(signature_part.to_string())
    }

    fn split(token: &str) -> Result<(&str, &str), TokenError> {
        let mut parts = token.split(SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(entropy), Some(signature), None) if !entropy.is_empty() && !signature.is_empty() => {
                Ok((entropy, signature))
            }
            _ => Err(TokenError::Malformed(
                "expected two non-empty dot-separated parts".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_identifier() {
        let strategy = HmacTokenStrategy::new(b"a-global-secret-with-enough-entropy".to_vec());
        let (token, signature) = strategy.generate();

        assert_eq!(HmacTokenStrategy::signature(&token).unwrap(), signature);
        assert_eq!(strategy.verify(&token).unwrap(), signature);
    }

    #[test]
    fn distinct_secrets_produce_unverifiable_tokens() {
        let strategy = HmacTokenStrategy::new(b"secret-one".to_vec());
        let other = HmacTokenStrategy::new(b"secret-two".to_vec());
        let (token, _) = strategy.generate();

        assert_eq!(other.verify(&token).unwrap_err(), TokenError::BadSignature);
    }

    #[test]
    fn bit_flip_in_signature_fails_with_bad_signature() {
        let strategy = HmacTokenStrategy::new(b"a-global-secret".to_vec());
        let (token, _) = strategy.generate();

        let (entropy, signature) = token.split_once('.').unwrap();
        let mut raw = BASE64_URL_SAFE_NO_PAD.decode(signature).unwrap();
        raw[0] ^= 0x01;
        let tampered = format!("{}.{}", entropy, BASE64_URL_SAFE_NO_PAD.encode(raw));

        assert_eq!(
            strategy.verify(&tampered).unwrap_err(),
            TokenError::BadSignature
        );
    }

    #[test]
    fn wrong_part_count_fails_with_malformed() {
        let strategy = HmacTokenStrategy::new(b"a-global-secret".to_vec());

        for malformed in ["single-part", "one.two.three", ".", "a.", ".b"] {
            match strategy.verify(malformed).unwrap_err() {
                TokenError::Malformed(_) => {}
                other => panic!("expected Malformed for {:?}, got {:?}", malformed, other),
            }
        }
    }
}
