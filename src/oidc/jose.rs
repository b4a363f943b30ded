//! Compact JWE encryption and decryption.
//!
//! Covers the two key-management algorithms negotiated with clients: `dir`
//! (content key derived from the client secret) and `RSA-OAEP-256` (key
//! transport against an RSA public key). Content encryption is A256GCM.
//! Used for nested ID tokens and encrypted request objects.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::prelude::*;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::oidc::types::EncryptionAlgorithm;

const CONTENT_ENCRYPTION: &str = "A256GCM";
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// JOSE-layer failures; callers translate to the protocol taxonomy
#[derive(Debug, Error)]
pub enum JoseError {
    #[error("malformed JWE: {0}")]
    Malformed(String),

    #[error("JWE algorithm mismatch: expected {expected}, got {got}")]
    AlgorithmMismatch { expected: String, got: String },

    #[error("JWE cryptographic failure: {0}")]
    Crypto(String),
}

/// Key material for encryption
pub enum JweEncryptKey<'a> {
    /// `dir`: the 256-bit content key itself
    Direct([u8; 32]),
    /// `RSA-OAEP-256`: recipient's public key wraps a random content key
    Rsa(&'a RsaPublicKey),
}

/// Key material for decryption
pub enum JweDecryptKey<'a> {
    Direct([u8; 32]),
    Rsa(&'a RsaPrivateKey),
}

/// Derive symmetric JWE key material from a client secret
pub fn client_secret_key(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}

/// Encrypt `payload` into a five-part compact JWE
pub fn encrypt_compact(
    payload: &str,
    algorithm: EncryptionAlgorithm,
    key: JweEncryptKey<'_>,
) -> Result<String, JoseError> {
    let header = serde_json::json!({
        "alg": algorithm.as_str(),
        "enc": CONTENT_ENCRYPTION,
        "cty": "JWT",
    });
    let protected = BASE64_URL_SAFE_NO_PAD.encode(header.to_string());

    let (cek, encrypted_key): ([u8; 32], Vec<u8>) = match (algorithm, key) {
        (EncryptionAlgorithm::Dir, JweEncryptKey::Direct(cek)) => (cek, Vec::new()),
        (EncryptionAlgorithm::RsaOaep256, JweEncryptKey::Rsa(public_key)) => {
            let mut cek = [0u8; 32];
            use rand::RngCore;
            rand::thread_rng().fill_bytes(&mut cek);
            let encrypted_key = public_key
                .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), &cek)
                .map_err(|e| JoseError::Crypto(e.to_string()))?;
            (cek, encrypted_key)
        }
        _ => {
            return Err(JoseError::Crypto(
                "key material does not match the key management algorithm".to_string(),
            ));
        }
    };

    let mut iv = [0u8; IV_LEN];
    {
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut iv);
    }

    let cipher = Aes256Gcm::new((&cek).into());
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: payload.as_bytes(),
                aad: protected.as_bytes(),
            },
        )
        .map_err(|e| JoseError::Crypto(e.to_string()))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    Ok(format!(
        "{}.{}.{}.{}.{}",
        protected,
        BASE64_URL_SAFE_NO_PAD.encode(encrypted_key),
        BASE64_URL_SAFE_NO_PAD.encode(iv),
        BASE64_URL_SAFE_NO_PAD.encode(ciphertext),
        BASE64_URL_SAFE_NO_PAD.encode(tag),
    ))
}

/// Decrypt a five-part compact JWE produced with `expected_algorithm`
pub fn decrypt_compact(
    token: &str,
    expected_algorithm: EncryptionAlgorithm,
    key: JweDecryptKey<'_>,
) -> Result<String, JoseError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 5 {
        return Err(JoseError::Malformed(format!(
            "expected 5 parts, got {}",
            parts.len()
        )));
    }
    let [protected, encrypted_key, iv, ciphertext, tag] =
        [parts[0], parts[1], parts[2], parts[3], parts[4]];

    let header_bytes = BASE64_URL_SAFE_NO_PAD
        .decode(protected)
        .map_err(|e| JoseError::Malformed(format!("bad header encoding: {}", e)))?;
    let header: serde_json::Value = serde_json::from_slice(&header_bytes)
        .map_err(|e| JoseError::Malformed(format!("bad header JSON: {}", e)))?;

    let alg = header.get("alg").and_then(|v| v.as_str()).unwrap_or("");
    if alg != expected_algorithm.as_str() {
        return Err(JoseError::AlgorithmMismatch {
            expected: expected_algorithm.as_str().to_string(),
            got: alg.to_string(),
        });
    }
    let enc = header.get("enc").and_then(|v| v.as_str()).unwrap_or("");
    if enc != CONTENT_ENCRYPTION {
        return Err(JoseError::AlgorithmMismatch {
            expected: CONTENT_ENCRYPTION.to_string(),
            got: enc.to_string(),
        });
    }

    let encrypted_key = BASE64_URL_SAFE_NO_PAD
        .decode(encrypted_key)
        .map_err(|e| JoseError::Malformed(format!("bad encrypted key encoding: {}", e)))?;
    let cek: [u8; 32] = match (expected_algorithm, key) {
        (EncryptionAlgorithm::Dir, JweDecryptKey::Direct(cek)) => {
            if !encrypted_key.is_empty() {
                return Err(JoseError::Malformed(
                    "dir JWE must carry an empty encrypted key".to_string(),
                ));
            }
            cek
        }
        (EncryptionAlgorithm::RsaOaep256, JweDecryptKey::Rsa(private_key)) => {
            let cek = private_key
                .decrypt(Oaep::new::<Sha256>(), &encrypted_key)
                .map_err(|e| JoseError::Crypto(e.to_string()))?;
            cek.try_into()
                .map_err(|_| JoseError::Crypto("unexpected content key length".to_string()))?
        }
        _ => {
            return Err(JoseError::Crypto(
                "key material does not match the key management algorithm".to_string(),
            ));
        }
    };

    let iv = BASE64_URL_SAFE_NO_PAD
        .decode(iv)
        .map_err(|e| JoseError::Malformed(format!("bad iv encoding: {}", e)))?;
    if iv.len() != IV_LEN {
        return Err(JoseError::Malformed("unexpected iv length".to_string()));
    }
    let mut sealed = BASE64_URL_SAFE_NO_PAD
        .decode(ciphertext)
        .map_err(|e| JoseError::Malformed(format!("bad ciphertext encoding: {}", e)))?;
    let tag = BASE64_URL_SAFE_NO_PAD
        .decode(tag)
        .map_err(|e| JoseError::Malformed(format!("bad tag encoding: {}", e)))?;
    sealed.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new((&cek).into());
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad: protected.as_bytes(),
            },
        )
        .map_err(|_| JoseError::Crypto("JWE authentication failed".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| JoseError::Malformed(format!("payload is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_round_trip() {
        let key = client_secret_key("a-client-secret");
        let jwe = encrypt_compact(
            "eyJhbGciOiJSUzI1NiJ9.payload.sig",
            EncryptionAlgorithm::Dir,
            JweEncryptKey::Direct(key),
        )
        .unwrap();
        assert_eq!(jwe.split('.').count(), 5);

        let plain =
            decrypt_compact(&jwe, EncryptionAlgorithm::Dir, JweDecryptKey::Direct(key)).unwrap();
        assert_eq!(plain, "eyJhbGciOiJSUzI1NiJ9.payload.sig");
    }

    #[test]
    fn dir_rejects_wrong_secret() {
        let jwe = encrypt_compact(
            "payload",
            EncryptionAlgorithm::Dir,
            JweEncryptKey::Direct(client_secret_key("right")),
        )
        .unwrap();
        let err = decrypt_compact(
            &jwe,
            EncryptionAlgorithm::Dir,
            JweDecryptKey::Direct(client_secret_key("wrong")),
        )
        .unwrap_err();
        assert!(matches!(err, JoseError::Crypto(_)));
    }

    #[test]
    fn rsa_oaep_round_trip() {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let public_key = private_key.to_public_key();

        let jwe = encrypt_compact(
            "nested.jwt.value",
            EncryptionAlgorithm::RsaOaep256,
            JweEncryptKey::Rsa(&public_key),
        )
        .unwrap();
        let plain = decrypt_compact(
            &jwe,
            EncryptionAlgorithm::RsaOaep256,
            JweDecryptKey::Rsa(&private_key),
        )
        .unwrap();
        assert_eq!(plain, "nested.jwt.value");
    }

    #[test]
    fn algorithm_mismatch_is_detected() {
        let key = client_secret_key("secret");
        let jwe = encrypt_compact("p", EncryptionAlgorithm::Dir, JweEncryptKey::Direct(key))
            .unwrap();
        let err = decrypt_compact(
            &jwe,
            EncryptionAlgorithm::RsaOaep256,
            JweDecryptKey::Direct(key),
        )
        .unwrap_err();
        assert!(matches!(err, JoseError::AlgorithmMismatch { .. }));
    }

    #[test]
    fn malformed_part_count_is_detected() {
        let key = client_secret_key("secret");
        let err = decrypt_compact(
            "only.three.parts",
            EncryptionAlgorithm::Dir,
            JweDecryptKey::Direct(key),
        )
        .unwrap_err();
        assert!(matches!(err, JoseError::Malformed(_)));
    }
}
