//! Key handshake primitives.
//!
//! Each connection attempt owns a fresh RSA-2048 keypair. The gateway encrypts
//! every secret it sends (nonce, user payload, token) to the public key with
//! RSA-OAEP/SHA-256, and expects a SHA-256 proof of the decrypted nonce.

use std::fmt;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// Modulus size used for every session keypair.
pub const KEY_BITS: usize = 2048;

/// Per-attempt RSA keypair.
#[derive(Clone)]
pub struct HandshakeKeys {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl HandshakeKeys {
    /// Generate a fresh keypair.
    ///
    /// CPU-bound; async callers should run it on a blocking thread.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate() -> Result<Self, AuthError> {
        let private = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| AuthError::Crypto(format!("key generation failed: {e}")))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// The public half.
    #[must_use]
    pub const fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Public key in the form the `init` frame carries: the SPKI PEM body
    /// with armor lines and newlines removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be encoded.
    pub fn export_public_key(&self) -> Result<String, AuthError> {
        let pem = self
            .public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::Crypto(format!("public key encoding failed: {e}")))?;

        Ok(pem
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect())
    }

    /// Base64-decode and RSA-OAEP/SHA-256 decrypt a gateway payload.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DecryptionFailure`] on malformed base64 or if the
    /// ciphertext was not produced for this key.
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<Vec<u8>, AuthError> {
        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| AuthError::DecryptionFailure(format!("invalid base64: {e}")))?;

        self.private
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)
            .map_err(|e| AuthError::DecryptionFailure(e.to_string()))
    }

    /// Decrypt a payload that must be UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DecryptionFailure`] if decryption fails or the
    /// plaintext is not UTF-8.
    pub fn decrypt_text(&self, ciphertext_b64: &str) -> Result<String, AuthError> {
        String::from_utf8(self.decrypt(ciphertext_b64)?)
            .map_err(|e| AuthError::DecryptionFailure(format!("plaintext is not utf-8: {e}")))
    }
}

impl fmt::Debug for HandshakeKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeKeys")
            .field("bits", &KEY_BITS)
            .finish_non_exhaustive()
    }
}

/// SHA-256 of the decrypted nonce, URL-safe base64 without padding.
#[must_use]
pub fn compute_nonce_proof(nonce: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(nonce))
}

/// Encrypt `plaintext` to a public key given in `init` frame form.
///
/// This is the gateway's side of the exchange; it lets local tooling and mock
/// gateways produce payloads a session can decrypt.
///
/// # Errors
///
/// Returns an error if the key cannot be parsed or the plaintext exceeds the
/// OAEP size limit.
pub fn encrypt_for(encoded_public_key: &str, plaintext: &[u8]) -> Result<String, AuthError> {
    let der = STANDARD
        .decode(encoded_public_key)
        .map_err(|e| AuthError::Crypto(format!("invalid public key encoding: {e}")))?;
    let public = RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| AuthError::Crypto(format!("invalid public key: {e}")))?;

    let ciphertext = public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| AuthError::Crypto(e.to_string()))?;

    Ok(STANDARD.encode(ciphertext))
}

/// Largest plaintext RSA-OAEP/SHA-256 accepts for a [`KEY_BITS`] key.
#[must_use]
pub const fn max_oaep_payload() -> usize {
    KEY_BITS / 8 - 2 * 32 - 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::OnceLock;

    fn shared_keys() -> &'static HandshakeKeys {
        static KEYS: OnceLock<HandshakeKeys> = OnceLock::new();
        KEYS.get_or_init(|| HandshakeKeys::generate().expect("keygen"))
    }

    #[test]
    fn test_exported_key_has_no_armor() {
        let exported = shared_keys().export_public_key().expect("export");

        assert!(!exported.contains('\n'));
        assert!(!exported.contains("BEGIN"));
        assert!(!exported.contains("END"));
        assert!(!exported.contains("-----"));
        // SPKI DER for RSA-2048 always starts with this prefix.
        assert!(exported.starts_with("MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA"));
    }

    #[test]
    fn test_decrypt_text_roundtrip() {
        let keys = shared_keys();
        let exported = keys.export_public_key().expect("export");
        let ciphertext = encrypt_for(&exported, b"TOKEN123").expect("encrypt");

        assert_eq!(keys.decrypt_text(&ciphertext).expect("decrypt"), "TOKEN123");
    }

    #[test]
    fn test_exported_key_parses_as_der() {
        let keys = shared_keys();
        let exported = keys.export_public_key().expect("export");
        let der = STANDARD.decode(&exported).expect("base64");
        let parsed = RsaPublicKey::from_public_key_der(&der).expect("der");

        assert_eq!(&parsed, keys.public_key());
    }

    #[test]
    fn test_encrypt_for_rejects_garbage_key() {
        assert!(matches!(
            encrypt_for("not a key", b"x"),
            Err(AuthError::Crypto(_))
        ));
        assert!(matches!(
            encrypt_for(&STANDARD.encode(b"short"), b"x"),
            Err(AuthError::Crypto(_))
        ));
    }

    #[test]
    fn test_decrypt_with_mismatched_key_fails() {
        let other = HandshakeKeys::generate().expect("keygen");
        let exported = other.export_public_key().expect("export");
        let ciphertext = encrypt_for(&exported, b"not for you").expect("encrypt");

        let result = shared_keys().decrypt(&ciphertext);
        assert!(matches!(result, Err(AuthError::DecryptionFailure(_))));
    }

    #[test]
    fn test_decrypt_malformed_base64_fails() {
        let result = shared_keys().decrypt("%%% not base64 %%%");
        assert!(matches!(result, Err(AuthError::DecryptionFailure(_))));
    }

    #[test]
    fn test_decrypt_truncated_ciphertext_fails() {
        let result = shared_keys().decrypt(&STANDARD.encode([7u8; 16]));
        assert!(matches!(result, Err(AuthError::DecryptionFailure(_))));
    }

    #[test]
    fn test_nonce_proof_known_vector() {
        // SHA-256("abc") = ba7816bf...
        assert_eq!(
            compute_nonce_proof(b"abc"),
            "ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0"
        );
    }

    #[test]
    fn test_oversized_plaintext_rejected() {
        let exported = shared_keys().export_public_key().expect("export");
        let too_big = vec![0u8; max_oaep_payload() + 1];
        assert!(encrypt_for(&exported, &too_big).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_oaep_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..=max_oaep_payload())) {
            let keys = shared_keys();
            let exported = keys.export_public_key().expect("export");
            let ciphertext = encrypt_for(&exported, &plaintext).expect("encrypt");
            prop_assert_eq!(keys.decrypt(&ciphertext).expect("decrypt"), plaintext);
        }

        #[test]
        fn prop_nonce_proof_deterministic_and_unpadded(nonce in proptest::collection::vec(any::<u8>(), 0..256)) {
            let first = compute_nonce_proof(&nonce);
            let second = compute_nonce_proof(&nonce);
            prop_assert_eq!(&first, &second);
            prop_assert!(!first.contains('='));
            prop_assert!(!first.contains('+'));
            prop_assert!(!first.contains('/'));
            prop_assert_eq!(first.len(), 43);
        }
    }
}
