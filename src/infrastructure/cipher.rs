use crate::domain::ports::CredentialCipher;
use crate::error::{IntakeError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use rand::RngCore;

const ENVELOPE_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;

fn cipher_error(message: String) -> IntakeError {
    IntakeError::Internal(Box::new(std::io::Error::other(message)))
}

/// Stores credentials as given. Used when no encryption key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCipher;

impl CredentialCipher for PassthroughCipher {
    fn encrypt(&self, plain: &str) -> Result<String> {
        Ok(plain.to_string())
    }

    fn decrypt(&self, token: &str) -> Result<String> {
        if token.starts_with(ENVELOPE_PREFIX) {
            return Err(cipher_error(
                "credential is encrypted but no decryption key is configured".to_string(),
            ));
        }
        Ok(token.to_string())
    }
}

/// ChaCha20-Poly1305 envelope: `enc:v1:<key_id>:<nonce>:<ciphertext>`, both parts
/// base64url without padding.
///
/// Values without the envelope prefix decrypt to themselves, so records written
/// before a key was configured stay readable.
#[derive(Clone)]
pub struct ChaChaCipher {
    key_id: String,
    key: [u8; 32],
}

impl ChaChaCipher {
    pub fn new(key_id: impl Into<String>, key: [u8; 32]) -> Self {
        Self {
            key_id: key_id.into(),
            key,
        }
    }

    /// Accepts a 32-byte key encoded as base64url or standard base64.
    pub fn from_base64(key_id: impl Into<String>, encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim().as_bytes())
            .or_else(|_| STANDARD.decode(encoded.trim().as_bytes()))
            .map_err(|e| IntakeError::Config(format!("ENCRYPTION_KEY is not base64: {}", e)))?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            IntakeError::Config(format!(
                "ENCRYPTION_KEY must decode to 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::new(key_id, key))
    }

    fn aead(&self) -> Result<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| cipher_error(format!("failed to initialize credential cipher: {}", e)))
    }
}

impl CredentialCipher for ChaChaCipher {
    fn encrypt(&self, plain: &str) -> Result<String> {
        if plain.starts_with(ENVELOPE_PREFIX) {
            return Ok(plain.to_string());
        }
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .aead()?
            .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
            .map_err(|e| cipher_error(format!("failed to encrypt credential: {}", e)))?;

        Ok(format!(
            "{}{}:{}:{}",
            ENVELOPE_PREFIX,
            self.key_id,
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    fn decrypt(&self, token: &str) -> Result<String> {
        let Some(body) = token.strip_prefix(ENVELOPE_PREFIX) else {
            return Ok(token.to_string());
        };
        let parts: Vec<&str> = body.split(':').collect();
        let [key_id, nonce_b64, ciphertext_b64] = parts.as_slice() else {
            return Err(cipher_error("credential envelope is invalid".to_string()));
        };
        if *key_id != self.key_id {
            return Err(cipher_error(format!(
                "credential key id {} is not configured",
                key_id
            )));
        }

        let nonce = URL_SAFE_NO_PAD
            .decode(nonce_b64.as_bytes())
            .map_err(|e| cipher_error(format!("failed to decode credential nonce: {}", e)))?;
        if nonce.len() != NONCE_LEN {
            return Err(cipher_error("credential nonce length is invalid".to_string()));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64.as_bytes())
            .map_err(|e| cipher_error(format!("failed to decode credential payload: {}", e)))?;

        let plain = self
            .aead()?
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|e| cipher_error(format!("failed to decrypt credential: {}", e)))?;
        String::from_utf8(plain)
            .map_err(|e| cipher_error(format!("credential plaintext is invalid utf8: {}", e)))
    }
}
