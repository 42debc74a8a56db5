use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

const NONCE_LEN: usize = 12;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("encryption key is not valid base64: {0}")]
    KeyEncoding(#[from] base64::DecodeError),
    #[error("encryption key must be 32 bytes")]
    InvalidKeyLength,
    #[error("encryption key not configured")]
    MissingKey,
    #[error("unable to encrypt value")]
    Encrypt,
}

/// Opaque reversible encoding for SSNs and provider credentials.
///
/// `decrypt` never fails: an undecodable or tampered token yields an empty string.
pub trait SecretCodec: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CodecError>;
    fn decrypt(&self, token: &str) -> String;
}

/// AES-256-GCM-SIV codec producing `base64(nonce || ciphertext)` tokens.
pub struct AesSecretCodec {
    cipher: Aes256GcmSiv,
}

impl AesSecretCodec {
    pub fn from_base64_key(secret: &str) -> Result<Self, CodecError> {
        let trimmed = secret.trim();
        let key = STANDARD
            .decode(trimmed.as_bytes())
            .or_else(|_| STANDARD_NO_PAD.decode(trimmed.trim_end_matches('=').as_bytes()))?;
        let cipher = Aes256GcmSiv::new_from_slice(&key).map_err(|_| CodecError::InvalidKeyLength)?;
        Ok(Self { cipher })
    }
}

impl std::fmt::Debug for AesSecretCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesSecretCodec").finish_non_exhaustive()
    }
}

impl SecretCodec for AesSecretCodec {
    fn encrypt(&self, plaintext: &str) -> Result<String, CodecError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CodecError::Encrypt)?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(token))
    }

    fn decrypt(&self, token: &str) -> String {
        let Ok(raw) = STANDARD.decode(token.trim().as_bytes()) else {
            return String::new();
        };
        if raw.len() <= NONCE_LEN {
            return String::new();
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()
            .and_then(|plain| String::from_utf8(plain).ok())
            .unwrap_or_default()
    }
}

/// Stand-in used when no key is configured; nothing can be encrypted or recovered.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredCodec;

impl SecretCodec for UnconfiguredCodec {
    fn encrypt(&self, _plaintext: &str) -> Result<String, CodecError> {
        Err(CodecError::MissingKey)
    }

    fn decrypt(&self, _token: &str) -> String {
        String::new()
    }
}
