use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};

const NONCE_LEN: usize = 12;

/// AES-256-GCM encryption for stored photos.
///
/// The storage key is bound as associated data, so a ciphertext copied to a
/// different key fails to decrypt.
pub struct ImageCipher {
    cipher: Aes256Gcm,
}

impl ImageCipher {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        use base64::Engine;
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_base64.trim())
            .map_err(|_| EncryptionError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)?;

        Ok(Self { cipher })
    }

    /// Encrypt `plaintext` for `key`. Output is nonce (12 bytes) || ciphertext.
    pub fn seal(&self, key: &str, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| EncryptionError::EncryptFailed)?;

        let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        output.extend_from_slice(&nonce);
        output.extend(ciphertext);
        Ok(output)
    }

    pub fn open(&self, key: &str, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if data.len() < NONCE_LEN {
            return Err(EncryptionError::DecryptFailed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| EncryptionError::DecryptFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn cipher() -> ImageCipher {
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        ImageCipher::new(&key).unwrap()
    }

    #[test]
    fn test_seal_then_open() {
        let cipher = cipher();
        let sealed = cipher.seal("originals/a.png", b"photo bytes").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"photo bytes");
        assert_eq!(cipher.open("originals/a.png", &sealed).unwrap(), b"photo bytes");
    }

    #[test]
    fn test_ciphertext_bound_to_key() {
        let cipher = cipher();
        let sealed = cipher.seal("originals/a.png", b"photo bytes").unwrap();
        assert!(matches!(
            cipher.open("originals/b.png", &sealed),
            Err(EncryptionError::DecryptFailed)
        ));
    }

    #[test]
    fn test_tampered_or_short_input_rejected() {
        let cipher = cipher();
        let mut sealed = cipher.seal("k", b"photo bytes").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(cipher.open("k", &sealed).is_err());
        assert!(cipher.open("k", &[0u8; 4]).is_err());
    }

    #[test]
    fn test_invalid_key_lengths() {
        let short = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(matches!(ImageCipher::new(&short), Err(EncryptionError::InvalidKey)));
        assert!(ImageCipher::new("not base64!").is_err());
    }
}
