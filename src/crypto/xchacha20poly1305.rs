use chacha20poly1305::{KeyInit, XChaCha20Poly1305 as Cipher, XNonce, aead::AeadInPlace};
use std::fmt::Debug;
use switchboard_types::RTP_KEY_LEN;

use super::{Aead, AeadError, AeadErrorType};

/// Nonce size for the particular encryption.
pub const NONCE_LEN: usize = 24;

pub struct XChaCha20Poly1305 {
    cipher: Cipher,
}

impl Debug for XChaCha20Poly1305 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XChaCha20Poly1305").finish_non_exhaustive()
    }
}

impl XChaCha20Poly1305 {
    // Clippy: It is already assumed that key.len() == RTP_KEY_LEN
    #[allow(clippy::missing_panics_doc)]
    #[must_use]
    pub fn new(key: &[u8]) -> Option<Self> {
        (key.len() == RTP_KEY_LEN).then(|| {
            let key = key
                .try_into()
                .expect("key should have the size of RTP_KEY_LEN");

            Self::new_sized(key)
        })
    }

    #[allow(clippy::missing_panics_doc)]
    #[must_use]
    pub fn new_sized(key: &[u8; RTP_KEY_LEN]) -> Self {
        Self {
            cipher: Cipher::new_from_slice(key).expect("key should have the size of RTP_KEY_LEN"),
        }
    }
}

impl Aead for XChaCha20Poly1305 {
    fn mode(&self) -> super::EncryptMode {
        super::EncryptMode::XChaCha20Poly1305
    }

    fn encrypt(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, AeadError> {
        if nonce.len() != NONCE_LEN {
            return Err(AeadError {
                kind: AeadErrorType::InvalidNonceLength {
                    expected: NONCE_LEN,
                },
            });
        }

        let mut buffer = plaintext.to_vec();
        let nonce = XNonce::from_slice(nonce);
        self.cipher
            .encrypt_in_place(nonce, aad, &mut buffer)
            .map_err(|_| AeadError {
                kind: AeadErrorType::Unspecified,
            })?;

        Ok(buffer)
    }

    fn decrypt(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, AeadError> {
        if nonce.len() != NONCE_LEN {
            return Err(AeadError {
                kind: AeadErrorType::InvalidNonceLength {
                    expected: NONCE_LEN,
                },
            });
        }

        let mut buffer = ciphertext.to_vec();
        let nonce = XNonce::from_slice(nonce);
        self.cipher
            .decrypt_in_place(nonce, aad, &mut buffer)
            .map_err(|_| AeadError {
                kind: AeadErrorType::Unspecified,
            })?;

        Ok(buffer)
    }
}
