//! Cookie sealing with AES-256-GCM
//!
//! Sealed values are laid out as `[key_id | nonce(12) | ciphertext+tag]` and
//! base64url-encoded for cookie transport. The leading key-id byte lets an
//! operator rotate keys without invalidating every session at once: a cipher
//! only opens values sealed under its own key.

use aes_gcm::aead::{Aead, KeyInit, OsRng, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

const NONCE_LEN: usize = 12;

/// Authenticated cipher for cookie values
pub struct CookieCipher {
    cipher: Aes256Gcm,
    key_id: u8,
}

impl CookieCipher {
    /// Build a cipher from the configured key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEncryptionKeyLength`] unless the key is
    /// exactly 32 bytes.
    pub fn new(key: &str) -> Result<Self> {
        let bytes = key.as_bytes();
        if bytes.len() != 32 {
            return Err(Error::InvalidEncryptionKeyLength(bytes.len()));
        }
        let key_id = Sha256::digest(bytes)[0];
        let cipher =
            Aes256Gcm::new_from_slice(bytes).map_err(|_| Error::InvalidEncryptionKeyLength(bytes.len()))?;
        Ok(Self { cipher, key_id })
    }

    /// Seal a plaintext value for cookie transport
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decryption`] if the cipher rejects the input, which
    /// does not happen for well-formed keys.
    pub fn encrypt(&self, plain: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
            .map_err(|_| Error::Decryption)?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(self.key_id);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Open a sealed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decryption`] on malformed input, a key-id mismatch,
    /// or an authentication failure (any tampered byte).
    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let raw = URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|_| Error::Decryption)?;
        if raw.len() < 1 + NONCE_LEN {
            return Err(Error::Decryption);
        }
        if raw[0] != self.key_id {
            return Err(Error::Decryption);
        }
        let (nonce, ciphertext) = raw[1..].split_at(NONCE_LEN);

        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decryption)?;
        String::from_utf8(plain).map_err(|_| Error::Decryption)
    }
}
