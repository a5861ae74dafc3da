use chacha20poly1305::{aead::Aead, KeyInit, XChaCha20Poly1305, XNonce};
use rand::RngCore;

use crate::crypto::hash;

use super::WireError;

/// Bus cipher keyed from the miner passphrase.
///
/// The key is the digest of the passphrase; every encryption draws a fresh
/// random 24-byte nonce which rides in front of the ciphertext.
pub struct WireCipher {
    cipher: XChaCha20Poly1305,
}

impl WireCipher {
    pub const NONCE_SIZE: usize = 24;

    pub fn new(passphrase: &str) -> Result<Self, WireError> {
        let key = hash(passphrase.as_bytes());
        Ok(Self {
            cipher: XChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|_| WireError::Cipher)?,
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, WireError> {
        let mut nonce = [0u8; Self::NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.encrypt_with_nonce(plaintext, &nonce)
    }

    pub fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; Self::NONCE_SIZE],
    ) -> Result<Vec<u8>, WireError> {
        let data = self
            .cipher
            .encrypt(nonce.into(), plaintext)
            .map_err(|_| WireError::Encrypt)?;

        let mut encrypted = Vec::with_capacity(Self::NONCE_SIZE + data.len());
        encrypted.extend_from_slice(nonce);
        encrypted.extend_from_slice(&data);
        Ok(encrypted)
    }

    pub fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>, WireError> {
        if encrypted.len() <= Self::NONCE_SIZE {
            return Err(WireError::Decrypt);
        }
        let nonce =
            XNonce::try_from(&encrypted[0..Self::NONCE_SIZE]).map_err(|_| WireError::Decrypt)?;
        self.cipher
            .decrypt(&nonce, &encrypted[Self::NONCE_SIZE..])
            .map_err(|_| WireError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let cipher = WireCipher::new("miner pass").unwrap();
        let plaintext = b"work for everyone".to_vec();
        let encrypted = cipher.encrypt(&plaintext).unwrap();
        assert_ne!(encrypted, plaintext);
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_passphrase_rejected() {
        let sender = WireCipher::new("correct horse").unwrap();
        let receiver = WireCipher::new("battery staple").unwrap();
        let encrypted = sender.encrypt(b"secret job").unwrap();
        assert!(receiver.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let cipher = WireCipher::new("miner pass").unwrap();
        let mut encrypted = cipher.encrypt(b"payload").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(cipher.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_nonces_are_unique() {
        let cipher = WireCipher::new("miner pass").unwrap();
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a[..WireCipher::NONCE_SIZE], b[..WireCipher::NONCE_SIZE]);
    }
}
