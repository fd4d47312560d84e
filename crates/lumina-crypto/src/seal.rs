//! Authenticated encryption of provider credentials.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};

use crate::error::CryptoError;

/// Master key length in bytes. Longer keys are truncated to this.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length in bytes, prepended to every sealed value.
pub const NONCE_LEN: usize = 12;

/// Seals and opens provider API secrets under the service master key.
///
/// The master key is fixed at construction; rotation is out of scope.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Build a cipher from the configured master key. Only the first
    /// [`KEY_LEN`] bytes are used.
    pub fn new(master_key: &[u8]) -> Result<Self, CryptoError> {
        if master_key.len() < KEY_LEN {
            return Err(CryptoError::KeyTooShort {
                expected: KEY_LEN,
                actual: master_key.len(),
            });
        }
        let key = Key::<Aes256Gcm>::from_slice(&master_key[..KEY_LEN]);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a value produced by [`SecretCipher::seal`]. Rejects inputs
    /// shorter than the nonce and anything failing authentication.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::CiphertextTooShort);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// [`SecretCipher::open`] for string secrets.
    pub fn open_utf8(&self, sealed: &[u8]) -> Result<String, CryptoError> {
        let plaintext = self.open(sealed)?;
        Ok(String::from_utf8(plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn seal_then_open_round_trips() {
        let cipher = cipher();
        let sealed = cipher.seal(b"sk-super-secret").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), b"sk-super-secret");
    }

    #[test]
    fn nonces_are_fresh_per_seal() {
        let cipher = cipher();
        let a = cipher.seal(b"same").unwrap();
        let b = cipher.seal(b"same").unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn tampering_any_byte_fails_open() {
        let cipher = cipher();
        let sealed = cipher.seal(b"payload to protect").unwrap();
        for idx in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[idx] ^= 0x01;
            assert!(
                cipher.open(&tampered).is_err(),
                "tampered byte {idx} was accepted"
            );
        }
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let cipher = cipher();
        assert!(matches!(
            cipher.open(&[0u8; NONCE_LEN - 1]),
            Err(CryptoError::CiphertextTooShort)
        ));
    }

    #[test]
    fn wrong_key_fails_open() {
        let sealed = cipher().seal(b"secret").unwrap();
        let other = SecretCipher::new(&[8u8; 32]).unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn long_master_key_uses_first_32_bytes() {
        let long = SecretCipher::new(&[7u8; 48]).unwrap();
        let sealed = long.seal(b"secret").unwrap();
        assert_eq!(cipher().open(&sealed).unwrap(), b"secret");
    }

    #[test]
    fn short_master_key_is_rejected() {
        assert!(matches!(
            SecretCipher::new(&[0u8; 16]),
            Err(CryptoError::KeyTooShort { expected: 32, actual: 16 })
        ));
    }
}
