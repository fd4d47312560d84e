//! Crypto error types.

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("master key too short: expected at least {expected} bytes, got {actual}")]
    KeyTooShort { expected: usize, actual: usize },

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("ciphertext shorter than nonce")]
    CiphertextTooShort,

    #[error("decrypted credential is not valid UTF-8")]
    InvalidPlaintext(#[from] std::string::FromUtf8Error),
}
