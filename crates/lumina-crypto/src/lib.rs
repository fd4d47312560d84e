//! Lumina crypto primitives.
//!
//! Two concerns live here:
//!
//! - **Provider-credential sealing**: AES-256-GCM under the service master
//!   key, with a fresh random 96-bit nonce prepended to ciphertext+tag.
//! - **Virtual tokens**: minting (`lum_` + 256 random bits, hex) and the
//!   SHA-256 digest used as the storage and cache key.

pub mod error;
pub mod seal;
pub mod token;

pub use error::CryptoError;
pub use seal::{SecretCipher, KEY_LEN, NONCE_LEN};
pub use token::{hash_token, mint_token, TOKEN_PREFIX};
