//! Virtual token minting and hashing.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Every virtual token starts with this prefix.
pub const TOKEN_PREFIX: &str = "lum_";

/// Mint a fresh virtual token: 256 uniformly random bits, hex-encoded,
/// prefixed with [`TOKEN_PREFIX`]. The plaintext is shown to the client
/// once and never stored.
pub fn mint_token() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    format!("{TOKEN_PREFIX}{}", hex::encode(raw))
}

/// SHA-256 digest of a token, lowercase hex. Used as both the storage
/// key and the cache key; collisions are treated as lookup failure.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_have_prefix_and_length() {
        for _ in 0..32 {
            let token = mint_token();
            assert!(token.starts_with(TOKEN_PREFIX));
            assert_eq!(token.len(), TOKEN_PREFIX.len() + 64);
            assert!(token[TOKEN_PREFIX.len()..]
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn minted_tokens_are_unique() {
        let a = mint_token();
        let b = mint_token();
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_64_lowercase_hex() {
        let digest = hash_token(&mint_token());
        assert_eq!(digest.len(), 64);
        assert!(digest
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_token("lum_abc"), hash_token("lum_abc"));
        assert_ne!(hash_token("lum_abc"), hash_token("lum_abd"));
    }
}
