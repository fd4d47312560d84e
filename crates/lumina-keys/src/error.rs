use lumina_cache::CacheError;
use lumina_crypto::CryptoError;
use sea_orm::DbErr;

/// Categorised key-service errors. Adapters' raw errors are wrapped here
/// and never exposed to clients.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid virtual key")]
    InvalidKey,

    #[error("virtual key has been revoked")]
    KeyRevoked,

    #[error("budget limit exceeded")]
    BudgetExceeded,

    #[error("provider not configured for this key")]
    ProviderNotConfigured,

    #[error("key not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    /// A stored credential failed to decrypt. Fatal: the config must not be
    /// served with the credential substituted or skipped.
    #[error("credential decryption failed")]
    Decryption(#[source] CryptoError),

    #[error("crypto error")]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] DbErr),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}
