use std::collections::HashMap;

use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use lumina_cache::KeyCache;
use lumina_crypto::{hash_token, mint_token, SecretCipher, TOKEN_PREFIX};
use lumina_storage::entities::{user_providers, virtual_keys};
use lumina_storage::{Store, VirtualKeyPatch};

use crate::config::{KeyConfig, ProviderKind};
use crate::error::KeyError;

/// Request to create a new virtual key.
#[derive(Debug, Clone)]
pub struct CreateKeyRequest {
    pub name: String,
    pub allowed_models: Vec<String>,
    pub budget_limit: Option<f64>,
}

/// Result of key creation. `virtual_key` is the plaintext token, returned
/// exactly once and never stored.
#[derive(Debug, Clone)]
pub struct CreatedKey {
    pub id: Uuid,
    pub name: String,
    pub allowed_models: Vec<String>,
    pub virtual_key: String,
    pub created_at: OffsetDateTime,
}

/// Provider info returned to the dashboard, without the secret.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub provider: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Manages virtual keys: issuance, validation, policy, and spend.
pub struct KeyService {
    store: Store,
    cache: KeyCache,
    cipher: SecretCipher,
}

impl KeyService {
    pub fn new(store: Store, cache: KeyCache, encryption_key: &[u8]) -> Result<Self, KeyError> {
        let cipher = SecretCipher::new(encryption_key)?;
        Ok(Self {
            store,
            cache,
            cipher,
        })
    }

    pub async fn create_key(
        &self,
        user_id: Uuid,
        request: CreateKeyRequest,
    ) -> Result<CreatedKey, KeyError> {
        let virtual_key = mint_token();
        let key_hash = hash_token(&virtual_key);

        let key = virtual_keys::Model {
            id: Uuid::new_v4(),
            user_id,
            name: request.name,
            key_hash,
            allowed_models: request.allowed_models,
            budget_limit: request.budget_limit,
            current_spend: 0.0,
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
        };
        self.store.create_virtual_key(key.clone()).await?;

        Ok(CreatedKey {
            id: key.id,
            name: key.name,
            allowed_models: key.allowed_models,
            virtual_key,
            created_at: key.created_at,
        })
    }

    /// Resolve a virtual token to its hot-path configuration.
    ///
    /// Cache first; on miss the durable store is consulted, every provider
    /// credential for the owning user decrypted, and the result written back
    /// to cache. A decryption failure aborts the lookup — the config is
    /// never served with a credential substituted or skipped.
    pub async fn validate_key(&self, virtual_key: &str) -> Result<KeyConfig, KeyError> {
        if !virtual_key.starts_with(TOKEN_PREFIX) {
            return Err(KeyError::InvalidKey);
        }
        let key_hash = hash_token(virtual_key);

        match self.cache.get_key_config::<KeyConfig>(&key_hash).await {
            Ok(Some(config)) => return Ok(config),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "key config cache read failed, falling back to store"),
        }

        let Some(key) = self.store.get_virtual_key_by_hash(&key_hash).await? else {
            if self.store.virtual_key_hash_revoked(&key_hash).await? {
                return Err(KeyError::KeyRevoked);
            }
            return Err(KeyError::InvalidKey);
        };

        let user_providers = self.store.get_user_providers(key.user_id).await?;
        let mut providers = HashMap::with_capacity(user_providers.len());
        for record in user_providers {
            let secret = self
                .cipher
                .open_utf8(&record.api_key_encrypted)
                .map_err(KeyError::Decryption)?;
            providers.insert(record.provider, secret);
        }

        let config = KeyConfig {
            key_id: key.id,
            user_id: key.user_id,
            name: key.name,
            allowed_models: key.allowed_models,
            providers,
            budget_limit: key.budget_limit,
            current_spend: key.current_spend,
        };

        if let Err(err) = self.cache.set_key_config(&key_hash, &config).await {
            warn!(error = %err, "failed to cache key config");
        }

        Ok(config)
    }

    /// The plaintext upstream secret for `provider`, if configured.
    pub fn provider_key<'a>(
        &self,
        config: &'a KeyConfig,
        provider: ProviderKind,
    ) -> Result<&'a str, KeyError> {
        config.provider_key(provider)
    }

    /// True iff the key's patterns admit the full `provider/model` string.
    pub fn is_model_allowed(&self, config: &KeyConfig, model: &str) -> bool {
        config.is_model_allowed(model)
    }

    /// Reject when a cap is set and already consumed.
    pub fn check_budget(&self, config: &KeyConfig, estimated_cost: f64) -> Result<(), KeyError> {
        config.check_budget(estimated_cost)
    }

    /// Bump the key's running spend and the daily rollup. Both writes are
    /// attempted; a failure in one is logged and does not undo the other, so
    /// spend is eventually consistent with logs.
    pub async fn update_spend(&self, key_id: Uuid, cost: f64, tokens: i64) {
        if let Err(err) = self.store.increment_key_spend(key_id, cost).await {
            warn!(%key_id, error = %err, "failed to increment key spend");
        }
        if let Err(err) = self.store.upsert_daily_stat(key_id, tokens, cost).await {
            warn!(%key_id, error = %err, "failed to upsert daily stat");
        }
    }

    pub async fn revoke_key(&self, key_id: Uuid, user_id: Uuid) -> Result<(), KeyError> {
        let key = self.owned_key(key_id, user_id).await?;
        self.store.revoke_virtual_key(key_id).await?;
        self.purge_cached(&key.key_hash).await;
        Ok(())
    }

    pub async fn update_key(
        &self,
        key_id: Uuid,
        user_id: Uuid,
        patch: VirtualKeyPatch,
    ) -> Result<(), KeyError> {
        let key = self.owned_key(key_id, user_id).await?;
        self.store.update_virtual_key(key_id, patch).await?;
        self.purge_cached(&key.key_hash).await;
        Ok(())
    }

    /// Seal and upsert an account-level provider credential, then drop every
    /// cached config for the user so stale plaintext is never served after
    /// rotation.
    pub async fn set_user_provider(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
        api_key: &str,
    ) -> Result<(), KeyError> {
        let sealed = self.cipher.seal(api_key.as_bytes())?;
        self.store
            .set_user_provider(user_id, provider.as_str(), sealed)
            .await?;
        self.invalidate_user_cache(user_id).await?;
        Ok(())
    }

    pub async fn remove_user_provider(
        &self,
        user_id: Uuid,
        provider: ProviderKind,
    ) -> Result<(), KeyError> {
        self.store
            .remove_user_provider(user_id, provider.as_str())
            .await?;
        self.invalidate_user_cache(user_id).await?;
        Ok(())
    }

    /// Configured providers for a user, without the secrets.
    pub async fn user_providers(&self, user_id: Uuid) -> Result<Vec<ProviderInfo>, KeyError> {
        let records = self.store.get_user_providers(user_id).await?;
        Ok(records.into_iter().map(ProviderInfo::from).collect())
    }

    pub async fn list_keys(&self, user_id: Uuid) -> Result<Vec<virtual_keys::Model>, KeyError> {
        Ok(self.store.list_virtual_keys_by_user(user_id).await?)
    }

    pub async fn get_key(
        &self,
        key_id: Uuid,
        user_id: Uuid,
    ) -> Result<virtual_keys::Model, KeyError> {
        self.owned_key(key_id, user_id).await
    }

    async fn owned_key(
        &self,
        key_id: Uuid,
        user_id: Uuid,
    ) -> Result<virtual_keys::Model, KeyError> {
        let key = self
            .store
            .get_virtual_key_by_id(key_id)
            .await?
            .ok_or(KeyError::NotFound)?;
        if key.user_id != user_id {
            return Err(KeyError::Unauthorized);
        }
        Ok(key)
    }

    async fn invalidate_user_cache(&self, user_id: Uuid) -> Result<(), KeyError> {
        let keys = self.store.list_virtual_keys_by_user(user_id).await?;
        for key in keys {
            self.purge_cached(&key.key_hash).await;
        }
        Ok(())
    }

    async fn purge_cached(&self, key_hash: &str) {
        if let Err(err) = self.cache.delete_key_config(key_hash).await {
            warn!(key_hash, error = %err, "failed to delete cached key config");
        }
    }
}

impl From<user_providers::Model> for ProviderInfo {
    fn from(record: user_providers::Model) -> Self {
        ProviderInfo {
            provider: record.provider,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

