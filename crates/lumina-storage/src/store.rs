use std::time::Duration;

use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectOptions, ConnectionTrait, Database,
    DatabaseConnection, DbErr, EntityTrait, ExprTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Schema,
};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::entities;
use crate::entities::{daily_stats, user_providers, users, virtual_keys};

const MAX_CONNECTIONS: u32 = 25;
const MIN_CONNECTIONS: u32 = 5;
const MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// Partial update of a virtual key. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct VirtualKeyPatch {
    pub name: Option<String>,
    pub allowed_models: Option<Vec<String>>,
    pub budget_limit: Option<f64>,
}

/// Relational store adapter. All writes are single statements;
/// multi-step consistency relies on idempotent upserts.
#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, DbErr> {
        let mut options = ConnectOptions::new(database_url.to_owned());
        options
            .max_connections(MAX_CONNECTIONS)
            .min_connections(MIN_CONNECTIONS)
            .max_lifetime(MAX_LIFETIME);
        let db = Database::connect(options).await?;
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn sync(&self) -> Result<(), DbErr> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Users)
            .register(entities::VirtualKeys)
            .register(entities::UserProviders)
            .register(entities::DailyStats)
            .sync(&self.db)
            .await?;

        // Composite uniques backing the two upserts.
        self.db
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_user_providers_user_provider \
                 ON user_providers (user_id, provider)",
            )
            .await?;
        self.db
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_daily_stats_key_date \
                 ON daily_stats (key_id, date)",
            )
            .await?;
        Ok(())
    }

    // Users

    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<users::Model, DbErr> {
        let model = users::Model {
            id: Uuid::new_v4(),
            email: email.to_owned(),
            password_hash: password_hash.to_owned(),
            created_at: OffsetDateTime::now_utc(),
        };
        let active = users::ActiveModel {
            id: ActiveValue::Set(model.id),
            email: ActiveValue::Set(model.email.clone()),
            password_hash: ActiveValue::Set(model.password_hash.clone()),
            created_at: ActiveValue::Set(model.created_at),
        };
        entities::Users::insert(active).exec(&self.db).await?;
        Ok(model)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<users::Model>, DbErr> {
        entities::Users::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.db)
            .await
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> Result<Option<users::Model>, DbErr> {
        entities::Users::find_by_id(id).one(&self.db).await
    }

    // Virtual keys

    pub async fn create_virtual_key(&self, key: virtual_keys::Model) -> Result<(), DbErr> {
        let active = virtual_keys::ActiveModel {
            id: ActiveValue::Set(key.id),
            user_id: ActiveValue::Set(key.user_id),
            name: ActiveValue::Set(key.name),
            key_hash: ActiveValue::Set(key.key_hash),
            allowed_models: ActiveValue::Set(key.allowed_models),
            budget_limit: ActiveValue::Set(key.budget_limit),
            current_spend: ActiveValue::Set(key.current_spend),
            created_at: ActiveValue::Set(key.created_at),
            revoked_at: ActiveValue::Set(key.revoked_at),
        };
        entities::VirtualKeys::insert(active).exec(&self.db).await?;
        Ok(())
    }

    /// Hash lookup for the hot path. Revoked keys are never returned.
    pub async fn get_virtual_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<virtual_keys::Model>, DbErr> {
        entities::VirtualKeys::find()
            .filter(virtual_keys::Column::KeyHash.eq(key_hash))
            .filter(virtual_keys::Column::RevokedAt.is_null())
            .one(&self.db)
            .await
    }

    /// Whether a revoked key exists under this hash. Lets validation
    /// distinguish "revoked" from "never existed".
    pub async fn virtual_key_hash_revoked(&self, key_hash: &str) -> Result<bool, DbErr> {
        let count = entities::VirtualKeys::find()
            .filter(virtual_keys::Column::KeyHash.eq(key_hash))
            .filter(virtual_keys::Column::RevokedAt.is_not_null())
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }

    pub async fn get_virtual_key_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<virtual_keys::Model>, DbErr> {
        entities::VirtualKeys::find_by_id(id).one(&self.db).await
    }

    pub async fn list_virtual_keys_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<virtual_keys::Model>, DbErr> {
        entities::VirtualKeys::find()
            .filter(virtual_keys::Column::UserId.eq(user_id))
            .order_by_desc(virtual_keys::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    pub async fn revoke_virtual_key(&self, id: Uuid) -> Result<(), DbErr> {
        entities::VirtualKeys::update_many()
            .col_expr(
                virtual_keys::Column::RevokedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(virtual_keys::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn update_virtual_key(&self, id: Uuid, patch: VirtualKeyPatch) -> Result<(), DbErr> {
        let mut active = virtual_keys::ActiveModel {
            id: ActiveValue::Unchanged(id),
            ..Default::default()
        };
        if let Some(name) = patch.name {
            active.name = ActiveValue::Set(name);
        }
        if let Some(allowed_models) = patch.allowed_models {
            active.allowed_models = ActiveValue::Set(allowed_models);
        }
        if let Some(budget_limit) = patch.budget_limit {
            active.budget_limit = ActiveValue::Set(Some(budget_limit));
        }
        if !active.is_changed() {
            return Ok(());
        }
        active.update(&self.db).await?;
        Ok(())
    }

    /// Atomic `current_spend += delta`.
    pub async fn increment_key_spend(&self, key_id: Uuid, delta: f64) -> Result<(), DbErr> {
        entities::VirtualKeys::update_many()
            .col_expr(
                virtual_keys::Column::CurrentSpend,
                Expr::col(virtual_keys::Column::CurrentSpend).add(delta),
            )
            .filter(virtual_keys::Column::Id.eq(key_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // Provider credentials

    /// Upsert on `(user_id, provider)`, refreshing `updated_at`.
    pub async fn set_user_provider(
        &self,
        user_id: Uuid,
        provider: &str,
        api_key_encrypted: Vec<u8>,
    ) -> Result<(), DbErr> {
        let now = OffsetDateTime::now_utc();
        let active = user_providers::ActiveModel {
            id: ActiveValue::Set(Uuid::new_v4()),
            user_id: ActiveValue::Set(user_id),
            provider: ActiveValue::Set(provider.to_owned()),
            api_key_encrypted: ActiveValue::Set(api_key_encrypted),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        entities::UserProviders::insert(active)
            .on_conflict(
                OnConflict::columns([
                    user_providers::Column::UserId,
                    user_providers::Column::Provider,
                ])
                .update_columns([
                    user_providers::Column::ApiKeyEncrypted,
                    user_providers::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn get_user_providers(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<user_providers::Model>, DbErr> {
        entities::UserProviders::find()
            .filter(user_providers::Column::UserId.eq(user_id))
            .all(&self.db)
            .await
    }

    pub async fn remove_user_provider(&self, user_id: Uuid, provider: &str) -> Result<(), DbErr> {
        entities::UserProviders::delete_many()
            .filter(user_providers::Column::UserId.eq(user_id))
            .filter(user_providers::Column::Provider.eq(provider))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // Daily stats

    /// Upsert on `(key_id, current UTC date)` with additive accumulation.
    pub async fn upsert_daily_stat(
        &self,
        key_id: Uuid,
        tokens: i64,
        cost: f64,
    ) -> Result<(), DbErr> {
        let today = OffsetDateTime::now_utc().date();
        let active = daily_stats::ActiveModel {
            id: ActiveValue::Set(Uuid::new_v4()),
            key_id: ActiveValue::Set(key_id),
            date: ActiveValue::Set(today),
            total_tokens: ActiveValue::Set(tokens),
            total_cost: ActiveValue::Set(cost),
        };
        entities::DailyStats::insert(active)
            .on_conflict(
                OnConflict::columns([daily_stats::Column::KeyId, daily_stats::Column::Date])
                    .value(
                        daily_stats::Column::TotalTokens,
                        Expr::col((entities::DailyStats, daily_stats::Column::TotalTokens))
                            .add(tokens),
                    )
                    .value(
                        daily_stats::Column::TotalCost,
                        Expr::col((entities::DailyStats, daily_stats::Column::TotalCost)).add(cost),
                    )
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn get_daily_stats(
        &self,
        user_id: Uuid,
        from: Date,
        to: Date,
    ) -> Result<Vec<daily_stats::Model>, DbErr> {
        let key_ids: Vec<Uuid> = entities::VirtualKeys::find()
            .select_only()
            .column(virtual_keys::Column::Id)
            .filter(virtual_keys::Column::UserId.eq(user_id))
            .into_tuple()
            .all(&self.db)
            .await?;
        if key_ids.is_empty() {
            return Ok(Vec::new());
        }
        entities::DailyStats::find()
            .filter(daily_stats::Column::KeyId.is_in(key_ids))
            .filter(daily_stats::Column::Date.gte(from))
            .filter(daily_stats::Column::Date.lte(to))
            .order_by_desc(daily_stats::Column::Date)
            .all(&self.db)
            .await
    }

    pub async fn get_user_spend_total(&self, user_id: Uuid) -> Result<f64, DbErr> {
        let total: Option<Option<f64>> = entities::VirtualKeys::find()
            .select_only()
            .column_as(virtual_keys::Column::CurrentSpend.sum(), "total")
            .filter(virtual_keys::Column::UserId.eq(user_id))
            .into_tuple()
            .one(&self.db)
            .await?;
        Ok(total.flatten().unwrap_or(0.0))
    }
}
