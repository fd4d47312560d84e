use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "virtual_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub key_hash: String,
    pub allowed_models: Vec<String>,
    pub budget_limit: Option<f64>,
    pub current_spend: f64,
    pub created_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
    #[sea_orm(belongs_to, from = "user_id", to = "id")]
    pub user: HasOne<super::users::Entity>,
    #[sea_orm(has_many)]
    pub daily_stats: HasMany<super::daily_stats::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
