use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub email: String,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub virtual_keys: HasMany<super::virtual_keys::Entity>,
    #[sea_orm(has_many)]
    pub providers: HasMany<super::user_providers::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
