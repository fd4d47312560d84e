use sea_orm::entity::prelude::*;
use time::Date;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "daily_stats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub key_id: Uuid,
    pub date: Date,
    pub total_tokens: i64,
    pub total_cost: f64,
    #[sea_orm(belongs_to, from = "key_id", to = "id")]
    pub virtual_key: HasOne<super::virtual_keys::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
