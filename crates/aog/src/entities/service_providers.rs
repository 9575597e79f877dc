use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "service_providers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub provider_name: String,
    pub service_name: String,
    pub service_source: String,
    pub flavor: String,
    pub desc: String,
    pub method: String,
    pub url: String,
    pub auth_type: String,
    pub auth_key: String,
    pub extra_headers: String,
    pub extra_body: String,
    pub properties: String,
    pub status: String,
    pub scope: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
