use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Top-level document a principal is reading or writing about.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "works")]
pub struct Model {
    /// Client-minted row id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Owning principal.
    #[serde(default)]
    pub user_id: String,

    pub title: String,

    /// Author list, JSON as the clients produce it.
    #[serde(default)]
    pub authors: Option<Json>,

    /// Epoch milliseconds.
    #[serde(default)]
    pub created_at: i64,

    /// Last-write-wins comparator, epoch milliseconds.
    pub updated_at: i64,

    #[sea_orm(has_many)]
    pub assets: HasMany<super::asset::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
