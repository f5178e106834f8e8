use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notes")]
pub struct Model {
    /// Client-minted row id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Owning principal.
    #[serde(default)]
    pub user_id: String,

    pub title: String,

    #[serde(default)]
    pub body: Option<String>,

    /// Epoch milliseconds.
    #[serde(default)]
    pub created_at: i64,

    /// Last-write-wins comparator, epoch milliseconds.
    pub updated_at: i64,
}

impl ActiveModelBehavior for ActiveModel {}
