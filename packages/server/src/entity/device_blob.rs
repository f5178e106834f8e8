use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Which device currently holds which content. Rows are upserted, flipped
/// absent, and only ever removed on an explicit identity reset.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_blobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub device_id: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub content_hash: String,

    /// Owning principal.
    #[serde(default)]
    pub user_id: String,

    pub present: bool,

    /// Epoch milliseconds.
    #[serde(default)]
    pub last_seen_at: i64,
}

impl ActiveModelBehavior for ActiveModel {}
