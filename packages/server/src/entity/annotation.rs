use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A highlight or margin note anchored inside an asset.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "annotations")]
pub struct Model {
    /// Client-minted row id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Owning principal.
    #[serde(default)]
    pub user_id: String,

    #[serde(default)]
    pub asset_id: Option<String>,

    #[sea_orm(belongs_to, from = "asset_id", to = "id")]
    pub asset: BelongsTo<Option<super::asset::Entity>>,

    /// Annotation kind (e.g. "rectangle", "text-range").
    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub content: Option<String>,

    /// Anchor geometry, opaque to the server.
    #[serde(default)]
    pub geometry: Option<Json>,

    /// Presentation hints (color etc.), opaque to the server.
    #[serde(default)]
    pub style: Option<Json>,

    /// Epoch milliseconds.
    #[serde(default)]
    pub created_at: i64,

    /// Last-write-wins comparator, epoch milliseconds.
    pub updated_at: i64,
}

impl ActiveModelBehavior for ActiveModel {}
