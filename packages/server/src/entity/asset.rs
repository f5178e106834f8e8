use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A file attached to a work, pointing at content-addressed bytes.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assets")]
pub struct Model {
    /// Client-minted row id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Owning principal.
    #[serde(default)]
    pub user_id: String,

    #[serde(default)]
    pub work_id: Option<String>,

    #[sea_orm(belongs_to, from = "work_id", to = "id")]
    pub work: BelongsTo<Option<super::work::Entity>>,

    /// Hash of the underlying blob; bytes live on devices, not here.
    #[serde(default)]
    pub content_hash: Option<String>,

    #[serde(default)]
    pub filename: Option<String>,

    /// Asset kind as the clients classify it (e.g. "pdf", "image").
    #[serde(default)]
    pub kind: Option<String>,

    /// Epoch milliseconds.
    #[serde(default)]
    pub created_at: i64,

    /// Last-write-wins comparator, epoch milliseconds.
    pub updated_at: i64,

    #[sea_orm(has_many)]
    pub annotations: HasMany<super::annotation::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
