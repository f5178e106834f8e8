use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Shared, device-independent description of a content-addressed blob.
/// One row per principal and hash; conflicting inserts keep the first row.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "blobs_meta")]
pub struct Model {
    /// Owning principal.
    #[sea_orm(primary_key, auto_increment = false)]
    #[serde(default)]
    pub user_id: String,

    /// SHA-256 content hash.
    #[sea_orm(primary_key, auto_increment = false)]
    pub content_hash: String,

    /// Size of the content in bytes.
    pub size: i64,

    #[serde(default)]
    pub mime: Option<String>,

    /// Original filename, if any device knows one.
    #[serde(default)]
    pub filename: Option<String>,

    /// Epoch milliseconds.
    #[serde(default)]
    pub created_at: i64,

    #[serde(default)]
    pub updated_at: i64,
}

impl ActiveModelBehavior for ActiveModel {}
