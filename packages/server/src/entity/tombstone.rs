use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Delete ledger for entity rows.
///
/// A row here means "deleted as of `deleted_at`": writes at or before that
/// instant are no-ops, a strictly newer insert clears the tombstone and
/// resurrects the row deliberately.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tombstones")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub table_name: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub row_id: String,

    /// Epoch milliseconds of the delete that produced this tombstone.
    pub deleted_at: i64,
}

impl ActiveModelBehavior for ActiveModel {}
