use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Idempotency ledger: one row per successfully applied change id.
/// Replaying a ledgered id is reported applied without re-executing.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "applied_changes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,

    /// Client-chosen change id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub change_id: String,

    pub table_name: String,

    pub applied_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
