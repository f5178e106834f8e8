use chrono::Utc;
use common::change::sort_for_apply;
use common::{BatchResponse, ChangeRejection, WriteChange};
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, TransactionTrait};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::entity::applied_change;
use crate::error::AppError;

use super::tables::{ApplierRegistry, ChangeError};

/// Apply one batch of changes for one principal.
///
/// The whole batch runs in a single transaction; each change runs in a
/// nested transaction (savepoint) so one failure rolls back only itself and
/// siblings continue. Nothing outside the batch observes partial effects.
///
/// Changes are reordered by table priority first (foreign-key parents
/// before dependents, stable otherwise), then checked against the
/// idempotency ledger: a change id this principal already applied is
/// reported applied and skipped without re-execution.
#[instrument(skip(db, registry, changes), fields(changes = changes.len()))]
pub async fn apply_batch(
    db: &DatabaseConnection,
    registry: &ApplierRegistry,
    principal: &str,
    mut changes: Vec<WriteChange>,
    max_batch_size: usize,
) -> Result<BatchResponse, AppError> {
    if changes.len() > max_batch_size {
        return Err(AppError::Validation(format!(
            "batch of {} changes exceeds the limit of {max_batch_size}",
            changes.len()
        )));
    }

    sort_for_apply(&mut changes);

    let txn = db.begin().await?;

    let mut applied = Vec::new();
    let mut responses = Vec::new();
    let mut errors = Vec::new();

    for change in &changes {
        if change.id.trim().is_empty() {
            errors.push(ChangeRejection {
                id: change.id.clone(),
                error: "change id must be a non-empty string".into(),
            });
            continue;
        }

        let replayed = applied_change::Entity::find_by_id((
            principal.to_string(),
            change.id.clone(),
        ))
        .one(&txn)
        .await?
        .is_some();
        if replayed {
            debug!(change_id = %change.id, "change already applied, skipping replay");
            applied.push(change.id.clone());
            continue;
        }

        let savepoint = txn.begin().await?;
        match apply_one(&savepoint, registry, principal, change).await {
            Ok(row) => {
                savepoint.commit().await?;
                applied.push(change.id.clone());
                if !row.is_null() {
                    responses.push(row);
                }
            }
            Err(e) => {
                if let Err(rollback_err) = savepoint.rollback().await {
                    warn!(change_id = %change.id, error = %rollback_err, "savepoint rollback failed");
                }
                warn!(
                    change_id = %change.id,
                    table = %change.table,
                    error = %e,
                    "change rejected"
                );
                errors.push(ChangeRejection {
                    id: change.id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    txn.commit().await?;

    Ok(BatchResponse {
        success: errors.is_empty(),
        applied,
        responses,
        errors,
    })
}

/// Apply a single change and ledger its id, all within the caller's
/// savepoint: a failure after partial work rolls back both together.
async fn apply_one(
    txn: &DatabaseTransaction,
    registry: &ApplierRegistry,
    principal: &str,
    change: &WriteChange,
) -> Result<Value, ChangeError> {
    let applier = registry.get(change.table);
    let row = match change.op {
        common::WriteOp::Insert => applier.insert(txn, principal, change).await?,
        common::WriteOp::Update => applier.update(txn, principal, change).await?,
        common::WriteOp::Delete => applier.delete(txn, principal, change).await?,
    };

    let ledger_entry = applied_change::ActiveModel {
        user_id: Set(principal.to_string()),
        change_id: Set(change.id.clone()),
        table_name: Set(change.table.as_str().to_string()),
        applied_at: Set(Utc::now()),
    };
    ledger_entry.insert(txn).await?;

    Ok(row)
}
