use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::{ContentHash, SyncTable, WriteChange};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseTransaction,
    DbErr, EntityTrait, IdenStatic, IntoActiveModel, Iterable, QueryFilter,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::entity::{annotation, asset, blob_meta, device_blob, note, tombstone, work};

/// Failure of one change. Captured per change in the batch response; never
/// aborts siblings.
#[derive(Debug, Error)]
pub enum ChangeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Db(#[from] DbErr),
}

/// Conflict-policy implementation for one sync table.
#[async_trait]
pub trait TableApplier: Send + Sync {
    fn table(&self) -> SyncTable;

    async fn insert(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError>;

    async fn update(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError>;

    async fn delete(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError>;
}

/// The closed set of table appliers, resolved once at startup and indexed
/// by apply priority.
pub struct ApplierRegistry {
    appliers: [Arc<dyn TableApplier>; 6],
}

impl ApplierRegistry {
    pub fn new() -> Self {
        // Index = SyncTable::apply_priority.
        Self {
            appliers: [
                Arc::new(BlobMetaApplier),
                Arc::new(LwwApplier::<work::Entity>::new()),
                Arc::new(LwwApplier::<asset::Entity>::new()),
                Arc::new(DeviceBlobApplier),
                Arc::new(LwwApplier::<note::Entity>::new()),
                Arc::new(LwwApplier::<annotation::Entity>::new()),
            ],
        }
    }

    pub fn get(&self, table: SyncTable) -> &dyn TableApplier {
        self.appliers[table.apply_priority() as usize].as_ref()
    }
}

impl Default for ApplierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// An entity table with client ids, principal scoping and a last-write-wins
/// timestamp column.
pub trait LwwTable: EntityTrait {
    type Active: ActiveModelTrait<Entity = Self> + ActiveModelBehavior + Send;

    const TABLE: SyncTable;

    fn id_col() -> Self::Column;
    fn owner_col() -> Self::Column;
    fn updated_col() -> Self::Column;
}

impl LwwTable for work::Entity {
    type Active = work::ActiveModel;
    const TABLE: SyncTable = SyncTable::Works;

    fn id_col() -> Self::Column {
        work::Column::Id
    }
    fn owner_col() -> Self::Column {
        work::Column::UserId
    }
    fn updated_col() -> Self::Column {
        work::Column::UpdatedAt
    }
}

impl LwwTable for asset::Entity {
    type Active = asset::ActiveModel;
    const TABLE: SyncTable = SyncTable::Assets;

    fn id_col() -> Self::Column {
        asset::Column::Id
    }
    fn owner_col() -> Self::Column {
        asset::Column::UserId
    }
    fn updated_col() -> Self::Column {
        asset::Column::UpdatedAt
    }
}

impl LwwTable for note::Entity {
    type Active = note::ActiveModel;
    const TABLE: SyncTable = SyncTable::Notes;

    fn id_col() -> Self::Column {
        note::Column::Id
    }
    fn owner_col() -> Self::Column {
        note::Column::UserId
    }
    fn updated_col() -> Self::Column {
        note::Column::UpdatedAt
    }
}

impl LwwTable for annotation::Entity {
    type Active = annotation::ActiveModel;
    const TABLE: SyncTable = SyncTable::Annotations;

    fn id_col() -> Self::Column {
        annotation::Column::Id
    }
    fn owner_col() -> Self::Column {
        annotation::Column::UserId
    }
    fn updated_col() -> Self::Column {
        annotation::Column::UpdatedAt
    }
}

/// Generic applier for [`LwwTable`] entities.
pub struct LwwApplier<E>(PhantomData<fn() -> E>);

impl<E> LwwApplier<E> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for LwwApplier<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> TableApplier for LwwApplier<E>
where
    E: LwwTable + 'static,
    E::Model: DeserializeOwned + Serialize + IntoActiveModel<E::Active> + Send + Sync,
{
    fn table(&self) -> SyncTable {
        E::TABLE
    }

    async fn insert(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError> {
        lww_insert::<E>(txn, principal, change).await
    }

    async fn update(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError> {
        lww_update::<E>(txn, principal, change).await
    }

    async fn delete(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError> {
        lww_delete::<E>(txn, principal, change).await
    }
}

/// Upsert an entity row: overwrite on primary-key conflict, replay-safe.
/// The conflict action is guarded by ownership, so an id squatting on
/// another principal's row can never clobber it.
async fn lww_insert<E>(
    txn: &DatabaseTransaction,
    principal: &str,
    change: &WriteChange,
) -> Result<Value, ChangeError>
where
    E: LwwTable,
    E::Model: DeserializeOwned + Serialize + IntoActiveModel<E::Active> + Send + Sync,
{
    let map = payload_object(&change.payload)?;
    let id = required_str(map, "id")?;
    let updated_at = required_i64(map, "updated_at")?;

    if tombstone_blocks(txn, principal, E::TABLE, &id, updated_at).await? {
        // A newer delete wins; the write is a successful no-op.
        return Ok(Value::Null);
    }

    let model: E::Model = decode(E::TABLE, principal, map)?;
    let non_identity: Vec<E::Column> = E::Column::iter()
        .filter(|c| c.as_str() != E::id_col().as_str())
        .collect();

    E::insert(model.into_active_model())
        .on_conflict(
            OnConflict::column(E::id_col())
                .update_columns(non_identity)
                .action_and_where(E::owner_col().eq(principal))
                .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;

    let row = fetch_row::<E>(txn, principal, &id)
        .await?
        .ok_or_else(|| {
            ChangeError::Conflict(format!(
                "{} id {id} already belongs to another account",
                E::TABLE
            ))
        })?;
    to_json(&row)
}

/// Apply an update under last-write-wins.
///
/// The timestamp compare and the write are one conditional UPDATE
/// statement, so concurrent writers cannot interleave between them. Losing
/// the comparison is success: the stored row is the applied result.
async fn lww_update<E>(
    txn: &DatabaseTransaction,
    principal: &str,
    change: &WriteChange,
) -> Result<Value, ChangeError>
where
    E: LwwTable,
    E::Model: DeserializeOwned + Serialize + IntoActiveModel<E::Active> + Send + Sync,
{
    let map = payload_object(&change.payload)?;
    let id = required_str(map, "id")?;
    let updated_at = required_i64(map, "updated_at")?;

    if tombstone_blocks(txn, principal, E::TABLE, &id, updated_at).await? {
        return Ok(Value::Null);
    }

    let model: E::Model = decode(E::TABLE, principal, map)?;
    let result = E::update_many()
        .set(model.into_active_model())
        .filter(E::id_col().eq(id.as_str()))
        .filter(E::owner_col().eq(principal))
        .filter(E::updated_col().lte(updated_at))
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        return match fetch_row::<E>(txn, principal, &id).await? {
            // Stored row is strictly newer: the server wins.
            Some(existing) => to_json(&existing),
            // No such row: the update degrades to an insert.
            None => lww_insert::<E>(txn, principal, change).await,
        };
    }

    let row = fetch_row::<E>(txn, principal, &id)
        .await?
        .ok_or_else(|| ChangeError::Internal(format!("{} row {id} missing after update", E::TABLE)))?;
    to_json(&row)
}

/// Remove a row by id and ledger a tombstone. A miss is still success and
/// returns the same acknowledgment.
async fn lww_delete<E>(
    txn: &DatabaseTransaction,
    principal: &str,
    change: &WriteChange,
) -> Result<Value, ChangeError>
where
    E: LwwTable,
    E::Model: DeserializeOwned + Serialize + IntoActiveModel<E::Active> + Send + Sync,
{
    let map = payload_object(&change.payload)?;
    let id = required_str(map, "id")?;

    E::delete_many()
        .filter(E::id_col().eq(id.as_str()))
        .filter(E::owner_col().eq(principal))
        .exec(txn)
        .await?;

    record_tombstone(txn, principal, E::TABLE, &id, change.created_at).await?;

    Ok(serde_json::json!({ "id": id, "deleted": true }))
}

async fn fetch_row<E>(
    txn: &DatabaseTransaction,
    principal: &str,
    id: &str,
) -> Result<Option<E::Model>, ChangeError>
where
    E: LwwTable,
{
    Ok(E::find()
        .filter(E::id_col().eq(id))
        .filter(E::owner_col().eq(principal))
        .one(txn)
        .await?)
}

/// True when a tombstone at least as new as `incoming` blocks the write.
/// An older tombstone is cleared so the row can be resurrected.
async fn tombstone_blocks(
    txn: &DatabaseTransaction,
    principal: &str,
    table: SyncTable,
    row_id: &str,
    incoming: i64,
) -> Result<bool, ChangeError> {
    let key = (
        principal.to_string(),
        table.as_str().to_string(),
        row_id.to_string(),
    );
    match tombstone::Entity::find_by_id(key.clone()).one(txn).await? {
        Some(ts) if ts.deleted_at >= incoming => Ok(true),
        Some(_) => {
            tombstone::Entity::delete_by_id(key).exec(txn).await?;
            Ok(false)
        }
        None => Ok(false),
    }
}

async fn record_tombstone(
    txn: &DatabaseTransaction,
    principal: &str,
    table: SyncTable,
    row_id: &str,
    deleted_at: i64,
) -> Result<(), ChangeError> {
    let model = tombstone::ActiveModel {
        user_id: Set(principal.to_string()),
        table_name: Set(table.as_str().to_string()),
        row_id: Set(row_id.to_string()),
        deleted_at: Set(deleted_at),
    };
    // Repeated deletes keep the newest tombstone.
    tombstone::Entity::insert(model)
        .on_conflict(
            OnConflict::columns([
                tombstone::Column::UserId,
                tombstone::Column::TableName,
                tombstone::Column::RowId,
            ])
            .value(tombstone::Column::DeletedAt, Expr::value(deleted_at))
            .action_and_where(tombstone::Column::DeletedAt.lt(deleted_at))
            .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;
    Ok(())
}

/// Applier for the shared blob metadata table, keyed by
/// `(user_id, content_hash)`. Content-addressed data is never overwritten:
/// conflicting inserts keep the existing row.
pub struct BlobMetaApplier;

#[async_trait]
impl TableApplier for BlobMetaApplier {
    fn table(&self) -> SyncTable {
        SyncTable::BlobsMeta
    }

    async fn insert(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError> {
        let map = payload_object(&change.payload)?;
        let hash = required_hash(map)?;
        let model: blob_meta::Model = decode(SyncTable::BlobsMeta, principal, map)?;

        blob_meta::Entity::insert(model.into_active_model())
            .on_conflict(
                OnConflict::columns([
                    blob_meta::Column::UserId,
                    blob_meta::Column::ContentHash,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(txn)
            .await?;

        // Existing wins: the stored row is the result either way.
        let row = fetch_blob_meta(txn, principal, &hash).await?.ok_or_else(|| {
            ChangeError::Internal(format!("blobs_meta row {hash} missing after upsert"))
        })?;
        to_json(&row)
    }

    async fn update(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError> {
        let map = payload_object(&change.payload)?;
        let hash = required_hash(map)?;
        let updated_at = required_i64(map, "updated_at")?;

        // Only mutable metadata moves; size and hash are fixed by content.
        let mut patch = blob_meta::ActiveModel {
            updated_at: Set(updated_at),
            ..Default::default()
        };
        if let Some(value) = map.get("filename") {
            patch.filename = Set(value.as_str().map(str::to_string));
        }
        if let Some(value) = map.get("mime") {
            patch.mime = Set(value.as_str().map(str::to_string));
        }

        let result = blob_meta::Entity::update_many()
            .set(patch)
            .filter(blob_meta::Column::UserId.eq(principal))
            .filter(blob_meta::Column::ContentHash.eq(hash.as_str()))
            .filter(blob_meta::Column::UpdatedAt.lte(updated_at))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            return match fetch_blob_meta(txn, principal, &hash).await? {
                Some(existing) => to_json(&existing),
                None => self.insert(txn, principal, change).await,
            };
        }

        let row = fetch_blob_meta(txn, principal, &hash).await?.ok_or_else(|| {
            ChangeError::Internal(format!("blobs_meta row {hash} missing after update"))
        })?;
        to_json(&row)
    }

    async fn delete(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError> {
        let map = payload_object(&change.payload)?;
        let hash = required_hash(map)?;

        blob_meta::Entity::delete_by_id((principal.to_string(), hash.clone()))
            .exec(txn)
            .await?;

        Ok(serde_json::json!({ "content_hash": hash, "deleted": true }))
    }
}

async fn fetch_blob_meta(
    txn: &DatabaseTransaction,
    principal: &str,
    hash: &str,
) -> Result<Option<blob_meta::Model>, ChangeError> {
    Ok(
        blob_meta::Entity::find_by_id((principal.to_string(), hash.to_string()))
            .one(txn)
            .await?,
    )
}

/// Applier for per-device presence rows, keyed by
/// `(device_id, content_hash)`.
pub struct DeviceBlobApplier;

#[async_trait]
impl TableApplier for DeviceBlobApplier {
    fn table(&self) -> SyncTable {
        SyncTable::DeviceBlobs
    }

    async fn insert(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError> {
        let map = payload_object(&change.payload)?;
        let hash = required_hash(map)?;
        let device_id = required_str(map, "device_id")?;
        let model: device_blob::Model = decode(SyncTable::DeviceBlobs, principal, map)?;

        device_blob::Entity::insert(model.into_active_model())
            .on_conflict(
                OnConflict::columns([
                    device_blob::Column::DeviceId,
                    device_blob::Column::ContentHash,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(txn)
            .await?;

        let row = fetch_device_blob(txn, principal, &device_id, &hash)
            .await?
            .ok_or_else(|| {
                ChangeError::Conflict(format!(
                    "device_blobs row ({device_id}, {hash}) belongs to another account"
                ))
            })?;
        to_json(&row)
    }

    async fn update(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError> {
        let map = payload_object(&change.payload)?;
        let hash = required_hash(map)?;
        let device_id = required_str(map, "device_id")?;
        let present = required_bool(map, "present")?;
        let last_seen_at = required_i64(map, "last_seen_at")?;

        let patch = device_blob::ActiveModel {
            present: Set(present),
            last_seen_at: Set(last_seen_at),
            ..Default::default()
        };

        let result = device_blob::Entity::update_many()
            .set(patch)
            .filter(device_blob::Column::DeviceId.eq(device_id.as_str()))
            .filter(device_blob::Column::ContentHash.eq(hash.as_str()))
            .filter(device_blob::Column::UserId.eq(principal))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            // Unknown presence row: register it instead.
            return self.insert(txn, principal, change).await;
        }

        let row = fetch_device_blob(txn, principal, &device_id, &hash)
            .await?
            .ok_or_else(|| {
                ChangeError::Internal(format!(
                    "device_blobs row ({device_id}, {hash}) missing after update"
                ))
            })?;
        to_json(&row)
    }

    async fn delete(
        &self,
        txn: &DatabaseTransaction,
        principal: &str,
        change: &WriteChange,
    ) -> Result<Value, ChangeError> {
        let map = payload_object(&change.payload)?;
        let hash = required_hash(map)?;
        let device_id = required_str(map, "device_id")?;

        device_blob::Entity::delete_many()
            .filter(device_blob::Column::DeviceId.eq(device_id.as_str()))
            .filter(device_blob::Column::ContentHash.eq(hash.as_str()))
            .filter(device_blob::Column::UserId.eq(principal))
            .exec(txn)
            .await?;

        Ok(serde_json::json!({
            "device_id": device_id,
            "content_hash": hash,
            "deleted": true,
        }))
    }
}

async fn fetch_device_blob(
    txn: &DatabaseTransaction,
    principal: &str,
    device_id: &str,
    hash: &str,
) -> Result<Option<device_blob::Model>, ChangeError> {
    Ok(device_blob::Entity::find()
        .filter(device_blob::Column::DeviceId.eq(device_id))
        .filter(device_blob::Column::ContentHash.eq(hash))
        .filter(device_blob::Column::UserId.eq(principal))
        .one(txn)
        .await?)
}

fn payload_object(payload: &Value) -> Result<&Map<String, Value>, ChangeError> {
    payload
        .as_object()
        .ok_or_else(|| ChangeError::Validation("payload must be a JSON object".into()))
}

fn required_str(map: &Map<String, Value>, key: &str) -> Result<String, ChangeError> {
    match map.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(ChangeError::Validation(format!(
            "payload field '{key}' must be a non-empty string"
        ))),
    }
}

fn required_i64(map: &Map<String, Value>, key: &str) -> Result<i64, ChangeError> {
    map.get(key).and_then(Value::as_i64).ok_or_else(|| {
        ChangeError::Validation(format!("payload field '{key}' must be an integer"))
    })
}

fn required_bool(map: &Map<String, Value>, key: &str) -> Result<bool, ChangeError> {
    map.get(key).and_then(Value::as_bool).ok_or_else(|| {
        ChangeError::Validation(format!("payload field '{key}' must be a boolean"))
    })
}

/// A well-formed hex content hash; content identity is validated, never
/// trusted from the wire.
fn required_hash(map: &Map<String, Value>) -> Result<String, ChangeError> {
    let raw = required_str(map, "content_hash")?;
    ContentHash::from_hex(&raw)
        .map_err(|e| ChangeError::Validation(format!("invalid content_hash: {e}")))?;
    Ok(raw)
}

/// Deserialize a payload into a row model with the authenticated principal
/// forced into `user_id`; the wire value is ignored.
fn decode<M: DeserializeOwned>(
    table: SyncTable,
    principal: &str,
    map: &Map<String, Value>,
) -> Result<M, ChangeError> {
    let mut owned = map.clone();
    owned.insert("user_id".into(), Value::String(principal.to_string()));
    serde_json::from_value(Value::Object(owned))
        .map_err(|e| ChangeError::Validation(format!("invalid {table} payload: {e}")))
}

fn to_json<M: Serialize>(model: &M) -> Result<Value, ChangeError> {
    serde_json::to_value(model).map_err(|e| ChangeError::Internal(format!("cannot encode row: {e}")))
}
