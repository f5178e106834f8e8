use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// The closed set of tables that participate in sync.
///
/// Resolved once at startup into appliers; nothing dispatches on free-form
/// table name strings. The enum doubles as the wire encoding (snake_case).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    BlobsMeta,
    Works,
    Assets,
    DeviceBlobs,
    Notes,
    Annotations,
}

impl SyncTable {
    pub const ALL: [SyncTable; 6] = [
        SyncTable::BlobsMeta,
        SyncTable::Works,
        SyncTable::Assets,
        SyncTable::DeviceBlobs,
        SyncTable::Notes,
        SyncTable::Annotations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTable::BlobsMeta => "blobs_meta",
            SyncTable::Works => "works",
            SyncTable::Assets => "assets",
            SyncTable::DeviceBlobs => "device_blobs",
            SyncTable::Notes => "notes",
            SyncTable::Annotations => "annotations",
        }
    }

    /// Apply order within a batch. Tables referenced by foreign keys come
    /// before their dependents; unrelated tables keep arrival order because
    /// the batch sort is stable.
    pub fn apply_priority(&self) -> u8 {
        match self {
            SyncTable::BlobsMeta => 0,
            SyncTable::Works => 1,
            SyncTable::Assets => 2,
            SyncTable::DeviceBlobs => 3,
            SyncTable::Notes => 4,
            SyncTable::Annotations => 5,
        }
    }

    /// Tables whose identity is derived from content rather than a
    /// client-minted row id. Conflicting inserts keep the existing row.
    pub fn is_content_keyed(&self) -> bool {
        matches!(self, SyncTable::BlobsMeta | SyncTable::DeviceBlobs)
    }
}

impl fmt::Display for SyncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation kind carried by a [`WriteChange`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

/// Queue lifecycle of a change on the client.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    #[default]
    Pending,
    Syncing,
    Applied,
    Error,
}

/// A single pending mutation.
///
/// `id` is the client-chosen idempotency key: re-submitting an applied
/// change is a server-side no-op. `payload` is a full row snapshot for the
/// target table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WriteChange {
    pub id: String,
    pub table: SyncTable,
    pub op: WriteOp,
    #[schema(value_type = Object)]
    pub payload: Value,
    /// Enqueue time, epoch milliseconds. Doubles as the LWW comparator for
    /// delete tombstones.
    pub created_at: i64,
    pub status: ChangeStatus,
    pub retry_count: u32,
}

impl WriteChange {
    /// Build a fresh pending change with a minted UUIDv7 id.
    pub fn new(table: SyncTable, op: WriteOp, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            table,
            op,
            payload,
            created_at: epoch_ms_now(),
            status: ChangeStatus::Pending,
            retry_count: 0,
        }
    }
}

/// Current wall-clock time as epoch milliseconds.
pub fn epoch_ms_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Reorder a batch for application: stable sort by table priority, so
/// foreign-key parents land before dependents while arrival order is kept
/// everywhere else.
pub fn sort_for_apply(changes: &mut [WriteChange]) {
    changes.sort_by_key(|c| c.table.apply_priority());
}

/// Body of `POST /sync/batch`.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BatchRequest {
    pub changes: Vec<WriteChange>,
}

/// A change that failed inside an otherwise successful batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChangeRejection {
    pub id: String,
    pub error: String,
}

/// Response of `POST /sync/batch`.
///
/// `applied` lists every change id that succeeded (including last-write-wins
/// no-ops and idempotent replays); `responses` carries the applied rows.
/// A change appears in exactly one of `applied` / `errors`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct BatchResponse {
    pub success: bool,
    pub applied: Vec<String>,
    #[schema(value_type = Vec<Object>)]
    pub responses: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ChangeRejection>,
}

/// One row of the device coordination read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceBlobStatus {
    pub content_hash: String,
    pub present_on_this_device: bool,
    pub present_elsewhere: bool,
}

impl DeviceBlobStatus {
    /// Known to exist on some device but not fetchable locally.
    pub fn is_orphaned(&self) -> bool {
        !self.present_on_this_device && self.present_elsewhere
    }
}
