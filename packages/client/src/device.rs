use common::change::epoch_ms_now;
use common::{ContentHash, DeviceBlobStatus, SyncTable, WriteChange, WriteOp};
use serde_json::json;
use tracing::{info, instrument};

use crate::api::SyncApi;
use crate::buffer::WriteBuffer;
use crate::error::{AgentError, ApiError, StoreError};
use crate::store::catalog::BlobRecord;
use crate::store::{ContentStore, PutMeta, ScanReport};

/// One device's view of the sync system.
///
/// Ties the local content store to the write buffer: every blob-level
/// mutation commits locally first, then queues the coordination-registry
/// changes that tell other devices about it.
pub struct DeviceAgent {
    device_id: String,
    store: ContentStore,
    buffer: WriteBuffer,
}

impl DeviceAgent {
    pub fn new(device_id: impl Into<String>, store: ContentStore, buffer: WriteBuffer) -> Self {
        Self {
            device_id: device_id.into(),
            store,
            buffer,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn buffer(&self) -> &WriteBuffer {
        &self.buffer
    }

    /// Store bytes locally and queue the shared blob record plus this
    /// device's presence row. Deduplicated content still refreshes
    /// presence: the server keeps the first metadata row (content-keyed
    /// tables never overwrite).
    pub async fn add_content(&self, data: &[u8], meta: PutMeta) -> Result<BlobRecord, StoreError> {
        let record = self.store.put(data, meta).await?;
        self.register_presence(&record);
        Ok(record)
    }

    /// Drop local bytes and mark this device absent. The shared blob
    /// record stays; other devices may still hold the content.
    pub async fn remove_content(&self, hash: &ContentHash) -> Result<(), StoreError> {
        self.store.delete(hash).await?;
        self.buffer.enqueue(WriteChange::new(
            SyncTable::DeviceBlobs,
            WriteOp::Update,
            json!({
                "device_id": self.device_id,
                "content_hash": hash.to_hex(),
                "present": false,
                "last_seen_at": epoch_ms_now(),
            }),
        ));
        Ok(())
    }

    /// Rename locally and propagate the new filename to the shared record.
    pub async fn rename_content(
        &self,
        hash: &ContentHash,
        filename: &str,
    ) -> Result<(), StoreError> {
        self.store.rename(hash, filename).await?;
        self.buffer.enqueue(WriteChange::new(
            SyncTable::BlobsMeta,
            WriteOp::Update,
            json!({
                "content_hash": hash.to_hex(),
                "filename": filename,
                "updated_at": epoch_ms_now(),
            }),
        ));
        Ok(())
    }

    /// Content known to exist somewhere but not fetchable from this device.
    pub async fn orphaned_blobs(&self, api: &SyncApi) -> Result<Vec<DeviceBlobStatus>, ApiError> {
        let statuses = api.device_blobs(&self.device_id).await?;
        Ok(statuses.into_iter().filter(|s| s.is_orphaned()).collect())
    }

    /// Identity reset on sign-out or account switch.
    ///
    /// Clears the outbox (any in-flight flush aborts against the epoch),
    /// purges the catalog, rebuilds it from the bytes actually on disk, and
    /// re-queues presence registrations under the new principal. Metadata
    /// of the previous identity never leaks into the next session.
    #[instrument(skip(self), fields(device_id = %self.device_id))]
    pub async fn reset_identity(&self) -> Result<ScanReport, AgentError> {
        self.buffer.clear().await?;
        self.store.reset_catalog().await?;
        let report = self.store.scan().await?;

        for record in self.store.list().await? {
            self.register_presence(&record);
        }

        info!(
            rediscovered = report.added,
            "identity reset complete, local content re-registered"
        );
        Ok(report)
    }

    fn register_presence(&self, record: &BlobRecord) {
        self.buffer.enqueue(WriteChange::new(
            SyncTable::BlobsMeta,
            WriteOp::Insert,
            json!({
                "content_hash": record.content_hash,
                "size": record.size,
                "mime": record.mime,
                "filename": record.filename,
                "created_at": record.created_at,
                "updated_at": record.modified_at,
            }),
        ));
        self.buffer.enqueue(WriteChange::new(
            SyncTable::DeviceBlobs,
            WriteOp::Insert,
            json!({
                "device_id": self.device_id,
                "content_hash": record.content_hash,
                "present": true,
                "last_seen_at": epoch_ms_now(),
            }),
        ));
    }
}
