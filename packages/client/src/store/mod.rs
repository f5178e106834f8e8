pub mod catalog;
pub mod objects;

use std::path::Path;

use common::ContentHash;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::error::StoreError;
use self::catalog::{BlobRecord, Catalog, HealthState};
use self::objects::ObjectStore;

/// Caller-supplied metadata for a `put`.
#[derive(Clone, Debug, Default)]
pub struct PutMeta {
    pub filename: Option<String>,
    /// Explicit MIME type; inferred from the filename when absent.
    pub mime: Option<String>,
}

/// Outcome of a catalog/object reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanReport {
    pub added: u32,
    pub updated: u32,
    pub deleted: u32,
    pub errors: Vec<String>,
}

/// Aggregate integrity counts over the whole catalog.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HealthReport {
    pub total_blobs: u32,
    pub healthy: u32,
    pub missing: u32,
    pub modified: u32,
    pub relocated: u32,
    pub total_size: u64,
}

/// Content-addressable blob store with a durable metadata catalog.
///
/// Owned exclusively by one device instance; the catalog is never shared
/// between processes.
pub struct ContentStore {
    objects: ObjectStore,
    catalog: Mutex<Catalog>,
}

impl ContentStore {
    pub async fn open(root: &Path, max_size: u64) -> Result<Self, StoreError> {
        let objects = ObjectStore::open(root.join("objects"), max_size).await?;
        let catalog = Catalog::new(root.join("catalog.json"));
        Ok(Self {
            objects,
            catalog: Mutex::new(catalog),
        })
    }

    /// Store bytes and catalog them.
    ///
    /// Content already cataloged under the same hash is deduplicated: the
    /// existing record is returned unchanged, with no second write and no
    /// error.
    pub async fn put(&self, data: &[u8], meta: PutMeta) -> Result<BlobRecord, StoreError> {
        let hash = ContentHash::of(data);
        let mut catalog = self.catalog.lock().await;

        if let Some(existing) = catalog.get(&hash.to_hex()).await {
            return Ok(existing);
        }

        let (hash, _) = self.objects.write(data).await?;
        let now = common::change::epoch_ms_now();
        let record = BlobRecord {
            content_hash: hash.to_hex(),
            size: data.len() as u64,
            mime: meta
                .mime
                .unwrap_or_else(|| infer_mime(meta.filename.as_deref())),
            filename: meta.filename,
            created_at: now,
            modified_at: now,
            storage_location: ObjectStore::relative_path(&hash),
            health: HealthState::Healthy,
        };
        catalog.insert(record.clone()).await?;
        Ok(record)
    }

    pub async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
        self.objects.read(hash).await
    }

    pub async fn stat(&self, hash: &ContentHash) -> Result<Option<BlobRecord>, StoreError> {
        Ok(self.catalog.lock().await.get(&hash.to_hex()).await)
    }

    pub async fn list(&self) -> Result<Vec<BlobRecord>, StoreError> {
        Ok(self.catalog.lock().await.list().await)
    }

    /// Remove bytes and catalog entry. Unknown hashes are an error.
    pub async fn delete(&self, hash: &ContentHash) -> Result<(), StoreError> {
        let mut catalog = self.catalog.lock().await;
        if catalog.get(&hash.to_hex()).await.is_none() {
            return Err(StoreError::NotFound(hash.to_hex()));
        }
        self.objects.remove(hash).await?;
        catalog.remove(&hash.to_hex()).await?;
        Ok(())
    }

    /// Change the display filename. Bytes and hash are untouched.
    pub async fn rename(&self, hash: &ContentHash, filename: &str) -> Result<(), StoreError> {
        let renamed = self
            .catalog
            .lock()
            .await
            .set_filename(&hash.to_hex(), filename)
            .await?;
        if !renamed {
            return Err(StoreError::NotFound(hash.to_hex()));
        }
        Ok(())
    }

    /// Reconcile the catalog against the physical object tree.
    ///
    /// Unknown physical objects are cataloged with inferred metadata;
    /// catalog entries without bytes are dropped; size drift refreshes the
    /// entry. Per-object failures land in the report and never abort the
    /// pass.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<ScanReport, StoreError> {
        let (present, walk_errors) = self.objects.enumerate().await?;
        let mut report = ScanReport {
            errors: walk_errors,
            ..Default::default()
        };

        let mut catalog = self.catalog.lock().await;
        let mut seen = std::collections::HashSet::new();

        for hash in present {
            let hex = hash.to_hex();
            seen.insert(hex.clone());

            let size = match self.objects.size_of(&hash).await {
                Ok(Some(size)) => size,
                Ok(None) => {
                    report
                        .errors
                        .push(format!("object {hex} vanished during scan"));
                    continue;
                }
                Err(e) => {
                    report.errors.push(format!("cannot stat object {hex}: {e}"));
                    continue;
                }
            };

            match catalog.get(&hex).await {
                None => {
                    let now = common::change::epoch_ms_now();
                    catalog
                        .stage(BlobRecord {
                            content_hash: hex,
                            size,
                            mime: infer_mime(None),
                            filename: None,
                            created_at: now,
                            modified_at: now,
                            storage_location: ObjectStore::relative_path(&hash),
                            health: HealthState::Healthy,
                        })
                        .await;
                    report.added += 1;
                }
                Some(mut record) if record.size != size => {
                    record.size = size;
                    record.modified_at = common::change::epoch_ms_now();
                    record.health = HealthState::Healthy;
                    catalog.stage(record).await;
                    report.updated += 1;
                }
                Some(_) => {}
            }
        }

        for record in catalog.list().await {
            if !seen.contains(&record.content_hash) {
                catalog.stage_remove(&record.content_hash).await;
                report.deleted += 1;
            }
        }

        catalog.persist().await?;
        info!(
            added = report.added,
            updated = report.updated,
            deleted = report.deleted,
            errors = report.errors.len(),
            "scan complete"
        );
        Ok(report)
    }

    /// Probe every catalog entry and classify its physical state.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<HealthReport, StoreError> {
        let mut catalog = self.catalog.lock().await;
        let mut report = HealthReport::default();

        for mut record in catalog.list().await {
            report.total_blobs += 1;
            report.total_size += record.size;

            let state = self.classify(&record).await;
            match state {
                HealthState::Healthy => report.healthy += 1,
                HealthState::Missing => report.missing += 1,
                HealthState::Modified => report.modified += 1,
                HealthState::Relocated => {
                    // Repoint at the canonical location we found it under.
                    if let Ok(hash) = ContentHash::from_hex(&record.content_hash) {
                        record.storage_location = ObjectStore::relative_path(&hash);
                    }
                    report.relocated += 1;
                }
            }
            record.health = state;
            catalog.stage(record).await;
        }

        catalog.persist().await?;
        Ok(report)
    }

    async fn classify(&self, record: &BlobRecord) -> HealthState {
        let Ok(hash) = ContentHash::from_hex(&record.content_hash) else {
            return HealthState::Missing;
        };

        let recorded = self.objects.root().join(&record.storage_location);
        match tokio::fs::metadata(&recorded).await {
            Ok(meta) if meta.len() == record.size => HealthState::Healthy,
            Ok(_) => HealthState::Modified,
            Err(_) => {
                let canonical = self.objects.object_path(&hash);
                if canonical != recorded && tokio::fs::try_exists(&canonical).await.unwrap_or(false)
                {
                    HealthState::Relocated
                } else {
                    HealthState::Missing
                }
            }
        }
    }

    /// Drop all catalog entries. Used on identity reset before a rescan.
    pub async fn reset_catalog(&self) -> Result<(), StoreError> {
        self.catalog.lock().await.purge().await
    }
}

fn infer_mime(filename: Option<&str>) -> String {
    filename
        .map(|name| mime_guess::from_path(name).first_or_octet_stream().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
