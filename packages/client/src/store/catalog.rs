use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;

use crate::error::StoreError;

/// Integrity classification of a cataloged blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Missing,
    Modified,
    Relocated,
}

/// Catalog entry for one stored blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobRecord {
    /// SHA-256 hex digest; the record's identity.
    pub content_hash: String,
    pub size: u64,
    pub mime: String,
    pub filename: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub modified_at: i64,
    /// Path of the bytes relative to the store root.
    pub storage_location: String,
    pub health: HealthState,
}

/// Durable metadata index kept parallel to the physical object tree.
///
/// An in-memory map backed by a JSON side-file, loaded lazily on first use.
/// A missing or unreadable side-file loads as an empty catalog, never as an
/// error. The map itself is private; every access goes through methods, and
/// mutations are persisted with an atomic temp-file swap.
pub struct Catalog {
    path: PathBuf,
    records: HashMap<String, BlobRecord>,
    loaded: bool,
}

impl Catalog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: HashMap::new(),
            loaded: false,
        }
    }

    async fn load_if_needed(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "catalog unreadable, starting empty");
                return;
            }
        };

        match serde_json::from_slice::<Vec<BlobRecord>>(&bytes) {
            Ok(records) => {
                self.records = records
                    .into_iter()
                    .map(|r| (r.content_hash.clone(), r))
                    .collect();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "catalog corrupt, starting empty");
            }
        }
    }

    pub async fn get(&mut self, content_hash: &str) -> Option<BlobRecord> {
        self.load_if_needed().await;
        self.records.get(content_hash).cloned()
    }

    pub async fn list(&mut self) -> Vec<BlobRecord> {
        self.load_if_needed().await;
        let mut all: Vec<BlobRecord> = self.records.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.content_hash.cmp(&b.content_hash))
        });
        all
    }

    pub async fn len(&mut self) -> usize {
        self.load_if_needed().await;
        self.records.len()
    }

    pub async fn insert(&mut self, record: BlobRecord) -> Result<(), StoreError> {
        self.stage(record).await;
        self.persist().await
    }

    /// Insert or replace without persisting; callers doing bulk work
    /// (e.g. a scan) stage many records and persist once.
    pub(crate) async fn stage(&mut self, record: BlobRecord) {
        self.load_if_needed().await;
        self.records.insert(record.content_hash.clone(), record);
    }

    pub(crate) async fn stage_remove(&mut self, content_hash: &str) -> bool {
        self.load_if_needed().await;
        self.records.remove(content_hash).is_some()
    }

    pub async fn remove(&mut self, content_hash: &str) -> Result<bool, StoreError> {
        let removed = self.stage_remove(content_hash).await;
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Update only the filename of an entry. Returns `false` when the hash
    /// is not cataloged.
    pub async fn set_filename(
        &mut self,
        content_hash: &str,
        filename: &str,
    ) -> Result<bool, StoreError> {
        self.load_if_needed().await;
        let Some(record) = self.records.get_mut(content_hash) else {
            return Ok(false);
        };
        record.filename = Some(filename.to_string());
        self.persist().await?;
        Ok(true)
    }

    /// Drop every entry. Used on identity reset.
    pub async fn purge(&mut self) -> Result<(), StoreError> {
        self.load_if_needed().await;
        self.records.clear();
        self.persist().await
    }

    pub(crate) async fn persist(&self) -> Result<(), StoreError> {
        let mut ordered: Vec<&BlobRecord> = self.records.values().collect();
        ordered.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));
        let bytes = serde_json::to_vec_pretty(&ordered)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, &bytes).await?;
        fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}
