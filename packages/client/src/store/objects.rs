use std::path::{Path, PathBuf};

use common::ContentHash;
use tokio::fs;

use crate::error::StoreError;

/// Physical content-addressed object tree.
///
/// Objects live in a git-style sharded layout under `root`:
/// `{root}/{first 2 hex chars}/{remaining 62 hex chars}`. Writes stage
/// through `{root}/.tmp` and land with an atomic rename, so a crashed write
/// never leaves a partial object at a hash-derived path.
pub struct ObjectStore {
    root: PathBuf,
    max_size: u64,
}

impl ObjectStore {
    pub async fn open(root: PathBuf, max_size: u64) -> Result<Self, StoreError> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(".tmp")).await?;
        Ok(Self { root, max_size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical location for a hash, relative to the store root.
    pub fn relative_path(hash: &ContentHash) -> String {
        format!("{}/{}", hash.shard_dir(), hash.object_name())
    }

    pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.shard_dir()).join(hash.object_name())
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(".tmp").join(uuid::Uuid::new_v4().to_string())
    }

    /// Store bytes, returning the hash and whether a new object was written.
    ///
    /// Content already present is never rewritten.
    pub async fn write(&self, data: &[u8]) -> Result<(ContentHash, bool), StoreError> {
        if data.len() as u64 > self.max_size {
            return Err(StoreError::SizeLimitExceeded {
                actual: data.len() as u64,
                limit: self.max_size,
            });
        }

        let hash = ContentHash::of(data);
        let target = self.object_path(&hash);

        if fs::try_exists(&target).await? {
            return Ok((hash, false));
        }

        let staging = self.temp_path();
        if let Err(e) = fs::write(&staging, data).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        Ok((hash, true))
    }

    pub async fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.object_path(hash)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(hash.to_hex()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn contains(&self, hash: &ContentHash) -> Result<bool, StoreError> {
        Ok(fs::try_exists(self.object_path(hash)).await?)
    }

    /// Remove an object. Returns `false` if it was not present.
    pub async fn remove(&self, hash: &ContentHash) -> Result<bool, StoreError> {
        match fs::remove_file(self.object_path(hash)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn size_of(&self, hash: &ContentHash) -> Result<Option<u64>, StoreError> {
        match fs::metadata(self.object_path(hash)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Walk the shard tree and list every object present on disk.
    ///
    /// Entries that are not valid hash paths are skipped; per-entry read
    /// failures are collected instead of aborting the walk.
    pub async fn enumerate(&self) -> Result<(Vec<ContentHash>, Vec<String>), StoreError> {
        let mut found = Vec::new();
        let mut errors = Vec::new();

        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            let shard_name = shard.file_name().to_string_lossy().to_string();
            if shard_name.len() != 2 || !shard_name.chars().all(|c| c.is_ascii_hexdigit()) {
                continue; // .tmp and anything foreign
            }

            let mut objects = match fs::read_dir(shard.path()).await {
                Ok(rd) => rd,
                Err(e) => {
                    errors.push(format!("cannot read shard {shard_name}: {e}"));
                    continue;
                }
            };

            loop {
                let entry = match objects.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        errors.push(format!("cannot walk shard {shard_name}: {e}"));
                        break;
                    }
                };

                let name = entry.file_name().to_string_lossy().to_string();
                if name.len() != 62 || !name.chars().all(|c| c.is_ascii_hexdigit()) {
                    continue;
                }

                match ContentHash::from_hex(&format!("{shard_name}{name}")) {
                    Ok(hash) => found.push(hash),
                    Err(e) => errors.push(format!("bad object name {shard_name}/{name}: {e}")),
                }
            }
        }

        Ok((found, errors))
    }
}
