use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use hive_protocol::{CheckpointManifest, KernelError};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Where the kernel keeps the blob between ticks.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Bytes last saved under `key`, or `None` before the first save.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn save(&self, key: &str, tick: u64, blob: &[u8]) -> Result<CheckpointManifest>;
    async fn manifest(&self, key: &str) -> Result<Option<CheckpointManifest>>;
}

pub fn describe(key: &str, tick: u64, blob: &[u8]) -> CheckpointManifest {
    CheckpointManifest {
        key: key.to_owned(),
        tick,
        saved_at: Utc::now(),
        size: blob.len() as u64,
        sha256: sha256_bytes(blob),
    }
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Check `blob` against the manifest written with it.
pub fn verify(manifest: &CheckpointManifest, blob: &[u8]) -> Result<(), KernelError> {
    let actual = sha256_bytes(blob);
    if manifest.size != blob.len() as u64 || manifest.sha256 != actual {
        return Err(KernelError::CorruptCheckpoint(format!(
            "digest mismatch for {} at tick {}: expected {} ({} bytes), found {} ({} bytes)",
            manifest.key,
            manifest.tick,
            manifest.sha256,
            manifest.size,
            actual,
            blob.len()
        )));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !key.starts_with('.');
    if !valid {
        bail!("invalid checkpoint key {key:?}");
    }
    Ok(())
}

/// Stores each key as `<key>.blob.json` plus `<key>.manifest.json` under
/// `<root>/checkpoints`.
///
/// A save first writes the new manifest as `<key>.manifest.next.json`, then
/// moves the blob into place, then promotes the pending manifest. Every file
/// is replaced atomically, so an interrupted save leaves either the old pair
/// or a new blob whose pending manifest describes it. Reads settle that
/// state before looking at the pair.
#[derive(Debug)]
pub struct FileCheckpointStore {
    root: PathBuf,
    verify: bool,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            verify: true,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir().join(format!("{key}.blob.json"))
    }

    fn manifest_path(&self, key: &str) -> PathBuf {
        self.dir().join(format!("{key}.manifest.json"))
    }

    fn pending_manifest_path(&self, key: &str) -> PathBuf {
        self.dir().join(format!("{key}.manifest.next.json"))
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.write_locks.lock();
        guard
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("failed writing {tmp:?}"))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("failed moving {tmp:?} into place"))?;
        Ok(())
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }
        let bytes = fs::read(path)
            .await
            .with_context(|| format!("failed reading {path:?}"))?;
        Ok(Some(bytes))
    }

    async fn read_manifest(path: &Path) -> Result<Option<CheckpointManifest>> {
        let Some(bytes) = Self::read_optional(path).await? else {
            return Ok(None);
        };
        let manifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed parsing checkpoint manifest {path:?}"))?;
        Ok(Some(manifest))
    }

    /// Finish or discard a save that stopped before its manifest was
    /// promoted. Caller holds the key's write lock.
    async fn settle(&self, key: &str) -> Result<()> {
        let pending_path = self.pending_manifest_path(key);
        let pending = match Self::read_manifest(&pending_path).await {
            Ok(Some(pending)) => Some(pending),
            Ok(None) => return Ok(()),
            Err(error) => {
                warn!(%error, "unreadable pending manifest");
                None
            }
        };
        let blob = Self::read_optional(&self.blob_path(key)).await?;
        let complete = match (&pending, &blob) {
            (Some(pending), Some(blob)) => verify(pending, blob).is_ok(),
            _ => false,
        };
        if complete {
            warn!(tick = ?pending.map(|m| m.tick), "completing interrupted checkpoint save");
            fs::rename(&pending_path, self.manifest_path(key))
                .await
                .with_context(|| format!("failed promoting {pending_path:?}"))?;
        } else {
            warn!("discarding manifest of an interrupted checkpoint save");
            fs::remove_file(&pending_path)
                .await
                .with_context(|| format!("failed removing {pending_path:?}"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    #[instrument(skip(self))]
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        self.settle(key).await?;

        let Some(blob) = Self::read_optional(&self.blob_path(key)).await? else {
            debug!("no checkpoint stored yet");
            return Ok(None);
        };
        if self.verify {
            match Self::read_manifest(&self.manifest_path(key)).await? {
                Some(manifest) => verify(&manifest, &blob)?,
                None => warn!("checkpoint has no manifest, loading unverified"),
            }
        }
        debug!(size = blob.len(), "checkpoint loaded");
        Ok(Some(blob))
    }

    #[instrument(skip(self, blob), fields(size = blob.len()))]
    async fn save(&self, key: &str, tick: u64, blob: &[u8]) -> Result<CheckpointManifest> {
        validate_key(key)?;
        let dir = self.dir();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create checkpoint dir {dir:?}"))?;

        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let manifest = describe(key, tick, blob);
        let payload =
            serde_json::to_vec_pretty(&manifest).context("failed serializing checkpoint manifest")?;
        let pending_path = self.pending_manifest_path(key);
        Self::write_atomic(&pending_path, &payload).await?;
        Self::write_atomic(&self.blob_path(key), blob).await?;
        fs::rename(&pending_path, self.manifest_path(key))
            .await
            .with_context(|| format!("failed promoting {pending_path:?}"))?;
        debug!(sha256 = %manifest.sha256, "checkpoint saved");
        Ok(manifest)
    }

    async fn manifest(&self, key: &str) -> Result<Option<CheckpointManifest>> {
        validate_key(key)?;
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        self.settle(key).await?;
        Self::read_manifest(&self.manifest_path(key)).await
    }
}

/// Keeps checkpoints in process memory. Used by tests and embedded hosts
/// that persist the blob themselves.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<CheckpointManifest>)>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place raw bytes under `key` without a manifest, as a host restoring
    /// a blob from elsewhere would.
    pub fn seed(&self, key: impl Into<String>, blob: impl Into<Vec<u8>>) {
        self.entries.lock().insert(key.into(), (blob.into(), None));
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).map(|(blob, _)| blob.clone())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock();
        let Some((blob, manifest)) = entries.get(key) else {
            return Ok(None);
        };
        if let Some(manifest) = manifest {
            verify(manifest, blob)?;
        }
        Ok(Some(blob.clone()))
    }

    async fn save(&self, key: &str, tick: u64, blob: &[u8]) -> Result<CheckpointManifest> {
        let manifest = describe(key, tick, blob);
        self.entries
            .lock()
            .insert(key.to_owned(), (blob.to_vec(), Some(manifest.clone())));
        Ok(manifest)
    }

    async fn manifest(&self, key: &str) -> Result<Option<CheckpointManifest>> {
        Ok(self
            .entries
            .lock()
            .get(key)
            .and_then(|(_, manifest)| manifest.clone()))
    }
}
