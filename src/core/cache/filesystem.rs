use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, warn};

use super::{CacheBackend, CacheError, CacheResult};

/// Stores each entry as a file under `<root>/<first two key chars>/<key>`.
///
/// Writes go to a temporary sibling and are renamed into place so readers
/// never observe a partially written file. TTL is checked against the file
/// modification time on read.
pub struct FilesystemCacheBackend {
    root: PathBuf,
    default_ttl: Option<Duration>,
    entries: AtomicU64,
}

impl FilesystemCacheBackend {
    /// Create the backend, creating `root` if needed and counting existing entries.
    pub async fn new(root: impl Into<PathBuf>, default_ttl: Option<Duration>) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        let existing = count_entries(&root).await?;
        debug!(path = %root.display(), entries = existing, "Opened filesystem cache");
        Ok(Self {
            root,
            default_ttl,
            entries: AtomicU64::new(existing),
        })
    }

    fn path_for(&self, key: &str) -> CacheResult<PathBuf> {
        if key.len() < 3 || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(&key[..2]).join(key))
    }

    async fn is_expired(&self, path: &Path) -> CacheResult<bool> {
        let Some(ttl) = self.default_ttl else {
            return Ok(false);
        };
        let modified = fs::metadata(path).await?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(age > ttl)
    }
}

async fn count_entries(root: &Path) -> CacheResult<u64> {
    let mut count = 0;
    let mut shards = fs::read_dir(root).await?;
    while let Some(shard) = shards.next_entry().await? {
        if !shard.file_type().await?.is_dir() {
            continue;
        }
        let mut files = fs::read_dir(shard.path()).await?;
        while let Some(file) = files.next_entry().await? {
            if file.file_type().await?.is_file() && !file.file_name().to_string_lossy().ends_with(".tmp") {
                count += 1;
            }
        }
    }
    Ok(count)
}

#[async_trait]
impl CacheBackend for FilesystemCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => {
                if self.is_expired(&path).await? {
                    self.delete(key).await?;
                    return Ok(None);
                }
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Bytes, _ttl: Option<Duration>) -> CacheResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let existed = fs::try_exists(&path).await.unwrap_or(false);

        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, &value).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp cache file");
            }
            return Err(e.into());
        }

        if !existed {
            self.entries.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Metadata only; the file is not read.
    async fn contains(&self, key: &str) -> CacheResult<bool> {
        let path = self.path_for(key)?;
        if !fs::try_exists(&path).await? {
            return Ok(false);
        }
        match self.is_expired(&path).await {
            Ok(expired) => Ok(!expired),
            // Removed between the two checks
            Err(CacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                self.entries
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
                    .ok();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn entry_count(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    fn kind(&self) -> &'static str {
        "filesystem"
    }
}
