//! Content-addressed storage for synthesized block audio.
//!
//! Audio is keyed by [`Fingerprint`], so two blocks with identical normalized
//! text and render settings share one entry. Entries are immutable once
//! written; writing the same key again simply replaces the bytes with an
//! equivalent rendition.
//!
//! Two backends are provided:
//! - [`MemoryCacheBackend`] - moka-based in-process cache, unbounded unless limits are configured
//! - [`FilesystemCacheBackend`] - one file per fingerprint under a cache directory

mod filesystem;
mod hasher;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::core::fingerprint::Fingerprint;

pub use filesystem::FilesystemCacheBackend;
pub use hasher::{KeyHasher, XxHasher};
pub use memory::MemoryCacheBackend;

/// Errors raised by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Storage backend for opaque byte values.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> CacheResult<()>;

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Approximate number of stored entries.
    fn entry_count(&self) -> u64;

    /// Short backend label used in logs and stats.
    fn kind(&self) -> &'static str;
}

/// Audio for one fingerprint as served to listeners.
#[derive(Debug, Clone)]
pub struct CachedAudio {
    pub fingerprint: Fingerprint,
    pub bytes: Bytes,
    pub content_type: &'static str,
    /// Known only for containers we can parse (WAV).
    pub duration: Option<Duration>,
}

impl CachedAudio {
    pub fn new(fingerprint: Fingerprint, bytes: Bytes) -> Self {
        let content_type = sniff_content_type(&bytes);
        let duration = wav_duration(&bytes);
        Self {
            fingerprint,
            bytes,
            content_type,
            duration,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Strong validator for HTTP caching. Content never changes for a fingerprint.
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.fingerprint)
    }
}

/// Guess a MIME type from the leading magic bytes.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => "audio/wav",
        [b'I', b'D', b'3', ..] => "audio/mpeg",
        [0xFF, 0xF1, ..] | [0xFF, 0xF9, ..] => "audio/aac",
        [0xFF, second, ..] if second & 0xE0 == 0xE0 => "audio/mpeg",
        [b'O', b'g', b'g', b'S', ..] => "audio/ogg",
        [b'f', b'L', b'a', b'C', ..] => "audio/flac",
        _ => "application/octet-stream",
    }
}

fn wav_duration(bytes: &[u8]) -> Option<Duration> {
    if sniff_content_type(bytes) != "audio/wav" {
        return None;
    }
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(
        reader.duration() as f64 / spec.sample_rate as f64,
    ))
}

/// Cache statistics exposed on the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub entries: u64,
}

/// Fingerprint-keyed audio cache shared by the scheduler and the audio endpoint.
#[derive(Clone)]
pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Option<Duration>,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Option<Duration>) -> Self {
        Self { backend, ttl }
    }

    /// Unbounded in-memory cache, mostly for tests and local runs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new(None, None, None)), None)
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> CacheResult<Option<CachedAudio>> {
        let bytes = self.backend.get(fingerprint.as_str()).await?;
        Ok(bytes.map(|bytes| CachedAudio::new(fingerprint.clone(), bytes)))
    }

    pub async fn contains(&self, fingerprint: &Fingerprint) -> CacheResult<bool> {
        self.backend.contains(fingerprint.as_str()).await
    }

    /// Store audio for a fingerprint. Rewriting an existing key is harmless.
    pub async fn put(&self, fingerprint: &Fingerprint, bytes: Bytes) -> CacheResult<CachedAudio> {
        self.backend
            .set(fingerprint.as_str(), bytes.clone(), self.ttl)
            .await?;
        debug!(fingerprint = %fingerprint, bytes = bytes.len(), "Stored synthesized audio");
        Ok(CachedAudio::new(fingerprint.clone(), bytes))
    }

    pub async fn remove(&self, fingerprint: &Fingerprint) -> CacheResult<()> {
        self.backend.delete(fingerprint.as_str()).await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            backend: self.backend.kind(),
            entries: self.backend.entry_count(),
        }
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("backend", &self.backend.kind())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::RenderParams;

    fn silent_wav(samples: u32, sample_rate: u32) -> Bytes {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buf = Vec::new();
        {
            let mut writer = hound::WavWriter::new(std::io::Cursor::new(&mut buf), spec).unwrap();
            for _ in 0..samples {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        Bytes::from(buf)
    }

    #[test]
    fn test_sniff_content_type() {
        assert_eq!(sniff_content_type(&silent_wav(10, 8000)), "audio/wav");
        assert_eq!(sniff_content_type(b"ID3\x04rest"), "audio/mpeg");
        assert_eq!(sniff_content_type(&[0xFF, 0xFB, 0x90, 0x00]), "audio/mpeg");
        assert_eq!(sniff_content_type(b"OggS\x00"), "audio/ogg");
        assert_eq!(sniff_content_type(b"fLaC\x00"), "audio/flac");
        assert_eq!(sniff_content_type(b"hello"), "application/octet-stream");
    }

    #[test]
    fn test_cached_audio_wav_duration() {
        let fp = Fingerprint::compute("hi", "m", "v", &RenderParams::default());
        let audio = CachedAudio::new(fp.clone(), silent_wav(24_000, 24_000));
        assert_eq!(audio.duration, Some(Duration::from_secs(1)));
        assert_eq!(audio.content_type, "audio/wav");
        assert_eq!(audio.etag(), format!("\"{fp}\""));
    }

    #[tokio::test]
    async fn test_result_cache_put_get() {
        let cache = ResultCache::in_memory();
        let fp = Fingerprint::compute("Hello there.", "m", "v", &RenderParams::default());

        assert!(!cache.contains(&fp).await.unwrap());
        assert!(cache.get(&fp).await.unwrap().is_none());

        cache.put(&fp, Bytes::from_static(b"ID3audio")).await.unwrap();
        assert!(cache.contains(&fp).await.unwrap());

        let audio = cache.get(&fp).await.unwrap().unwrap();
        assert_eq!(audio.bytes, Bytes::from_static(b"ID3audio"));
        assert_eq!(audio.content_type, "audio/mpeg");

        // Overwrite is idempotent
        cache.put(&fp, Bytes::from_static(b"ID3audio")).await.unwrap();
        assert_eq!(
            cache.get(&fp).await.unwrap().unwrap().bytes,
            Bytes::from_static(b"ID3audio")
        );
    }
}
