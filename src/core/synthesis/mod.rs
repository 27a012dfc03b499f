//! Acoustic model backends.
//!
//! An [`AcousticModel`] turns one block of text into a complete audio file.
//! Backends are stateless from the scheduler's point of view: the same
//! request may be issued concurrently on the primary and overflow pools.

mod http;
mod openai;
mod silence;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::{BackendConfig, BackendKind};
use crate::core::fingerprint::RenderParams;

pub use http::HttpAcousticModel;
pub use openai::{OPENAI_TTS_URL, OpenAICompatibleModel};
pub use silence::SilenceModel;

/// Errors raised while synthesizing a block.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Synthesis timed out after {0}s")]
    Timeout(u64),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Provider returned empty audio")]
    EmptyAudio,
}

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        SynthesisError::NetworkError(e.to_string())
    }
}

impl SynthesisError {
    /// Classify a send error, keeping timeouts distinguishable.
    pub(crate) fn from_send(e: reqwest::Error, timeout_seconds: u64) -> Self {
        if e.is_timeout() {
            SynthesisError::Timeout(timeout_seconds)
        } else {
            e.into()
        }
    }
}

pub type SynthesisResult<T> = Result<T, SynthesisError>;

/// One block of text to render.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
    pub model: String,
    pub voice: String,
    pub params: RenderParams,
}

/// Text-to-audio backend.
#[async_trait]
pub trait AcousticModel: Send + Sync {
    /// Backend name as configured, used in logs.
    fn name(&self) -> &str;

    /// Render the request into a complete audio file.
    async fn synthesize(&self, request: &SpeechRequest) -> SynthesisResult<Bytes>;
}

/// Build a backend from its configuration.
///
/// # Supported kinds
///
/// - `openai` - OpenAI-compatible `/v1/audio/speech` endpoint
/// - `http` - generic JSON-in, audio-out endpoint
/// - `silence` - local generator producing silent WAV/PCM, for development
pub fn create_backend(config: &BackendConfig) -> SynthesisResult<Arc<dyn AcousticModel>> {
    match config.kind {
        BackendKind::OpenAi => Ok(Arc::new(OpenAICompatibleModel::new(config)?)),
        BackendKind::Http => Ok(Arc::new(HttpAcousticModel::new(config)?)),
        BackendKind::Silence => Ok(Arc::new(SilenceModel::new(&config.name))),
    }
}

pub(crate) fn build_http_client(timeout_seconds: u64) -> SynthesisResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_seconds))
        .pool_max_idle_per_host(16)
        .build()
        .map_err(|e| SynthesisError::InvalidConfiguration(format!("HTTP client: {e}")))
}

/// Read a full audio response, mapping non-success statuses to provider errors.
pub(crate) async fn read_audio_response(
    backend: &str,
    response: reqwest::Response,
) -> SynthesisResult<Bytes> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(256).collect();
        return Err(SynthesisError::ProviderError(format!(
            "{backend} returned {status}: {snippet}"
        )));
    }

    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Err(SynthesisError::EmptyAudio);
    }
    Ok(bytes)
}
