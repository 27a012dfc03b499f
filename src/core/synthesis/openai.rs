//! OpenAI-compatible speech backend.
//!
//! - Endpoint: `POST {url}` (default `https://api.openai.com/v1/audio/speech`)
//! - Output: mp3, opus, aac, flac, wav, pcm
//! - Speed: 0.25 to 4.0

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tracing::debug;

use super::{
    AcousticModel, SpeechRequest, SynthesisError, SynthesisResult, build_http_client,
    read_audio_response,
};
use crate::config::BackendConfig;

/// OpenAI TTS API endpoint
pub const OPENAI_TTS_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Backend for OpenAI's speech API and servers that mimic it.
pub struct OpenAICompatibleModel {
    name: String,
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    upstream_model: Option<String>,
    timeout_seconds: u64,
}

impl OpenAICompatibleModel {
    pub fn new(config: &BackendConfig) -> SynthesisResult<Self> {
        let url = config.url.clone().unwrap_or_else(|| OPENAI_TTS_URL.to_string());
        if url == OPENAI_TTS_URL && config.api_key.is_none() {
            return Err(SynthesisError::InvalidConfiguration(format!(
                "backend '{}' targets api.openai.com but has no api_key",
                config.name
            )));
        }

        Ok(Self {
            name: config.name.clone(),
            client: build_http_client(config.timeout_seconds)?,
            url,
            api_key: config.api_key.clone(),
            upstream_model: config.upstream_model.clone(),
            timeout_seconds: config.timeout_seconds,
        })
    }

    fn build_http_request(&self, request: &SpeechRequest) -> reqwest::RequestBuilder {
        let model = self.upstream_model.as_deref().unwrap_or(&request.model);
        let mut body = json!({
            "model": model,
            "input": request.text,
            "voice": request.voice,
            "response_format": request.params.format.as_str(),
        });

        // Only send speed when it differs from the default
        let speed = request.params.speed.clamp(0.25, 4.0);
        if (speed - 1.0).abs() > 0.001 {
            body["speed"] = json!(speed);
        }

        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }
}

impl Drop for OpenAICompatibleModel {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

#[async_trait]
impl AcousticModel for OpenAICompatibleModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, request: &SpeechRequest) -> SynthesisResult<Bytes> {
        debug!(
            backend = %self.name,
            model = %request.model,
            chars = request.text.len(),
            "Sending OpenAI speech request"
        );
        let response = self
            .build_http_request(request)
            .send()
            .await
            .map_err(|e| SynthesisError::from_send(e, self.timeout_seconds))?;
        read_audio_response(&self.name, response).await
    }
}
