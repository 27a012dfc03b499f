use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use super::{
    AcousticModel, SpeechRequest, SynthesisError, SynthesisResult, build_http_client,
    read_audio_response,
};
use crate::config::BackendConfig;

#[derive(Serialize)]
struct HttpSpeechBody<'a> {
    text: &'a str,
    model: &'a str,
    voice: &'a str,
    speed: f32,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
}

/// Generic backend for self-hosted synthesis servers.
///
/// Posts `{text, model, voice, speed, format, sample_rate}` as JSON and
/// expects the complete audio file in the response body.
pub struct HttpAcousticModel {
    name: String,
    client: reqwest::Client,
    url: url::Url,
    api_key: Option<String>,
    upstream_model: Option<String>,
    timeout_seconds: u64,
}

impl HttpAcousticModel {
    pub fn new(config: &BackendConfig) -> SynthesisResult<Self> {
        let raw = config.url.as_deref().ok_or_else(|| {
            SynthesisError::InvalidConfiguration(format!(
                "backend '{}' of kind http requires a url",
                config.name
            ))
        })?;
        let url = url::Url::parse(raw).map_err(|e| {
            SynthesisError::InvalidConfiguration(format!("backend '{}': invalid url: {e}", config.name))
        })?;

        Ok(Self {
            name: config.name.clone(),
            client: build_http_client(config.timeout_seconds)?,
            url,
            api_key: config.api_key.clone(),
            upstream_model: config.upstream_model.clone(),
            timeout_seconds: config.timeout_seconds,
        })
    }
}

impl Drop for HttpAcousticModel {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

#[async_trait]
impl AcousticModel for HttpAcousticModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, request: &SpeechRequest) -> SynthesisResult<Bytes> {
        let body = HttpSpeechBody {
            text: &request.text,
            model: self.upstream_model.as_deref().unwrap_or(&request.model),
            voice: &request.voice,
            speed: request.params.speed,
            format: request.params.format.as_str(),
            sample_rate: request.params.sample_rate,
        };

        let mut builder = self.client.post(self.url.clone()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        debug!(backend = %self.name, url = %self.url, "Sending synthesis request");
        let response = builder
            .send()
            .await
            .map_err(|e| SynthesisError::from_send(e, self.timeout_seconds))?;
        read_audio_response(&self.name, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::core::fingerprint::RenderParams;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String, timeout_seconds: u64) -> BackendConfig {
        BackendConfig {
            name: "local".to_string(),
            kind: BackendKind::Http,
            url: Some(url),
            api_key: None,
            upstream_model: None,
            timeout_seconds,
        }
    }

    fn request() -> SpeechRequest {
        SpeechRequest {
            text: "Chapter one.".to_string(),
            model: "kokoro".to_string(),
            voice: "af_bella".to_string(),
            params: RenderParams::default(),
        }
    }

    #[tokio::test]
    async fn test_posts_json_and_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .and(body_json(serde_json::json!({
                "text": "Chapter one.",
                "model": "kokoro",
                "voice": "af_bella",
                "speed": 1.0,
                "format": "wav",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF....WAVE".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let model = HttpAcousticModel::new(&config(format!("{}/synthesize", server.uri()), 5)).unwrap();
        let audio = model.synthesize(&request()).await.unwrap();
        assert_eq!(audio, Bytes::from_static(b"RIFF....WAVE"));
    }

    #[tokio::test]
    async fn test_empty_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let model = HttpAcousticModel::new(&config(server.uri(), 5)).unwrap();
        assert!(matches!(
            model.synthesize(&request()).await,
            Err(SynthesisError::EmptyAudio)
        ));
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let model = HttpAcousticModel::new(&config(server.uri(), 1)).unwrap();
        assert!(matches!(
            model.synthesize(&request()).await,
            Err(SynthesisError::Timeout(1))
        ));
    }
}
