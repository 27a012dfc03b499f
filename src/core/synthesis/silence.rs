use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;

use super::{AcousticModel, SpeechRequest, SynthesisError, SynthesisResult};
use crate::core::fingerprint::AudioFormat;

const DEFAULT_SAMPLE_RATE: u32 = 24_000;
const MS_PER_CHAR: u64 = 60;
const MIN_DURATION_MS: u64 = 250;

/// Local generator that renders silence sized to the text length.
///
/// Useful for development and load tests: it exercises the whole pipeline
/// without a model server.
pub struct SilenceModel {
    name: String,
}

impl SilenceModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn sample_count(request: &SpeechRequest, sample_rate: u32) -> u32 {
        let chars = request.text.chars().count() as u64;
        let ms = (chars * MS_PER_CHAR).max(MIN_DURATION_MS) as f64 / request.params.speed.max(0.25) as f64;
        (ms * sample_rate as f64 / 1000.0) as u32
    }
}

#[async_trait]
impl AcousticModel for SilenceModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, request: &SpeechRequest) -> SynthesisResult<Bytes> {
        let sample_rate = request.params.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        let samples = Self::sample_count(request, sample_rate);

        match request.params.format {
            AudioFormat::Pcm => Ok(Bytes::from(vec![0u8; samples as usize * 2])),
            AudioFormat::Wav => {
                let spec = hound::WavSpec {
                    channels: 1,
                    sample_rate,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                };
                let mut buf = Vec::with_capacity(44 + samples as usize * 2);
                let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec)
                    .map_err(|e| SynthesisError::ProviderError(e.to_string()))?;
                for _ in 0..samples {
                    writer
                        .write_sample(0i16)
                        .map_err(|e| SynthesisError::ProviderError(e.to_string()))?;
                }
                writer
                    .finalize()
                    .map_err(|e| SynthesisError::ProviderError(e.to_string()))?;
                Ok(Bytes::from(buf))
            }
            other => Err(SynthesisError::UnsupportedFormat(other.to_string())),
        }
    }
}
