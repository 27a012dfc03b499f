//! Content fingerprints for synthesized audio.
//!
//! A fingerprint is a deterministic digest of everything that affects the
//! rendered audio: normalized text, model, voice and render parameters.
//! It is the cache key and the in-flight dedup key.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::cache::{KeyHasher, XxHasher};

const FINGERPRINT_NAMESPACE: &str = "readaloud-audio";

/// Output container requested from the acoustic model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    #[default]
    Wav,
    Pcm,
    Opus,
    Flac,
    Aac,
}

impl AudioFormat {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Pcm => "pcm",
            Self::Opus => "opus",
            Self::Flac => "flac",
            Self::Aac => "aac",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Wav => "audio/wav",
            Self::Pcm => "audio/pcm",
            Self::Opus => "audio/ogg",
            Self::Flac => "audio/flac",
            Self::Aac => "audio/aac",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render parameters that change the produced audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    /// Speaking rate multiplier (0.25 to 4.0)
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub format: AudioFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

fn default_speed() -> f32 {
    1.0
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            format: AudioFormat::default(),
            sample_rate: None,
        }
    }
}

/// Collapse runs of whitespace to one space and trim the ends.
///
/// Text differing only in whitespace renders identically, so it must
/// fingerprint identically.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// 128-bit content digest rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a block of text for the given model, voice and parameters.
    pub fn compute(text: &str, model: &str, voice: &str, params: &RenderParams) -> Self {
        let normalized = normalize_text(text);

        let mut s = String::with_capacity(normalized.len() + model.len() + voice.len() + 32);
        s.push_str(model);
        s.push('|');
        s.push_str(voice);
        s.push('|');
        s.push_str(params.format.as_str());
        s.push('|');
        if let Some(sr) = params.sample_rate {
            s.push_str(&sr.to_string());
        }
        s.push('|');
        s.push_str(&format!("{:.3}", params.speed));
        s.push('|');
        s.push_str(&normalized);

        Self(XxHasher::new(FINGERPRINT_NAMESPACE).hash(&s))
    }

    /// Parse a fingerprint from its hex form, as it appears in audio URLs.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == 32 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path under which the audio is served.
    pub fn audio_ref(&self) -> String {
        format!("/audio/{}", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
