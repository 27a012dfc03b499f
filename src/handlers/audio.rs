//! Audio retrieval by fingerprint
//!
//! Audio for a fingerprint never changes, so responses carry a strong ETag
//! and are cacheable forever by browsers and CDNs.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::core::fingerprint::Fingerprint;
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Duration of WAV payloads in milliseconds, when known
pub const AUDIO_DURATION_HEADER: &str = "x-audio-duration-ms";

fn matches_etag(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}

/// `GET /audio/{fingerprint}`
pub async fn get_audio(
    State(state): State<Arc<AppState>>,
    Path(fingerprint): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let fingerprint = Fingerprint::parse(&fingerprint)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid fingerprint '{fingerprint}'")))?;

    let audio = state
        .scheduler
        .cache()
        .get(&fingerprint)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No audio for {fingerprint}")))?;

    let etag = audio.etag();
    let etag_value = HeaderValue::from_str(&etag)
        .map_err(|e| AppError::Internal(format!("Invalid ETag: {e}")))?;

    if matches_etag(&headers, &etag) {
        debug!(fingerprint = %fingerprint, "Audio not modified");
        return Ok((
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, etag_value),
                (
                    header::CACHE_CONTROL,
                    HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL),
                ),
            ],
        )
            .into_response());
    }

    debug!(fingerprint = %fingerprint, bytes = audio.len(), "Serving audio");

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(audio.content_type),
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(audio.len()));
    response_headers.insert(header::ETAG, etag_value);
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL),
    );
    if let Some(duration) = audio.duration {
        response_headers.insert(
            AUDIO_DURATION_HEADER,
            HeaderValue::from(duration.as_millis() as u64),
        );
    }

    Ok((StatusCode::OK, response_headers, audio.bytes).into_response())
}
