use std::str::FromStr;

use super::{AuthApiSecret, BackendConfig, RouteConfig, parse_auth_api_secrets_json};

/// Every variable read by [`EnvConfig::load`].
pub(crate) const ENV_KEYS: &[&str] = &[
    "HOST",
    "PORT",
    "TLS_CERT_PATH",
    "TLS_KEY_PATH",
    "CACHE_PATH",
    "CACHE_TTL_SECONDS",
    "CACHE_MAX_ENTRIES",
    "CACHE_MAX_BYTES",
    "AUTH_REQUIRED",
    "AUTH_API_SECRETS_JSON",
    "AUTH_API_SECRET",
    "AUTH_API_SECRET_ID",
    "WORKER_CONCURRENCY",
    "WORKERS_PER_MODEL",
    "POP_TIMEOUT_MS",
    "WINDOW_BEHIND",
    "WINDOW_AHEAD",
    "INTENT_IDLE_TIMEOUT_SECONDS",
    "OVERFLOW_THRESHOLD",
    "OVERFLOW_MAX_CONCURRENT",
    "MAX_QUEUE_DEPTH",
    "MAX_BLOCKS_PER_REQUEST",
    "NOTIFIER_CAPACITY",
    "SYNTHESIS_BACKENDS_JSON",
    "SYNTHESIS_ROUTES_JSON",
    "DOCUMENT_SOURCE_URL",
    "DOCUMENT_CACHE_TTL_SECONDS",
    "USAGE_MAX_CHARACTERS_PER_USER",
    "CORS_ALLOWED_ORIGINS",
    "RATE_LIMIT_REQUESTS_PER_SECOND",
    "RATE_LIMIT_BURST_SIZE",
    "MAX_WEBSOCKET_CONNECTIONS",
    "MAX_CONNECTIONS_PER_IP",
];

/// Values read from the process environment. `None` means unset.
#[derive(Debug, Default)]
pub(crate) struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,

    pub cache_path: Option<String>,
    pub cache_ttl_seconds: Option<u64>,
    pub cache_max_entries: Option<u64>,
    pub cache_max_bytes: Option<u64>,

    pub auth_required: Option<bool>,
    pub auth_api_secrets: Vec<AuthApiSecret>,

    pub worker_concurrency: Option<usize>,
    pub workers_per_model: Option<usize>,
    pub pop_timeout_ms: Option<u64>,
    pub window_behind: Option<usize>,
    pub window_ahead: Option<usize>,
    pub intent_idle_timeout_seconds: Option<u64>,
    pub overflow_threshold: Option<f64>,
    pub overflow_max_concurrent: Option<usize>,
    pub max_queue_depth: Option<usize>,
    pub max_blocks_per_request: Option<usize>,
    pub notifier_capacity: Option<usize>,

    pub backends: Option<Vec<BackendConfig>>,
    pub routes: Option<Vec<RouteConfig>>,

    pub document_source_url: Option<String>,
    pub document_cache_ttl_seconds: Option<u64>,
    pub usage_max_characters_per_user: Option<u64>,

    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {key} value '{raw}': {e}").into()),
        None => Ok(None),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match env_string(key).map(|v| v.to_lowercase()) {
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => Ok(Some(true)),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => Ok(Some(false)),
        Some(v) => Err(format!("Invalid {key} value '{v}': expected true or false").into()),
        None => Ok(None),
    }
}

fn env_json<T: serde::de::DeserializeOwned>(
    key: &str,
) -> Result<Option<T>, Box<dyn std::error::Error>> {
    match env_string(key) {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| format!("Invalid {key} format: {e}").into()),
        None => Ok(None),
    }
}

impl EnvConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut auth_api_secrets = match env_string("AUTH_API_SECRETS_JSON") {
            Some(json) => parse_auth_api_secrets_json(&json)?,
            None => Vec::new(),
        };
        // Single-secret form for simple deployments
        if auth_api_secrets.is_empty()
            && let Some(secret) = env_string("AUTH_API_SECRET")
        {
            auth_api_secrets.push(AuthApiSecret {
                id: env_string("AUTH_API_SECRET_ID").unwrap_or_else(|| "default".to_string()),
                secret,
            });
        }

        Ok(Self {
            host: env_string("HOST"),
            port: env_parse("PORT")?,
            tls_cert_path: env_string("TLS_CERT_PATH"),
            tls_key_path: env_string("TLS_KEY_PATH"),

            cache_path: env_string("CACHE_PATH"),
            cache_ttl_seconds: env_parse("CACHE_TTL_SECONDS")?,
            cache_max_entries: env_parse("CACHE_MAX_ENTRIES")?,
            cache_max_bytes: env_parse("CACHE_MAX_BYTES")?,

            auth_required: env_bool("AUTH_REQUIRED")?,
            auth_api_secrets,

            worker_concurrency: env_parse("WORKER_CONCURRENCY")?,
            workers_per_model: env_parse("WORKERS_PER_MODEL")?,
            pop_timeout_ms: env_parse("POP_TIMEOUT_MS")?,
            window_behind: env_parse("WINDOW_BEHIND")?,
            window_ahead: env_parse("WINDOW_AHEAD")?,
            intent_idle_timeout_seconds: env_parse("INTENT_IDLE_TIMEOUT_SECONDS")?,
            overflow_threshold: env_parse("OVERFLOW_THRESHOLD")?,
            overflow_max_concurrent: env_parse("OVERFLOW_MAX_CONCURRENT")?,
            max_queue_depth: env_parse("MAX_QUEUE_DEPTH")?,
            max_blocks_per_request: env_parse("MAX_BLOCKS_PER_REQUEST")?,
            notifier_capacity: env_parse("NOTIFIER_CAPACITY")?,

            backends: env_json("SYNTHESIS_BACKENDS_JSON")?,
            routes: env_json("SYNTHESIS_ROUTES_JSON")?,

            document_source_url: env_string("DOCUMENT_SOURCE_URL"),
            document_cache_ttl_seconds: env_parse("DOCUMENT_CACHE_TTL_SECONDS")?,
            usage_max_characters_per_user: env_parse("USAGE_MAX_CHARACTERS_PER_USER")?,

            cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: env_parse("RATE_LIMIT_REQUESTS_PER_SECOND")?,
            rate_limit_burst_size: env_parse("RATE_LIMIT_BURST_SIZE")?,
            max_websocket_connections: env_parse("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP")?,
        })
    }
}
