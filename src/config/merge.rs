use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{AuthApiSecret, BackendConfig, BackendKind, RouteConfig, ServerConfig, TlsConfig};
use crate::core::scheduler::{EvictionWindow, PoolMode, SchedulerConfig};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_DOCUMENT_CACHE_TTL_SECONDS: u64 = 300;
const DEFAULT_RATE_LIMIT_RPS: u32 = 60;
const DEFAULT_RATE_LIMIT_BURST: u32 = 10;
const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// Model id served when no backends or routes are configured.
pub(crate) const FALLBACK_MODEL: &str = "default";

/// Merge environment values (base) with YAML overrides and apply defaults.
pub(crate) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let cache = yaml.cache.unwrap_or_default();
    let auth = yaml.auth.unwrap_or_default();
    let scheduler = yaml.scheduler.unwrap_or_default();
    let documents = yaml.documents.unwrap_or_default();
    let usage = yaml.usage.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let tls_yaml = server.tls.unwrap_or_default();
    let tls = if tls_yaml.enabled == Some(false) {
        None
    } else {
        let cert = tls_yaml.cert_path.or(env.tls_cert_path);
        let key = tls_yaml.key_path.or(env.tls_key_path);
        match (cert, key) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => {
                if tls_yaml.enabled == Some(true) {
                    return Err("TLS is enabled but cert_path and key_path are not set".into());
                }
                None
            }
            _ => return Err("TLS requires both cert_path and key_path".into()),
        }
    };

    let auth_api_secrets = if auth.api_secrets.is_empty() {
        env.auth_api_secrets
    } else {
        auth.api_secrets
            .into_iter()
            .map(|entry| AuthApiSecret {
                id: entry.id,
                secret: entry.secret,
            })
            .collect()
    };

    let defaults = SchedulerConfig::default();
    let scheduler = SchedulerConfig {
        worker_concurrency: scheduler
            .worker_concurrency
            .or(env.worker_concurrency)
            .unwrap_or(defaults.worker_concurrency),
        workers_per_model: scheduler
            .workers_per_model
            .or(env.workers_per_model)
            .unwrap_or(defaults.workers_per_model),
        pop_timeout: scheduler
            .pop_timeout_ms
            .or(env.pop_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.pop_timeout),
        window: EvictionWindow {
            behind: scheduler
                .window_behind
                .or(env.window_behind)
                .unwrap_or(defaults.window.behind),
            ahead: scheduler
                .window_ahead
                .or(env.window_ahead)
                .unwrap_or(defaults.window.ahead),
        },
        overflow_threshold: scheduler
            .overflow_threshold
            .or(env.overflow_threshold)
            .unwrap_or(defaults.overflow_threshold),
        overflow_max_concurrent: scheduler
            .overflow_max_concurrent
            .or(env.overflow_max_concurrent)
            .unwrap_or(defaults.overflow_max_concurrent),
        max_queue_depth: scheduler.max_queue_depth.or(env.max_queue_depth),
        max_blocks_per_request: scheduler
            .max_blocks_per_request
            .or(env.max_blocks_per_request)
            .unwrap_or(defaults.max_blocks_per_request),
        intent_idle_timeout: scheduler
            .intent_idle_timeout_seconds
            .or(env.intent_idle_timeout_seconds)
            .map(Duration::from_secs)
            .unwrap_or(defaults.intent_idle_timeout),
        maintenance_interval: defaults.maintenance_interval,
        notifier_capacity: scheduler
            .notifier_capacity
            .or(env.notifier_capacity)
            .unwrap_or(defaults.notifier_capacity),
    };

    let mut backends = yaml.backends.or(env.backends).unwrap_or_default();
    let mut routes = yaml.routes.or(env.routes).unwrap_or_default();
    if backends.is_empty() && routes.is_empty() {
        warn!(
            model = FALLBACK_MODEL,
            "No synthesis backends configured, serving silent audio"
        );
        backends.push(BackendConfig {
            name: "silence".to_string(),
            kind: BackendKind::Silence,
            url: None,
            api_key: None,
            upstream_model: None,
            timeout_seconds: 30,
        });
        routes.push(RouteConfig {
            model: FALLBACK_MODEL.to_string(),
            mode: PoolMode::Primary,
            backend: "silence".to_string(),
        });
    }

    Ok(ServerConfig {
        host: server
            .host
            .or(env.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: server.port.or(env.port).unwrap_or(DEFAULT_PORT),
        tls,

        cache_path: cache.path.or(env.cache_path).map(PathBuf::from),
        cache_ttl_seconds: cache.ttl_seconds.or(env.cache_ttl_seconds),
        cache_max_entries: cache.max_entries.or(env.cache_max_entries),
        cache_max_bytes: cache.max_bytes.or(env.cache_max_bytes),

        auth_required: auth.required.or(env.auth_required).unwrap_or(false),
        auth_api_secrets,

        scheduler,
        backends,
        routes,

        document_source_url: documents.source_url.or(env.document_source_url),
        document_cache_ttl_seconds: documents
            .cache_ttl_seconds
            .or(env.document_cache_ttl_seconds)
            .unwrap_or(DEFAULT_DOCUMENT_CACHE_TTL_SECONDS),

        usage_max_characters_per_user: usage
            .max_characters_per_user
            .or(env.usage_max_characters_per_user),

        cors_allowed_origins: security
            .cors_allowed_origins
            .or(env.cors_allowed_origins),
        rate_limit_requests_per_second: security
            .rate_limit_requests_per_second
            .or(env.rate_limit_requests_per_second)
            .unwrap_or(DEFAULT_RATE_LIMIT_RPS),
        rate_limit_burst_size: security
            .rate_limit_burst_size
            .or(env.rate_limit_burst_size)
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST),
        max_websocket_connections: security
            .max_websocket_connections
            .or(env.max_websocket_connections),
        max_connections_per_ip: security
            .max_connections_per_ip
            .or(env.max_connections_per_ip)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_IP),
    })
}
