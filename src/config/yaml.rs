use serde::Deserialize;
use std::path::PathBuf;

use super::{BackendConfig, RouteConfig};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. YAML values take
/// precedence over environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// cache:
///   path: "/var/cache/readaloud"
///   max_entries: 100000
///
/// auth:
///   required: true
///   api_secrets:
///     - id: "reader-app"
///       secret: "your-api-secret"
///
/// scheduler:
///   worker_concurrency: 2
///   workers_per_model: 2
///   window_behind: 8
///   window_ahead: 16
///   overflow_threshold: 4.0
///   max_queue_depth: 2000
///
/// backends:
///   - name: local
///     kind: http
///     url: "http://10.0.0.5:8000/synthesize"
///   - name: cloud
///     kind: openai
///     api_key: "sk-..."
///
/// routes:
///   - model: narrator
///     backend: local
///   - model: narrator
///     mode: overflow
///     backend: cloud
///
/// documents:
///   source_url: "https://library.internal"
///
/// usage:
///   max_characters_per_user: 2000000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub cache: Option<CacheYaml>,
    pub auth: Option<AuthYaml>,
    pub scheduler: Option<SchedulerYaml>,
    pub backends: Option<Vec<BackendConfig>>,
    pub routes: Option<Vec<RouteConfig>>,
    pub documents: Option<DocumentsYaml>,
    pub usage: Option<UsageYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CacheYaml {
    pub path: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub max_entries: Option<u64>,
    pub max_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub required: Option<bool>,
    #[serde(default)]
    pub api_secrets: Vec<AuthApiSecretYaml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthApiSecretYaml {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SchedulerYaml {
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
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DocumentsYaml {
    pub source_url: Option<String>,
    pub cache_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UsageYaml {
    pub max_characters_per_user: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::core::scheduler::PoolMode;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080

cache:
  path: "/tmp/cache"
  max_entries: 500

auth:
  required: true
  api_secrets:
    - id: "client-a"
      secret: "auth-secret"

scheduler:
  worker_concurrency: 2
  window_ahead: 24
  overflow_threshold: 2.5

backends:
  - name: dev
    kind: silence
  - name: cloud
    kind: openai
    api_key: "sk-test"
    timeout_seconds: 10

routes:
  - model: default
    backend: dev
  - model: default
    mode: overflow
    backend: cloud
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.as_ref().unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(8080));

        let cache = config.cache.as_ref().unwrap();
        assert_eq!(cache.path.as_deref(), Some("/tmp/cache"));
        assert_eq!(cache.max_entries, Some(500));
        assert!(cache.ttl_seconds.is_none());

        let auth = config.auth.as_ref().unwrap();
        assert_eq!(auth.required, Some(true));
        assert_eq!(auth.api_secrets[0].id, "client-a");

        let scheduler = config.scheduler.as_ref().unwrap();
        assert_eq!(scheduler.window_ahead, Some(24));
        assert_eq!(scheduler.overflow_threshold, Some(2.5));
        assert!(scheduler.window_behind.is_none());

        let backends = config.backends.as_ref().unwrap();
        assert_eq!(backends[0].kind, BackendKind::Silence);
        assert_eq!(backends[0].timeout_seconds, 30);
        assert_eq!(backends[1].kind, BackendKind::OpenAi);
        assert_eq!(backends[1].timeout_seconds, 10);

        let routes = config.routes.as_ref().unwrap();
        assert_eq!(routes[0].mode, PoolMode::Primary);
        assert_eq!(routes[1].mode, PoolMode::Overflow);
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
server:
  port: 9000
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.as_ref().unwrap().port, Some(9000));
        assert!(config.server.as_ref().unwrap().host.is_none());
        assert!(config.backends.is_none());
        assert!(config.scheduler.is_none());
    }

    #[test]
    fn test_yaml_config_rejects_unknown_backend_kind() {
        let yaml = r#"
backends:
  - name: x
    kind: carrier-pigeon
"#;
        assert!(serde_yaml::from_str::<YamlConfig>(yaml).is_err());
    }

    #[test]
    fn test_yaml_config_from_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.yaml");
        fs::write(&path, "server: [unclosed").unwrap();

        let err = YamlConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML config"));

        let missing = temp_dir.path().join("missing.yaml");
        let err = YamlConfig::from_file(&missing).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
