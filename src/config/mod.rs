//! Configuration module for the read-along gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use readaloud_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::scheduler::{PoolMode, SchedulerConfig};

mod env;
mod merge;
mod validation;
mod yaml;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// API secret authentication entry with a client identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthApiSecret {
    pub id: String,
    pub secret: String,
}

/// Kind of acoustic backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible `/v1/audio/speech`
    #[serde(rename = "openai")]
    OpenAi,
    /// Generic JSON POST returning audio bytes
    Http,
    /// Local silent WAV generator for development
    Silence,
}

/// A named acoustic backend.
///
/// # Example YAML
/// ```yaml
/// backends:
///   - name: local-gpu
///     kind: http
///     url: "http://10.0.0.5:8000/synthesize"
///   - name: cloud
///     kind: openai
///     api_key: "sk-..."
///     upstream_model: "tts-1"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub kind: BackendKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model name sent upstream when it differs from the client-facing model id
    #[serde(default)]
    pub upstream_model: Option<String>,
    #[serde(default = "default_backend_timeout")]
    pub timeout_seconds: u64,
}

fn default_backend_timeout() -> u64 {
    30
}

/// Maps a client-facing model id and pool to a backend name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteConfig {
    pub model: String,
    #[serde(default = "default_route_mode")]
    pub mode: PoolMode,
    pub backend: String,
}

fn default_route_mode() -> PoolMode {
    PoolMode::Primary
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway, including:
/// - Server settings (host, port, TLS)
/// - Result cache settings
/// - Authentication settings
/// - Scheduler tuning, acoustic backends and routes
/// - Document source and usage quota
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Result cache (filesystem or memory)
    pub cache_path: Option<PathBuf>, // if None, use in-memory cache
    /// No expiry when unset
    pub cache_ttl_seconds: Option<u64>,
    /// Entry budget for the in-memory cache; unbounded when unset
    pub cache_max_entries: Option<u64>,
    /// Byte budget for the in-memory cache
    pub cache_max_bytes: Option<u64>,

    // Authentication configuration
    pub auth_api_secrets: Vec<AuthApiSecret>,
    pub auth_required: bool,

    // Scheduler
    pub scheduler: SchedulerConfig,
    pub backends: Vec<BackendConfig>,
    pub routes: Vec<RouteConfig>,

    // Documents
    /// Remote document source; in-memory registry only when unset
    pub document_source_url: Option<String>,
    pub document_cache_ttl_seconds: u64,

    // Usage
    /// Per-user character quota; unlimited when unset
    pub usage_max_characters_per_user: Option<u64>,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

/// Implement Drop to zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        for backend in &mut self.backends {
            if let Some(ref mut key) = backend.api_key {
                key.zeroize();
            }
        }
        for secret in &mut self.auth_api_secrets {
            secret.secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded in main.rs, so by now it is part of the process environment
        let yaml_config = yaml::YamlConfig::from_file(path)?;

        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_auth_api_secrets(&self.auth_api_secrets)?;
        validation::validate_auth_required(self.auth_required, &self.auth_api_secrets)?;
        validation::validate_scheduler(&self.scheduler)?;
        validation::validate_backends(&self.backends)?;
        validation::validate_routes(&self.routes, &self.backends)?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Check if API secret authentication is configured
    pub fn has_api_secret_auth(&self) -> bool {
        !self.auth_api_secrets.is_empty()
    }

    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|backend| backend.name == name)
    }
}

pub(crate) fn parse_auth_api_secrets_json(
    json_str: &str,
) -> Result<Vec<AuthApiSecret>, Box<dyn std::error::Error>> {
    #[derive(serde::Deserialize)]
    struct AuthApiSecretJson {
        id: String,
        secret: String,
    }

    let secrets: Vec<AuthApiSecretJson> = serde_json::from_str(json_str)
        .map_err(|e| format!("Invalid AUTH_API_SECRETS_JSON format: {e}"))?;

    Ok(secrets
        .into_iter()
        .map(|entry| AuthApiSecret {
            id: entry.id,
            secret: entry.secret,
        })
        .collect())
}

#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        host: "localhost".to_string(),
        port: 3001,
        tls: None,
        cache_path: None,
        cache_ttl_seconds: None,
        cache_max_entries: None,
        cache_max_bytes: None,
        auth_api_secrets: Vec::new(),
        auth_required: false,
        scheduler: SchedulerConfig::default(),
        backends: vec![BackendConfig {
            name: "silence".to_string(),
            kind: BackendKind::Silence,
            url: None,
            api_key: None,
            upstream_model: None,
            timeout_seconds: 30,
        }],
        routes: vec![RouteConfig {
            model: "default".to_string(),
            mode: PoolMode::Primary,
            backend: "silence".to_string(),
        }],
        document_source_url: None,
        document_cache_ttl_seconds: 300,
        usage_max_characters_per_user: None,
        cors_allowed_origins: None,
        rate_limit_requests_per_second: 60,
        rate_limit_burst_size: 10,
        max_websocket_connections: None,
        max_connections_per_ip: 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        for key in super::env::ENV_KEYS {
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_address_and_flags() {
        let mut config = test_config();
        assert_eq!(config.address(), "localhost:3001");
        assert!(!config.is_tls_enabled());
        assert!(!config.has_api_secret_auth());

        config.auth_api_secrets.push(AuthApiSecret {
            id: "client".to_string(),
            secret: "s".to_string(),
        });
        assert!(config.has_api_secret_auth());
        assert_eq!(config.backend("silence").unwrap().kind, BackendKind::Silence);
        assert!(config.backend("missing").is_none());
    }

    #[test]
    fn test_parse_auth_api_secrets_json() {
        let secrets =
            parse_auth_api_secrets_json(r#"[{"id":"a","secret":"x"},{"id":"b","secret":"y"}]"#)
                .unwrap();
        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets[1].id, "b");

        assert!(parse_auth_api_secrets_json("not json").is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3001);
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].kind, BackendKind::Silence);
        assert_eq!(config.routes[0].model, "default");
        assert!(config.cache_ttl_seconds.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PORT", "9100");
            env::set_var("WORKER_CONCURRENCY", "3");
            env::set_var("WINDOW_AHEAD", "32");
            env::set_var("POP_TIMEOUT_MS", "250");
            env::set_var("AUTH_REQUIRED", "true");
            env::set_var(
                "AUTH_API_SECRETS_JSON",
                r#"[{"id":"reader-app","secret":"s3cret"}]"#,
            );
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.scheduler.worker_concurrency, 3);
        assert_eq!(config.scheduler.window.ahead, 32);
        assert_eq!(config.scheduler.window.behind, 8);
        assert_eq!(config.scheduler.pop_timeout, Duration::from_millis(250));
        assert!(config.auth_required);
        assert_eq!(config.auth_api_secrets[0].id, "reader-app");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PORT", "not-a-port");
        }

        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("PORT"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_auth_required_without_secrets_fails() {
        cleanup_env_vars();
        unsafe {
            env::set_var("AUTH_REQUIRED", "true");
        }

        assert!(ServerConfig::from_env().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PORT", "4000");
            env::set_var("HOST", "127.0.0.1");
        }

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
server:
  port: 5000
scheduler:
  worker_concurrency: 2
  window_behind: 4
  max_queue_depth: 500
backends:
  - name: local
    kind: http
    url: "http://127.0.0.1:9000/synthesize"
  - name: cloud
    kind: openai
    api_key: "sk-test"
routes:
  - model: narrator
    backend: local
  - model: narrator
    mode: overflow
    backend: cloud
usage:
  max_characters_per_user: 100000
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.scheduler.window.behind, 4);
        assert_eq!(config.scheduler.max_queue_depth, Some(500));
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[1].mode, PoolMode::Overflow);
        assert_eq!(config.usage_max_characters_per_user, Some(100_000));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_unknown_backend_route() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
backends:
  - name: local
    kind: silence
routes:
  - model: narrator
    backend: nowhere
"#,
        )
        .unwrap();

        let err = ServerConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    #[serial]
    fn test_from_file_missing() {
        cleanup_env_vars();
        let err = ServerConfig::from_file(&PathBuf::from("/nonexistent/config.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
