//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, broadcast};

use readaloud_gateway::ServerConfig;
use readaloud_gateway::config::{BackendConfig, BackendKind, RouteConfig};
use readaloud_gateway::core::accounting::UsageSink;
use readaloud_gateway::core::scheduler::{
    BlockStatus, PoolMode, SchedulerConfig, StatusUpdate,
};
use readaloud_gateway::core::synthesis::{AcousticModel, SpeechRequest, SynthesisResult};

/// Acoustic model that counts calls and can be held shut until released.
pub struct CountingModel {
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
}

impl CountingModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    /// Every call blocks until [`CountingModel::release`] is called.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
            gate: Some(Semaphore::new(0)),
        })
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1_000);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

#[async_trait]
impl AcousticModel for CountingModel {
    fn name(&self) -> &str {
        "counting"
    }

    async fn synthesize(&self, request: &SpeechRequest) -> SynthesisResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().push(request.text.clone());
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        Ok(Bytes::from(format!("audio:{}", request.text)))
    }
}

/// Usage sink that keeps every record.
#[derive(Default)]
pub struct RecordingUsage {
    records: Mutex<Vec<(String, u64)>>,
}

impl RecordingUsage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<(String, u64)> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl UsageSink for RecordingUsage {
    async fn record(&self, user_id: &str, characters: u64) {
        self.records.lock().push((user_id.to_string(), characters));
    }
}

pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        pop_timeout: Duration::from_millis(50),
        ..SchedulerConfig::default()
    }
}

pub fn blocks(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("Sentence number {i}.")).collect()
}

/// Receive updates until one matches, or panic after `timeout`.
pub async fn wait_for_status(
    rx: &mut broadcast::Receiver<StatusUpdate>,
    block_idx: usize,
    status: BlockStatus,
    timeout: Duration,
) -> StatusUpdate {
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(update) if update.block_idx == block_idx && update.status == status => {
                    return update;
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("notifier closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {status:?} status for block {block_idx}"))
}

/// Poll `check` until it holds, or panic after `timeout`.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Server configuration with the silence backend serving model "default".
pub fn server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        cache_path: None,
        cache_ttl_seconds: None,
        cache_max_entries: None,
        cache_max_bytes: None,
        auth_api_secrets: Vec::new(),
        auth_required: false,
        scheduler: scheduler_config(),
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
