use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::accounting::QuotaLedger;
use crate::core::cache::{
    CacheBackend, FilesystemCacheBackend, MemoryCacheBackend, ResultCache,
};
use crate::core::documents::{DocumentSource, HttpDocumentSource, InMemoryDocuments, LayeredDocuments};
use crate::core::scheduler::{RoutingTable, Scheduler, WorkerPool};
use crate::core::synthesis::{AcousticModel, create_backend};
use crate::errors::app_error::{AppError, AppResult};

const DOCUMENT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Shared application state.
pub struct AppState {
    pub config: ServerConfig,
    pub scheduler: Arc<Scheduler>,
    /// Locally registered documents, also the first layer of the scheduler's source
    pub documents: Arc<InMemoryDocuments>,
    pub ledger: Arc<QuotaLedger>,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, usize>,
    shutdown: CancellationToken,
    workers: Mutex<Option<WorkerPool>>,
}

/// Build one backend per configured name and map routes onto them.
pub fn build_routing(config: &ServerConfig) -> AppResult<RoutingTable> {
    let mut backends: HashMap<&str, Arc<dyn AcousticModel>> = HashMap::new();
    for backend in &config.backends {
        backends.insert(backend.name.as_str(), create_backend(backend)?);
    }

    let mut routing = RoutingTable::new();
    for route in &config.routes {
        let backend = backends.get(route.backend.as_str()).ok_or_else(|| {
            AppError::Config(format!(
                "Route for model '{}' references unknown backend '{}'",
                route.model, route.backend
            ))
        })?;
        routing.insert(route.model.clone(), route.mode, Arc::clone(backend));
    }
    Ok(routing)
}

async fn build_cache(config: &ServerConfig) -> AppResult<Arc<ResultCache>> {
    let ttl = config.cache_ttl_seconds.map(Duration::from_secs);
    let backend: Arc<dyn CacheBackend> = match &config.cache_path {
        Some(path) => Arc::new(FilesystemCacheBackend::new(path.clone(), ttl).await?),
        None => Arc::new(MemoryCacheBackend::new(
            config.cache_max_entries,
            config.cache_max_bytes,
            ttl,
        )),
    };
    info!(backend = backend.kind(), entries = backend.entry_count(), "Result cache ready");
    Ok(Arc::new(ResultCache::new(backend, ttl)))
}

impl AppState {
    /// Build the cache, document source, backends and scheduler from config.
    ///
    /// Workers are not started; call [`AppState::start_workers`].
    pub async fn new(config: ServerConfig) -> AppResult<Arc<Self>> {
        let cache = build_cache(&config).await?;
        let routing = build_routing(&config)?;

        let documents = Arc::new(InMemoryDocuments::new());
        let remote: Option<Arc<dyn DocumentSource>> = match &config.document_source_url {
            Some(url) => Some(Arc::new(HttpDocumentSource::new(
                url,
                Duration::from_secs(config.document_cache_ttl_seconds),
                DOCUMENT_FETCH_TIMEOUT,
            )?)),
            None => None,
        };
        let source = Arc::new(LayeredDocuments::new(Arc::clone(&documents), remote));

        let ledger = Arc::new(QuotaLedger::new(config.usage_max_characters_per_user));

        let scheduler = Scheduler::builder(config.scheduler.clone())
            .cache(cache)
            .documents(source)
            .usage(ledger.clone())
            .gate(ledger.clone())
            .routing(routing)
            .build();

        info!(
            routes = ?scheduler.routing(),
            window = ?config.scheduler.window,
            worker_concurrency = config.scheduler.worker_concurrency,
            "Scheduler configured"
        );

        Ok(Self::from_parts(config, scheduler, documents, ledger))
    }

    /// Assemble state around an existing scheduler.
    pub fn from_parts(
        config: ServerConfig,
        scheduler: Arc<Scheduler>,
        documents: Arc<InMemoryDocuments>,
        ledger: Arc<QuotaLedger>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            scheduler,
            documents,
            ledger,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(None),
        })
    }

    /// Start the worker pool. Calling it again is a no-op.
    pub fn start_workers(&self) {
        let mut workers = self.workers.lock();
        if workers.is_none() {
            *workers = Some(WorkerPool::start(&self.scheduler, self.shutdown.child_token()));
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop workers and wait for running jobs.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let pool = self.workers.lock().take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }
    }

    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        match self.config.max_websocket_connections {
            Some(max) => {
                self.ws_connections
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                        (count < max).then_some(count + 1)
                    })
                    .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;
            }
            None => {
                self.ws_connections.fetch_add(1, Ordering::AcqRel);
            }
        }

        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip as usize {
            drop(per_ip);
            self.ws_connections.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *per_ip += 1;
        Ok(())
    }

    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
        if let Some(mut per_ip) = self.ip_connections.get_mut(&ip) {
            *per_ip = per_ip.saturating_sub(1);
        }
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}
