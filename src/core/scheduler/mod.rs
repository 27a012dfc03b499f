//! Synthesis job scheduler.
//!
//! Request flow for one block:
//!
//! 1. Fingerprint the normalized text with the model, voice and render params.
//! 2. Cache hit: report `cached` immediately, no job is created.
//! 3. Otherwise record the intent, then register with the in-flight table.
//!    A new marker enqueues one job; an existing marker just adds a waiter.
//! 4. A worker pops the job, claims the waiters' intents, synthesizes, writes
//!    the cache and clears the marker. Clearing is the single completion
//!    point: only the caller that removes the marker bills and notifies.
//!
//! Cursor moves evict queued intents outside the window; workers skip jobs
//! no waiter still wants.

mod error;
mod inflight;
mod intent;
mod notifier;
mod overflow;
mod queue;
mod routing;
mod status;
mod worker;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::accounting::{AllowAll, AuthorizationGate, LogUsage, ResourceRequest, UsageSink};
use crate::core::cache::{CacheStats, ResultCache};
use crate::core::documents::{DocumentError, DocumentSource, InMemoryDocuments};
use crate::core::fingerprint::{Fingerprint, RenderParams, normalize_text};
use crate::core::synthesis::{AcousticModel, SpeechRequest};

pub use error::{SchedulerError, SchedulerResult};
pub use inflight::{InFlightEntry, InFlightTable, Registration, Waiter};
pub use intent::{EvictionWindow, IntentSet, IntentState, SessionKey};
pub use notifier::CompletionNotifier;
pub use overflow::{OverflowRouter, WorkerRegistration};
pub use queue::{Job, JobQueue};
pub use routing::{PoolMode, RoutingTable};
pub use status::{BlockStatus, ErrorKind, StatusError, StatusUpdate};
pub use worker::{JobCounters, JobOutcome, WorkerPool, WorkerStats};

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Jobs one worker runs at once. A worker only pops when it has a free slot.
    pub worker_concurrency: usize,
    pub workers_per_model: usize,
    /// How long an idle worker waits on its queue before re-checking shutdown.
    pub pop_timeout: Duration,
    pub window: EvictionWindow,
    /// Queue depth per active worker above which jobs are offered to overflow.
    pub overflow_threshold: f64,
    pub overflow_max_concurrent: usize,
    /// Queue depth at which new work is refused when overflow cannot help.
    pub max_queue_depth: Option<usize>,
    pub max_blocks_per_request: usize,
    pub intent_idle_timeout: Duration,
    pub maintenance_interval: Duration,
    pub notifier_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 2,
            workers_per_model: 1,
            pop_timeout: Duration::from_secs(1),
            window: EvictionWindow::default(),
            overflow_threshold: 4.0,
            overflow_max_concurrent: 4,
            max_queue_depth: None,
            max_blocks_per_request: 64,
            intent_idle_timeout: Duration::from_secs(30 * 60),
            maintenance_interval: Duration::from_secs(60),
            notifier_capacity: 256,
        }
    }
}

/// A client's request for a batch of blocks.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub user_id: String,
    pub document_id: String,
    pub block_indices: Vec<usize>,
    pub cursor: usize,
    pub model: String,
    pub voice: String,
    pub params: RenderParams,
}

/// Immediate answer to a [`SynthesisRequest`].
#[derive(Debug, Clone, Default)]
pub struct RequestOutcome {
    /// One status per distinct requested index that could be answered now.
    pub statuses: Vec<StatusUpdate>,
    /// Set when some blocks were refused because the model is saturated.
    pub degraded: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub queue_depth: usize,
    pub active_workers: usize,
    pub backlog_ratio: f64,
    pub has_overflow: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub models: Vec<ModelStats>,
    pub in_flight: usize,
    pub sessions: usize,
    pub subscribed_users: usize,
    pub overflow_in_use: usize,
    pub cache: CacheStats,
    pub jobs: JobCounters,
}

pub struct Scheduler {
    config: SchedulerConfig,
    cache: Arc<ResultCache>,
    queue: JobQueue,
    intents: IntentSet,
    inflight: InFlightTable,
    notifier: CompletionNotifier,
    overflow: OverflowRouter,
    routing: RoutingTable,
    documents: Arc<dyn DocumentSource>,
    usage: Arc<dyn UsageSink>,
    gate: Arc<dyn AuthorizationGate>,
    stats: WorkerStats,
}

/// Builder for [`Scheduler`]. Unset collaborators get permissive defaults.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    cache: Option<Arc<ResultCache>>,
    routing: RoutingTable,
    documents: Option<Arc<dyn DocumentSource>>,
    usage: Option<Arc<dyn UsageSink>>,
    gate: Option<Arc<dyn AuthorizationGate>>,
}

impl SchedulerBuilder {
    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn documents(mut self, documents: Arc<dyn DocumentSource>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn usage(mut self, usage: Arc<dyn UsageSink>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn AuthorizationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn route(mut self, model: impl Into<String>, mode: PoolMode, backend: Arc<dyn AcousticModel>) -> Self {
        self.routing.insert(model, mode, backend);
        self
    }

    pub fn routing(mut self, routing: RoutingTable) -> Self {
        self.routing = routing;
        self
    }

    pub fn build(self) -> Arc<Scheduler> {
        let config = self.config;
        Arc::new(Scheduler {
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(ResultCache::in_memory())),
            queue: JobQueue::new(),
            intents: IntentSet::new(config.window),
            inflight: InFlightTable::new(),
            notifier: CompletionNotifier::new(config.notifier_capacity),
            overflow: OverflowRouter::new(config.overflow_threshold, config.overflow_max_concurrent),
            routing: self.routing,
            documents: self
                .documents
                .unwrap_or_else(|| Arc::new(InMemoryDocuments::new())),
            usage: self.usage.unwrap_or_else(|| Arc::new(LogUsage)),
            gate: self.gate.unwrap_or_else(|| Arc::new(AllowAll)),
            stats: WorkerStats::default(),
            config,
        })
    }
}

/// Distinct indices ordered nearest-first from the cursor, ahead before behind on ties.
fn order_by_proximity(indices: &[usize], cursor: usize) -> Vec<usize> {
    let mut ordered = indices.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    ordered.sort_by_key(|&index| (index.abs_diff(cursor), index < cursor));
    ordered
}

impl Scheduler {
    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            cache: None,
            routing: RoutingTable::new(),
            documents: None,
            usage: None,
            gate: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn intents(&self) -> &IntentSet {
        &self.intents
    }

    pub fn inflight(&self) -> &InFlightTable {
        &self.inflight
    }

    pub fn notifier(&self) -> &CompletionNotifier {
        &self.notifier
    }

    pub fn overflow(&self) -> &OverflowRouter {
        &self.overflow
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn job_stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Accept a batch request and answer what can be answered right away.
    ///
    /// Cached blocks come back as `cached`, everything else as `queued`
    /// (or `error`). Later transitions arrive through the notifier.
    pub async fn request_blocks(self: &Arc<Self>, request: SynthesisRequest) -> SchedulerResult<RequestOutcome> {
        if request.block_indices.len() > self.config.max_blocks_per_request {
            return Err(SchedulerError::InvalidRequest(format!(
                "at most {} blocks per request",
                self.config.max_blocks_per_request
            )));
        }
        if self.routing.resolve(&request.model, PoolMode::Primary).is_none() {
            return Err(SchedulerError::NoRoute(request.model));
        }

        let indices = order_by_proximity(&request.block_indices, request.cursor);
        if indices.is_empty() {
            return Ok(RequestOutcome::default());
        }
        let document_id = request.document_id.as_str();

        let resource = ResourceRequest {
            document_id: request.document_id.clone(),
            model: request.model.clone(),
            voice: request.voice.clone(),
            blocks: indices.len(),
        };
        if let Err(denied) = self.gate.authorize(&request.user_id, &resource).await {
            warn!(user_id = %request.user_id, reason = %denied, "Synthesis request denied");
            let error = StatusError::systemic(denied.code(), denied.to_string());
            return Ok(RequestOutcome {
                statuses: indices
                    .iter()
                    .map(|&index| StatusUpdate::error(document_id, index, error.clone()))
                    .collect(),
                degraded: None,
            });
        }

        let blocks = match self.documents.blocks(document_id).await {
            Ok(blocks) => blocks,
            Err(e) => {
                let error = match &e {
                    DocumentError::NotFound(_) => StatusError::systemic("document_not_found", e.to_string()),
                    _ => StatusError::transient("document_unavailable", e.to_string()),
                };
                warn!(document_id, error = %e, "Could not load document");
                return Ok(RequestOutcome {
                    statuses: indices
                        .iter()
                        .map(|&index| StatusUpdate::error(document_id, index, error.clone()))
                        .collect(),
                    degraded: None,
                });
            }
        };

        let session = SessionKey::new(request.user_id.clone(), request.document_id.clone());
        let mut outcome = RequestOutcome::default();

        for index in indices {
            let Some(raw) = blocks.get(index) else {
                outcome.statuses.push(StatusUpdate::error(
                    document_id,
                    index,
                    StatusError::transient(
                        "block_out_of_range",
                        format!("document has {} blocks", blocks.len()),
                    ),
                ));
                continue;
            };
            let text = normalize_text(raw);
            if text.is_empty() {
                outcome.statuses.push(StatusUpdate::error(
                    document_id,
                    index,
                    StatusError::transient("empty_block", "block has no speakable text"),
                ));
                continue;
            }

            let fingerprint = Fingerprint::compute(&text, &request.model, &request.voice, &request.params);
            match self.cache.contains(&fingerprint).await {
                Ok(true) => {
                    outcome
                        .statuses
                        .push(StatusUpdate::cached(document_id, index, &fingerprint));
                    continue;
                }
                Ok(false) => {}
                Err(e) => warn!(fingerprint = %fingerprint, error = %e, "Cache lookup failed, treating as miss"),
            }

            self.intents.add(&session, &[index], request.cursor);
            let waiter = Waiter::new(request.user_id.clone(), request.document_id.clone(), index);

            match self.inflight.register(&fingerprint, waiter.clone()) {
                Registration::Joined => {
                    debug!(fingerprint = %fingerprint, block_idx = index, "Joined in-flight job");
                    outcome.statuses.push(StatusUpdate::queued(document_id, index));
                }
                Registration::Created => {
                    let depth = self.queue.depth(&request.model);
                    if let Some(limit) = self.config.max_queue_depth
                        && depth >= limit
                        && !self.overflow_available(&request.model)
                    {
                        self.inflight.clear(&fingerprint);
                        self.intents.remove(&session, index);
                        outcome.degraded.get_or_insert_with(|| {
                            format!("model '{}' is at capacity ({depth} queued)", request.model)
                        });
                        continue;
                    }

                    let job = Job {
                        id: uuid::Uuid::new_v4(),
                        fingerprint,
                        owner: waiter,
                        model: request.model.clone(),
                        voice: request.voice.clone(),
                        params: request.params.clone(),
                        text,
                        enqueued_at: Instant::now(),
                    };
                    self.queue.enqueue(job.clone());
                    outcome.statuses.push(StatusUpdate::queued(document_id, index));

                    if self.overflow.should_overflow(&request.model, depth + 1) {
                        self.dispatch_overflow(job);
                    }
                }
            }
        }

        if let Some(reason) = &outcome.degraded {
            warn!(user_id = %request.user_id, reason = %reason, "Refused blocks at capacity");
        }
        Ok(outcome)
    }

    fn overflow_available(&self, model: &str) -> bool {
        self.routing.has_overflow(model) && self.overflow.available_slots() > 0
    }

    /// Record a new cursor and evict queued blocks outside the window.
    ///
    /// Evicted blocks are reported to all of the user's connections.
    pub fn move_cursor(&self, user_id: &str, document_id: &str, cursor: usize) -> Vec<usize> {
        let key = SessionKey::new(user_id, document_id);
        let evicted = self.intents.move_cursor(&key, cursor);
        for &index in &evicted {
            self.notifier
                .publish(user_id, StatusUpdate::evicted(document_id, index));
        }
        evicted
    }

    /// Offer a job to the overflow pool. Returns `false` when no slot or route exists.
    fn dispatch_overflow(self: &Arc<Self>, job: Job) -> bool {
        let Some(backend) = self.routing.resolve(&job.model, PoolMode::Overflow) else {
            return false;
        };
        let Some(permit) = self.overflow.try_reserve() else {
            debug!(model = %job.model, "Overflow pool saturated, leaving job to primary");
            return false;
        };

        self.stats.record_overflow_dispatch();
        debug!(model = %job.model, fingerprint = %job.fingerprint, "Dispatching job to overflow");
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            scheduler.run_job(job, backend, PoolMode::Overflow).await;
        });
        true
    }

    /// Run one job, containing panics so the caller's loop survives.
    pub async fn run_job(&self, job: Job, backend: Arc<dyn AcousticModel>, mode: PoolMode) -> JobOutcome {
        let fallback = job.clone();
        match AssertUnwindSafe(self.process_job(job, &backend, mode))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    fingerprint = %fallback.fingerprint,
                    backend = %backend.name(),
                    "Synthesis job panicked"
                );
                if mode == PoolMode::Primary {
                    self.fail_job(
                        &fallback,
                        StatusError::transient("internal_error", "synthesis worker failed"),
                    );
                }
                self.stats.record(JobOutcome::Failed);
                JobOutcome::Failed
            }
        }
    }

    async fn process_job(&self, job: Job, backend: &Arc<dyn AcousticModel>, mode: PoolMode) -> JobOutcome {
        let outcome = self.process_job_inner(job, backend, mode).await;
        self.stats.record(outcome);
        outcome
    }

    async fn process_job_inner(&self, job: Job, backend: &Arc<dyn AcousticModel>, mode: PoolMode) -> JobOutcome {
        let fingerprint = &job.fingerprint;

        // Resolved by another pool or an identical job since it was queued
        match self.cache.contains(fingerprint).await {
            Ok(true) => {
                if mode == PoolMode::Primary
                    && let Some(entry) = self.inflight.clear(fingerprint)
                {
                    self.notify_cached(&entry, fingerprint);
                }
                debug!(fingerprint = %fingerprint, "Cache already holds job result");
                return JobOutcome::ShortCircuited;
            }
            Ok(false) => {}
            Err(e) => warn!(fingerprint = %fingerprint, error = %e, "Cache check failed before synthesis"),
        }

        match mode {
            PoolMode::Primary => {
                let claimed = loop {
                    let Some(current) = self.inflight.snapshot(fingerprint) else {
                        debug!(fingerprint = %fingerprint, "Job resolved before it was claimed");
                        return JobOutcome::Stale;
                    };
                    if current.owner != job.owner {
                        debug!(fingerprint = %fingerprint, "Marker belongs to a newer job");
                        return JobOutcome::Stale;
                    }
                    let claimed: Vec<Waiter> = current
                        .waiters
                        .into_iter()
                        .filter(|w| self.intents.claim(&w.session(), w.block_idx))
                        .collect();
                    if !claimed.is_empty() {
                        break claimed;
                    }

                    // A request that joined after the snapshot keeps the job alive
                    let Some(entry) = self.inflight.clear_if(fingerprint, |entry| {
                        entry.generation == current.generation && entry.owner == job.owner
                    }) else {
                        continue;
                    };
                    for waiter in &entry.waiters {
                        self.notifier.publish(
                            &waiter.user_id,
                            StatusUpdate::evicted(&waiter.document_id, waiter.block_idx),
                        );
                    }
                    debug!(fingerprint = %fingerprint, "Skipping job no longer wanted");
                    return JobOutcome::Stale;
                };
                for waiter in &claimed {
                    self.notifier.publish(
                        &waiter.user_id,
                        StatusUpdate::processing(&waiter.document_id, waiter.block_idx),
                    );
                }
            }
            PoolMode::Overflow => {
                let wanted = self
                    .inflight
                    .waiters(fingerprint)
                    .iter()
                    .any(|w| self.intents.is_wanted(&w.session(), w.block_idx));
                if !wanted {
                    return JobOutcome::Stale;
                }
            }
        }

        let request = SpeechRequest {
            text: job.text.clone(),
            model: job.model.clone(),
            voice: job.voice.clone(),
            params: job.params.clone(),
        };
        let started = Instant::now();
        let result = backend.synthesize(&request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(audio) => match self.complete_job(&job, audio).await {
                Ok(true) => {
                    info!(
                        fingerprint = %fingerprint,
                        backend = %backend.name(),
                        pool = ?mode,
                        elapsed_ms,
                        "Synthesized block"
                    );
                    JobOutcome::Completed
                }
                Ok(false) => JobOutcome::Duplicate,
                Err(e) => {
                    error!(fingerprint = %fingerprint, error = %e, "Failed to store synthesized audio");
                    if mode == PoolMode::Primary {
                        self.fail_job(&job, StatusError::transient("cache_write_failed", e.to_string()));
                    }
                    JobOutcome::Failed
                }
            },
            Err(e) => {
                warn!(
                    fingerprint = %fingerprint,
                    backend = %backend.name(),
                    pool = ?mode,
                    elapsed_ms,
                    error = %e,
                    "Synthesis failed"
                );
                // Overflow failures leave the job with the primary pool
                if mode == PoolMode::Primary {
                    self.fail_job(&job, StatusError::transient("synthesis_failed", e.to_string()));
                }
                JobOutcome::Failed
            }
        }
    }

    /// Store audio for a job and resolve its waiters.
    ///
    /// Returns `true` only for the caller that cleared the in-flight marker;
    /// that caller bills the owner exactly once.
    pub async fn complete_job(&self, job: &Job, audio: bytes::Bytes) -> SchedulerResult<bool> {
        self.cache.put(&job.fingerprint, audio).await?;

        let Some(entry) = self.inflight.clear(&job.fingerprint) else {
            debug!(fingerprint = %job.fingerprint, "Job already resolved elsewhere");
            return Ok(false);
        };
        self.usage.record(&entry.owner.user_id, job.characters()).await;
        self.notify_cached(&entry, &job.fingerprint);
        Ok(true)
    }

    fn notify_cached(&self, entry: &InFlightEntry, fingerprint: &Fingerprint) {
        for waiter in &entry.waiters {
            self.intents.remove(&waiter.session(), waiter.block_idx);
            self.notifier.publish(
                &waiter.user_id,
                StatusUpdate::cached(&waiter.document_id, waiter.block_idx, fingerprint),
            );
        }
    }

    /// Resolve a job's waiters with an error. Not billed.
    pub fn fail_job(&self, job: &Job, error: StatusError) {
        let Some(entry) = self.inflight.clear(&job.fingerprint) else {
            return;
        };
        for waiter in &entry.waiters {
            self.intents.remove(&waiter.session(), waiter.block_idx);
            self.notifier.publish(
                &waiter.user_id,
                StatusUpdate::error(&waiter.document_id, waiter.block_idx, error.clone()),
            );
        }
    }

    /// Periodic cleanup of idle sessions and abandoned notifier channels.
    pub fn spawn_maintenance(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.config.maintenance_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let sessions = scheduler.intents.gc(scheduler.config.intent_idle_timeout);
                        let channels = scheduler.notifier.prune();
                        if sessions > 0 || channels > 0 {
                            debug!(sessions, channels, "Scheduler maintenance");
                        }
                    }
                }
            }
        })
    }

    pub fn stats(&self) -> SchedulerStats {
        let models = self
            .routing
            .primary_models()
            .into_iter()
            .map(|model| {
                let queue_depth = self.queue.depth(&model);
                ModelStats {
                    active_workers: self.overflow.active_workers(&model),
                    backlog_ratio: self.overflow.backlog_ratio(&model, queue_depth),
                    has_overflow: self.routing.has_overflow(&model),
                    queue_depth,
                    model,
                }
            })
            .collect();

        SchedulerStats {
            models,
            in_flight: self.inflight.len(),
            sessions: self.intents.session_count(),
            subscribed_users: self.notifier.channel_count(),
            overflow_in_use: self.overflow.in_use(),
            cache: self.cache.stats(),
            jobs: self.stats.snapshot(),
        }
    }
}
