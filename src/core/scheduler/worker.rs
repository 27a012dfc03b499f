//! Primary worker pool.
//!
//! One or more workers per routed model. Each worker runs at most
//! `worker_concurrency` jobs at once and only pops from its queue after a
//! slot frees up, so unstarted work stays queued where eviction can reach it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Scheduler;
use super::routing::PoolMode;
use crate::core::synthesis::AcousticModel;

/// How a single job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Synthesized, cached and delivered by this job.
    Completed,
    /// Synthesized but another job resolved the fingerprint first.
    Duplicate,
    /// The cache already held the result when the job started.
    ShortCircuited,
    /// No waiter wanted the block any more.
    Stale,
    Failed,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    completed: AtomicU64,
    duplicate: AtomicU64,
    short_circuited: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
    overflow_dispatched: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct JobCounters {
    pub completed: u64,
    pub duplicate: u64,
    pub short_circuited: u64,
    pub stale: u64,
    pub failed: u64,
    pub overflow_dispatched: u64,
}

impl WorkerStats {
    pub fn record(&self, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Completed => &self.completed,
            JobOutcome::Duplicate => &self.duplicate,
            JobOutcome::ShortCircuited => &self.short_circuited,
            JobOutcome::Stale => &self.stale,
            JobOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow_dispatch(&self) {
        self.overflow_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JobCounters {
        JobCounters {
            completed: self.completed.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            overflow_dispatched: self.overflow_dispatched.load(Ordering::Relaxed),
        }
    }
}

struct Worker {
    id: usize,
    model: String,
    backend: Arc<dyn AcousticModel>,
    scheduler: Arc<Scheduler>,
}

impl Worker {
    async fn run(self, shutdown: CancellationToken) {
        let _registration = self.scheduler.overflow().register_worker(&self.model);
        let concurrency = self.scheduler.config().worker_concurrency.max(1);
        let pop_timeout = self.scheduler.config().pop_timeout;
        let slots = Arc::new(Semaphore::new(concurrency));

        debug!(
            worker = self.id,
            model = %self.model,
            backend = %self.backend.name(),
            concurrency,
            "Worker started"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // pop is cancel-safe: a job is only removed when the future completes
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = self.scheduler.queue().pop(&self.model, pop_timeout) => job,
            };
            let Some(job) = job else {
                continue;
            };

            let scheduler = Arc::clone(&self.scheduler);
            let backend = Arc::clone(&self.backend);
            tokio::spawn(async move {
                let _permit = permit;
                scheduler.run_job(job, backend, PoolMode::Primary).await;
            });
        }

        // Let running jobs finish so their waiters are resolved
        if slots.acquire_many(concurrency as u32).await.is_err() {
            warn!(worker = self.id, model = %self.model, "Worker slots closed during drain");
        }
        debug!(worker = self.id, model = %self.model, "Worker stopped");
    }
}

/// Workers for every primary route plus the scheduler maintenance task.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn start(scheduler: &Arc<Scheduler>, shutdown: CancellationToken) -> Self {
        let mut handles = Vec::new();
        let per_model = scheduler.config().workers_per_model.max(1);

        for model in scheduler.routing().primary_models() {
            let Some(backend) = scheduler.routing().resolve(&model, PoolMode::Primary) else {
                continue;
            };
            for id in 0..per_model {
                let worker = Worker {
                    id,
                    model: model.clone(),
                    backend: Arc::clone(&backend),
                    scheduler: Arc::clone(scheduler),
                };
                handles.push(tokio::spawn(worker.run(shutdown.clone())));
            }
        }

        let workers = handles.len();
        handles.push(scheduler.spawn_maintenance(shutdown.clone()));
        info!(
            workers,
            models = scheduler.routing().primary_models().len(),
            "Worker pool started"
        );

        Self { handles, shutdown }
    }

    /// Number of worker tasks, excluding maintenance.
    pub fn worker_count(&self) -> usize {
        self.handles.len().saturating_sub(1)
    }

    /// Cancel every worker and wait for running jobs to drain.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::documents::InMemoryDocuments;
    use crate::core::fingerprint::RenderParams;
    use crate::core::scheduler::{BlockStatus, SchedulerConfig, SynthesisRequest};
    use crate::core::synthesis::SilenceModel;
    use std::time::Duration;

    #[test]
    fn test_stats_snapshot() {
        let stats = WorkerStats::default();
        stats.record(JobOutcome::Completed);
        stats.record(JobOutcome::Completed);
        stats.record(JobOutcome::Stale);
        stats.record_overflow_dispatch();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.stale, 1);
        assert_eq!(snapshot.overflow_dispatched, 1);
        assert_eq!(snapshot.failed, 0);
    }

    #[tokio::test]
    async fn test_pool_processes_and_notifies() {
        let docs = Arc::new(InMemoryDocuments::new());
        docs.insert("doc", vec!["Hello there.".to_string()]);
        let scheduler = Scheduler::builder(SchedulerConfig {
            pop_timeout: Duration::from_millis(50),
            ..SchedulerConfig::default()
        })
        .documents(docs)
        .route("default", PoolMode::Primary, Arc::new(SilenceModel::new("silence")))
        .build();

        let mut updates = scheduler.notifier().subscribe("alice");
        let pool = WorkerPool::start(&scheduler, CancellationToken::new());
        assert_eq!(pool.worker_count(), 1);

        scheduler
            .request_blocks(SynthesisRequest {
                user_id: "alice".into(),
                document_id: "doc".into(),
                block_indices: vec![0],
                cursor: 0,
                model: "default".into(),
                voice: "v".into(),
                params: RenderParams::default(),
            })
            .await
            .unwrap();

        let cached = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let update = updates.recv().await.unwrap();
                if update.status == BlockStatus::Cached {
                    return update;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(cached.block_idx, 0);
        assert!(cached.audio_ref.unwrap().starts_with("/audio/"));
        pool.shutdown().await;
        assert_eq!(scheduler.job_stats().snapshot().completed, 1);
    }
}
