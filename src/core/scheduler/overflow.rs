//! Backlog-driven overflow decisions.
//!
//! When a model's queue depth per active primary worker exceeds the
//! threshold, newly enqueued jobs are also offered to the overflow pool.
//! The overflow pool is bounded; when it is saturated the job simply stays
//! with the primary pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct OverflowRouter {
    threshold: f64,
    max_concurrent: usize,
    limiter: Arc<Semaphore>,
    active_workers: DashMap<String, Arc<AtomicUsize>>,
}

/// Decrements the model's active worker count on drop.
pub struct WorkerRegistration {
    counter: Arc<AtomicUsize>,
}

impl Drop for WorkerRegistration {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl OverflowRouter {
    pub fn new(threshold: f64, max_concurrent: usize) -> Self {
        Self {
            threshold,
            max_concurrent,
            limiter: Arc::new(Semaphore::new(max_concurrent)),
            active_workers: DashMap::new(),
        }
    }

    fn counter(&self, model: &str) -> Arc<AtomicUsize> {
        if let Some(counter) = self.active_workers.get(model) {
            return counter.clone();
        }
        self.active_workers
            .entry(model.to_string())
            .or_default()
            .clone()
    }

    /// Count a primary worker for `model` until the returned guard drops.
    pub fn register_worker(&self, model: &str) -> WorkerRegistration {
        let counter = self.counter(model);
        counter.fetch_add(1, Ordering::AcqRel);
        WorkerRegistration { counter }
    }

    pub fn active_workers(&self, model: &str) -> usize {
        self.active_workers
            .get(model)
            .map(|counter| counter.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Backlog per active worker, counting zero workers as one.
    pub fn backlog_ratio(&self, model: &str, depth: usize) -> f64 {
        depth as f64 / self.active_workers(model).max(1) as f64
    }

    pub fn should_overflow(&self, model: &str, depth: usize) -> bool {
        self.max_concurrent > 0 && self.backlog_ratio(model, depth) > self.threshold
    }

    /// Reserve an overflow slot without waiting.
    pub fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        self.limiter.clone().try_acquire_owned().ok()
    }

    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.max_concurrent.saturating_sub(self.limiter.available_permits())
    }
}
