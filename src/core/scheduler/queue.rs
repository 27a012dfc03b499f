//! Per-model FIFO job queues.
//!
//! Each model has its own queue with a pending-fingerprint set so the same
//! fingerprint is never queued twice. Workers wait on a [`Notify`] for new
//! work instead of polling.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::inflight::Waiter;
use crate::core::fingerprint::{Fingerprint, RenderParams};

/// A unit of synthesis work for one fingerprint.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: uuid::Uuid,
    pub fingerprint: Fingerprint,
    /// Requester that created the in-flight marker.
    pub owner: Waiter,
    pub model: String,
    pub voice: String,
    pub params: RenderParams,
    /// Normalized block text.
    pub text: String,
    pub enqueued_at: Instant,
}

impl Job {
    pub fn characters(&self) -> u64 {
        self.text.chars().count() as u64
    }
}

#[derive(Default)]
struct Pending {
    jobs: VecDeque<Job>,
    fingerprints: HashSet<Fingerprint>,
}

#[derive(Default)]
struct ModelQueue {
    pending: Mutex<Pending>,
    notify: Notify,
}

impl ModelQueue {
    fn try_pop(&self) -> Option<Job> {
        let mut pending = self.pending.lock();
        let job = pending.jobs.pop_front()?;
        pending.fingerprints.remove(&job.fingerprint);
        Some(job)
    }
}

#[derive(Default)]
pub struct JobQueue {
    queues: DashMap<String, Arc<ModelQueue>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_for(&self, model: &str) -> Arc<ModelQueue> {
        if let Some(queue) = self.queues.get(model) {
            return queue.clone();
        }
        self.queues.entry(model.to_string()).or_default().clone()
    }

    /// Append a job unless its fingerprint is already queued for the model.
    ///
    /// Returns `true` when the job was added.
    pub fn enqueue(&self, job: Job) -> bool {
        let queue = self.queue_for(&job.model);
        {
            let mut pending = queue.pending.lock();
            if !pending.fingerprints.insert(job.fingerprint.clone()) {
                return false;
            }
            pending.jobs.push_back(job);
        }
        queue.notify.notify_one();
        true
    }

    /// Pop the oldest job without waiting.
    pub fn try_pop(&self, model: &str) -> Option<Job> {
        self.queues.get(model)?.try_pop()
    }

    /// Pop the oldest job, waiting up to `timeout` for one to arrive.
    pub async fn pop(&self, model: &str, timeout: Duration) -> Option<Job> {
        let queue = self.queue_for(model);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = queue.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between check and wait is not lost
            notified.as_mut().enable();

            if let Some(job) = queue.try_pop() {
                return Some(job);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return queue.try_pop();
            }
        }
    }

    pub fn depth(&self, model: &str) -> usize {
        self.queues
            .get(model)
            .map(|queue| queue.pending.lock().jobs.len())
            .unwrap_or(0)
    }

    /// Depth of every known model queue, sorted by model name.
    pub fn depths(&self) -> Vec<(String, usize)> {
        let mut depths: Vec<(String, usize)> = self
            .queues
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().pending.lock().jobs.len()))
            .collect();
        depths.sort();
        depths
    }
}
