//! In-flight markers: one per fingerprint currently owned by a queued job.
//!
//! The marker records every `(user, document, block)` waiting on the result.
//! Removing the marker is the single linearization point for completion:
//! whoever removes it notifies the waiters and bills, everyone else sees
//! `None` and does nothing.

use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::intent::SessionKey;
use crate::core::fingerprint::Fingerprint;

/// A `(user, document, block)` waiting for a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Waiter {
    pub user_id: String,
    pub document_id: String,
    pub block_idx: usize,
}

impl Waiter {
    pub fn new(user_id: impl Into<String>, document_id: impl Into<String>, block_idx: usize) -> Self {
        Self {
            user_id: user_id.into(),
            document_id: document_id.into(),
            block_idx,
        }
    }

    pub fn session(&self) -> SessionKey {
        SessionKey::new(self.user_id.clone(), self.document_id.clone())
    }
}

#[derive(Debug, Clone)]
pub struct InFlightEntry {
    /// First requester; usage for the job is billed to this user.
    pub owner: Waiter,
    /// All waiters including the owner, in arrival order.
    pub waiters: Vec<Waiter>,
    /// Bumped on every join, including repeat joins by a known waiter
    pub generation: u64,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// No marker existed; the caller must enqueue a job.
    Created,
    /// A job is already in flight; the caller was added as a waiter.
    Joined,
}

#[derive(Debug, Default)]
pub struct InFlightTable {
    entries: DashMap<Fingerprint, InFlightEntry>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the marker or join an existing one.
    pub fn register(&self, fingerprint: &Fingerprint, waiter: Waiter) -> Registration {
        match self.entries.entry(fingerprint.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if !entry.waiters.contains(&waiter) {
                    entry.waiters.push(waiter);
                }
                entry.generation += 1;
                Registration::Joined
            }
            Entry::Vacant(vacant) => {
                vacant.insert(InFlightEntry {
                    owner: waiter.clone(),
                    waiters: vec![waiter],
                    generation: 0,
                    created_at: Instant::now(),
                });
                Registration::Created
            }
        }
    }

    pub fn waiters(&self, fingerprint: &Fingerprint) -> Vec<Waiter> {
        self.entries
            .get(fingerprint)
            .map(|entry| entry.waiters.clone())
            .unwrap_or_default()
    }

    /// Copy of the marker as it is now.
    pub fn snapshot(&self, fingerprint: &Fingerprint) -> Option<InFlightEntry> {
        self.entries.get(fingerprint).map(|entry| entry.clone())
    }

    /// Remove the marker only when `condition` holds. Checked under the same
    /// lock that joins take, so no waiter can slip in between.
    pub fn clear_if(
        &self,
        fingerprint: &Fingerprint,
        condition: impl FnOnce(&InFlightEntry) -> bool,
    ) -> Option<InFlightEntry> {
        self.entries
            .remove_if(fingerprint, |_, entry| condition(entry))
            .map(|(_, entry)| entry)
    }

    /// Remove the marker. At most one caller ever receives `Some`.
    pub fn clear(&self, fingerprint: &Fingerprint) -> Option<InFlightEntry> {
        self.entries.remove(fingerprint).map(|(_, entry)| entry)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
