//! Per-user, per-document record of which blocks are still wanted.
//!
//! Each session tracks a cursor and the requested block indices. Workers
//! consult the set before synthesizing; cursor moves drop queued indices
//! that fall outside the eviction window. All mutations of one session go
//! through a single DashMap shard lock, so claim and evict never interleave.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identifies one listening session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub user_id: String,
    pub document_id: String,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            document_id: document_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentState {
    Queued,
    Processing,
}

/// Blocks kept around the cursor: `[cursor - behind, cursor + ahead]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionWindow {
    pub behind: usize,
    pub ahead: usize,
}

impl Default for EvictionWindow {
    fn default() -> Self {
        Self {
            behind: 8,
            ahead: 16,
        }
    }
}

impl EvictionWindow {
    /// Inclusive bounds, saturating at both ends.
    pub fn bounds(&self, cursor: usize) -> (usize, usize) {
        (
            cursor.saturating_sub(self.behind),
            cursor.saturating_add(self.ahead),
        )
    }

    pub fn contains(&self, cursor: usize, index: usize) -> bool {
        let (low, high) = self.bounds(cursor);
        (low..=high).contains(&index)
    }
}

#[derive(Debug)]
struct Session {
    blocks: BTreeMap<usize, IntentState>,
    cursor: usize,
    last_touched: Instant,
}

impl Session {
    fn new(cursor: usize) -> Self {
        Self {
            blocks: BTreeMap::new(),
            cursor,
            last_touched: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub struct IntentSet {
    sessions: DashMap<SessionKey, Session>,
    window: EvictionWindow,
}

impl IntentSet {
    pub fn new(window: EvictionWindow) -> Self {
        Self {
            sessions: DashMap::new(),
            window,
        }
    }

    pub fn window(&self) -> EvictionWindow {
        self.window
    }

    /// Record that the session wants `indices`, creating it if needed.
    ///
    /// Indices already being processed keep their state.
    pub fn add(&self, key: &SessionKey, indices: &[usize], cursor: usize) {
        let mut session = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| Session::new(cursor));
        session.cursor = cursor;
        session.last_touched = Instant::now();
        for &index in indices {
            session.blocks.entry(index).or_insert(IntentState::Queued);
        }
    }

    /// Atomically move a queued index to processing.
    ///
    /// Returns `false` when the index is no longer wanted.
    pub fn claim(&self, key: &SessionKey, index: usize) -> bool {
        let Some(mut session) = self.sessions.get_mut(key) else {
            return false;
        };
        match session.blocks.get_mut(&index) {
            Some(state) => {
                *state = IntentState::Processing;
                true
            }
            None => false,
        }
    }

    pub fn is_wanted(&self, key: &SessionKey, index: usize) -> bool {
        self.sessions
            .get(key)
            .is_some_and(|session| session.blocks.contains_key(&index))
    }

    pub fn state(&self, key: &SessionKey, index: usize) -> Option<IntentState> {
        self.sessions
            .get(key)
            .and_then(|session| session.blocks.get(&index).copied())
    }

    /// Drop an index once it resolved (cached or failed).
    pub fn remove(&self, key: &SessionKey, index: usize) {
        if let Some(mut session) = self.sessions.get_mut(key) {
            session.blocks.remove(&index);
        }
    }

    /// Move the cursor and evict queued indices outside the window.
    ///
    /// Returns the evicted indices in ascending order. Processing indices are
    /// left alone.
    pub fn move_cursor(&self, key: &SessionKey, cursor: usize) -> Vec<usize> {
        let mut session = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| Session::new(cursor));
        session.cursor = cursor;
        session.last_touched = Instant::now();

        let window = self.window;
        let evicted: Vec<usize> = session
            .blocks
            .iter()
            .filter(|&(&index, &state)| {
                state == IntentState::Queued && !window.contains(cursor, index)
            })
            .map(|(&index, _)| index)
            .collect();
        for index in &evicted {
            session.blocks.remove(index);
        }

        if !evicted.is_empty() {
            debug!(
                user_id = %key.user_id,
                document_id = %key.document_id,
                cursor,
                evicted = evicted.len(),
                "Evicted queued blocks outside window"
            );
        }
        evicted
    }

    pub fn cursor(&self, key: &SessionKey) -> Option<usize> {
        self.sessions.get(key).map(|session| session.cursor)
    }

    /// Number of wanted indices for one session.
    pub fn pending(&self, key: &SessionKey) -> usize {
        self.sessions
            .get(key)
            .map(|session| session.blocks.len())
            .unwrap_or(0)
    }

    /// Remove sessions idle longer than `idle` with nothing left in flight.
    pub fn gc(&self, idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            session.last_touched.elapsed() < idle
                || session
                    .blocks
                    .values()
                    .any(|state| *state == IntentState::Processing)
        });
        before.saturating_sub(self.sessions.len())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new("alice", "book")
    }

    #[test]
    fn test_window_bounds_saturate() {
        let window = EvictionWindow::default();
        assert_eq!(window.bounds(0), (0, 16));
        assert_eq!(window.bounds(200), (192, 216));
        assert_eq!(window.bounds(usize::MAX), (usize::MAX - 8, usize::MAX));
    }

    #[test]
    fn test_claim_and_remove() {
        let set = IntentSet::new(EvictionWindow::default());
        set.add(&key(), &[0, 1, 2], 0);

        assert!(set.claim(&key(), 1));
        assert_eq!(set.state(&key(), 1), Some(IntentState::Processing));
        assert!(!set.claim(&key(), 7));

        set.remove(&key(), 1);
        assert!(!set.is_wanted(&key(), 1));
        assert!(!set.claim(&SessionKey::new("bob", "book"), 0));
    }

    #[test]
    fn test_readd_does_not_reset_processing() {
        let set = IntentSet::new(EvictionWindow::default());
        set.add(&key(), &[4], 0);
        assert!(set.claim(&key(), 4));
        set.add(&key(), &[4, 5], 0);
        assert_eq!(set.state(&key(), 4), Some(IntentState::Processing));
        assert_eq!(set.state(&key(), 5), Some(IntentState::Queued));
    }

    #[test]
    fn test_cursor_jump_keeps_only_window() {
        let set = IntentSet::new(EvictionWindow::default());
        let indices: Vec<usize> = (0..300).collect();
        set.add(&key(), &indices, 0);

        let evicted = set.move_cursor(&key(), 200);

        for index in 0..300 {
            let inside = (192..=216).contains(&index);
            assert_eq!(set.is_wanted(&key(), index), inside, "index {index}");
            assert_eq!(evicted.contains(&index), !inside, "index {index}");
        }
        assert_eq!(set.pending(&key()), 25);
        assert_eq!(set.cursor(&key()), Some(200));
    }

    #[test]
    fn test_eviction_spares_processing() {
        let set = IntentSet::new(EvictionWindow::default());
        set.add(&key(), &[0, 1, 2, 3], 0);
        assert!(set.claim(&key(), 0));

        let evicted = set.move_cursor(&key(), 100);
        assert_eq!(evicted, vec![1, 2, 3]);
        assert_eq!(set.state(&key(), 0), Some(IntentState::Processing));
    }

    #[test]
    fn test_gc_removes_idle_sessions() {
        let set = IntentSet::new(EvictionWindow::default());
        set.add(&key(), &[0], 0);
        set.add(&SessionKey::new("bob", "book"), &[0], 0);
        assert!(set.claim(&SessionKey::new("bob", "book"), 0));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(set.gc(Duration::from_millis(10)), 1);
        assert_eq!(set.session_count(), 1);
        assert!(set.is_wanted(&SessionKey::new("bob", "book"), 0));
    }
}
