use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::synthesis::AcousticModel;

/// Which worker pool a backend serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolMode {
    Primary,
    Overflow,
}

/// Static `(model, mode) -> backend` table.
#[derive(Default, Clone)]
pub struct RoutingTable {
    routes: HashMap<(String, PoolMode), Arc<dyn AcousticModel>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: impl Into<String>, mode: PoolMode, backend: Arc<dyn AcousticModel>) {
        self.routes.insert((model.into(), mode), backend);
    }

    pub fn resolve(&self, model: &str, mode: PoolMode) -> Option<Arc<dyn AcousticModel>> {
        self.routes.get(&(model.to_string(), mode)).cloned()
    }

    /// Models with a primary route, sorted. Each gets its own worker pool.
    pub fn primary_models(&self) -> Vec<String> {
        self.routes
            .keys()
            .filter(|(_, mode)| *mode == PoolMode::Primary)
            .map(|(model, _)| model.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn has_overflow(&self, model: &str) -> bool {
        self.routes.contains_key(&(model.to_string(), PoolMode::Overflow))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<String> = self
            .routes
            .iter()
            .map(|((model, mode), backend)| format!("{model}/{mode:?} -> {}", backend.name()))
            .collect();
        routes.sort();
        f.debug_struct("RoutingTable").field("routes", &routes).finish()
    }
}
