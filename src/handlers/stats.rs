use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::core::accounting::UsageSnapshot;
use crate::core::scheduler::SchedulerStats;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub scheduler: SchedulerStats,
    pub usage: UsageSnapshot,
    pub websocket_connections: usize,
    pub documents: usize,
}

/// `GET /scheduler/stats`: queue depths, in-flight jobs, cache and usage counters
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        scheduler: state.scheduler.stats(),
        usage: state.ledger.snapshot(),
        websocket_connections: state.ws_connection_count(),
        documents: state.documents.len(),
    })
}
