//! Usage accounting and authorization for synthesis requests.
//!
//! Both concerns are external to the scheduler and reached through traits.
//! [`QuotaLedger`] implements both: it records billed characters per user
//! and denies new work once a configured per-user limit is reached.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

/// What a user is asking to synthesize.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub document_id: String,
    pub model: String,
    pub voice: String,
    pub blocks: usize,
}

/// Reason an authorization gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessDenied {
    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Usage limit exceeded: {used} of {limit} characters")]
    UsageLimitExceeded { used: u64, limit: u64 },
}

impl AccessDenied {
    pub fn code(&self) -> &'static str {
        match self {
            AccessDenied::Forbidden(_) => "unauthorized",
            AccessDenied::UsageLimitExceeded { .. } => "usage_limit_exceeded",
        }
    }
}

/// Decides whether a user may request synthesis.
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    async fn authorize(&self, user_id: &str, resource: &ResourceRequest) -> Result<(), AccessDenied>;
}

/// Receives one record per successfully synthesized job.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, user_id: &str, characters: u64);
}

/// Gate that admits everyone.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl AuthorizationGate for AllowAll {
    async fn authorize(&self, _user_id: &str, _resource: &ResourceRequest) -> Result<(), AccessDenied> {
        Ok(())
    }
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUsage;

#[async_trait]
impl UsageSink for LogUsage {
    async fn record(&self, user_id: &str, characters: u64) {
        debug!(user_id, characters, "Synthesis usage");
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub users: usize,
    pub total_characters: u64,
    pub limit_per_user: Option<u64>,
}

/// Per-user character ledger with an optional hard limit.
#[derive(Debug, Default)]
pub struct QuotaLedger {
    limit: Option<u64>,
    used: DashMap<String, u64>,
}

impl QuotaLedger {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            used: DashMap::new(),
        }
    }

    pub fn used(&self, user_id: &str) -> u64 {
        self.used.get(user_id).map(|v| *v).unwrap_or(0)
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            users: self.used.len(),
            total_characters: self.used.iter().map(|entry| *entry.value()).sum(),
            limit_per_user: self.limit,
        }
    }
}

#[async_trait]
impl AuthorizationGate for QuotaLedger {
    async fn authorize(&self, user_id: &str, _resource: &ResourceRequest) -> Result<(), AccessDenied> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        let used = self.used(user_id);
        if used >= limit {
            info!(user_id, used, limit, "Rejecting synthesis request over quota");
            return Err(AccessDenied::UsageLimitExceeded { used, limit });
        }
        Ok(())
    }
}

#[async_trait]
impl UsageSink for QuotaLedger {
    async fn record(&self, user_id: &str, characters: u64) {
        let mut entry = self.used.entry(user_id.to_string()).or_insert(0);
        *entry = entry.saturating_add(characters);
        debug!(user_id, characters, total = *entry, "Recorded synthesis usage");
    }
}
