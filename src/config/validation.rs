use std::collections::HashSet;

use super::{AuthApiSecret, BackendConfig, BackendKind, RouteConfig};
use crate::core::scheduler::{PoolMode, SchedulerConfig};

/// Validate API secret entries
///
/// Ids and secrets must be non-empty and ids must be unique.
pub fn validate_auth_api_secrets(
    secrets: &[AuthApiSecret],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut ids = HashSet::new();
    for entry in secrets {
        if entry.id.trim().is_empty() {
            return Err("Auth API secret entries require a non-empty id".into());
        }
        if entry.secret.is_empty() {
            return Err(format!("Auth API secret '{}' has an empty secret", entry.id).into());
        }
        if !ids.insert(entry.id.as_str()) {
            return Err(format!("Duplicate auth API secret id '{}'", entry.id).into());
        }
    }
    Ok(())
}

/// Validate that authentication can actually be enforced when required
pub fn validate_auth_required(
    auth_required: bool,
    secrets: &[AuthApiSecret],
) -> Result<(), Box<dyn std::error::Error>> {
    if auth_required && secrets.is_empty() {
        return Err(
            "AUTH_REQUIRED is true but no API secrets are configured \
             (set AUTH_API_SECRETS_JSON or auth.api_secrets)"
                .into(),
        );
    }
    Ok(())
}

pub fn validate_scheduler(config: &SchedulerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.worker_concurrency == 0 {
        return Err("scheduler.worker_concurrency must be at least 1".into());
    }
    if config.workers_per_model == 0 {
        return Err("scheduler.workers_per_model must be at least 1".into());
    }
    if config.pop_timeout.is_zero() {
        return Err("scheduler.pop_timeout_ms must be greater than 0".into());
    }
    if !config.overflow_threshold.is_finite() || config.overflow_threshold < 0.0 {
        return Err(format!(
            "scheduler.overflow_threshold must be a non-negative number, got {}",
            config.overflow_threshold
        )
        .into());
    }
    if config.max_blocks_per_request == 0 {
        return Err("scheduler.max_blocks_per_request must be at least 1".into());
    }
    if config.max_queue_depth == Some(0) {
        return Err("scheduler.max_queue_depth must be at least 1 when set".into());
    }
    if config.notifier_capacity == 0 {
        return Err("scheduler.notifier_capacity must be at least 1".into());
    }
    Ok(())
}

pub fn validate_backends(backends: &[BackendConfig]) -> Result<(), Box<dyn std::error::Error>> {
    let mut names = HashSet::new();
    for backend in backends {
        if backend.name.trim().is_empty() {
            return Err("Backend entries require a non-empty name".into());
        }
        if !names.insert(backend.name.as_str()) {
            return Err(format!("Duplicate backend name '{}'", backend.name).into());
        }
        if backend.kind == BackendKind::Http && backend.url.is_none() {
            return Err(format!("Backend '{}' of kind http requires a url", backend.name).into());
        }
        if let Some(url) = &backend.url {
            url::Url::parse(url)
                .map_err(|e| format!("Backend '{}' has an invalid url '{url}': {e}", backend.name))?;
        }
        if backend.timeout_seconds == 0 {
            return Err(format!("Backend '{}' timeout_seconds must be greater than 0", backend.name).into());
        }
    }
    Ok(())
}

/// Routes must reference known backends, be unique per `(model, mode)` and
/// every overflow route needs a primary route for the same model.
pub fn validate_routes(
    routes: &[RouteConfig],
    backends: &[BackendConfig],
) -> Result<(), Box<dyn std::error::Error>> {
    if routes.is_empty() {
        return Err("At least one route is required when backends are configured".into());
    }

    let mut seen = HashSet::new();
    for route in routes {
        if route.model.trim().is_empty() {
            return Err("Route entries require a non-empty model".into());
        }
        if !backends.iter().any(|backend| backend.name == route.backend) {
            return Err(format!(
                "Route for model '{}' references unknown backend '{}'",
                route.model, route.backend
            )
            .into());
        }
        if !seen.insert((route.model.as_str(), route.mode)) {
            return Err(format!(
                "Duplicate {:?} route for model '{}'",
                route.mode, route.model
            )
            .into());
        }
    }

    for route in routes.iter().filter(|r| r.mode == PoolMode::Overflow) {
        if !seen.contains(&(route.model.as_str(), PoolMode::Primary)) {
            return Err(format!(
                "Model '{}' has an overflow route but no primary route",
                route.model
            )
            .into());
        }
    }
    Ok(())
}
