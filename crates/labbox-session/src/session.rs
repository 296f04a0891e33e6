//! Session context.
//!
//! A session owns one job broker and its calculation pools. Views share it
//! by reference; nothing here is process-global.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use labbox_hither::{
    Backend, BrokerStats, Job, JobCache, JobOpts, JobRequest, JobSnapshot, Kwargs, LocalBackend,
};
use labbox_selection::{AnimationDriver, Selection, SelectionStore};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::functions::register_builtins;

/// Outcome of one JSON-line request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LineOutcome {
    Job(JobLine),
    Invalid(InvalidLine),
}

/// A request that ran; the snapshot carries its terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobLine {
    pub line: usize,
    #[serde(flatten)]
    pub job: JobSnapshot,
}

/// A line that did not parse as a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidLine {
    pub line: usize,
    pub status: &'static str,
    pub error_message: String,
}

/// A labbox session.
pub struct Session {
    config: SessionConfig,
    cache: JobCache,
}

impl Session {
    /// Create a session dispatching to `backend`.
    pub fn new(config: SessionConfig, backend: Arc<dyn Backend>) -> Self {
        let cache = JobCache::new(backend, config.broker_config());
        info!(
            pool_capacity = config.pool_capacity,
            named_pools = config.pools.len(),
            "Session started"
        );
        Self { config, cache }
    }

    /// Create a session backed by the built-in local functions.
    pub fn with_builtins(config: SessionConfig) -> Self {
        let mut backend = LocalBackend::new();
        register_builtins(&mut backend);
        Self::new(config, Arc::new(backend))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cache(&self) -> &JobCache {
        &self.cache
    }

    /// Create (or reuse) a job. See [`JobCache::create_job`].
    pub fn create_job(&self, function_name: impl Into<String>, kwargs: Kwargs, opts: JobOpts) -> Job {
        self.cache.create_job(function_name, kwargs, opts)
    }

    /// Run a request to completion.
    pub async fn run(&self, request: JobRequest) -> Result<Value> {
        let job = self.create_job(request.function_name, request.kwargs, request.opts);
        Ok(job.wait().await?)
    }

    /// Parse and run one JSON-line request.
    pub async fn handle_line(&self, line_number: usize, line: &str) -> LineOutcome {
        let request: JobRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                debug!(line = line_number, error = %err, "Rejected request line");
                return LineOutcome::Invalid(InvalidLine {
                    line: line_number,
                    status: "error",
                    error_message: Error::from(err).to_string(),
                });
            }
        };

        let job = self.create_job(request.function_name, request.kwargs, request.opts);
        // The outcome is carried by the snapshot.
        let _ = job.wait().await;
        LineOutcome::Job(JobLine {
            line: line_number,
            job: job.snapshot(),
        })
    }

    /// Animate `store` at the configured tick.
    pub fn animate<S: Selection>(&self, store: SelectionStore<S>) -> AnimationDriver {
        AnimationDriver::spawn(store, self.config.animation_tick)
    }

    pub fn stats(&self) -> BrokerStats {
        self.cache.stats()
    }

    /// Close every pool; queued and future jobs fail with a pool-closed error.
    pub fn shutdown(&self) {
        self.cache.close_pools();
        let stats = self.stats();
        info!(
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            backend_calls = stats.backend_calls,
            "Session shut down"
        );
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}
