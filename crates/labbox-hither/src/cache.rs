//! Job Cache & Broker - creates, deduplicates and tracks computation jobs.
//!
//! [`JobCache::create_job`] returns a [`Job`] handle synchronously and
//! drives the job on a spawned task:
//!
//! 1. Derive the [`JobKey`] from the function name, kwargs and pool choice.
//! 2. With `use_client_cache`, an existing job for that key (in any status)
//!    is returned as-is. No new job, no new pool slot.
//! 3. Otherwise a new job waits for a calculation pool slot, then calls the
//!    backend.
//! 4. The terminal outcome is recorded, the slot released, and every waiter
//!    notified.
//!
//! The cache is owned by whoever builds it (normally a session) and shared
//! by handle. Entries live until cleared unless `max_entries` or `ttl` is
//! configured; in-flight entries are never evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::backend::{Backend, BackendResponse, JobRequest};
use crate::error::{Error, Result};
use crate::job::{now_ms, Job, JobOpts, JobSnapshot, JobStatus, Kwargs};
use crate::key::JobKey;
use crate::pool::{CalculationPool, PoolStats, DEFAULT_POOL_NAME};

/// Default capacity of the default calculation pool.
pub const DEFAULT_POOL_CAPACITY: usize = 10;

/// Configuration for a job cache.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    /// Capacity of the default calculation pool.
    pub pool_capacity: usize,

    /// Additional named pools, selected through `JobOpts::pool`.
    pub pools: Vec<(String, usize)>,

    /// Maximum number of cached jobs. Only terminal jobs are evicted,
    /// least recently used first. `None` keeps everything.
    pub max_entries: Option<usize>,

    /// How long a terminal job stays servable from the cache.
    /// `None` keeps it until evicted or cleared.
    pub ttl: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            pools: Vec::new(),
            max_entries: None,
            ttl: None,
        }
    }
}

impl BrokerConfig {
    /// Set the default pool capacity.
    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Add a named pool.
    #[must_use]
    pub fn with_pool(mut self, name: impl Into<String>, capacity: usize) -> Self {
        self.pools.push((name.into(), capacity));
        self
    }

    /// Bound the number of cached jobs.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Expire terminal jobs after `ttl`.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Broker counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub backend_calls: u64,
    pub entries: usize,
    pub pools: Vec<PoolStats>,
}

/// Creates, deduplicates and tracks jobs. Cloning yields another handle onto
/// the same cache.
#[derive(Clone)]
pub struct JobCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    backend: Arc<dyn Backend>,
    default_pool: CalculationPool,
    pools: HashMap<String, CalculationPool>,
    max_entries: Option<usize>,
    ttl: Option<Duration>,
    entries: Mutex<HashMap<JobKey, CacheEntry>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    backend_calls: AtomicU64,
}

struct CacheEntry {
    job: Job,
    last_access: Instant,
}

impl JobCache {
    /// Create a cache dispatching to `backend`.
    pub fn new(backend: Arc<dyn Backend>, config: BrokerConfig) -> Self {
        let pools = config
            .pools
            .iter()
            .map(|(name, capacity)| (name.clone(), CalculationPool::new(name.clone(), *capacity)))
            .collect();

        debug!(
            pool_capacity = config.pool_capacity,
            named_pools = config.pools.len(),
            max_entries = ?config.max_entries,
            ttl = ?config.ttl,
            "Created job cache"
        );

        Self {
            inner: Arc::new(CacheInner {
                backend,
                default_pool: CalculationPool::new(DEFAULT_POOL_NAME, config.pool_capacity),
                pools,
                max_entries: config.max_entries,
                ttl: config.ttl,
                entries: Mutex::new(HashMap::new()),
                cache_hits: AtomicU64::new(0),
                cache_misses: AtomicU64::new(0),
                backend_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Create (or reuse) a job and start driving it.
    ///
    /// Returns immediately; use [`Job::wait`] for the outcome. Must be called
    /// from within a tokio runtime.
    pub fn create_job(&self, function_name: impl Into<String>, kwargs: Kwargs, opts: JobOpts) -> Job {
        let function_name = function_name.into();
        let key = JobKey::derive(&function_name, &kwargs, &opts);

        let mut entries = self.inner.entries();
        if opts.use_client_cache {
            if let Some(entry) = entries.get_mut(&key) {
                if !self.inner.is_expired(&entry.job) {
                    entry.last_access = Instant::now();
                    self.inner.cache_hits.fetch_add(1, Ordering::SeqCst);
                    trace!(key = %key, function = %function_name, status = %entry.job.status(), "Job cache hit");
                    return entry.job.clone();
                }
            }
        }
        self.inner.cache_misses.fetch_add(1, Ordering::SeqCst);

        let pool = self.inner.pool_for(&opts);
        let job = Job::new(function_name, kwargs, opts, key);

        // An uncached request never displaces a job that is still in flight;
        // it runs alongside it instead.
        let replaces = entries
            .get(&key)
            .map_or(true, |entry| entry.job.is_terminal() || self.inner.is_expired(&entry.job));
        if replaces {
            entries.insert(
                key,
                CacheEntry {
                    job: job.clone(),
                    last_access: Instant::now(),
                },
            );
            self.inner.evict(&mut entries);
        }
        drop(entries);

        debug!(
            key = %key,
            client_job_id = %job.client_job_id(),
            function = %job.function_name(),
            pool = %pool.name(),
            "Created job"
        );
        tokio::spawn(run_job(Arc::clone(&self.inner), pool, job.clone()));
        job
    }

    /// Look up the cached job for a key.
    pub fn get(&self, key: &JobKey) -> Option<Job> {
        self.inner.entries().get(key).map(|entry| entry.job.clone())
    }

    /// Snapshots of every cached job.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.inner
            .entries()
            .values()
            .map(|entry| entry.job.snapshot())
            .collect()
    }

    /// Number of cached jobs.
    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.inner.entries().is_empty()
    }

    /// Drop every cached job. Jobs in flight keep running for the callers
    /// that already hold them.
    pub fn clear(&self) {
        let mut entries = self.inner.entries();
        debug!(entries = entries.len(), "Clearing job cache");
        entries.clear();
    }

    /// The default calculation pool.
    pub fn default_pool(&self) -> &CalculationPool {
        &self.inner.default_pool
    }

    /// A named calculation pool.
    pub fn pool(&self, name: &str) -> Option<&CalculationPool> {
        if name == DEFAULT_POOL_NAME {
            return Some(&self.inner.default_pool);
        }
        self.inner.pools.get(name)
    }

    /// Close every pool. Jobs still queued for a slot fail with
    /// [`Error::PoolClosed`].
    pub fn close_pools(&self) {
        self.inner.default_pool.close();
        for pool in self.inner.pools.values() {
            pool.close();
        }
    }

    /// Broker counters.
    pub fn stats(&self) -> BrokerStats {
        let mut pools = vec![self.inner.default_pool.stats()];
        let mut named: Vec<_> = self.inner.pools.values().map(CalculationPool::stats).collect();
        named.sort_by(|a, b| a.name.cmp(&b.name));
        pools.extend(named);

        BrokerStats {
            cache_hits: self.inner.cache_hits.load(Ordering::SeqCst),
            cache_misses: self.inner.cache_misses.load(Ordering::SeqCst),
            backend_calls: self.inner.backend_calls.load(Ordering::SeqCst),
            entries: self.len(),
            pools,
        }
    }
}

impl std::fmt::Debug for JobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCache")
            .field("entries", &self.len())
            .field("max_entries", &self.inner.max_entries)
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}

impl CacheInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<JobKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool_for(&self, opts: &JobOpts) -> CalculationPool {
        match opts.pool.as_deref() {
            None | Some(DEFAULT_POOL_NAME) => self.default_pool.clone(),
            Some(name) => match self.pools.get(name) {
                Some(pool) => pool.clone(),
                None => {
                    warn!(pool = %name, "Unknown calculation pool, using default");
                    self.default_pool.clone()
                }
            },
        }
    }

    fn is_expired(&self, job: &Job) -> bool {
        match (self.ttl, job.timestamp_finished()) {
            (Some(ttl), Some(finished)) => now_ms().saturating_sub(finished) >= ttl.as_millis() as u64,
            _ => false,
        }
    }

    fn evict(&self, entries: &mut HashMap<JobKey, CacheEntry>) {
        let expired: Vec<JobKey> = entries
            .iter()
            .filter(|(_, entry)| self.is_expired(&entry.job))
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            entries.remove(&key);
        }

        let Some(max_entries) = self.max_entries else {
            return;
        };
        if entries.len() <= max_entries {
            return;
        }

        let mut terminal: Vec<(JobKey, Instant)> = entries
            .iter()
            .filter(|(_, entry)| entry.job.is_terminal())
            .map(|(key, entry)| (*key, entry.last_access))
            .collect();
        terminal.sort_by_key(|(_, last_access)| *last_access);

        let excess = entries.len() - max_entries;
        for (key, _) in terminal.into_iter().take(excess) {
            trace!(key = %key, "Evicting cached job");
            entries.remove(&key);
        }
    }

    /// Forget `job` if it still owns its cache entry.
    fn forget(&self, job: &Job) {
        let mut entries = self.entries();
        let owned = entries
            .get(&job.key())
            .is_some_and(|entry| entry.job.client_job_id() == job.client_job_id());
        if owned {
            entries.remove(&job.key());
        }
    }
}

struct Completion {
    outcome: Result<Value>,
    job_id: Option<String>,
    runtime_info: Kwargs,
}

impl Completion {
    fn failed(err: Error) -> Self {
        Self {
            outcome: Err(err),
            job_id: None,
            runtime_info: Kwargs::new(),
        }
    }
}

/// Records `Abandoned` if the driving task ends without an outcome.
struct AbandonGuard {
    job: Job,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.job.finish(Err(Error::Abandoned), None, Kwargs::new()) {
            warn!(client_job_id = %self.job.client_job_id(), "Job abandoned without an outcome");
        }
    }
}

async fn run_job(inner: Arc<CacheInner>, pool: CalculationPool, job: Job) {
    let _guard = AbandonGuard { job: job.clone() };
    let started = Instant::now();

    let completion = tokio::select! {
        biased;
        _ = job.cancelled() => Completion::failed(Error::Cancelled),
        completion = execute(&inner, &pool, &job) => completion,
    };

    if matches!(completion.outcome, Err(Error::Cancelled)) {
        // A cancelled job must not be served to later callers.
        inner.forget(&job);
    }

    match &completion.outcome {
        Ok(_) => debug!(
            client_job_id = %job.client_job_id(),
            function = %job.function_name(),
            elapsed = ?started.elapsed(),
            "Job completed"
        ),
        Err(err) => warn!(
            client_job_id = %job.client_job_id(),
            function = %job.function_name(),
            error = %err,
            "Job failed"
        ),
    }

    job.finish(completion.outcome, completion.job_id, completion.runtime_info);
}

async fn execute(inner: &CacheInner, pool: &CalculationPool, job: &Job) -> Completion {
    let slot = match pool.try_request_slot() {
        Some(slot) => slot,
        None => {
            job.set_status(JobStatus::Queued);
            match pool.request_slot().await {
                Ok(slot) => slot,
                Err(err) => return Completion::failed(err),
            }
        }
    };

    job.set_status(JobStatus::Running);
    inner.backend_calls.fetch_add(1, Ordering::SeqCst);
    let request = JobRequest {
        function_name: job.function_name().to_owned(),
        kwargs: job.kwargs().clone(),
        opts: job.opts().clone(),
    };
    let response = inner.backend.call(request).await;
    slot.release();

    match response {
        BackendResponse::Completed {
            result,
            runtime_info,
            job_id,
        } => Completion {
            outcome: Ok(result),
            job_id,
            runtime_info,
        },
        BackendResponse::Error {
            error_message,
            job_id,
        } => Completion {
            outcome: Err(Error::Backend {
                function_name: job.function_name().to_owned(),
                message: error_message,
            }),
            job_id,
            runtime_info: Kwargs::new(),
        },
    }
}
