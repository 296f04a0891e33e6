//! Job handles and job records.
//!
//! A [`Job`] is a cheap, cloneable handle onto one computation request. Every
//! caller that was served the same job shares one record and one terminal
//! outcome; the outcome is fanned out through a `watch` channel so all
//! waiters are notified together.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use crate::error::{Error, Result};
use crate::key::JobKey;

/// Ordered mapping of argument name to JSON value.
pub type Kwargs = serde_json::Map<String, Value>;

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOpts {
    /// Serve the request from an existing job with the same key when possible.
    #[serde(default)]
    pub use_client_cache: bool,

    /// Ask the backend to hold the response until the job finishes.
    #[serde(default)]
    pub wait: bool,

    /// Name of the calculation pool (and backend resource) to run on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,

    /// Backend-specific options passed through untouched.
    #[serde(flatten)]
    pub extra: Kwargs,
}

impl JobOpts {
    /// Options with client caching enabled.
    #[must_use]
    pub fn cached() -> Self {
        Self {
            use_client_cache: true,
            ..Default::default()
        }
    }

    /// Set wait semantics.
    #[must_use]
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Select a calculation pool.
    #[must_use]
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    /// Add a pass-through backend option.
    #[must_use]
    pub fn with_extra(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet admitted by a calculation pool.
    Waiting,
    /// Suspended on a saturated calculation pool.
    Queued,
    /// Holding a slot; the backend call is in flight.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Error,
}

impl JobStatus {
    /// Whether the status is final.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Serializable view of a job record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub client_job_id: String,
    pub job_id: Option<String>,
    pub key: JobKey,
    pub function_name: String,
    pub kwargs: Kwargs,
    pub opts: JobOpts,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub runtime_info: Kwargs,
    pub error_message: Option<String>,
    pub timestamp_started: u64,
    pub timestamp_finished: Option<u64>,
}

#[derive(Debug)]
struct JobRecord {
    status: JobStatus,
    job_id: Option<String>,
    result: Option<Value>,
    runtime_info: Kwargs,
    error_message: Option<String>,
    timestamp_started: u64,
    timestamp_finished: Option<u64>,
}

#[derive(Debug)]
struct JobInner {
    client_job_id: String,
    key: JobKey,
    function_name: String,
    kwargs: Kwargs,
    opts: JobOpts,
    record: Mutex<JobRecord>,
    outcome: watch::Sender<Option<Result<Value>>>,
    cancel: watch::Sender<bool>,
}

/// Handle onto one computation request.
#[derive(Debug, Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub(crate) fn new(function_name: String, kwargs: Kwargs, opts: JobOpts, key: JobKey) -> Self {
        let (outcome, _) = watch::channel(None);
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(JobInner {
                client_job_id: new_client_job_id(),
                key,
                function_name,
                kwargs,
                opts,
                record: Mutex::new(JobRecord {
                    status: JobStatus::Waiting,
                    job_id: None,
                    result: None,
                    runtime_info: Kwargs::new(),
                    error_message: None,
                    timestamp_started: now_ms(),
                    timestamp_finished: None,
                }),
                outcome,
                cancel,
            }),
        }
    }

    /// Locally generated identifier, stable for the lifetime of the job.
    pub fn client_job_id(&self) -> &str {
        &self.inner.client_job_id
    }

    /// Identifier assigned by the backend, once known.
    pub fn job_id(&self) -> Option<String> {
        self.record().job_id.clone()
    }

    /// Cache key of the request.
    pub fn key(&self) -> JobKey {
        self.inner.key
    }

    pub fn function_name(&self) -> &str {
        &self.inner.function_name
    }

    pub fn kwargs(&self) -> &Kwargs {
        &self.inner.kwargs
    }

    pub fn opts(&self) -> &JobOpts {
        &self.inner.opts
    }

    /// Current status.
    pub fn status(&self) -> JobStatus {
        self.record().status
    }

    /// Whether the job has reached `completed` or `error`.
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Result value, set only once completed.
    pub fn result(&self) -> Option<Value> {
        self.record().result.clone()
    }

    /// Error message, set only once errored.
    pub fn error_message(&self) -> Option<String> {
        self.record().error_message.clone()
    }

    /// Milliseconds since the epoch at which the job finished.
    pub fn timestamp_finished(&self) -> Option<u64> {
        self.record().timestamp_finished
    }

    /// Copy of the full job record.
    pub fn snapshot(&self) -> JobSnapshot {
        let record = self.record();
        JobSnapshot {
            client_job_id: self.inner.client_job_id.clone(),
            job_id: record.job_id.clone(),
            key: self.inner.key,
            function_name: self.inner.function_name.clone(),
            kwargs: self.inner.kwargs.clone(),
            opts: self.inner.opts.clone(),
            status: record.status,
            result: record.result.clone(),
            runtime_info: record.runtime_info.clone(),
            error_message: record.error_message.clone(),
            timestamp_started: record.timestamp_started,
            timestamp_finished: record.timestamp_finished,
        }
    }

    /// Wait for the terminal outcome.
    ///
    /// Every caller waiting on this job observes the same outcome.
    pub async fn wait(&self) -> Result<Value> {
        let mut rx = self.inner.outcome.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Abandoned)?;
        outcome.clone().unwrap_or(Err(Error::Abandoned))
    }

    /// Wait for the outcome, giving up after `timeout`.
    ///
    /// Timing out does not cancel the job: the backend call still runs to
    /// completion and its outcome is still cached.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<Value> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    /// Request cancellation.
    ///
    /// Cancellation affects every caller sharing this job. A job that already
    /// reached a terminal state is unaffected.
    pub fn cancel(&self) {
        if !self.is_terminal() {
            trace!(client_job_id = %self.inner.client_job_id, "Cancellation requested");
            self.inner.cancel.send_replace(true);
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancel_requested(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.inner.cancel.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Move to a non-terminal status. Ignored once terminal.
    pub(crate) fn set_status(&self, status: JobStatus) {
        let mut record = self.record();
        if !record.status.is_terminal() {
            record.status = status;
        }
    }

    /// Record the terminal outcome and notify every waiter.
    ///
    /// Returns `false` if the job was already terminal.
    pub(crate) fn finish(
        &self,
        outcome: Result<Value>,
        job_id: Option<String>,
        runtime_info: Kwargs,
    ) -> bool {
        {
            let mut record = self.record();
            if record.status.is_terminal() {
                return false;
            }
            match &outcome {
                Ok(result) => {
                    record.status = JobStatus::Completed;
                    record.result = Some(result.clone());
                }
                Err(err) => {
                    record.status = JobStatus::Error;
                    record.error_message = Some(err.error_message());
                }
            }
            if job_id.is_some() {
                record.job_id = job_id;
            }
            record.runtime_info = runtime_info;
            record.timestamp_finished = Some(now_ms());
        }
        self.inner.outcome.send_replace(Some(outcome));
        true
    }

    fn record(&self) -> MutexGuard<'_, JobRecord> {
        self.inner.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn new_client_job_id() -> String {
    hex::encode(rand::random::<[u8; 10]>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_job() -> Job {
        let kwargs = Kwargs::new();
        let opts = JobOpts::default();
        let key = JobKey::derive("f", &kwargs, &opts);
        Job::new("f".into(), kwargs, opts, key)
    }

    #[test]
    fn new_job_is_waiting() {
        let job = make_job();
        assert_eq!(job.status(), JobStatus::Waiting);
        assert_eq!(job.client_job_id().len(), 20);
        assert!(job.job_id().is_none());
        assert!(job.result().is_none());
        assert!(job.error_message().is_none());
        assert!(job.snapshot().timestamp_started > 0);
    }

    #[test]
    fn client_job_ids_are_unique() {
        assert_ne!(make_job().client_job_id(), make_job().client_job_id());
    }

    #[tokio::test]
    async fn completion_sets_result_only() {
        let job = make_job();
        job.set_status(JobStatus::Running);
        assert!(job.finish(Ok(json!(42)), Some("remote-1".into()), Kwargs::new()));

        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.result(), Some(json!(42)));
        assert!(job.error_message().is_none());
        assert_eq!(job.job_id().as_deref(), Some("remote-1"));
        assert!(job.timestamp_finished().is_some());
        assert_eq!(job.wait().await, Ok(json!(42)));
    }

    #[tokio::test]
    async fn error_sets_message_only() {
        let job = make_job();
        let err = Error::Backend {
            function_name: "f".into(),
            message: "boom".into(),
        };
        job.finish(Err(err.clone()), None, Kwargs::new());

        assert_eq!(job.status(), JobStatus::Error);
        assert!(job.result().is_none());
        assert_eq!(job.error_message().as_deref(), Some("boom"));
        assert_eq!(job.wait().await, Err(err));
    }

    #[tokio::test]
    async fn terminal_state_is_final() {
        let job = make_job();
        assert!(job.finish(Ok(json!("first")), None, Kwargs::new()));
        assert!(!job.finish(Err(Error::Cancelled), None, Kwargs::new()));
        job.set_status(JobStatus::Running);

        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.wait().await, Ok(json!("first")));
    }

    #[tokio::test]
    async fn all_waiters_see_same_outcome() {
        let job = make_job();
        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let job = job.clone();
                tokio::spawn(async move { job.wait().await })
            })
            .collect();
        tokio::task::yield_now().await;

        job.finish(Ok(json!({"rates": [0.1, 0.2]})), None, Kwargs::new());
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(json!({"rates": [0.1, 0.2]})));
        }
    }

    #[tokio::test]
    async fn wait_timeout_leaves_job_running() {
        let job = make_job();
        job.set_status(JobStatus::Running);

        let result = job.wait_timeout(Duration::from_millis(5)).await;
        assert_eq!(result, Err(Error::Timeout(Duration::from_millis(5))));
        assert_eq!(job.status(), JobStatus::Running);
        assert!(!job.is_cancel_requested());
    }

    #[test]
    fn cancel_is_ignored_once_terminal() {
        let job = make_job();
        job.finish(Ok(json!(1)), None, Kwargs::new());
        job.cancel();
        assert!(!job.is_cancel_requested());
    }

    #[test]
    fn opts_round_trip_with_extra_fields() {
        let opts = JobOpts::cached()
            .with_wait(true)
            .with_extra("auto_substitute_file_objects", json!(true));
        let value = serde_json::to_value(&opts).unwrap();
        assert_eq!(
            value,
            json!({"use_client_cache": true, "wait": true, "auto_substitute_file_objects": true})
        );
        let back: JobOpts = serde_json::from_value(value).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn status_display_matches_wire_names() {
        assert_eq!(JobStatus::Queued.to_string(), "queued");
        assert_eq!(serde_json::to_value(JobStatus::Completed).unwrap(), json!("completed"));
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
