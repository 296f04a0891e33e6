//! The seam to the remote computation backend.
//!
//! The broker treats the backend as an opaque asynchronous RPC call: it
//! hands over a [`JobRequest`] and eventually gets a [`BackendResponse`].
//! Transport details (polling, push, websockets) belong to implementors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::job::{JobOpts, Kwargs};

/// Request sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub function_name: String,
    #[serde(default)]
    pub kwargs: Kwargs,
    #[serde(default)]
    pub opts: JobOpts,
}

/// Response from the backend, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackendResponse {
    Completed {
        result: Value,
        #[serde(default)]
        runtime_info: Kwargs,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
    },
    Error {
        error_message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
    },
}

impl BackendResponse {
    /// A completed response without runtime info.
    pub fn completed(result: Value) -> Self {
        Self::Completed {
            result,
            runtime_info: Kwargs::new(),
            job_id: None,
        }
    }

    /// An error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error_message: message.into(),
            job_id: None,
        }
    }
}

/// A remote (or in-process) executor of named functions.
///
/// Implementations report every failure, transport failures included, as
/// [`BackendResponse::Error`]; the broker never retries.
pub trait Backend: Send + Sync {
    fn call(&self, request: JobRequest) -> BoxFuture<'static, BackendResponse>;
}

/// A function the local backend can run.
pub type LocalFunction = Arc<dyn Fn(&Kwargs) -> Result<Value, String> + Send + Sync>;

/// In-process backend: a registry of named functions.
///
/// Functions run on the blocking thread pool so numeric work does not stall
/// the runtime.
#[derive(Default)]
pub struct LocalBackend {
    functions: HashMap<String, LocalFunction>,
    next_job_id: Arc<AtomicU64>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&Kwargs) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    /// Whether a function is registered.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered function names, sorted.
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("functions", &self.function_names())
            .finish()
    }
}

impl Backend for LocalBackend {
    fn call(&self, request: JobRequest) -> BoxFuture<'static, BackendResponse> {
        let job_id = format!("local-{}", self.next_job_id.fetch_add(1, Ordering::SeqCst));
        let function = self.functions.get(&request.function_name).cloned();

        Box::pin(async move {
            let Some(function) = function else {
                return BackendResponse::Error {
                    error_message: format!("no such function: {}", request.function_name),
                    job_id: Some(job_id),
                };
            };

            debug!(job_id = %job_id, function = %request.function_name, "Running local function");
            let started = Instant::now();
            let kwargs = request.kwargs;
            let outcome = tokio::task::spawn_blocking(move || function(&kwargs)).await;

            let mut runtime_info = Kwargs::new();
            runtime_info.insert("elapsed_sec".into(), json!(started.elapsed().as_secs_f64()));

            match outcome {
                Ok(Ok(result)) => BackendResponse::Completed {
                    result,
                    runtime_info,
                    job_id: Some(job_id),
                },
                Ok(Err(error_message)) => BackendResponse::Error {
                    error_message,
                    job_id: Some(job_id),
                },
                Err(join_error) => BackendResponse::Error {
                    error_message: format!("function panicked: {join_error}"),
                    job_id: Some(job_id),
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(function_name: &str, kwargs: Value) -> JobRequest {
        JobRequest {
            function_name: function_name.into(),
            kwargs: kwargs.as_object().cloned().unwrap_or_default(),
            opts: JobOpts::default(),
        }
    }

    #[test]
    fn response_wire_format() {
        let completed: BackendResponse = serde_json::from_value(json!({
            "status": "completed",
            "result": [1, 2, 3],
            "runtime_info": {"elapsed_sec": 0.5}
        }))
        .unwrap();
        assert!(matches!(completed, BackendResponse::Completed { ref result, .. } if *result == json!([1, 2, 3])));

        let error: BackendResponse = serde_json::from_value(json!({
            "status": "error",
            "error_message": "worker crashed"
        }))
        .unwrap();
        assert_eq!(error, BackendResponse::error("worker crashed"));
    }

    #[tokio::test]
    async fn local_backend_runs_registered_function() {
        let mut backend = LocalBackend::new();
        backend.register("add", |kwargs| {
            let a = kwargs.get("a").and_then(Value::as_i64).ok_or("missing a")?;
            let b = kwargs.get("b").and_then(Value::as_i64).ok_or("missing b")?;
            Ok(json!(a + b))
        });

        match backend.call(request("add", json!({"a": 2, "b": 3}))).await {
            BackendResponse::Completed { result, runtime_info, job_id } => {
                assert_eq!(result, json!(5));
                assert!(runtime_info.contains_key("elapsed_sec"));
                assert_eq!(job_id.as_deref(), Some("local-0"));
            }
            other => panic!("unexpected response: {other:?}"),
        }

        match backend.call(request("add", json!({"a": 2}))).await {
            BackendResponse::Error { error_message, .. } => assert_eq!(error_message, "missing b"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_backend_reports_unknown_function() {
        let backend = LocalBackend::new();
        match backend.call(request("nope", json!({}))).await {
            BackendResponse::Error { error_message, .. } => {
                assert_eq!(error_message, "no such function: nope");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn function_names_are_sorted() {
        let mut backend = LocalBackend::new();
        backend.register("zeta", |_| Ok(Value::Null));
        backend.register("alpha", |_| Ok(Value::Null));
        assert_eq!(backend.function_names(), vec!["alpha", "zeta"]);
        assert!(backend.has_function("zeta"));
    }
}
