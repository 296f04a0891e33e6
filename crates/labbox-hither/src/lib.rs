//! labbox-hither - Computation Job Broker
//!
//! Views ask for named computations ("hither functions") to be run by an
//! external worker backend. This crate sits between the two:
//!
//! - **Calculation Pool**: bounds how many requests are outstanding at once;
//!   excess requests queue in FIFO order.
//! - **Job Cache & Broker**: derives a cache key per request and guarantees
//!   at most one in-flight execution per key for cached requests. Every
//!   caller sharing a key observes the same terminal outcome.
//! - **Backend seam**: an opaque async RPC trait, plus an in-process
//!   [`LocalBackend`] registry of functions.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use labbox_hither::{BrokerConfig, JobCache, JobOpts, Kwargs, LocalBackend};
//! use serde_json::json;
//!
//! # async fn demo() -> labbox_hither::Result<()> {
//! let mut backend = LocalBackend::new();
//! backend.register("double", |kwargs| {
//!     let x = kwargs.get("x").and_then(|v| v.as_f64()).ok_or("missing x")?;
//!     Ok(json!(x * 2.0))
//! });
//!
//! let cache = JobCache::new(Arc::new(backend), BrokerConfig::default().with_pool_capacity(4));
//! let mut kwargs = Kwargs::new();
//! kwargs.insert("x".into(), json!(21));
//!
//! let job = cache.create_job("double", kwargs, JobOpts::cached());
//! assert_eq!(job.wait().await?, json!(42.0));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod error;
pub mod job;
pub mod key;
pub mod pool;

pub use backend::{Backend, BackendResponse, JobRequest, LocalBackend, LocalFunction};
pub use cache::{BrokerConfig, BrokerStats, JobCache, DEFAULT_POOL_CAPACITY};
pub use error::{Error, Result};
pub use job::{Job, JobOpts, JobSnapshot, JobStatus, Kwargs};
pub use key::JobKey;
pub use pool::{CalculationPool, PoolStats, Slot, DEFAULT_POOL_NAME};
