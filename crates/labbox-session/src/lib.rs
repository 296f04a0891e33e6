//! labbox-session - Session Context
//!
//! Ties the workspace together for one viewer session:
//!
//! - [`SessionConfig`]: pool, cache and animation settings from the
//!   environment
//! - [`Session`]: owns the job broker and its calculation pools
//! - [`UnitMetrics`]: per-sorting metric columns fetched through the broker
//! - [`functions`]: built-in computations for the local backend

pub mod config;
pub mod error;
pub mod functions;
pub mod metrics;
pub mod session;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use functions::register_builtins;
pub use metrics::{MetricState, MetricStatus, UnitMetricSpec, UnitMetrics};
pub use session::{InvalidLine, JobLine, LineOutcome, Session};
