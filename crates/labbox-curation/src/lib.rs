//! labbox-curation - Sorting Curation State Machine
//!
//! Scientists annotate sorted units with labels and propose merges of units
//! they believe are duplicates. This crate holds that state and the pure
//! transition function over it.
//!
//! # Guarantees
//!
//! - **Idempotence**: adding a label twice is the same as adding it once.
//! - **Transitive merges**: merging {1,2} and later {2,3} yields one group
//!   {1,2,3}.
//! - **Disjoint groups**: no unit ever belongs to two merge groups.
//! - **Referential stability**: a transition that changes nothing returns
//!   the very same `Arc`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use labbox_curation::{reduce, CurationAction, SortingCuration};
//!
//! let state = Arc::new(SortingCuration::new());
//! let state = reduce(&state, CurationAction::MergeUnits { unit_ids: vec![1, 2] });
//! let state = reduce(&state, CurationAction::MergeUnits { unit_ids: vec![2, 3] });
//! assert_eq!(state.merge_groups().len(), 1);
//! ```

pub mod curation;
pub mod error;
pub mod labels;
pub mod merge;
pub mod metrics;

pub use curation::{reduce, CurationAction, SortingCuration, UnitId};
pub use error::{Error, Result};
pub use labels::{label_options, DEFAULT_LABEL_OPTIONS};
pub use merge::{simplify_merge_groups, MergeGroup};
pub use metrics::{reduce_external_metrics, ExternalMetricsAction, ExternalUnitMetric};
