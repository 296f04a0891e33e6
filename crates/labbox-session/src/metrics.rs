//! Per-sorting unit metrics.
//!
//! Each metric is one cached job over the sorting's inputs. Entries move
//! waiting -> executing -> completed | error; a completed entry is final.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use labbox_curation::{ExternalUnitMetric, UnitId};
use labbox_hither::{JobOpts, Kwargs};

use crate::functions::{DEFAULT_ISI_THRESHOLD_MSEC, GET_FIRING_RATES, GET_ISI_VIOLATION_RATES};
use crate::session::Session;

/// A metric column computed by a backend function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetricSpec {
    pub name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    pub function_name: String,
    /// Merged over the sorting inputs when the job is created.
    #[serde(default)]
    pub params: Kwargs,
    #[serde(default)]
    pub opts: JobOpts,
}

impl UnitMetricSpec {
    /// ISI violation rate at a 2.5 ms refractory threshold.
    pub fn isi_violations() -> Self {
        let mut params = Kwargs::new();
        params.insert("isi_threshold_msec".into(), json!(DEFAULT_ISI_THRESHOLD_MSEC));
        Self {
            name: "IsiViolations".into(),
            label: "ISI viol.".into(),
            tooltip: Some("ISI violation rate".into()),
            function_name: GET_ISI_VIOLATION_RATES.into(),
            params,
            opts: JobOpts::cached().with_wait(true),
        }
    }

    pub fn firing_rate() -> Self {
        Self {
            name: "FiringRate".into(),
            label: "Firing rate (Hz)".into(),
            tooltip: Some("Average firing rate".into()),
            function_name: GET_FIRING_RATES.into(),
            params: Kwargs::new(),
            opts: JobOpts::cached().with_wait(true),
        }
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::isi_violations(), Self::firing_rate()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Waiting,
    Executing,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricState {
    pub status: MetricStatus,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl MetricState {
    pub fn waiting() -> Self {
        Self::with_status(MetricStatus::Waiting)
    }

    pub fn executing() -> Self {
        Self::with_status(MetricStatus::Executing)
    }

    pub fn completed(data: Value) -> Self {
        Self {
            status: MetricStatus::Completed,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: MetricStatus::Error,
            data: None,
            error: Some(error.into()),
        }
    }

    fn with_status(status: MetricStatus) -> Self {
        Self {
            status,
            data: None,
            error: None,
        }
    }

    /// Completed data as an external metric column, when it is a map of unit
    /// id to number.
    pub fn to_external(&self, spec: &UnitMetricSpec) -> Option<ExternalUnitMetric> {
        let data = self.data.as_ref().filter(|_| self.status == MetricStatus::Completed)?;
        let data: BTreeMap<UnitId, f64> = serde_json::from_value(data.clone()).ok()?;
        Some(ExternalUnitMetric {
            name: spec.name.clone(),
            label: spec.label.clone(),
            tooltip: spec.tooltip.clone(),
            data,
        })
    }
}

/// Metric states for one sorting. Clones share the same states.
#[derive(Debug, Clone, Default)]
pub struct UnitMetrics {
    states: Arc<Mutex<BTreeMap<String, MetricState>>>,
}

impl UnitMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn states_mut(&self) -> MutexGuard<'_, BTreeMap<String, MetricState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Option<MetricState> {
        self.states_mut().get(name).cloned()
    }

    pub fn states(&self) -> BTreeMap<String, MetricState> {
        self.states_mut().clone()
    }

    /// Mark metrics as waiting without fetching them.
    pub fn register(&self, specs: &[UnitMetricSpec]) {
        let mut states = self.states_mut();
        for spec in specs {
            states
                .entry(spec.name.clone())
                .or_insert_with(MetricState::waiting);
        }
    }

    /// Record a new state. Returns false, leaving the entry untouched, once
    /// the metric has completed.
    pub fn update(&self, name: &str, state: MetricState) -> bool {
        let mut states = self.states_mut();
        if states
            .get(name)
            .is_some_and(|current| current.status == MetricStatus::Completed)
        {
            warn!(metric = %name, status = ?state.status, "Ignoring update of completed metric");
            return false;
        }
        states.insert(name.to_string(), state);
        true
    }

    /// Drop a metric so the next fetch runs it again.
    pub fn forget(&self, name: &str) -> Option<MetricState> {
        self.states_mut().remove(name)
    }

    /// Fetch one metric over `inputs`.
    ///
    /// A metric that is already executing or finished is returned as is.
    pub async fn fetch(&self, session: &Session, spec: &UnitMetricSpec, inputs: &Kwargs) -> MetricState {
        {
            let mut states = self.states_mut();
            match states.get(&spec.name) {
                Some(state) if state.status != MetricStatus::Waiting => return state.clone(),
                _ => {
                    states.insert(spec.name.clone(), MetricState::executing());
                }
            }
        }

        let mut kwargs = inputs.clone();
        kwargs.extend(spec.params.clone());
        let job = session.create_job(spec.function_name.clone(), kwargs, spec.opts.clone());
        debug!(metric = %spec.name, client_job_id = %job.client_job_id(), "Fetching unit metric");

        let state = match job.wait().await {
            Ok(data) => MetricState::completed(data),
            Err(err) => MetricState::failed(err.error_message()),
        };
        self.update(&spec.name, state.clone());
        self.get(&spec.name).unwrap_or(state)
    }

    /// Fetch every metric concurrently.
    pub async fn fetch_all(
        &self,
        session: &Session,
        specs: &[UnitMetricSpec],
        inputs: &Kwargs,
    ) -> Vec<MetricState> {
        join_all(specs.iter().map(|spec| self.fetch(session, spec, inputs))).await
    }

    /// Completed metrics as external metric columns, in `specs` order.
    pub fn external_metrics(&self, specs: &[UnitMetricSpec]) -> Vec<ExternalUnitMetric> {
        let states = self.states_mut();
        specs
            .iter()
            .filter_map(|spec| states.get(&spec.name)?.to_external(spec))
            .collect()
    }
}
