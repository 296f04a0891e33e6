//! Externally supplied unit metrics attached to a sorting.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::curation::UnitId;

/// One metric column computed outside the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalUnitMetric {
    pub name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    /// Metric value per unit.
    pub data: BTreeMap<UnitId, f64>,
}

impl ExternalUnitMetric {
    /// Value for one unit.
    pub fn value(&self, unit_id: UnitId) -> Option<f64> {
        self.data.get(&unit_id).copied()
    }
}

/// Actions on the external metrics list, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExternalMetricsAction {
    #[serde(rename_all = "camelCase")]
    SetExternalUnitMetrics {
        external_unit_metrics: Vec<ExternalUnitMetric>,
    },
    #[serde(other)]
    Unknown,
}

/// Apply `action`; unknown actions return `state` itself.
pub fn reduce_external_metrics(
    state: &Arc<Vec<ExternalUnitMetric>>,
    action: ExternalMetricsAction,
) -> Arc<Vec<ExternalUnitMetric>> {
    match action {
        ExternalMetricsAction::SetExternalUnitMetrics {
            external_unit_metrics,
        } => Arc::new(external_unit_metrics),
        ExternalMetricsAction::Unknown => Arc::clone(state),
    }
}
