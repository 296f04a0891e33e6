//! Label options offered to the user when labelling units.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::curation::SortingCuration;

/// Labels always offered, whatever the curation holds.
pub const DEFAULT_LABEL_OPTIONS: [&str; 5] = ["noise", "MUA", "artifact", "accept", "reject"];

/// Every label worth offering for a curation: the defaults, the curation's
/// label choices, and every label already applied to a unit.
///
/// Sorted case-insensitively; labels differing only in case are ordered
/// case-sensitively.
pub fn label_options(curation: &SortingCuration) -> Vec<String> {
    let mut options: BTreeSet<&str> = DEFAULT_LABEL_OPTIONS.into_iter().collect();
    options.extend(curation.label_choices().unwrap_or_default().iter().map(String::as_str));
    options.extend(curation.labels_by_unit().values().flatten().map(String::as_str));

    let mut options: Vec<String> = options.into_iter().map(str::to_owned).collect();
    options.sort_by(|a, b| compare_labels(a, b));
    options
}

fn compare_labels(a: &str, b: &str) -> Ordering {
    a.to_uppercase()
        .cmp(&b.to_uppercase())
        .then_with(|| a.cmp(b))
}
