//! Built-in computations for the local backend.
//!
//! Both functions take spike trains as `{"<unit id>": [frame, ...]}` along
//! with the recording `samplerate` in Hz, and return `{"<unit id>": value}`.

use serde_json::{Map, Value};

use labbox_hither::{Kwargs, LocalBackend};

pub const GET_ISI_VIOLATION_RATES: &str = "get_isi_violation_rates";
pub const GET_FIRING_RATES: &str = "get_firing_rates";

/// Refractory threshold used when the request does not set one.
pub const DEFAULT_ISI_THRESHOLD_MSEC: f64 = 2.5;

/// Register every built-in function.
pub fn register_builtins(backend: &mut LocalBackend) {
    backend
        .register(GET_ISI_VIOLATION_RATES, isi_violation_rates)
        .register(GET_FIRING_RATES, firing_rates);
}

/// Fraction of each unit's inter-spike intervals shorter than
/// `isi_threshold_msec`. Units with fewer than two spikes score zero.
pub fn isi_violation_rates(kwargs: &Kwargs) -> Result<Value, String> {
    let samplerate = samplerate(kwargs)?;
    let threshold_msec = match kwargs.get("isi_threshold_msec") {
        None | Some(Value::Null) => DEFAULT_ISI_THRESHOLD_MSEC,
        Some(value) => value
            .as_f64()
            .filter(|t| t.is_finite() && *t >= 0.0)
            .ok_or("isi_threshold_msec must be a non-negative number")?,
    };
    let threshold_frames = threshold_msec / 1000.0 * samplerate;

    let mut rates = Map::new();
    for (unit_id, mut frames) in spike_trains(kwargs)? {
        frames.sort_by(f64::total_cmp);
        let intervals = frames.len().saturating_sub(1);
        let violations = frames
            .windows(2)
            .filter(|pair| pair[1] - pair[0] < threshold_frames)
            .count();
        let rate = if intervals == 0 {
            0.0
        } else {
            violations as f64 / intervals as f64
        };
        rates.insert(unit_id, Value::from(rate));
    }
    Ok(Value::Object(rates))
}

/// Spikes per second for each unit over the recording duration.
///
/// The duration is `num_frames / samplerate`; without `num_frames` it runs
/// to the last spike of any unit.
pub fn firing_rates(kwargs: &Kwargs) -> Result<Value, String> {
    let samplerate = samplerate(kwargs)?;
    let trains = spike_trains(kwargs)?;

    let num_frames = match kwargs.get("num_frames") {
        None | Some(Value::Null) => trains
            .iter()
            .flat_map(|(_, frames)| frames.iter().copied())
            .fold(0.0, f64::max)
            + 1.0,
        Some(value) => value
            .as_f64()
            .filter(|n| n.is_finite() && *n > 0.0)
            .ok_or("num_frames must be a positive number")?,
    };
    let duration_sec = num_frames / samplerate;

    let rates = trains
        .into_iter()
        .map(|(unit_id, frames)| (unit_id, Value::from(frames.len() as f64 / duration_sec)))
        .collect();
    Ok(Value::Object(rates))
}

fn samplerate(kwargs: &Kwargs) -> Result<f64, String> {
    kwargs
        .get("samplerate")
        .and_then(Value::as_f64)
        .filter(|rate| rate.is_finite() && *rate > 0.0)
        .ok_or_else(|| "samplerate must be a positive number".to_string())
}

fn spike_trains(kwargs: &Kwargs) -> Result<Vec<(String, Vec<f64>)>, String> {
    let trains = kwargs
        .get("spike_trains")
        .and_then(Value::as_object)
        .ok_or("spike_trains must be an object of unit id to frames")?;

    trains
        .iter()
        .map(|(unit_id, frames)| -> Result<(String, Vec<f64>), String> {
            let frames = frames
                .as_array()
                .ok_or_else(|| format!("spike train for unit {unit_id} is not an array"))?
                .iter()
                .map(|frame| {
                    frame
                        .as_f64()
                        .ok_or_else(|| format!("spike train for unit {unit_id} has a non-numeric frame"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((unit_id.clone(), frames))
        })
        .collect()
}
