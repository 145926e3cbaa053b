//! # window
//!
//! Groups a device's filtered readings into time-aligned measurement
//! windows for multilateration. One canonical policy, chosen for
//! reproducibility over the several inconsistent prototype variants:
//!
//! - one greedy pass in ascending timestamp order, windows never overlap
//! - the first unconsumed reading is the window's anchor reading; every
//!   subsequent reading within δ of *that* reading is included (tolerance
//!   is never chained pairwise)
//! - a repeated anchor_id inside the window is overwritten — last wins
//! - scanning stops at the first reading outside tolerance; everything
//!   scanned is consumed whether or not a window is emitted
//! - a window is emitted only when ≥ `min_anchors` distinct anchors are
//!   present; its resolved timestamp is the midpoint of the earliest and
//!   latest included readings

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use positioning_types::FilteredReading;

/// One time-aligned set of per-anchor smoothed readings for a device.
#[derive(Debug, Clone)]
pub struct MeasurementWindow {
    pub device_id: String,
    /// Timestamp of the anchor reading (the grouping reference instant).
    pub anchor_timestamp: DateTime<Utc>,
    /// Midpoint of the earliest and latest included readings.
    pub resolved_timestamp: DateTime<Utc>,
    /// anchor_id → filtered RSSI.
    pub readings: HashMap<String, f64>,
}

/// Build all eligible windows from a device's filtered readings.
///
/// Input order does not matter; readings are sorted by timestamp first.
pub fn synchronize(
    device_id: &str,
    readings: &[FilteredReading],
    tolerance: Duration,
    min_anchors: usize,
) -> Vec<MeasurementWindow> {
    let mut sorted: Vec<&FilteredReading> = readings.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);

    let mut windows = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let anchor = sorted[i];
        let mut included: HashMap<String, f64> = HashMap::new();
        included.insert(anchor.anchor_id.clone(), anchor.filtered_rssi);
        let earliest = anchor.timestamp;
        let mut latest = anchor.timestamp;

        let mut j = i + 1;
        while j < sorted.len() {
            let candidate = sorted[j];
            if candidate.timestamp - anchor.timestamp > tolerance {
                break;
            }
            // Last-within-window wins for a repeated anchor.
            included.insert(candidate.anchor_id.clone(), candidate.filtered_rssi);
            latest = candidate.timestamp;
            j += 1;
        }

        if included.len() >= min_anchors {
            let resolved_timestamp = earliest + (latest - earliest) / 2;
            windows.push(MeasurementWindow {
                device_id: device_id.to_string(),
                anchor_timestamp: anchor.timestamp,
                resolved_timestamp,
                readings: included,
            });
        }
        // Scanned readings are consumed either way — windows stay disjoint.
        i = j;
    }
    windows
}
