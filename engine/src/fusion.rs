//! # fusion
//!
//! Multi-modality combiner for hybrid deployments. Each modality is
//! smoothed through its own channel first — fusion never shares filter
//! state — and the combiner pairs the two smoothed streams per
//! (device, anchor): when the peer modality has a sample within the
//! pairing tolerance, the fused value is the arithmetic mean of the two
//! estimates. The fused value then participates in windowing and the
//! distance model exactly like a single-modality reading.
//!
//! Without a fresh peer sample no filtered reading is emitted yet; the
//! hybrid pipeline requires both technologies to agree on a time window.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use positioning_types::Modality;

#[derive(Debug, Clone, Copy)]
struct SmoothedSample {
    value: f64,
    timestamp: DateTime<Utc>,
    latency: Option<f64>,
}

/// A fused RSSI value with its combined latency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedValue {
    pub rssi: f64,
    pub latency: Option<f64>,
}

pub struct FusionCombiner {
    last: Mutex<HashMap<(String, String, Modality), SmoothedSample>>,
    pair_tolerance: Duration,
}

impl FusionCombiner {
    pub fn new(pair_tolerance_s: f64) -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
            pair_tolerance: Duration::milliseconds((pair_tolerance_s * 1000.0) as i64),
        }
    }

    /// Record `value` as the latest smoothed sample for this channel and
    /// return the fused value if the peer modality reported within
    /// tolerance.
    pub fn fuse(
        &self,
        device_id: &str,
        anchor_id: &str,
        modality: Modality,
        value: f64,
        timestamp: DateTime<Utc>,
        latency: Option<f64>,
    ) -> Option<FusedValue> {
        let mut last = self.last.lock().unwrap();
        last.insert(
            (device_id.to_string(), anchor_id.to_string(), modality),
            SmoothedSample {
                value,
                timestamp,
                latency,
            },
        );

        let peer_key = (
            device_id.to_string(),
            anchor_id.to_string(),
            modality.peer(),
        );
        let peer = last.get(&peer_key)?;
        let gap = (timestamp - peer.timestamp).abs();
        if gap > self.pair_tolerance {
            return None;
        }

        let latency = match (latency, peer.latency) {
            (Some(a), Some(b)) => Some((a + b) / 2.0),
            (one, other) => one.or(other),
        };
        Some(FusedValue {
            rssi: (value + peer.value) / 2.0,
            latency,
        })
    }

    /// Drop all pairing state (between evaluation runs).
    pub fn reset(&self) {
        self.last.lock().unwrap().clear();
    }
}
