//! # smoothing
//!
//! Per-channel RSSI smoothing. Each (device, anchor, modality) channel
//! owns an independent scalar Kalman filter with no velocity term — RSSI
//! is modeled as a slowly drifting constant, not a moving quantity.
//!
//! The filter bank serializes access per key: an outer read-write lock on
//! the key map, one mutex per channel. Updates for unrelated channels
//! never contend; updates for the same channel are serialized.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use positioning_types::Modality;

/// Prior estimate for a channel that has never been observed (dBm).
const INITIAL_ESTIMATE_DBM: f64 = -70.0;
/// Prior estimate uncertainty.
const INITIAL_VARIANCE: f64 = 1.0;

// ── Channel key ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub device_id: String,
    pub anchor_id: String,
    pub modality: Modality,
}

impl ChannelKey {
    pub fn new(device_id: &str, anchor_id: &str, modality: Modality) -> Self {
        Self {
            device_id: device_id.to_string(),
            anchor_id: anchor_id.to_string(),
            modality,
        }
    }
}

// ── Scalar Kalman filter ──────────────────────────────────────────────────────

/// Scalar Kalman recursion over a drifting constant.
///
/// With Q > 0 the variance can never collapse to zero, and the output is a
/// deterministic function of the input history and the fixed priors.
#[derive(Debug, Clone)]
pub struct ChannelFilter {
    estimate: f64,
    variance: f64,
    q: f64,
    r: f64,
}

impl ChannelFilter {
    pub fn new(process_variance: f64, measurement_variance: f64) -> Self {
        Self {
            estimate: INITIAL_ESTIMATE_DBM,
            variance: INITIAL_VARIANCE,
            q: process_variance,
            r: measurement_variance,
        }
    }

    /// Predict, then correct. Cannot fail for finite measurements.
    pub fn update(&mut self, measurement: f64) -> f64 {
        self.variance += self.q;
        let gain = self.variance / (self.variance + self.r);
        self.estimate += gain * (measurement - self.estimate);
        self.variance *= 1.0 - gain;
        self.estimate
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }
}

// ── Filter bank ───────────────────────────────────────────────────────────────

/// All channel filters, created lazily on first observation of a key and
/// kept for the process lifetime (or until `reset`).
pub struct FilterBank {
    channels: RwLock<HashMap<ChannelKey, Arc<Mutex<ChannelFilter>>>>,
    process_variance: f64,
    measurement_variance: f64,
}

impl FilterBank {
    pub fn new(process_variance: f64, measurement_variance: f64) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            process_variance,
            measurement_variance,
        }
    }

    /// Smooth one measurement on the given channel, returning the updated
    /// estimate. State is mutated in place under the channel's own lock.
    pub fn update(&self, key: &ChannelKey, measurement: f64) -> f64 {
        let filter = self.channel(key);
        let mut guard = filter.lock().unwrap();
        guard.update(measurement)
    }

    /// Current estimate without feeding a measurement, if the channel exists.
    pub fn estimate(&self, key: &ChannelKey) -> Option<f64> {
        let channels = self.channels.read().unwrap();
        channels.get(key).map(|f| f.lock().unwrap().estimate())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().unwrap().len()
    }

    /// Drop all channel state (between evaluation runs).
    pub fn reset(&self) {
        self.channels.write().unwrap().clear();
    }

    fn channel(&self, key: &ChannelKey) -> Arc<Mutex<ChannelFilter>> {
        {
            let channels = self.channels.read().unwrap();
            if let Some(f) = channels.get(key) {
                return f.clone();
            }
        }
        let mut channels = self.channels.write().unwrap();
        channels
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ChannelFilter::new(
                    self.process_variance,
                    self.measurement_variance,
                )))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q: f64 = 1e-3;
    const R: f64 = 2.0;

    #[test]
    fn constant_input_converges_monotonically() {
        let mut filter = ChannelFilter::new(Q, R);
        let target = -60.0;
        let mut prev = filter.estimate();
        for _ in 0..500 {
            let est = filter.update(target);
            // Strictly approaching the constant input from below.
            assert!(est > prev && est < target + 1e-9);
            prev = est;
        }
        assert!((prev - target).abs() < 0.01);
    }

    #[test]
    fn variance_reaches_steady_state_fixed_point() {
        let mut filter = ChannelFilter::new(Q, R);
        let mut prev_var = filter.variance();
        for _ in 0..10_000 {
            filter.update(-60.0);
            let var = filter.variance();
            assert!(var > 0.0);
            assert!(var <= prev_var + 1e-12, "variance must decrease monotonically");
            prev_var = var;
        }
        // The predicted variance V = P + Q satisfies V = V·R/(V+R) + Q at
        // the fixed point of the scalar recursion.
        let v = filter.variance() + Q;
        let fixed_point = v * R / (v + R) + Q;
        assert!((v - fixed_point).abs() < 1e-9);
    }

    #[test]
    fn same_inputs_same_outputs() {
        let mut a = ChannelFilter::new(Q, R);
        let mut b = ChannelFilter::new(Q, R);
        let inputs = [-71.0, -64.0, -66.5, -80.0, -58.25];
        for m in inputs {
            assert_eq!(a.update(m), b.update(m));
        }
    }

    #[test]
    fn bank_keeps_channels_independent() {
        let bank = FilterBank::new(Q, R);
        let k1 = ChannelKey::new("dev-1", "ap-a", Modality::Ble);
        let k2 = ChannelKey::new("dev-1", "ap-b", Modality::Ble);
        let k3 = ChannelKey::new("dev-1", "ap-a", Modality::Wifi);

        bank.update(&k1, -50.0);
        bank.update(&k1, -50.0);
        let e2 = bank.update(&k2, -90.0);
        let e3 = bank.update(&k3, -90.0);

        assert_eq!(bank.channel_count(), 3);
        // k2 and k3 saw identical histories; k1 did not.
        assert_eq!(e2, e3);
        assert!(bank.estimate(&k1).unwrap() > e2);

        bank.reset();
        assert_eq!(bank.channel_count(), 0);
    }
}
