//! # distance
//!
//! Log-distance path-loss model: maps a smoothed RSSI to an estimated
//! range from the anchor. Venue constants A (reference RSSI at 1 m) and
//! n (path-loss exponent) come from configuration; `calibrate` derives
//! them from reference measurements taken at known distances.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("no reference samples taken at 1 m")]
    NoReferenceSamples,
    #[error("no usable samples at distances other than 1 m")]
    NoFarSamples,
}

#[derive(Debug, Clone, Copy)]
pub struct PathLossModel {
    /// Reference RSSI at 1 m (dBm).
    pub reference_rssi_1m: f64,
    /// Path-loss exponent n. Strictly positive.
    pub exponent: f64,
}

impl PathLossModel {
    pub fn new(reference_rssi_1m: f64, exponent: f64) -> Self {
        Self {
            reference_rssi_1m,
            exponent,
        }
    }

    /// distance = 10^((A − rssi) / (10·n)), meters. Strictly decreasing in
    /// rssi for n > 0.
    pub fn distance_m(&self, rssi: f64) -> f64 {
        10f64.powf((self.reference_rssi_1m - rssi) / (10.0 * self.exponent))
    }

    /// Model inverse: the RSSI expected at `distance_m` meters. Used by the
    /// simulator and by calibration sanity checks.
    pub fn expected_rssi(&self, distance_m: f64) -> f64 {
        self.reference_rssi_1m - 10.0 * self.exponent * distance_m.log10()
    }

    /// Estimate (A, n) from `(rssi, known_distance_m)` reference pairs.
    ///
    /// A is the mean RSSI of the 1 m samples; n is the mean over each
    /// non-1 m reference distance d of (A − mean_rssi_at_d) / (10·log10 d).
    /// Produces usable constants when a formal regression is unavailable
    /// or ill-conditioned.
    pub fn calibrate(samples: &[(f64, f64)]) -> Result<Self, CalibrationError> {
        const ONE_METER_TOL: f64 = 0.01;

        let at_1m: Vec<f64> = samples
            .iter()
            .filter(|(_, d)| (d - 1.0).abs() <= ONE_METER_TOL)
            .map(|(rssi, _)| *rssi)
            .collect();
        if at_1m.is_empty() {
            return Err(CalibrationError::NoReferenceSamples);
        }
        let a = mean(&at_1m);

        // Group the remaining samples by reference distance.
        let mut by_distance: Vec<(f64, Vec<f64>)> = Vec::new();
        for &(rssi, d) in samples {
            if (d - 1.0).abs() <= ONE_METER_TOL || d <= 0.0 {
                continue;
            }
            match by_distance.iter_mut().find(|(dd, _)| (dd - d).abs() <= ONE_METER_TOL) {
                Some((_, bucket)) => bucket.push(rssi),
                None => by_distance.push((d, vec![rssi])),
            }
        }
        if by_distance.is_empty() {
            return Err(CalibrationError::NoFarSamples);
        }

        let n = mean(
            &by_distance
                .iter()
                .map(|(d, bucket)| (a - mean(bucket)) / (10.0 * d.log10()))
                .collect::<Vec<_>>(),
        );

        Ok(Self::new(a, n))
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
