//! # eval
//!
//! Accuracy report: joins stored position estimates against the surveyed
//! `ground_truth` table (written by external tooling) and summarizes the
//! Euclidean error, plus the best observed reading latency per device.

use tracing::info;

use crate::store::Store;

#[derive(Debug, Clone, PartialEq)]
pub struct AccuracyReport {
    pub samples: usize,
    pub mean_error_m: f64,
    pub median_error_m: f64,
    /// Mean over each device's minimum non-negative reading latency.
    pub mean_latency_s: Option<f64>,
}

/// Compute the report, or None when no estimate has a surveyed device.
pub async fn evaluate(store: &Store) -> Result<Option<AccuracyReport>, sqlx::Error> {
    let truth = store.fetch_ground_truth().await?;
    let estimates = store.fetch_estimates().await?;

    let mut errors: Vec<f64> = Vec::new();
    for estimate in &estimates {
        if let Some(&(tx, ty)) = truth.get(&estimate.device_id) {
            errors.push(((estimate.x - tx).powi(2) + (estimate.y - ty).powi(2)).sqrt());
        }
    }
    if errors.is_empty() {
        return Ok(None);
    }

    let latencies = store.min_latency_per_device().await?;
    let mean_latency_s = if latencies.is_empty() {
        None
    } else {
        Some(latencies.values().sum::<f64>() / latencies.len() as f64)
    };

    let mean_error_m = errors.iter().sum::<f64>() / errors.len() as f64;
    Ok(Some(AccuracyReport {
        samples: errors.len(),
        mean_error_m,
        median_error_m: median(&mut errors),
        mean_latency_s,
    }))
}

/// Log the report the way the field team reads it.
pub fn log_report(report: &AccuracyReport) {
    info!("→ Mean error: {:.2} m", report.mean_error_m);
    info!("→ Median error: {:.2} m", report.median_error_m);
    info!("→ Sample count: {}", report.samples);
    match report.mean_latency_s {
        Some(latency) => info!("→ Mean latency: {:.4} s", latency),
        None => info!("→ No latency data recorded"),
    }
}

fn median(errors: &mut [f64]) -> f64 {
    errors.sort_by(|a, b| a.total_cmp(b));
    errors[errors.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_is_upper_middle_element() {
        let mut v = [3.0, 1.0, 2.0];
        assert_eq!(median(&mut v), 2.0);
        let mut v = [4.0, 1.0, 2.0, 3.0];
        assert_eq!(median(&mut v), 3.0);
    }
}
