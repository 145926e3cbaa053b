//! # pipeline
//!
//! The batch estimation stage: pull filtered readings from the store,
//! window them per device, convert RSSI to distance, solve, and append
//! estimates idempotently. Runs on a fixed interval, decoupled from
//! ingestion through the filtered-reading store.
//!
//! Failures are scoped to a single window — a degenerate solve for one
//! device never affects another, and because estimate inserts are
//! idempotent the whole stage is safe to re-run over data it has already
//! processed.

use std::collections::BTreeMap;

use chrono::Duration;
use tracing::{debug, warn};

use positioning_types::{FilteredReading, PositionEstimate, SolveMethod};

use crate::config::{AnchorMap, WindowConfig};
use crate::distance::PathLossModel;
use crate::error::SolveError;
use crate::solver::{self, SolverSettings};
use crate::store::Store;
use crate::window::{synchronize, MeasurementWindow};

/// Outcome counts for one batch run, logged by the binary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    /// Filtered readings considered this run.
    pub readings: usize,
    /// Windows with enough distinct anchors to attempt a solve.
    pub windows: usize,
    /// New estimate rows written.
    pub estimates: usize,
    /// Estimate inserts ignored because the key already existed.
    pub duplicates: usize,
    /// Windows that failed to solve (divergence with singular fallback).
    pub failures: usize,
    /// Windows dropped for insufficient known anchors.
    pub skipped: usize,
}

pub struct PipelineContext {
    pub anchors: AnchorMap,
    pub model: PathLossModel,
    pub solver: SolverSettings,
    pub window: WindowConfig,
    /// Hybrid deployment: estimates from fused windows carry the fused tag.
    pub fused: bool,
}

/// Run one estimation pass over everything currently in the filtered
/// store.
pub async fn run_cycle(store: &Store, ctx: &PipelineContext) -> Result<CycleSummary, sqlx::Error> {
    let readings = store.fetch_filtered().await?;
    let mut summary = CycleSummary {
        readings: readings.len(),
        ..Default::default()
    };

    // Per-device grouping; BTreeMap for a deterministic processing order.
    let mut by_device: BTreeMap<String, Vec<FilteredReading>> = BTreeMap::new();
    for reading in readings {
        by_device
            .entry(reading.device_id.clone())
            .or_default()
            .push(reading);
    }

    let tolerance = Duration::milliseconds((ctx.window.tolerance_s * 1000.0) as i64);

    for (device_id, device_readings) in &by_device {
        let windows = synchronize(device_id, device_readings, tolerance, ctx.window.min_anchors);

        for window in windows {
            match solve_window(&window, ctx) {
                Ok(mut estimate) => {
                    if ctx.fused {
                        estimate.method = SolveMethod::Fused;
                    }
                    if store.insert_estimate(&estimate).await? {
                        summary.estimates += 1;
                        debug!(
                            "Estimated {} @ {} → ({:.2}, {:.2}) [{}]",
                            estimate.device_id,
                            estimate.timestamp,
                            estimate.x,
                            estimate.y,
                            estimate.method.as_str()
                        );
                    } else {
                        summary.duplicates += 1;
                    }
                    summary.windows += 1;
                }
                Err(SolveError::InsufficientAnchors { have, need }) => {
                    summary.skipped += 1;
                    debug!(
                        "Window for {} @ {} dropped: {have} known anchors, need {need}",
                        device_id, window.anchor_timestamp
                    );
                }
                Err(err) => {
                    summary.windows += 1;
                    summary.failures += 1;
                    warn!(
                        "Solve failed for {} @ {}: {err}",
                        device_id, window.resolved_timestamp
                    );
                }
            }
        }
    }

    Ok(summary)
}

/// Resolve one window into a position estimate: map anchors to
/// coordinates (unknown anchor ids are skipped), convert RSSI to
/// distance, and run the solver.
fn solve_window(
    window: &MeasurementWindow,
    ctx: &PipelineContext,
) -> Result<PositionEstimate, SolveError> {
    let mut anchors = Vec::with_capacity(window.readings.len());
    let mut distances = Vec::with_capacity(window.readings.len());

    for (anchor_id, &rssi) in &window.readings {
        match ctx.anchors.get(anchor_id) {
            Some(position) => {
                anchors.push(position);
                distances.push(ctx.model.distance_m(rssi));
            }
            None => debug!("Unknown anchor {anchor_id} in window, skipping reading"),
        }
    }

    if anchors.len() < ctx.window.min_anchors {
        return Err(SolveError::InsufficientAnchors {
            have: anchors.len(),
            need: ctx.window.min_anchors,
        });
    }

    let bounds = ctx.anchors.extent();
    let solution = solver::solve(&anchors, &distances, &bounds, &ctx.solver)?;

    Ok(PositionEstimate {
        device_id: window.device_id.clone(),
        x: solution.x,
        y: solution.y,
        timestamp: window.resolved_timestamp,
        method: solution.method,
    })
}
