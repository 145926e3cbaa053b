//! # solver
//!
//! 2D multilateration from ≥3 (anchor position, distance) pairs.
//!
//! Primary method: weighted nonlinear least squares via iterative
//! Gauss-Newton on the residuals `fᵢ = wᵢ·(‖p − aᵢ‖ − dᵢ)` with
//! `wᵢ = 1/(dᵢ + ε)` so nearer anchors dominate, a soft-L1 robust
//! reweighting to limit outlier influence, the anchor centroid as the
//! initial guess, and the iterate clamped to the venue bounding box after
//! every step. The evaluation budget is hard-capped.
//!
//! Fallback: closed-form linear multilateration against a reference
//! anchor, solved through the weighted normal equations (2×2, Cramer).
//! A singular fallback system fails the window — no estimate is emitted
//! and the caller records the failure.

use positioning_types::SolveMethod;

use crate::config::Bounds;
use crate::error::SolveError;

/// Minimum anchor count for any solve attempt.
pub const MIN_ANCHORS: usize = 3;

/// Guard against division by a vanishing anchor distance.
const MIN_RANGE_M: f64 = 1e-3;

/// Singularity threshold for the 2×2 normal-matrix determinant.
const SINGULAR_DET: f64 = 1e-10;

#[derive(Debug, Clone, Copy)]
pub struct SolverSettings {
    /// Hard budget on Gauss-Newton evaluations.
    pub max_evals: u32,
    /// Convergence threshold on the clamped step norm, meters.
    pub converge_threshold_m: f64,
    /// ε in the per-anchor weight 1/(dᵢ + ε).
    pub weight_epsilon: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_evals: 200,
            converge_threshold_m: 1e-6,
            weight_epsilon: 0.1,
        }
    }
}

/// A solved position with solve diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct Solution {
    pub x: f64,
    pub y: f64,
    pub method: SolveMethod,
    /// Weighted RMS residual at the solution (nonlinear method only).
    pub rms_residual: f64,
    /// Gauss-Newton evaluations spent (0 for the linear fallback).
    pub evaluations: u32,
}

/// Solve one window: nonlinear first, linear fallback on divergence.
pub fn solve(
    anchors: &[(f64, f64)],
    distances: &[f64],
    bounds: &Bounds,
    settings: &SolverSettings,
) -> Result<Solution, SolveError> {
    if anchors.len() < MIN_ANCHORS || anchors.len() != distances.len() {
        return Err(SolveError::InsufficientAnchors {
            have: anchors.len().min(distances.len()),
            need: MIN_ANCHORS,
        });
    }

    match solve_nonlinear(anchors, distances, bounds, settings) {
        Ok(solution) => Ok(solution),
        Err(SolveError::Divergence) => {
            let (x, y) = solve_linear(anchors, distances, settings.weight_epsilon)?;
            Ok(Solution {
                x,
                y,
                method: SolveMethod::LinearFallback,
                rms_residual: 0.0,
                evaluations: 0,
            })
        }
        Err(other) => Err(other),
    }
}

// ── Weighted nonlinear least squares ──────────────────────────────────────────

fn solve_nonlinear(
    anchors: &[(f64, f64)],
    distances: &[f64],
    bounds: &Bounds,
    settings: &SolverSettings,
) -> Result<Solution, SolveError> {
    // Initial guess: centroid of the participating anchors, inside bounds.
    let n = anchors.len() as f64;
    let (cx, cy) = anchors
        .iter()
        .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x, sy + y));
    let (mut px, mut py) = bounds.clamp(cx / n, cy / n);

    let mut evaluations = 0;
    while evaluations < settings.max_evals {
        evaluations += 1;

        // Accumulate the weighted normal equations AᵀWA·δ = AᵀW·r.
        let mut atwa = [[0.0f64; 2]; 2];
        let mut atwb = [0.0f64; 2];
        let mut sum_sq = 0.0;

        for (i, &(ax, ay)) in anchors.iter().enumerate() {
            let dx = px - ax;
            let dy = py - ay;
            let range = (dx * dx + dy * dy).sqrt().max(MIN_RANGE_M);
            // Measured minus predicted, so δ points toward the data.
            let residual = distances[i] - range;

            let w = 1.0 / (distances[i] + settings.weight_epsilon);
            let f = w * residual;
            sum_sq += f * f;
            // soft-L1 reweighting: large residuals lose influence.
            let robust = 1.0 / (1.0 + f * f).sqrt();
            let weight = w * w * robust;

            // Jacobian of the range: (p − aᵢ)/‖p − aᵢ‖.
            let jx = dx / range;
            let jy = dy / range;

            atwa[0][0] += weight * jx * jx;
            atwa[0][1] += weight * jx * jy;
            atwa[1][0] += weight * jy * jx;
            atwa[1][1] += weight * jy * jy;
            atwb[0] += weight * jx * residual;
            atwb[1] += weight * jy * residual;
        }

        let det = atwa[0][0] * atwa[1][1] - atwa[0][1] * atwa[1][0];
        if det.abs() < SINGULAR_DET {
            // Degenerate geometry (collinear anchors with the iterate on
            // their line) — let the linear fallback classify it.
            return Err(SolveError::Divergence);
        }

        let sx = (atwa[1][1] * atwb[0] - atwa[0][1] * atwb[1]) / det;
        let sy = (atwa[0][0] * atwb[1] - atwa[1][0] * atwb[0]) / det;

        // Bounded search: project back into the venue box, and measure
        // convergence on the movement that survives the projection.
        let (nx, ny) = bounds.clamp(px + sx, py + sy);
        let step = ((nx - px).powi(2) + (ny - py).powi(2)).sqrt();
        px = nx;
        py = ny;

        if step < settings.converge_threshold_m {
            return Ok(Solution {
                x: px,
                y: py,
                method: SolveMethod::Nonlinear,
                rms_residual: (sum_sq / n).sqrt(),
                evaluations,
            });
        }
    }

    Err(SolveError::Divergence)
}

// ── Linear fallback ───────────────────────────────────────────────────────────

/// Closed-form multilateration: subtract the reference anchor's circle
/// equation from every other anchor's to linearize, then solve the
/// weighted normal equations `(AᵀWA)p = AᵀWb` with W = diag(1/(dᵢ+ε)).
pub fn solve_linear(
    anchors: &[(f64, f64)],
    distances: &[f64],
    weight_epsilon: f64,
) -> Result<(f64, f64), SolveError> {
    if anchors.len() < MIN_ANCHORS {
        return Err(SolveError::InsufficientAnchors {
            have: anchors.len(),
            need: MIN_ANCHORS,
        });
    }

    let (x0, y0) = anchors[0];
    let d0 = distances[0];

    let mut atwa = [[0.0f64; 2]; 2];
    let mut atwb = [0.0f64; 2];

    for i in 1..anchors.len() {
        let (xi, yi) = anchors[i];
        let di = distances[i];

        let a0 = 2.0 * (xi - x0);
        let a1 = 2.0 * (yi - y0);
        // ‖p−aᵢ‖² − ‖p−a₀‖² = dᵢ² − d₀², rearranged for p.
        let b = (d0 * d0 - di * di) + (xi * xi + yi * yi) - (x0 * x0 + y0 * y0);
        let w = 1.0 / (di + weight_epsilon);

        atwa[0][0] += w * a0 * a0;
        atwa[0][1] += w * a0 * a1;
        atwa[1][0] += w * a1 * a0;
        atwa[1][1] += w * a1 * a1;
        atwb[0] += w * a0 * b;
        atwb[1] += w * a1 * b;
    }

    let det = atwa[0][0] * atwa[1][1] - atwa[0][1] * atwa[1][0];
    if det.abs() < SINGULAR_DET {
        return Err(SolveError::Singular);
    }

    let x = (atwa[1][1] * atwb[0] - atwa[0][1] * atwb[1]) / det;
    let y = (atwa[0][0] * atwb[1] - atwa[1][0] * atwb[0]) / det;
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn euclid(a: (f64, f64), b: (f64, f64)) -> f64 {
        ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
    }

    fn wide_bounds() -> Bounds {
        Bounds {
            min_x: -100.0,
            max_x: 100.0,
            min_y: -100.0,
            max_y: 100.0,
        }
    }

    #[test]
    fn exact_distances_recover_the_point() {
        let anchors = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        let truth = (3.0, 4.0);
        let distances: Vec<f64> = anchors.iter().map(|&a| euclid(a, truth)).collect();

        let solution = solve(
            &anchors,
            &distances,
            &wide_bounds(),
            &SolverSettings::default(),
        )
        .expect("solvable geometry");

        assert_eq!(solution.method, SolveMethod::Nonlinear);
        assert!((solution.x - truth.0).abs() < 1e-3);
        assert!((solution.y - truth.1).abs() < 1e-3);
        assert!(solution.rms_residual < 1e-6);
    }

    #[test]
    fn four_anchors_overdetermined() {
        let anchors = [(0.0, 0.0), (4.96, 0.0), (4.96, 8.06), (0.0, 8.06)];
        let truth = (2.0, 5.0);
        let distances: Vec<f64> = anchors.iter().map(|&a| euclid(a, truth)).collect();

        let solution = solve(
            &anchors,
            &distances,
            &wide_bounds(),
            &SolverSettings::default(),
        )
        .expect("solvable geometry");
        assert!((solution.x - truth.0).abs() < 1e-3);
        assert!((solution.y - truth.1).abs() < 1e-3);
    }

    #[test]
    fn collinear_anchors_fail_cleanly() {
        let anchors = [(0.0, 0.0), (5.0, 0.0), (10.0, 0.0)];
        let distances = [2.0, 3.0, 8.0];
        let bounds = Bounds {
            min_x: 0.0,
            max_x: 10.0,
            min_y: 0.0,
            max_y: 0.0,
        };

        let err = solve(&anchors, &distances, &bounds, &SolverSettings::default())
            .expect_err("collinear geometry cannot resolve a 2D point");
        assert_eq!(err, SolveError::Singular);
    }

    #[test]
    fn linear_fallback_alone_is_exact() {
        let anchors = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        let truth = (3.0, 4.0);
        let distances: Vec<f64> = anchors.iter().map(|&a| euclid(a, truth)).collect();

        let (x, y) = solve_linear(&anchors, &distances, 0.1).expect("non-singular");
        assert!((x - truth.0).abs() < 1e-9);
        assert!((y - truth.1).abs() < 1e-9);
    }

    #[test]
    fn inconsistent_distances_stay_inside_bounds() {
        // Distances far larger than the venue can produce: the bounded
        // search must still converge to a point inside the box.
        let anchors = [(0.0, 0.0), (4.96, 0.0), (0.0, 8.06)];
        let distances = [32.8, 55.3, 93.2];
        let bounds = Bounds {
            min_x: 0.0,
            max_x: 4.96,
            min_y: 0.0,
            max_y: 8.06,
        };

        let solution = solve(&anchors, &distances, &bounds, &SolverSettings::default())
            .expect("bounded solve");
        assert!(bounds.contains(solution.x, solution.y));
    }

    #[test]
    fn too_few_anchors_rejected() {
        let err = solve(
            &[(0.0, 0.0), (1.0, 1.0)],
            &[1.0, 1.0],
            &wide_bounds(),
            &SolverSettings::default(),
        )
        .expect_err("two anchors cannot trilaterate");
        assert!(matches!(err, SolveError::InsufficientAnchors { have: 2, need: 3 }));
    }
}
