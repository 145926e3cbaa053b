//! # positioning-engine
//!
//! Estimates 2D device positions inside a fixed venue from noisy RSSI
//! readings collected at stationary anchors.
//!
//! ## Architecture
//!
//! Two stages, joined only through the durable filtered-reading store:
//!
//! 1. **Ingestion** (event-driven): each decoded reading event is
//!    appended to the raw store, smoothed by a per-channel scalar Kalman
//!    filter, optionally fused across modalities, and written to the
//!    filtered store.
//! 2. **Estimation** (periodic batch): filtered readings are grouped per
//!    device into time-aligned windows, converted to distances through
//!    the log-distance path-loss model, and resolved into positions by a
//!    weighted nonlinear least-squares solver with a closed-form linear
//!    fallback. Estimates are appended idempotently.
//!
//! Every failure is local to one reading or one window; the pipeline
//! itself has no fatal conditions.

pub mod config;
pub mod distance;
pub mod error;
pub mod eval;
pub mod fusion;
pub mod ingest;
pub mod pipeline;
pub mod smoothing;
pub mod solver;
pub mod store;
pub mod window;
