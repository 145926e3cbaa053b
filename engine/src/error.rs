//! # error
//!
//! Typed error kinds for the estimation engine. Everything here is local
//! and non-fatal to the running pipeline: the worst outcome is "no
//! estimate produced for this window this cycle".

use thiserror::Error;

/// Errors at the ingestion boundary. A malformed datagram is dropped and
/// logged; the listener keeps running.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed reading: {0}")]
    Malformed(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Per-window solve failures. `Divergence` is internal — it triggers the
/// linear fallback before surfacing; `Singular` means the window produces
/// no estimate at all.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolveError {
    #[error("window has {have} usable anchors, need {need}")]
    InsufficientAnchors { have: usize, need: usize },
    #[error("nonlinear solver did not converge within the evaluation budget")]
    Divergence,
    #[error("linear system is singular (collinear or coincident anchors)")]
    Singular,
}

/// Process-level failures surfaced to the binary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}
