//! # config
//!
//! Engine configuration: venue anchor layout, path-loss constants, filter
//! tuning, windowing and solver parameters. Loaded once from a TOML file
//! at startup (with an embedded default as fallback); anchor changes
//! require a restart. A small set of deploy-time values can be overridden
//! through the environment (`POSENGINE_UDP_PORT`, `POSENGINE_DB`).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::EngineError;

/// Compiled-in fallback so the engine starts without a config file on disk.
const DEFAULT_CONFIG: &str = include_str!("../config.toml");

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    /// anchor_id → [x, y] in venue meters. At least 3 entries.
    pub anchors: HashMap<String, [f64; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathLossConfig {
    /// Reference RSSI at 1 m (dBm).
    pub reference_rssi_1m: f64,
    /// Path-loss exponent n.
    pub exponent: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    pub process_variance: f64,
    pub measurement_variance: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            process_variance: 1e-3,
            measurement_variance: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Grouping tolerance δ, seconds relative to the window's anchor reading.
    pub tolerance_s: f64,
    /// Minimum distinct anchors for a window to be solvable.
    pub min_anchors: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            tolerance_s: 2.0,
            min_anchors: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolverTuning {
    /// Hard budget on nonlinear cost evaluations.
    pub max_evals: u32,
    /// Convergence threshold on the clamped step norm, meters.
    pub converge_threshold_m: f64,
    /// ε in the per-anchor weight 1/(dᵢ + ε).
    pub weight_epsilon: f64,
}

impl Default for SolverTuning {
    fn default() -> Self {
        Self {
            max_evals: 200,
            converge_threshold_m: 1e-6,
            weight_epsilon: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// Batch estimation interval, seconds.
    pub interval_s: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self { interval_s: 5.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    /// Hybrid (two-modality) deployment.
    pub enabled: bool,
    /// Max separation between the two modalities' smoothed samples, seconds.
    pub pair_tolerance_s: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pair_tolerance_s: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub udp_port: u16,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { udp_port: 5544 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub database_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "positioning.db".to_string(),
        }
    }
}

// ── Top level ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub venue: VenueConfig,
    pub path_loss: PathLossConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub solver: SolverTuning,
    #[serde(default)]
    pub stage: StageConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Load from `path`, falling back to the embedded default when the file
    /// is absent. Environment overrides are applied after parsing.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let text = if Path::new(path).exists() {
            std::fs::read_to_string(path)
                .map_err(|e| EngineError::Config(format!("cannot read {path}: {e}")))?
        } else {
            info!("No config at {path}, using embedded defaults");
            DEFAULT_CONFIG.to_string()
        };

        let mut cfg: EngineConfig = toml::from_str(&text)
            .map_err(|e| EngineError::Config(format!("invalid TOML in {path}: {e}")))?;

        if let Some(port) = std::env::var("POSENGINE_UDP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            cfg.ingest.udp_port = port;
        }
        if let Ok(db) = std::env::var("POSENGINE_DB") {
            cfg.store.database_path = db;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.venue.anchors.len() < self.window.min_anchors {
            return Err(EngineError::Config(format!(
                "{} anchors configured, solver needs at least {}",
                self.venue.anchors.len(),
                self.window.min_anchors
            )));
        }
        if self.path_loss.exponent <= 0.0 {
            return Err(EngineError::Config(
                "path-loss exponent must be positive".into(),
            ));
        }
        if self.window.tolerance_s <= 0.0 {
            return Err(EngineError::Config(
                "window tolerance must be positive".into(),
            ));
        }
        if self.filter.process_variance <= 0.0 || self.filter.measurement_variance <= 0.0 {
            return Err(EngineError::Config(
                "filter variances must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn anchor_map(&self) -> AnchorMap {
        AnchorMap::new(
            self.venue
                .anchors
                .iter()
                .map(|(id, &[x, y])| (id.clone(), (x, y))),
        )
    }
}

// ── Anchor map ────────────────────────────────────────────────────────────────

/// Venue bounding box, from anchor extents. The solver searches inside it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn clamp(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x.clamp(self.min_x, self.max_x),
            y.clamp(self.min_y, self.max_y),
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Static anchor_id → (x, y) mapping, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AnchorMap {
    positions: HashMap<String, (f64, f64)>,
}

impl AnchorMap {
    pub fn new(entries: impl IntoIterator<Item = (String, (f64, f64))>) -> Self {
        Self {
            positions: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, anchor_id: &str) -> Option<(f64, f64)> {
        self.positions.get(anchor_id).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Bounding box over all anchor coordinates.
    pub fn extent(&self) -> Bounds {
        let mut b = Bounds {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for &(x, y) in self.positions.values() {
            b.min_x = b.min_x.min(x);
            b.max_x = b.max_x.max(x);
            b.min_y = b.min_y.min(y);
            b.max_y = b.max_y.max(y);
        }
        b
    }
}
