//! # positioning-types
//!
//! Shared record types for the indoor positioning suite.
//!
//! These types are used by:
//! - `positioning-engine`: receiving and parsing reading envelopes from
//!   anchor collectors, and persisting filtered readings / estimates
//! - `rssi-simulator`: producing synthetic reading envelopes during
//!   development, when no anchor hardware is on the network
//!
//! ## Conventions
//!
//! - RSSI values are signed dBm integers as reported by the radio.
//! - Venue coordinates are Cartesian meters with the origin at one corner
//!   of the anchor rectangle.
//! - Timestamps are UTC wall-clock; `timestamp_epoch` is the sender-side
//!   Unix epoch in fractional seconds, used only to derive latency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Signal Modality ───────────────────────────────────────────────────────────

/// Radio technology a reading was captured on. Hybrid deployments run one
/// smoothing channel per modality and fuse afterwards; single-modality
/// deployments use one tag throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Ble,
    Wifi,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Ble => "BLE",
            Modality::Wifi => "WIFI",
        }
    }

    /// The opposite modality in a two-technology deployment.
    pub fn peer(&self) -> Modality {
        match self {
            Modality::Ble => Modality::Wifi,
            Modality::Wifi => Modality::Ble,
        }
    }
}

impl Default for Modality {
    fn default() -> Self {
        Modality::Ble
    }
}

// ── Reading Envelope (ingestion wire format) ──────────────────────────────────

/// One decoded reading event as delivered by the ingestion transport.
///
/// The transport (broker, QoS, reconnects) is a collaborator; the engine
/// only consumes these envelopes. Missing required fields or a non-numeric
/// `rssi` fail serde decoding and are rejected at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingEnvelope {
    pub device_id: String,
    pub anchor_id: String,
    /// Signed dBm as reported by the radio.
    pub rssi: i32,
    pub timestamp: DateTime<Utc>,
    /// Sender-side Unix epoch (fractional seconds), for latency derivation.
    #[serde(default)]
    pub timestamp_epoch: Option<f64>,
    /// Absent in single-modality deployments (defaults to BLE).
    #[serde(default)]
    pub modality: Option<Modality>,
}

impl ReadingEnvelope {
    /// Field-level checks serde cannot express.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.device_id.trim().is_empty() {
            return Err("empty device_id");
        }
        if self.anchor_id.trim().is_empty() {
            return Err("empty anchor_id");
        }
        Ok(())
    }
}

// ── Raw Reading ───────────────────────────────────────────────────────────────

/// An accepted raw reading, immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReading {
    pub device_id: String,
    pub anchor_id: String,
    pub rssi: i32,
    pub timestamp: DateTime<Utc>,
    /// Send-to-receive latency in seconds, when the sender stamped an epoch.
    pub latency: Option<f64>,
    pub modality: Modality,
}

impl RawReading {
    /// Build from a validated envelope, deriving latency from the sender
    /// epoch when present. Clock skew can make the latency negative;
    /// consumers filter on `latency >= 0`.
    pub fn from_envelope(env: &ReadingEnvelope, received_at: DateTime<Utc>) -> Self {
        let latency = env.timestamp_epoch.map(|sent| {
            received_at.timestamp_micros() as f64 / 1_000_000.0 - sent
        });
        Self {
            device_id: env.device_id.clone(),
            anchor_id: env.anchor_id.clone(),
            rssi: env.rssi,
            timestamp: env.timestamp,
            latency,
            modality: env.modality.unwrap_or_default(),
        }
    }
}

// ── Filtered Reading ──────────────────────────────────────────────────────────

/// One smoothed (and, in hybrid mode, fused) reading. Logically unique on
/// `(timestamp, anchor_id, device_id)` — the store rejects duplicates
/// rather than overwriting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredReading {
    pub device_id: String,
    pub anchor_id: String,
    pub filtered_rssi: f64,
    pub timestamp: DateTime<Utc>,
    pub latency: Option<f64>,
}

// ── Position Estimate ─────────────────────────────────────────────────────────

/// How a position estimate was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveMethod {
    /// Weighted nonlinear least squares converged.
    Nonlinear,
    /// Closed-form linear multilateration after nonlinear divergence.
    LinearFallback,
    /// Window built from fused multi-modality readings.
    Fused,
}

impl SolveMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolveMethod::Nonlinear => "nonlinear",
            SolveMethod::LinearFallback => "linear_fallback",
            SolveMethod::Fused => "fused",
        }
    }

    pub fn from_str(s: &str) -> Option<SolveMethod> {
        match s {
            "nonlinear" => Some(SolveMethod::Nonlinear),
            "linear_fallback" => Some(SolveMethod::LinearFallback),
            "fused" => Some(SolveMethod::Fused),
            _ => None,
        }
    }
}

/// A solved 2D position, unique per `(device_id, timestamp)` and immutable
/// once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub device_id: String,
    pub x: f64,
    pub y: f64,
    pub timestamp: DateTime<Utc>,
    pub method: SolveMethod,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_decodes_with_optional_fields_absent() {
        let json = r#"{
            "device_id": "m5-keeshen",
            "anchor_id": "ap-a",
            "rssi": -63,
            "timestamp": "2025-03-14T09:26:53Z"
        }"#;
        let env: ReadingEnvelope = serde_json::from_str(json).expect("decode");
        assert_eq!(env.rssi, -63);
        assert!(env.timestamp_epoch.is_none());
        assert_eq!(env.modality, None);
        assert!(env.validate().is_ok());
    }

    #[test]
    fn envelope_rejects_non_numeric_rssi() {
        let json = r#"{
            "device_id": "m5-keeshen",
            "anchor_id": "ap-a",
            "rssi": "strong",
            "timestamp": "2025-03-14T09:26:53Z"
        }"#;
        assert!(serde_json::from_str::<ReadingEnvelope>(json).is_err());
    }

    #[test]
    fn latency_derived_from_sender_epoch() {
        let received = DateTime::parse_from_rfc3339("2025-03-14T09:26:54Z")
            .unwrap()
            .with_timezone(&Utc);
        let env = ReadingEnvelope {
            device_id: "d".into(),
            anchor_id: "a".into(),
            rssi: -60,
            timestamp: received,
            timestamp_epoch: Some(received.timestamp() as f64 - 0.25),
            modality: None,
        };
        let raw = RawReading::from_envelope(&env, received);
        let latency = raw.latency.expect("latency");
        assert!((latency - 0.25).abs() < 1e-6);
        assert_eq!(raw.modality, Modality::Ble);
    }
}
