//! main.rs — synthetic RSSI reading generator
//!
//! Stands in for the anchor-side collectors when no radio hardware is on
//! the network: places a handful of devices at fixed ground-truth points
//! inside the reference venue, synthesizes what each anchor would hear
//! through the inverse log-distance path-loss model plus Gaussian
//! shadowing, and sends the readings to the engine's ingestion port as
//! JSON envelopes.
//!
//! Ground-truth positions are logged at startup so they can be surveyed
//! into the `ground_truth` table for accuracy evaluation.

use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use positioning_types::{Modality, ReadingEnvelope};

// ── Reference venue (matches engine/config.toml) ─────────────────────────────

const ANCHORS: [(&str, f64, f64); 4] = [
    ("ap-a", 0.0, 0.0),
    ("ap-b", 4.96, 0.0),
    ("ap-c", 4.96, 8.06),
    ("ap-d", 0.0, 8.06),
];

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rssi-sim", about = "Synthetic RSSI reading generator")]
struct Args {
    /// Engine ingestion address
    #[arg(long, default_value = "127.0.0.1:5544")]
    engine_addr: String,
    /// Readings per anchor per second
    #[arg(long, default_value = "2.0")]
    rate_hz: f64,
    /// Number of simulated devices (placed on a deterministic grid)
    #[arg(long, default_value = "3")]
    devices: u32,
    /// Gaussian shadowing standard deviation (dB)
    #[arg(long, default_value = "2.0")]
    noise_db: f64,
    /// Reference RSSI at 1 m (dBm)
    #[arg(long, default_value = "-55.525", allow_hyphen_values = true)]
    reference_rssi: f64,
    /// Path-loss exponent
    #[arg(long, default_value = "0.735")]
    exponent: f64,
    /// Also emit WiFi readings (exercises the engine's hybrid fusion)
    #[arg(long)]
    hybrid: bool,
    /// RNG seed for reproducible runs
    #[arg(long, default_value = "1729")]
    seed: u64,
    /// Stop after this many seconds (runs forever when omitted)
    #[arg(long)]
    duration_s: Option<f64>,
}

// ── Device placement ──────────────────────────────────────────────────────────

/// Deterministic placement: devices spread along the venue diagonal, kept
/// away from the walls so every anchor hears them.
fn device_positions(count: u32) -> Vec<(String, f64, f64)> {
    let (width, depth) = (4.96, 8.06);
    (0..count)
        .map(|i| {
            let t = (i as f64 + 1.0) / (count as f64 + 1.0);
            (
                format!("sim-{:02}", i + 1),
                0.5 + t * (width - 1.0),
                0.5 + t * (depth - 1.0),
            )
        })
        .collect()
}

fn expected_rssi(reference: f64, exponent: f64, distance_m: f64) -> f64 {
    reference - 10.0 * exponent * distance_m.max(0.1).log10()
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rssi_sim=info".into()),
        )
        .init();

    let args = Args::parse();
    let devices = device_positions(args.devices);

    info!(
        "🛰  RSSI simulator → {} ({} devices, {:.1} Hz per anchor{})",
        args.engine_addr,
        devices.len(),
        args.rate_hz,
        if args.hybrid { ", hybrid" } else { "" }
    );
    for (id, x, y) in &devices {
        info!("Ground truth: {id} at ({x:.2}, {y:.2})");
    }

    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(e) => {
            warn!("Could not open UDP socket: {e}");
            return;
        }
    };

    let mut rng = StdRng::seed_from_u64(args.seed);
    let shadowing = match Normal::new(0.0, args.noise_db) {
        Ok(n) => n,
        Err(e) => {
            warn!("Invalid noise sigma {}: {e}", args.noise_db);
            return;
        }
    };

    let modalities: &[Modality] = if args.hybrid {
        &[Modality::Ble, Modality::Wifi]
    } else {
        &[Modality::Ble]
    };

    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / args.rate_hz));
    let started = tokio::time::Instant::now();

    loop {
        interval.tick().await;
        if let Some(limit) = args.duration_s {
            if started.elapsed().as_secs_f64() >= limit {
                info!("Done after {:.1} s", started.elapsed().as_secs_f64());
                return;
            }
        }

        let now = Utc::now();
        for (device_id, dx, dy) in &devices {
            for (anchor_id, ax, ay) in ANCHORS {
                let distance = ((dx - ax).powi(2) + (dy - ay).powi(2)).sqrt();
                for &modality in modalities {
                    let rssi = expected_rssi(args.reference_rssi, args.exponent, distance)
                        + shadowing.sample(&mut rng);
                    let envelope = ReadingEnvelope {
                        device_id: device_id.clone(),
                        anchor_id: anchor_id.to_string(),
                        rssi: rssi.round() as i32,
                        timestamp: now,
                        timestamp_epoch: Some(now.timestamp_micros() as f64 / 1_000_000.0),
                        modality: Some(modality),
                    };
                    send(&socket, &args.engine_addr, &envelope).await;
                }
            }
        }
    }
}

async fn send(socket: &UdpSocket, addr: &str, envelope: &ReadingEnvelope) {
    let bytes = match serde_json::to_vec(envelope) {
        Ok(b) => b,
        Err(e) => {
            warn!("Serialize failed: {e}");
            return;
        }
    };
    if let Err(e) = socket.send_to(&bytes, addr).await {
        warn!("UDP send failed: {e}");
    } else {
        debug!(
            "→ {} {}@{} rssi={}",
            addr, envelope.device_id, envelope.anchor_id, envelope.rssi
        );
    }
}
