//! End-to-end tests for the estimation pipeline: ingestion through
//! smoothing, windowing, solving, and idempotent persistence, against an
//! in-memory store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use positioning_engine::config::{AnchorMap, WindowConfig};
use positioning_engine::distance::PathLossModel;
use positioning_engine::error::IngestError;
use positioning_engine::eval;
use positioning_engine::fusion::FusionCombiner;
use positioning_engine::ingest::IngestStage;
use positioning_engine::pipeline::{run_cycle, PipelineContext};
use positioning_engine::smoothing::FilterBank;
use positioning_engine::solver::SolverSettings;
use positioning_engine::store::Store;
use positioning_types::{FilteredReading, Modality, PositionEstimate, ReadingEnvelope, SolveMethod};

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-14T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn envelope(
    device: &str,
    anchor: &str,
    rssi: i32,
    offset_ms: i64,
    modality: Option<Modality>,
) -> ReadingEnvelope {
    ReadingEnvelope {
        device_id: device.to_string(),
        anchor_id: anchor.to_string(),
        rssi,
        timestamp: t0() + Duration::milliseconds(offset_ms),
        timestamp_epoch: None,
        modality,
    }
}

fn lab_context(fused: bool) -> PipelineContext {
    PipelineContext {
        anchors: AnchorMap::new([
            ("ap-a".to_string(), (0.0, 0.0)),
            ("ap-b".to_string(), (4.96, 0.0)),
            ("ap-c".to_string(), (0.0, 8.06)),
        ]),
        model: PathLossModel::new(-55.525, 0.735),
        solver: SolverSettings::default(),
        window: WindowConfig {
            tolerance_s: 2.0,
            min_anchors: 3,
        },
        fused,
    }
}

#[tokio::test]
async fn end_to_end_single_modality() {
    let store = Store::open_in_memory().await.expect("open store");
    let filters = Arc::new(FilterBank::new(1e-3, 2.0));
    let stage = IngestStage::new(store.clone(), filters, None);

    for env in [
        envelope("m5-dev", "ap-a", -60, 0, None),
        envelope("m5-dev", "ap-b", -65, 300, None),
        envelope("m5-dev", "ap-c", -70, 800, None),
    ] {
        assert!(stage.handle_event(&env).await.expect("ingest"));
    }

    let ctx = lab_context(false);
    let summary = run_cycle(&store, &ctx).await.expect("cycle");
    assert_eq!(summary.readings, 3);
    assert_eq!(summary.windows, 1);
    assert_eq!(summary.estimates, 1);
    assert_eq!(summary.failures, 0);

    let estimates = store.fetch_estimates().await.expect("fetch");
    assert_eq!(estimates.len(), 1);
    let e = &estimates[0];
    // The solve is bounded by the anchor extents — the estimate must land
    // inside the venue even though smoothed single-shot readings imply
    // distances far beyond it.
    assert!(e.x >= 0.0 && e.x <= 4.96, "x out of venue: {}", e.x);
    assert!(e.y >= 0.0 && e.y <= 8.06, "y out of venue: {}", e.y);
    // Midpoint of t0 and t0+0.8s.
    assert_eq!(e.timestamp, t0() + Duration::milliseconds(400));
    assert_ne!(e.method, SolveMethod::Fused);

    // Re-running the stage over already-processed readings is a no-op.
    let summary = run_cycle(&store, &ctx).await.expect("second cycle");
    assert_eq!(summary.estimates, 0);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(store.fetch_estimates().await.expect("fetch").len(), 1);
}

#[tokio::test]
async fn estimate_insert_is_idempotent() {
    let store = Store::open_in_memory().await.expect("open store");
    let estimate = PositionEstimate {
        device_id: "D1".to_string(),
        x: 1.5,
        y: 2.5,
        timestamp: t0(),
        method: SolveMethod::Nonlinear,
    };
    assert!(store.insert_estimate(&estimate).await.expect("first insert"));
    assert!(!store.insert_estimate(&estimate).await.expect("second insert"));
    assert_eq!(store.fetch_estimates().await.expect("fetch").len(), 1);
}

#[tokio::test]
async fn collinear_window_writes_no_row() {
    let store = Store::open_in_memory().await.expect("open store");
    for (anchor, rssi) in [("ap-a", -58.0), ("ap-b", -62.0), ("ap-c", -66.0)] {
        let written = store
            .insert_filtered(&FilteredReading {
                device_id: "m5-dev".to_string(),
                anchor_id: anchor.to_string(),
                filtered_rssi: rssi,
                timestamp: t0(),
                latency: None,
            })
            .await
            .expect("seed filtered");
        assert!(written);
    }

    let ctx = PipelineContext {
        anchors: AnchorMap::new([
            ("ap-a".to_string(), (0.0, 0.0)),
            ("ap-b".to_string(), (5.0, 0.0)),
            ("ap-c".to_string(), (10.0, 0.0)),
        ]),
        ..lab_context(false)
    };

    let summary = run_cycle(&store, &ctx).await.expect("cycle");
    assert_eq!(summary.windows, 1);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.estimates, 0);
    assert!(store.fetch_estimates().await.expect("fetch").is_empty());
}

#[tokio::test]
async fn hybrid_fusion_tags_estimates() {
    let store = Store::open_in_memory().await.expect("open store");
    let filters = Arc::new(FilterBank::new(1e-3, 2.0));
    let fusion = Arc::new(FusionCombiner::new(2.0));
    let stage = IngestStage::new(store.clone(), filters, Some(fusion));

    for anchor in ["ap-a", "ap-b", "ap-c"] {
        // BLE alone is held back until WiFi reports on the same channel.
        let ble = envelope("m5-dev", anchor, -60, 0, Some(Modality::Ble));
        assert!(!stage.handle_event(&ble).await.expect("ble ingest"));
        let wifi = envelope("m5-dev", anchor, -66, 200, Some(Modality::Wifi));
        assert!(stage.handle_event(&wifi).await.expect("wifi ingest"));
    }

    let ctx = lab_context(true);
    let summary = run_cycle(&store, &ctx).await.expect("cycle");
    assert_eq!(summary.estimates, 1);

    let estimates = store.fetch_estimates().await.expect("fetch");
    assert_eq!(estimates[0].method, SolveMethod::Fused);
}

#[tokio::test]
async fn malformed_events_are_rejected() {
    assert!(matches!(
        IngestStage::decode(b"{not json"),
        Err(IngestError::Malformed(_))
    ));
    assert!(matches!(
        IngestStage::decode(br#"{"device_id": "d", "anchor_id": "a", "rssi": "loud"}"#),
        Err(IngestError::Malformed(_))
    ));

    let store = Store::open_in_memory().await.expect("open store");
    let stage = IngestStage::new(store, Arc::new(FilterBank::new(1e-3, 2.0)), None);
    let blank = envelope("", "ap-a", -60, 0, None);
    assert!(matches!(
        stage.handle_event(&blank).await,
        Err(IngestError::Malformed(_))
    ));
}

#[tokio::test]
async fn evaluation_report_joins_ground_truth() {
    let store = Store::open_in_memory().await.expect("open store");

    // Survey two devices; the third estimate has no ground truth and must
    // not contribute.
    for (device, x, y) in [("d1", 1.0, 1.0), ("d2", 3.0, 4.0)] {
        sqlx::query("INSERT INTO ground_truth (device_id, x, y) VALUES (?, ?, ?)")
            .bind(device)
            .bind(x)
            .bind(y)
            .execute(store.pool())
            .await
            .expect("seed ground truth");
    }
    for (device, x, y, offset) in [
        ("d1", 1.0, 2.0, 0),     // error 1.0
        ("d2", 6.0, 8.0, 1000),  // error 5.0
        ("d3", 0.0, 0.0, 2000),  // unsurveyed
    ] {
        store
            .insert_estimate(&PositionEstimate {
                device_id: device.to_string(),
                x,
                y,
                timestamp: t0() + Duration::milliseconds(offset),
                method: SolveMethod::Nonlinear,
            })
            .await
            .expect("seed estimate");
    }

    let report = eval::evaluate(&store)
        .await
        .expect("evaluate")
        .expect("has samples");
    assert_eq!(report.samples, 2);
    assert!((report.mean_error_m - 3.0).abs() < 1e-9);
    assert!((report.median_error_m - 5.0).abs() < 1e-9);
    assert_eq!(report.mean_latency_s, None);
}
