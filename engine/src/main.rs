use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use positioning_engine::config::EngineConfig;
use positioning_engine::distance::PathLossModel;
use positioning_engine::eval;
use positioning_engine::fusion::FusionCombiner;
use positioning_engine::ingest::{run_udp_listener, IngestStage};
use positioning_engine::pipeline::{run_cycle, PipelineContext};
use positioning_engine::smoothing::FilterBank;
use positioning_engine::solver::SolverSettings;
use positioning_engine::store::Store;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "positioning-engine", about = "Indoor positioning estimation engine")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Database path override
    #[arg(long)]
    database: Option<String>,
    /// Ingestion UDP port override
    #[arg(long)]
    udp_port: Option<u16>,
    /// Report estimate accuracy against the ground_truth table and exit
    #[arg(long)]
    evaluate: bool,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "positioning_engine=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::load(&args.config).context("loading configuration")?;
    if let Some(db) = args.database {
        config.store.database_path = db;
    }
    if let Some(port) = args.udp_port {
        config.ingest.udp_port = port;
    }

    let store = Store::open(&config.store.database_path)
        .await
        .with_context(|| format!("opening {}", config.store.database_path))?;

    if args.evaluate {
        match eval::evaluate(&store).await? {
            Some(report) => eval::log_report(&report),
            None => info!("No estimates with surveyed ground truth to evaluate"),
        }
        return Ok(());
    }

    info!(
        "📍 Positioning engine starting — {} anchors, A={:.2} dBm, n={:.3}{}",
        config.venue.anchors.len(),
        config.path_loss.reference_rssi_1m,
        config.path_loss.exponent,
        if config.fusion.enabled { ", hybrid fusion" } else { "" }
    );

    // Ingestion stage: filter bank + optional fusion, fed by the UDP task.
    let filters = Arc::new(FilterBank::new(
        config.filter.process_variance,
        config.filter.measurement_variance,
    ));
    let fusion = config
        .fusion
        .enabled
        .then(|| Arc::new(FusionCombiner::new(config.fusion.pair_tolerance_s)));
    let stage = Arc::new(IngestStage::new(store.clone(), filters, fusion));
    tokio::spawn(run_udp_listener(stage, config.ingest.udp_port));

    // Batch estimation stage on a fixed interval.
    let ctx = PipelineContext {
        anchors: config.anchor_map(),
        model: PathLossModel::new(config.path_loss.reference_rssi_1m, config.path_loss.exponent),
        solver: SolverSettings {
            max_evals: config.solver.max_evals,
            converge_threshold_m: config.solver.converge_threshold_m,
            weight_epsilon: config.solver.weight_epsilon,
        },
        window: config.window.clone(),
        fused: config.fusion.enabled,
    };

    let mut interval = tokio::time::interval(Duration::from_secs_f64(config.stage.interval_s));
    loop {
        interval.tick().await;
        match run_cycle(&store, &ctx).await {
            Ok(summary) if summary.estimates > 0 || summary.failures > 0 => {
                info!(
                    "Cycle: {} readings → {} windows, {} new estimates, {} duplicates, {} failed, {} skipped",
                    summary.readings,
                    summary.windows,
                    summary.estimates,
                    summary.duplicates,
                    summary.failures,
                    summary.skipped
                );
            }
            Ok(_) => {}
            Err(e) => {
                // Never abort the engine — retry on the next tick.
                warn!("Estimation cycle failed: {e}");
            }
        }
    }
}
