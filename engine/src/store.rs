//! # store
//!
//! SQLite persistence for the three pipeline stores: raw readings
//! (append-only collaborator record), filtered readings (unique per
//! timestamp/anchor/device), and position estimates (unique per
//! device/timestamp). Unique-key inserts use `INSERT OR IGNORE`, which
//! makes re-running any stage over already-processed data a silent no-op
//! rather than an error.
//!
//! The `ground_truth` table is created here for the evaluation report but
//! is only ever written by the external survey tooling.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::warn;

use positioning_types::{FilteredReading, PositionEstimate, RawReading, SolveMethod};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database file and its schema.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database for tests and evaluation dry-runs. A single
    /// connection, so every query sees the same memory database.
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS raw_readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                anchor_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                rssi INTEGER NOT NULL,
                latency REAL,
                modality TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS filtered_readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                anchor_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                filtered_rssi REAL NOT NULL,
                latency REAL,
                UNIQUE(timestamp, anchor_id, device_id)
            )",
            "CREATE TABLE IF NOT EXISTS position_estimates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                x REAL NOT NULL,
                y REAL NOT NULL,
                timestamp TEXT NOT NULL,
                method TEXT NOT NULL,
                UNIQUE(device_id, timestamp)
            )",
            "CREATE TABLE IF NOT EXISTS ground_truth (
                device_id TEXT PRIMARY KEY,
                x REAL NOT NULL,
                y REAL NOT NULL
            )",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ── Raw readings ──────────────────────────────────────────────────────────

    pub async fn insert_raw(&self, reading: &RawReading) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO raw_readings (timestamp, anchor_id, device_id, rssi, latency, modality)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(reading.timestamp)
        .bind(&reading.anchor_id)
        .bind(&reading.device_id)
        .bind(reading.rssi)
        .bind(reading.latency)
        .bind(reading.modality.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Filtered readings ─────────────────────────────────────────────────────

    /// Returns false when the (timestamp, anchor, device) key already
    /// existed and the insert was ignored.
    pub async fn insert_filtered(&self, reading: &FilteredReading) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO filtered_readings
                 (timestamp, anchor_id, device_id, filtered_rssi, latency)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(reading.timestamp)
        .bind(&reading.anchor_id)
        .bind(&reading.device_id)
        .bind(reading.filtered_rssi)
        .bind(reading.latency)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All filtered readings in ascending timestamp order.
    pub async fn fetch_filtered(&self) -> Result<Vec<FilteredReading>, sqlx::Error> {
        let rows: Vec<(DateTime<Utc>, String, String, f64, Option<f64>)> = sqlx::query_as(
            "SELECT timestamp, anchor_id, device_id, filtered_rssi, latency
             FROM filtered_readings ORDER BY timestamp ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(timestamp, anchor_id, device_id, filtered_rssi, latency)| FilteredReading {
                    device_id,
                    anchor_id,
                    filtered_rssi,
                    timestamp,
                    latency,
                },
            )
            .collect())
    }

    // ── Position estimates ────────────────────────────────────────────────────

    /// Idempotent append. Returns false when an estimate for the
    /// (device, timestamp) key already exists — a no-op, not an error.
    pub async fn insert_estimate(&self, estimate: &PositionEstimate) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO position_estimates (device_id, x, y, timestamp, method)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&estimate.device_id)
        .bind(estimate.x)
        .bind(estimate.y)
        .bind(estimate.timestamp)
        .bind(estimate.method.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn fetch_estimates(&self) -> Result<Vec<PositionEstimate>, sqlx::Error> {
        let rows: Vec<(String, f64, f64, DateTime<Utc>, String)> = sqlx::query_as(
            "SELECT device_id, x, y, timestamp, method
             FROM position_estimates ORDER BY timestamp ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(device_id, x, y, timestamp, method)| {
                match SolveMethod::from_str(&method) {
                    Some(method) => Some(PositionEstimate {
                        device_id,
                        x,
                        y,
                        timestamp,
                        method,
                    }),
                    None => {
                        warn!("Skipping estimate with unknown method tag {method:?}");
                        None
                    }
                }
            })
            .collect())
    }

    // ── Evaluation inputs ─────────────────────────────────────────────────────

    /// device_id → surveyed (x, y). Written by external tooling only.
    pub async fn fetch_ground_truth(&self) -> Result<HashMap<String, (f64, f64)>, sqlx::Error> {
        let rows: Vec<(String, f64, f64)> =
            sqlx::query_as("SELECT device_id, x, y FROM ground_truth")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(d, x, y)| (d, (x, y))).collect())
    }

    /// Best observed send-to-receive latency per device, seconds.
    pub async fn min_latency_per_device(&self) -> Result<HashMap<String, f64>, sqlx::Error> {
        let rows: Vec<(String, Option<f64>)> = sqlx::query_as(
            "SELECT device_id, MIN(latency) FROM filtered_readings
             WHERE latency >= 0 GROUP BY device_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(d, latency)| latency.map(|l| (d, l)))
            .collect())
    }
}
