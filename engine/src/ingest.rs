//! # ingest
//!
//! Ingestion boundary. Decoded reading events arrive as JSON envelopes
//! over UDP — the local stand-in for the deployment's pub/sub transport,
//! whose connectivity, authentication, and redelivery are the broker's
//! concern, not the engine's. Each accepted event is appended to the raw
//! store, smoothed on its channel, optionally fused across modalities,
//! and written to the filtered store.
//!
//! Malformed datagrams are dropped and logged; nothing here can stop the
//! listener.

use std::sync::Arc;

use chrono::Utc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use positioning_types::{FilteredReading, RawReading, ReadingEnvelope};

use crate::error::IngestError;
use crate::fusion::{FusedValue, FusionCombiner};
use crate::smoothing::{ChannelKey, FilterBank};
use crate::store::Store;

pub struct IngestStage {
    store: Store,
    filters: Arc<FilterBank>,
    /// Present only in hybrid (two-modality) deployments.
    fusion: Option<Arc<FusionCombiner>>,
}

impl IngestStage {
    pub fn new(store: Store, filters: Arc<FilterBank>, fusion: Option<Arc<FusionCombiner>>) -> Self {
        Self {
            store,
            filters,
            fusion,
        }
    }

    /// Process one decoded delivery. Returns whether a filtered reading
    /// was written (hybrid mode holds back until both modalities report).
    pub async fn handle_event(&self, envelope: &ReadingEnvelope) -> Result<bool, IngestError> {
        envelope
            .validate()
            .map_err(|e| IngestError::Malformed(e.to_string()))?;

        let raw = RawReading::from_envelope(envelope, Utc::now());
        self.store.insert_raw(&raw).await?;

        let key = ChannelKey::new(&raw.device_id, &raw.anchor_id, raw.modality);
        let smoothed = self.filters.update(&key, raw.rssi as f64);

        let fused = match &self.fusion {
            Some(combiner) => {
                match combiner.fuse(
                    &raw.device_id,
                    &raw.anchor_id,
                    raw.modality,
                    smoothed,
                    raw.timestamp,
                    raw.latency,
                ) {
                    Some(value) => value,
                    // Peer modality not seen yet — wait for it.
                    None => return Ok(false),
                }
            }
            None => FusedValue {
                rssi: smoothed,
                latency: raw.latency,
            },
        };

        let filtered = FilteredReading {
            device_id: raw.device_id,
            anchor_id: raw.anchor_id,
            filtered_rssi: fused.rssi,
            timestamp: raw.timestamp,
            latency: fused.latency,
        };
        let written = self.store.insert_filtered(&filtered).await?;
        if !written {
            debug!(
                "Duplicate filtered reading for {}/{} @ {} ignored",
                filtered.device_id, filtered.anchor_id, filtered.timestamp
            );
        }
        Ok(written)
    }

    /// Decode one datagram into an envelope.
    pub fn decode(data: &[u8]) -> Result<ReadingEnvelope, IngestError> {
        serde_json::from_slice(data).map_err(|e| IngestError::Malformed(e.to_string()))
    }
}

/// Bind the ingestion UDP socket and process datagrams until shutdown.
pub async fn run_udp_listener(stage: Arc<IngestStage>, port: u16) {
    let addr = format!("0.0.0.0:{port}");
    let socket = match UdpSocket::bind(&addr).await {
        Ok(s) => {
            info!("📡 Ingestion listening on UDP {addr}");
            s
        }
        Err(e) => {
            warn!("Ingestion: could not bind UDP {addr}: {e} — no readings will arrive");
            return;
        }
    };

    let mut buf = vec![0u8; 2048];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                let envelope = match IngestStage::decode(&buf[..len]) {
                    Ok(env) => env,
                    Err(e) => {
                        debug!("Malformed reading from {src}: {e}");
                        continue;
                    }
                };
                if let Err(e) = stage.handle_event(&envelope).await {
                    match e {
                        IngestError::Malformed(reason) => {
                            debug!("Rejected reading from {src}: {reason}")
                        }
                        IngestError::Store(err) => {
                            warn!("Ingestion store error (reading dropped): {err}")
                        }
                    }
                }
            }
            Err(e) => {
                // Never crash — log and continue.
                warn!("Ingestion: UDP recv error: {e}");
            }
        }
    }
}
