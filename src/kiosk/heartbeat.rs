//! Heartbeat metrics
//!
//! While connected, each peer measures its round-trip time on a fixed period
//! and publishes a metrics record to `metrics.<server>.<client_id>`. Nothing
//! waits on the publish; failures are logged and the next tick tries again.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::config::METRICS_PREFIX;
use crate::bus::subject;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::stats::SessionStats;

/// One heartbeat sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub rtt_ms: f64,
    pub server: String,
    pub nickname: String,
    pub client_id: u64,
    #[serde(flatten)]
    pub stats: SessionStats,
}

/// Subject a peer's metrics are published on
pub fn metrics_subject(server: &str, client_id: u64) -> String {
    subject::join(&subject::join(METRICS_PREFIX, server), &client_id.to_string())
}

/// Measure once and publish the record
pub async fn beat(session: &Session, nickname: &str) -> Result<MetricsRecord> {
    let info = session.server_info().ok_or(Error::Disconnected)?;
    let rtt = session.rtt().await?;

    let record = MetricsRecord {
        rtt_ms: rtt.as_secs_f64() * 1000.0,
        server: info.server_name.clone(),
        nickname: nickname.to_string(),
        client_id: info.client_id,
        stats: session.stats(),
    };
    session
        .publish_json(&metrics_subject(&info.server_name, info.client_id), &record)
        .await?;
    Ok(record)
}

/// Publish heartbeats every `period` until the session closes
///
/// The latest RTT is written to `rtt`; it is cleared while the link is down.
pub async fn run_heartbeat(session: Session, nickname: String, period: Duration, rtt: watch::Sender<Option<Duration>>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(period_ms = period.as_millis() as u64, "Heartbeat started");

    loop {
        ticker.tick().await;
        if session.is_closed() {
            break;
        }
        if !session.status().is_connected() {
            rtt.send_replace(None);
            continue;
        }

        match beat(&session, &nickname).await {
            Ok(record) => {
                rtt.send_replace(Some(Duration::from_secs_f64(record.rtt_ms / 1000.0)));
            }
            Err(e) => {
                tracing::debug!(error = %e, "Heartbeat skipped");
            }
        }
    }

    tracing::debug!("Heartbeat stopped");
}
