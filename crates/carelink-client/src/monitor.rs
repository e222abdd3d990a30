//! Periodic connection statistics

use std::sync::Arc;
use std::time::Duration;

use carelink_media::Resolution;
use carelink_protocol::TrackKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::peer::PeerController;
use crate::rtc::StatsReport;

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(2);

/// Lost over received, clamped to `[0, 1]`; zero when nothing was received
pub fn packet_loss_ratio(packets_lost: i64, packets_received: u64) -> f64 {
    if packets_received == 0 {
        return 0.0;
    }
    (packets_lost.max(0) as f64 / packets_received as f64).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionMetrics {
    pub packet_loss: f64,
    /// Seconds
    pub jitter: f64,
    /// Seconds
    pub round_trip_time: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub prev_bytes_sent: u64,
    pub prev_bytes_received: u64,
    pub prev_timestamp: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
    pub frame_rate: Option<f64>,
    pub resolution: Option<Resolution>,
    /// Bits per second, when the engine estimates it
    pub available_outgoing_bitrate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Throughput {
    pub send_bps: f64,
    pub receive_bps: f64,
}

impl ConnectionMetrics {
    /// Derive metrics from a stats report, carrying byte counters forward
    /// from the previous sample
    pub fn from_report(report: &StatsReport, previous: Option<&ConnectionMetrics>) -> Self {
        let inbound = report
            .inbound(TrackKind::Video)
            .or_else(|| report.inbound(TrackKind::Audio));
        let outbound = report.outbound(TrackKind::Video);
        let pair = report.active_candidate_pair();

        let frame_rate = inbound
            .and_then(|s| s.frames_per_second)
            .or_else(|| outbound.and_then(|s| s.frames_per_second));
        let resolution = inbound
            .and_then(|s| Some((s.frame_width?, s.frame_height?)))
            .or_else(|| outbound.and_then(|s| Some((s.frame_width?, s.frame_height?))))
            .map(|(width, height)| Resolution { width, height });

        Self {
            packet_loss: inbound
                .map(|s| packet_loss_ratio(s.packets_lost, s.packets_received))
                .unwrap_or(0.0),
            jitter: inbound.map(|s| s.jitter).unwrap_or(0.0),
            round_trip_time: pair.and_then(|p| p.current_round_trip_time).unwrap_or(0.0),
            bytes_sent: pair.map(|p| p.bytes_sent).unwrap_or(0),
            bytes_received: pair.map(|p| p.bytes_received).unwrap_or(0),
            prev_bytes_sent: previous.map(|p| p.bytes_sent).unwrap_or(0),
            prev_bytes_received: previous.map(|p| p.bytes_received).unwrap_or(0),
            prev_timestamp: previous.map(|p| p.timestamp),
            timestamp: report.timestamp,
            frame_rate,
            resolution,
            available_outgoing_bitrate: pair
                .and_then(|p| p.available_outgoing_bitrate)
                .filter(|bps| *bps > 0.0),
        }
    }

    /// Bit rates since the previous sample
    pub fn throughput(&self) -> Option<Throughput> {
        let prev = self.prev_timestamp?;
        let elapsed = (self.timestamp - prev).num_milliseconds();
        if elapsed <= 0 {
            return None;
        }
        let secs = elapsed as f64 / 1000.0;
        Some(Throughput {
            send_bps: self.bytes_sent.saturating_sub(self.prev_bytes_sent) as f64 * 8.0 / secs,
            receive_bps: self.bytes_received.saturating_sub(self.prev_bytes_received) as f64 * 8.0
                / secs,
        })
    }
}

/// Polls the peer connection and publishes the latest metrics
#[derive(Clone)]
pub struct ConnectionMonitor {
    peer: PeerController,
    interval: Duration,
    metrics: Arc<watch::Sender<Option<ConnectionMetrics>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectionMonitor {
    pub fn new(peer: PeerController, interval: Duration) -> Self {
        Self {
            peer,
            interval,
            metrics: Arc::new(watch::Sender::new(None)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let monitor = self.clone();
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.interval);
            loop {
                interval.tick().await;
                monitor.sample().await;
            }
        }));
        tracing::debug!("Connection monitor started ({:?})", self.interval);
    }

    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            tracing::debug!("Connection monitor stopped");
        }
        self.metrics.send_replace(None);
    }

    /// Take one sample now. A failed stats read keeps the previous metrics.
    pub async fn sample(&self) -> Option<ConnectionMetrics> {
        let Some(pc) = self.peer.connection().await else {
            return self.latest();
        };

        match pc.stats().await {
            Ok(report) => {
                let previous = self.latest();
                let metrics = ConnectionMetrics::from_report(&report, previous.as_ref());
                tracing::trace!(
                    "loss={:.3} rtt={:.3}s jitter={:.3}s",
                    metrics.packet_loss,
                    metrics.round_trip_time,
                    metrics.jitter
                );
                self.metrics.send_replace(Some(metrics.clone()));
                Some(metrics)
            }
            Err(e) => {
                tracing::warn!("Failed to read connection stats: {}", e);
                self.latest()
            }
        }
    }

    pub fn latest(&self) -> Option<ConnectionMetrics> {
        self.metrics.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ConnectionMetrics>> {
        self.metrics.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtc::{
        CandidatePairState, CandidatePairStats, InboundRtpStats, StatsEntry,
    };

    fn report(lost: i64, received: u64, sent_bytes: u64, at: DateTime<Utc>) -> StatsReport {
        StatsReport {
            timestamp: at,
            entries: vec![
                StatsEntry::InboundRtp(InboundRtpStats {
                    kind: TrackKind::Video,
                    packets_received: received,
                    packets_lost: lost,
                    jitter: 0.012,
                    bytes_received: 0,
                    frames_per_second: Some(24.0),
                    frame_width: Some(640),
                    frame_height: Some(480),
                }),
                StatsEntry::CandidatePair(CandidatePairStats {
                    state: CandidatePairState::Succeeded,
                    nominated: true,
                    current_round_trip_time: Some(0.08),
                    available_outgoing_bitrate: None,
                    bytes_sent: sent_bytes,
                    bytes_received: 4_000,
                }),
            ],
        }
    }

    #[test]
    fn test_packet_loss_ratio_bounds() {
        assert_eq!(packet_loss_ratio(5, 0), 0.0);
        assert_eq!(packet_loss_ratio(-3, 100), 0.0);
        assert_eq!(packet_loss_ratio(500, 100), 1.0);
        assert!((packet_loss_ratio(5, 100) - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metrics_from_report() {
        let now = Utc::now();
        let metrics = ConnectionMetrics::from_report(&report(2, 200, 10_000, now), None);

        assert!((metrics.packet_loss - 0.01).abs() < 1e-9);
        assert_eq!(metrics.round_trip_time, 0.08);
        assert_eq!(metrics.bytes_sent, 10_000);
        assert_eq!(metrics.frame_rate, Some(24.0));
        assert_eq!(
            metrics.resolution,
            Some(Resolution {
                width: 640,
                height: 480
            })
        );
        assert!(metrics.throughput().is_none());
    }

    #[test]
    fn test_throughput_between_samples() {
        let t0 = Utc::now();
        let first = ConnectionMetrics::from_report(&report(0, 100, 10_000, t0), None);
        let t1 = t0 + chrono::Duration::seconds(2);
        let second = ConnectionMetrics::from_report(&report(0, 200, 60_000, t1), Some(&first));

        assert_eq!(second.prev_bytes_sent, 10_000);
        assert_eq!(second.prev_timestamp, Some(t0));
        let throughput = second.throughput().unwrap();
        assert_eq!(throughput.send_bps, 200_000.0);
        assert_eq!(throughput.receive_bps, 0.0);
    }

    #[test]
    fn test_empty_report_yields_zeroes() {
        let metrics = ConnectionMetrics::from_report(&StatsReport::new(vec![]), None);
        assert_eq!(metrics.packet_loss, 0.0);
        assert_eq!(metrics.round_trip_time, 0.0);
        assert!(metrics.resolution.is_none());
    }
}
