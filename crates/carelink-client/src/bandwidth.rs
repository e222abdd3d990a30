//! Outgoing video quality control
//!
//! A [`BandwidthManager`] periodically asks a [`NetworkEstimator`] for a
//! quality tier and caps every video sender to that tier's limits. Choosing
//! a tier by hand suspends the automatic loop until it is resumed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use carelink_media::{BandwidthConstraints, QualityTier};
use carelink_protocol::TrackKind;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::monitor::packet_loss_ratio;
use crate::peer::PeerController;
use crate::rtc::{EncodingParameters, PeerConnection, StatsReport};

pub const DEFAULT_BANDWIDTH_INTERVAL: Duration = Duration::from_secs(10);

/// Weight of the newest sample in the smoothed loss and RTT
const SMOOTHING: f64 = 0.3;

#[async_trait]
pub trait NetworkEstimator: Send + Sync {
    /// Suggested tier, or `None` when there is not enough data yet
    async fn estimate(&self, pc: &dyn PeerConnection) -> Option<QualityTier>;
}

/// Tier for the given loss fraction, round-trip time (seconds) and
/// available outgoing bitrate (bps)
pub fn classify(packet_loss: f64, round_trip_time: f64, available_bitrate: Option<f64>) -> QualityTier {
    let by_network = if packet_loss > 0.10 || round_trip_time > 0.5 {
        QualityTier::Low
    } else if packet_loss > 0.03 || round_trip_time > 0.25 {
        QualityTier::Medium
    } else {
        QualityTier::High
    };

    let by_bandwidth = match available_bitrate {
        Some(bps) if bps < f64::from(QualityTier::Medium.constraints().max_bitrate) => {
            QualityTier::Low
        }
        Some(bps) if bps < f64::from(QualityTier::High.constraints().max_bitrate) => {
            QualityTier::Medium
        }
        _ => QualityTier::High,
    };

    by_network.min(by_bandwidth)
}

#[derive(Debug, Default)]
struct Trend {
    loss: Option<f64>,
    rtt: Option<f64>,
    last_packets_sent: u64,
    last_packets_lost: i64,
}

fn smooth(current: Option<f64>, sample: Option<f64>) -> Option<f64> {
    match (current, sample) {
        (Some(c), Some(s)) => Some(c * (1.0 - SMOOTHING) + s * SMOOTHING),
        (None, sample) => sample,
        (current, None) => current,
    }
}

impl Trend {
    fn observe(&mut self, report: &StatsReport) -> Option<QualityTier> {
        let pair = report.active_candidate_pair();
        let remote = report.remote_inbound(TrackKind::Video);

        // Prefer what the receiver reports about our stream
        let loss_sample = match (remote, report.outbound(TrackKind::Video)) {
            (Some(remote), Some(outbound)) => {
                let sent = outbound.packets_sent.saturating_sub(self.last_packets_sent);
                let lost = (remote.packets_lost - self.last_packets_lost).max(0);
                self.last_packets_sent = outbound.packets_sent;
                self.last_packets_lost = remote.packets_lost;
                (sent > 0).then(|| packet_loss_ratio(lost, sent))
            }
            _ => report
                .inbound(TrackKind::Video)
                .filter(|s| s.packets_received > 0)
                .map(|s| packet_loss_ratio(s.packets_lost, s.packets_received)),
        };
        let rtt_sample = remote
            .and_then(|r| r.round_trip_time)
            .or_else(|| pair.and_then(|p| p.current_round_trip_time))
            .filter(|rtt| *rtt > 0.0);
        let available = pair
            .and_then(|p| p.available_outgoing_bitrate)
            .filter(|bps| *bps > 0.0);

        self.loss = smooth(self.loss, loss_sample);
        self.rtt = smooth(self.rtt, rtt_sample);

        if self.loss.is_none() && self.rtt.is_none() && available.is_none() {
            return None;
        }
        Some(classify(
            self.loss.unwrap_or(0.0),
            self.rtt.unwrap_or(0.0),
            available,
        ))
    }
}

/// Estimates from smoothed loss and RTT trends in the engine's stats
#[derive(Debug, Default)]
pub struct StatsTrendEstimator {
    trend: Mutex<Trend>,
}

impl StatsTrendEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn observe(&self, report: &StatsReport) -> Option<QualityTier> {
        self.trend.lock().await.observe(report)
    }
}

#[async_trait]
impl NetworkEstimator for StatsTrendEstimator {
    async fn estimate(&self, pc: &dyn PeerConnection) -> Option<QualityTier> {
        match pc.stats().await {
            Ok(report) => self.observe(&report).await,
            Err(e) => {
                tracing::debug!("No stats for bandwidth estimate: {}", e);
                None
            }
        }
    }
}

#[derive(Clone)]
pub struct BandwidthManager {
    peer: PeerController,
    estimator: Arc<dyn NetworkEstimator>,
    interval: Duration,
    tier: Arc<watch::Sender<QualityTier>>,
    manual: Arc<AtomicBool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BandwidthManager {
    pub fn new(
        peer: PeerController,
        estimator: Arc<dyn NetworkEstimator>,
        interval: Duration,
        initial: QualityTier,
    ) -> Self {
        Self {
            peer,
            estimator,
            interval,
            tier: Arc::new(watch::Sender::new(initial)),
            manual: Arc::new(AtomicBool::new(false)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn current_tier(&self) -> QualityTier {
        *self.tier.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<QualityTier> {
        self.tier.subscribe()
    }

    pub fn is_manual(&self) -> bool {
        self.manual.load(Ordering::SeqCst)
    }

    /// Start periodic re-evaluation; the first one runs after one interval
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let manager = self.clone();
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                manager.evaluate().await;
            }
        }));
        tracing::debug!("Bandwidth manager started ({:?})", self.interval);
    }

    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            tracing::debug!("Bandwidth manager stopped");
        }
    }

    /// Pin a tier chosen by the user. Automatic changes stay off until
    /// [`resume_automatic`](Self::resume_automatic).
    pub async fn set_quality_level(&self, tier: QualityTier) -> BandwidthConstraints {
        self.manual.store(true, Ordering::SeqCst);
        tracing::info!("Quality pinned to {}", tier);
        self.apply_tier(tier).await;
        tier.constraints()
    }

    pub fn resume_automatic(&self) {
        self.manual.store(false, Ordering::SeqCst);
    }

    /// Run one automatic evaluation
    pub async fn evaluate(&self) -> Option<QualityTier> {
        if self.is_manual() {
            return None;
        }
        let pc = self.peer.connection().await?;
        let tier = self.estimator.estimate(pc.as_ref()).await?;
        if tier != self.current_tier() {
            tracing::info!("Network conditions changed, quality {} -> {}", self.current_tier(), tier);
        }
        self.apply_tier(tier).await;
        Some(tier)
    }

    /// Cap every video sender to the tier's bitrate and framerate.
    /// Returns how many senders were updated.
    pub async fn apply_tier(&self, tier: QualityTier) -> usize {
        self.tier.send_replace(tier);
        let Some(pc) = self.peer.connection().await else {
            return 0;
        };

        let constraints = tier.constraints();
        let mut updated = 0;
        for sender in pc.senders().await {
            if sender.kind() != TrackKind::Video {
                continue;
            }
            let mut parameters = sender.parameters().await;
            if parameters.encodings.is_empty() {
                parameters.encodings.push(EncodingParameters::default());
            }
            for encoding in &mut parameters.encodings {
                encoding.max_bitrate = Some(constraints.max_bitrate);
                encoding.max_framerate = Some(constraints.max_framerate);
            }
            match sender.set_parameters(parameters).await {
                Ok(()) => updated += 1,
                Err(e) => tracing::warn!("Failed to update sender {}: {}", sender.track_id(), e),
            }
        }
        updated
    }
}
