//! Engine-neutral statistics snapshot

use carelink_protocol::TrackKind;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct InboundRtpStats {
    pub kind: TrackKind,
    pub packets_received: u64,
    pub packets_lost: i64,
    /// Seconds
    pub jitter: f64,
    pub bytes_received: u64,
    pub frames_per_second: Option<f64>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRtpStats {
    pub kind: TrackKind,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub frames_per_second: Option<f64>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
}

/// What the remote end reports about our outgoing stream
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteInboundRtpStats {
    pub kind: TrackKind,
    pub packets_lost: i64,
    /// Seconds
    pub round_trip_time: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidatePairState {
    Frozen,
    Waiting,
    InProgress,
    Failed,
    Succeeded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePairStats {
    pub state: CandidatePairState,
    pub nominated: bool,
    /// Seconds
    pub current_round_trip_time: Option<f64>,
    /// Bits per second
    pub available_outgoing_bitrate: Option<f64>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatsEntry {
    InboundRtp(InboundRtpStats),
    OutboundRtp(OutboundRtpStats),
    RemoteInboundRtp(RemoteInboundRtpStats),
    CandidatePair(CandidatePairStats),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub timestamp: DateTime<Utc>,
    pub entries: Vec<StatsEntry>,
}

impl StatsReport {
    pub fn new(entries: Vec<StatsEntry>) -> Self {
        Self {
            timestamp: Utc::now(),
            entries,
        }
    }

    pub fn inbound(&self, kind: TrackKind) -> Option<&InboundRtpStats> {
        self.entries.iter().find_map(|e| match e {
            StatsEntry::InboundRtp(s) if s.kind == kind => Some(s),
            _ => None,
        })
    }

    pub fn outbound(&self, kind: TrackKind) -> Option<&OutboundRtpStats> {
        self.entries.iter().find_map(|e| match e {
            StatsEntry::OutboundRtp(s) if s.kind == kind => Some(s),
            _ => None,
        })
    }

    pub fn remote_inbound(&self, kind: TrackKind) -> Option<&RemoteInboundRtpStats> {
        self.entries.iter().find_map(|e| match e {
            StatsEntry::RemoteInboundRtp(s) if s.kind == kind => Some(s),
            _ => None,
        })
    }

    /// The succeeded candidate pair carrying media
    pub fn active_candidate_pair(&self) -> Option<&CandidatePairStats> {
        self.entries.iter().find_map(|e| match e {
            StatsEntry::CandidatePair(p) if p.state == CandidatePairState::Succeeded => Some(p),
            _ => None,
        })
    }
}
