//! Peer connection engine seam
//!
//! The controllers in this crate drive a [`PeerConnection`] through these
//! traits. [`webrtc_backend`] implements them on top of webrtc-rs; tests use
//! in-memory fakes.

pub mod stats;
pub mod webrtc_backend;

use std::sync::Arc;

use async_trait::async_trait;
use carelink_protocol::{IceCandidateInit, SdpType, TrackKind};
use tokio::sync::mpsc;

use crate::error::RtcError;
use crate::media::MediaTrack;

pub use stats::{
    CandidatePairState, CandidatePairStats, InboundRtpStats, OutboundRtpStats,
    RemoteInboundRtpStats, StatsEntry, StatsReport,
};
pub use webrtc_backend::{WebrtcPeerFactory, WebrtcSampleDevices};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Offer options; receive slots are added for kinds with no local track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferOptions {
    pub receive_audio: bool,
    pub receive_video: bool,
}

impl Default for OfferOptions {
    fn default() -> Self {
        Self {
            receive_audio: true,
            receive_video: true,
        }
    }
}

/// Per-encoding sender limits
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EncodingParameters {
    /// Bits per second
    pub max_bitrate: Option<u32>,
    pub max_framerate: Option<u32>,
    pub scale_resolution_down_by: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendParameters {
    pub encodings: Vec<EncodingParameters>,
}

/// Events raised by a peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidateInit),
    ConnectionState(PeerConnectionState),
}

#[async_trait]
pub trait RtpSender: Send + Sync {
    fn kind(&self) -> TrackKind;

    fn track_id(&self) -> String;

    async fn parameters(&self) -> SendParameters;

    async fn set_parameters(&self, parameters: SendParameters) -> Result<(), RtcError>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<Arc<dyn RtpSender>, RtcError>;

    async fn senders(&self) -> Vec<Arc<dyn RtpSender>>;

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, RtcError>;

    async fn create_answer(&self) -> Result<SessionDescription, RtcError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), RtcError>;

    async fn set_remote_description(&self, description: SessionDescription)
    -> Result<(), RtcError>;

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), RtcError>;

    async fn stats(&self) -> Result<StatsReport, RtcError>;

    fn signaling_state(&self) -> SignalingState;

    fn connection_state(&self) -> PeerConnectionState;

    async fn close(&self) -> Result<(), RtcError>;
}

/// Creates peer connections that report into `events`
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, RtcError>;
}
