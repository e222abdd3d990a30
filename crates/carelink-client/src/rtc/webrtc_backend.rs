//! webrtc-rs implementation of the engine traits

use std::sync::Arc;

use async_trait::async_trait;
use carelink_protocol::{IceCandidateInit, IceServer, SdpType, TrackKind};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{MediaError, RtcError};
use crate::media::{DeviceInfo, DeviceKind, MediaConstraints, MediaDevices, MediaStream, MediaTrack};

use super::{
    CandidatePairState, CandidatePairStats, InboundRtpStats, OfferOptions, OutboundRtpStats,
    PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent, RemoteInboundRtpStats,
    RtpSender, SendParameters, SessionDescription, SignalingState, StatsEntry, StatsReport,
};

/// Builds webrtc-rs peer connections with the default codecs and interceptors
pub struct WebrtcPeerFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebrtcPeerFactory {
    pub fn new(ice_servers: &[IceServer]) -> Result<Self, RtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        // NACK, RTCP reports and TWCC feed the engine's own congestion control
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl PeerConnectionFactory for WebrtcPeerFactory {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, RtcError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await?);

        let candidate_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::LocalCandidate(IceCandidateInit {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        let state_tx = events;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            tracing::debug!("Peer connection state changed: {}", state);
            let _ = state_tx.send(PeerEvent::ConnectionState(connection_state_from(state)));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebrtcPeer {
            pc,
            senders: RwLock::new(Vec::new()),
        }))
    }
}

struct WebrtcPeer {
    pc: Arc<RTCPeerConnection>,
    senders: RwLock<Vec<Arc<WebrtcSender>>>,
}

#[async_trait]
impl PeerConnection for WebrtcPeer {
    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<Arc<dyn RtpSender>, RtcError> {
        let local = track.sample_track().cloned().ok_or_else(|| {
            RtcError::Unsupported(format!("track {} has no sample source", track.id()))
        })?;
        let rtp_sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Interceptors only run while RTCP is being read
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });

        let sender = Arc::new(WebrtcSender { track });
        self.senders.write().await.push(sender.clone());
        Ok(sender)
    }

    async fn senders(&self) -> Vec<Arc<dyn RtpSender>> {
        self.senders
            .read()
            .await
            .iter()
            .map(|s| s.clone() as Arc<dyn RtpSender>)
            .collect()
    }

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, RtcError> {
        let transceivers = self.pc.get_transceivers().await;
        for (kind, wanted) in [
            (RTPCodecType::Audio, options.receive_audio),
            (RTPCodecType::Video, options.receive_video),
        ] {
            if wanted && !transceivers.iter().any(|t| t.kind() == kind) {
                let init = RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                };
                self.pc.add_transceiver_from_kind(kind, Some(init)).await?;
            }
        }

        let offer = self.pc.create_offer(None).await?;
        description_from(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, RtcError> {
        let answer = self.pc.create_answer(None).await?;
        description_from(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), RtcError> {
        self.pc
            .set_local_description(description_into(description)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), RtcError> {
        self.pc
            .set_remote_description(description_into(description)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), RtcError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<StatsReport, RtcError> {
        let report = self.pc.get_stats().await;
        let mut entries = Vec::new();

        for stat in report.reports.values() {
            match stat {
                StatsReportType::InboundRTP(rtp) => {
                    let Some(kind) = TrackKind::from_label(&rtp.kind) else {
                        continue;
                    };
                    // webrtc-rs does not report loss or jitter on inbound-rtp
                    entries.push(StatsEntry::InboundRtp(InboundRtpStats {
                        kind,
                        packets_received: rtp.packets_received,
                        packets_lost: 0,
                        jitter: 0.0,
                        bytes_received: rtp.bytes_received,
                        frames_per_second: None,
                        frame_width: None,
                        frame_height: None,
                    }));
                }
                StatsReportType::OutboundRTP(rtp) => {
                    let Some(kind) = TrackKind::from_label(&rtp.kind) else {
                        continue;
                    };
                    entries.push(StatsEntry::OutboundRtp(OutboundRtpStats {
                        kind,
                        packets_sent: rtp.packets_sent,
                        bytes_sent: rtp.bytes_sent,
                        frames_per_second: None,
                        frame_width: None,
                        frame_height: None,
                    }));
                }
                StatsReportType::RemoteInboundRTP(remote) => {
                    let Some(kind) = TrackKind::from_label(&remote.kind) else {
                        continue;
                    };
                    entries.push(StatsEntry::RemoteInboundRtp(RemoteInboundRtpStats {
                        kind,
                        packets_lost: remote.packets_lost,
                        round_trip_time: remote.round_trip_time,
                    }));
                }
                StatsReportType::CandidatePair(pair) => {
                    let state = if pair.nominated {
                        CandidatePairState::Succeeded
                    } else {
                        CandidatePairState::InProgress
                    };
                    entries.push(StatsEntry::CandidatePair(CandidatePairStats {
                        state,
                        nominated: pair.nominated,
                        current_round_trip_time: Some(pair.current_round_trip_time),
                        available_outgoing_bitrate: Some(pair.available_outgoing_bitrate),
                        bytes_sent: pair.bytes_sent,
                        bytes_received: pair.bytes_received,
                    }));
                }
                _ => {}
            }
        }

        Ok(StatsReport::new(entries))
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    fn connection_state(&self) -> PeerConnectionState {
        connection_state_from(self.pc.connection_state())
    }

    async fn close(&self) -> Result<(), RtcError> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Sender limits are published on the track for the encoder feeding it;
/// webrtc-rs has no encoder of its own to reconfigure.
struct WebrtcSender {
    track: Arc<MediaTrack>,
}

#[async_trait]
impl RtpSender for WebrtcSender {
    fn kind(&self) -> TrackKind {
        self.track.kind()
    }

    fn track_id(&self) -> String {
        self.track.id().to_string()
    }

    async fn parameters(&self) -> SendParameters {
        self.track.send_parameters()
    }

    async fn set_parameters(&self, parameters: SendParameters) -> Result<(), RtcError> {
        self.track.update_send_parameters(parameters);
        Ok(())
    }
}

fn connection_state_from(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::New,
    }
}

fn description_from(description: RTCSessionDescription) -> Result<SessionDescription, RtcError> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(RtcError::Engine(format!(
                "unexpected description type {}",
                other
            )));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

fn description_into(description: SessionDescription) -> Result<RTCSessionDescription, RtcError> {
    match description.sdp_type {
        SdpType::Offer => Ok(RTCSessionDescription::offer(description.sdp)?),
        SdpType::Answer => Ok(RTCSessionDescription::answer(description.sdp)?),
        SdpType::Pranswer => Ok(RTCSessionDescription::pranswer(description.sdp)?),
        SdpType::Rollback => Err(RtcError::Unsupported("rollback".to_string())),
    }
}

/// Media source producing sample-fed tracks for the webrtc-rs backend
///
/// The caller writes encoded frames with [`MediaTrack::write_sample`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WebrtcSampleDevices;

impl WebrtcSampleDevices {
    const VIDEO_DEVICE: &'static str = "sample-video";
    const AUDIO_DEVICE: &'static str = "sample-audio";

    fn video_capability() -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: "video/H264".to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line:
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                    .to_string(),
            rtcp_feedback: vec![],
        }
    }

    fn audio_capability() -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            rtcp_feedback: vec![],
        }
    }
}

#[async_trait]
impl MediaDevices for WebrtcSampleDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::NothingRequested);
        }

        let stream_id = format!("carelink-local-{}", Uuid::new_v4());
        let mut tracks = Vec::new();
        if constraints.audio {
            let local = Arc::new(TrackLocalStaticSample::new(
                Self::audio_capability(),
                "audio".to_string(),
                stream_id.clone(),
            ));
            tracks.push(Arc::new(MediaTrack::with_sample_track(
                TrackKind::Audio,
                Self::AUDIO_DEVICE,
                local,
            )));
        }
        if constraints.video {
            let local = Arc::new(TrackLocalStaticSample::new(
                Self::video_capability(),
                "video".to_string(),
                stream_id.clone(),
            ));
            tracks.push(Arc::new(MediaTrack::with_sample_track(
                TrackKind::Video,
                Self::VIDEO_DEVICE,
                local,
            )));
        }

        Ok(MediaStream::new(stream_id, tracks))
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        Ok(vec![
            DeviceInfo {
                device_id: Self::AUDIO_DEVICE.to_string(),
                kind: DeviceKind::AudioInput,
                label: "Sample audio source".to_string(),
            },
            DeviceInfo {
                device_id: Self::VIDEO_DEVICE.to_string(),
                kind: DeviceKind::VideoInput,
                label: "Sample video source".to_string(),
            },
        ])
    }
}
