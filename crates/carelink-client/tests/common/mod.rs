//! In-memory engine, devices and notifier for exercising the controllers
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use carelink_client::error::{MediaError, RtcError};
use carelink_client::media::{DeviceInfo, DeviceKind, MediaConstraints, MediaDevices, MediaStream, MediaTrack};
use carelink_client::notify::{Notification, Notifier};
use carelink_client::rtc::{
    OfferOptions, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent, RtpSender,
    SendParameters, SessionDescription, SignalingState, StatsReport,
};
use carelink_client::signaling::{MemoryBus, SignalingChannel};
use carelink_client::{PeerController, PeerState};
use carelink_media::SdpTransformOptions;
use carelink_protocol::{IceCandidateInit, SdpType, TrackKind};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

pub const OFFER_SDP: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 102\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n\
a=ssrc:1001 cname:carelink\r\n";

pub fn host_candidate(port: u16) -> IceCandidateInit {
    IceCandidateInit {
        candidate: format!("candidate:1 1 udp 2122260223 10.0.0.2 {} typ host", port),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

struct PeerSlots {
    signaling: SignalingState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    candidates: Vec<IceCandidateInit>,
    closed: bool,
}

/// Engine double with a real offer/answer state machine. Connects as soon
/// as a negotiation completes and gathers one host candidate per local
/// description.
pub struct FakePeer {
    slots: Mutex<PeerSlots>,
    events: mpsc::UnboundedSender<PeerEvent>,
    senders: Mutex<Vec<Arc<FakeSender>>>,
    stats: Mutex<StatsReport>,
    pub fail_stats: AtomicBool,
    gathered: AtomicUsize,
}

impl FakePeer {
    fn new(events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            slots: Mutex::new(PeerSlots {
                signaling: SignalingState::Stable,
                local: None,
                remote: None,
                candidates: Vec::new(),
                closed: false,
            }),
            events,
            senders: Mutex::new(Vec::new()),
            stats: Mutex::new(StatsReport::new(vec![])),
            fail_stats: AtomicBool::new(false),
            gathered: AtomicUsize::new(0),
        }
    }

    pub fn remote_sdp(&self) -> Option<String> {
        self.slots.lock().unwrap().remote.as_ref().map(|d| d.sdp.clone())
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidateInit> {
        self.slots.lock().unwrap().candidates.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.slots.lock().unwrap().closed
    }

    pub fn set_stats(&self, report: StatsReport) {
        *self.stats.lock().unwrap() = report;
    }

    pub fn fake_senders(&self) -> Vec<Arc<FakeSender>> {
        self.senders.lock().unwrap().clone()
    }

    fn connect(&self) {
        let _ = self
            .events
            .send(PeerEvent::ConnectionState(PeerConnectionState::Connecting));
        let _ = self
            .events
            .send(PeerEvent::ConnectionState(PeerConnectionState::Connected));
    }

    fn gather(&self) {
        let n = self.gathered.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .events
            .send(PeerEvent::LocalCandidate(host_candidate(50_000 + n as u16)));
    }
}

fn engine_error(msg: &str) -> RtcError {
    RtcError::Engine(msg.to_string())
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<Arc<dyn RtpSender>, RtcError> {
        let sender = Arc::new(FakeSender::new(track));
        self.senders.lock().unwrap().push(sender.clone());
        Ok(sender)
    }

    async fn senders(&self) -> Vec<Arc<dyn RtpSender>> {
        self.senders
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.clone() as Arc<dyn RtpSender>)
            .collect()
    }

    async fn create_offer(&self, _options: OfferOptions) -> Result<SessionDescription, RtcError> {
        if self.slots.lock().unwrap().closed {
            return Err(engine_error("closed"));
        }
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn create_answer(&self) -> Result<SessionDescription, RtcError> {
        let slots = self.slots.lock().unwrap();
        if slots.signaling != SignalingState::HaveRemoteOffer {
            return Err(engine_error("no remote offer"));
        }
        Ok(SessionDescription::answer(OFFER_SDP))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), RtcError> {
        let completed = {
            let mut slots = self.slots.lock().unwrap();
            let completed = match (description.sdp_type, slots.signaling) {
                (SdpType::Offer, SignalingState::Stable) => {
                    slots.signaling = SignalingState::HaveLocalOffer;
                    false
                }
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => {
                    slots.signaling = SignalingState::Stable;
                    true
                }
                _ => return Err(engine_error("invalid local description for state")),
            };
            slots.local = Some(description);
            completed
        };
        self.gather();
        if completed {
            self.connect();
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), RtcError> {
        let completed = {
            let mut slots = self.slots.lock().unwrap();
            let completed = match (description.sdp_type, slots.signaling) {
                (SdpType::Offer, SignalingState::Stable) => {
                    slots.signaling = SignalingState::HaveRemoteOffer;
                    false
                }
                (SdpType::Answer, SignalingState::HaveLocalOffer) => {
                    slots.signaling = SignalingState::Stable;
                    true
                }
                _ => return Err(engine_error("invalid remote description for state")),
            };
            slots.remote = Some(description);
            completed
        };
        if completed {
            self.connect();
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), RtcError> {
        let mut slots = self.slots.lock().unwrap();
        if slots.remote.is_none() {
            return Err(engine_error("remote description not set"));
        }
        slots.candidates.push(candidate);
        Ok(())
    }

    async fn stats(&self) -> Result<StatsReport, RtcError> {
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(engine_error("stats unavailable"));
        }
        let mut report = self.stats.lock().unwrap().clone();
        report.timestamp = chrono::Utc::now();
        Ok(report)
    }

    fn signaling_state(&self) -> SignalingState {
        self.slots.lock().unwrap().signaling
    }

    fn connection_state(&self) -> PeerConnectionState {
        if self.slots.lock().unwrap().closed {
            PeerConnectionState::Closed
        } else {
            PeerConnectionState::New
        }
    }

    async fn close(&self) -> Result<(), RtcError> {
        let mut slots = self.slots.lock().unwrap();
        slots.closed = true;
        slots.signaling = SignalingState::Closed;
        let _ = self
            .events
            .send(PeerEvent::ConnectionState(PeerConnectionState::Closed));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<Arc<FakePeer>>>,
    pub fail: AtomicBool,
}

impl FakeFactory {
    pub fn created(&self) -> Vec<Arc<FakePeer>> {
        self.created.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakePeer> {
        self.created().last().cloned().expect("no peer connection created")
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeFactory {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, RtcError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(engine_error("factory unavailable"));
        }
        let peer = Arc::new(FakePeer::new(events));
        self.created.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

pub struct FakeSender {
    track: Arc<MediaTrack>,
    parameters: Mutex<SendParameters>,
    pub fail: AtomicBool,
}

impl FakeSender {
    fn new(track: Arc<MediaTrack>) -> Self {
        Self {
            track,
            parameters: Mutex::new(SendParameters::default()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn current(&self) -> SendParameters {
        self.parameters.lock().unwrap().clone()
    }

    pub fn preset(&self, parameters: SendParameters) {
        *self.parameters.lock().unwrap() = parameters;
    }
}

#[async_trait]
impl RtpSender for FakeSender {
    fn kind(&self) -> TrackKind {
        self.track.kind()
    }

    fn track_id(&self) -> String {
        self.track.id().to_string()
    }

    async fn parameters(&self) -> SendParameters {
        self.current()
    }

    async fn set_parameters(&self, parameters: SendParameters) -> Result<(), RtcError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(engine_error("sender rejected parameters"));
        }
        self.preset(parameters);
        Ok(())
    }
}

/// Capture double. With a gate, acquisitions wait for `gate.notify_one()`.
#[derive(Default)]
pub struct FakeDevices {
    pub gate: Option<Arc<Notify>>,
    failure: Mutex<Option<MediaError>>,
    issued: Mutex<Vec<MediaStream>>,
    requests: AtomicUsize,
}

impl FakeDevices {
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Self {
                gate: Some(gate.clone()),
                ..Self::default()
            },
            gate,
        )
    }

    pub fn fail_with(&self, error: Option<MediaError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn issued(&self) -> Vec<MediaStream> {
        self.issued.lock().unwrap().clone()
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(MediaTrack::new(TrackKind::Audio, "Test microphone")));
        }
        if constraints.video {
            tracks.push(Arc::new(MediaTrack::new(TrackKind::Video, "Test camera")));
        }
        let stream = MediaStream::new(Uuid::new_v4().to_string(), tracks);
        self.issued.lock().unwrap().push(stream.clone());
        Ok(stream)
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(vec![
            DeviceInfo {
                device_id: "mic-1".to_string(),
                kind: DeviceKind::AudioInput,
                label: "Test microphone".to_string(),
            },
            DeviceInfo {
                device_id: "cam-1".to_string(),
                kind: DeviceKind::VideoInput,
                label: "Test camera".to_string(),
            },
        ])
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// One participant's peer controller on a shared bus
pub struct Endpoint {
    pub id: Uuid,
    pub factory: Arc<FakeFactory>,
    pub signaling: SignalingChannel,
    pub peer: PeerController,
}

pub fn endpoint(bus: &Arc<MemoryBus>, session_id: Uuid) -> Endpoint {
    endpoint_with_id(bus, session_id, Uuid::new_v4())
}

pub fn endpoint_with_id(bus: &Arc<MemoryBus>, session_id: Uuid, id: Uuid) -> Endpoint {
    let factory = Arc::new(FakeFactory::default());
    let signaling = SignalingChannel::new(bus.clone(), session_id, id);
    let peer = PeerController::new(factory.clone(), signaling.clone(), SdpTransformOptions::default());
    Endpoint {
        id,
        factory,
        signaling,
        peer,
    }
}

pub async fn wait_for_state(peer: &PeerController, target: PeerState) {
    let mut rx = peer.watch_state();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}, at {:?}", target, peer.state()))
        .expect("state channel closed");
}

/// Poll `check` until it holds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// Let aborted tasks drop and queued messages drain
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
