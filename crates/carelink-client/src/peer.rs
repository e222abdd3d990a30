//! Peer connection lifecycle and offer/answer negotiation
//!
//! One [`PeerController`] owns at most one engine connection at a time.
//! Negotiation steps are serialized: a remote description waits for an
//! in-flight offer or answer, and a second local offer is refused while the
//! first is unanswered. Remote ICE candidates that arrive before the remote
//! description are held and applied right after it.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use carelink_media::{SdpTransformOptions, apply_transforms};
use carelink_protocol::{IceCandidateInit, SdpType, Signal};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::RtcError;
use crate::media::MediaStream;
use crate::rtc::{
    OfferOptions, PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent,
    SessionDescription, SignalingState,
};
use crate::signaling::{InboundSignal, SignalHandler, SignalingChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Connected,
    Failed,
    Closed,
}

#[derive(Default)]
struct IceQueue {
    remote_description_set: bool,
    pending: Vec<IceCandidateInit>,
}

struct PeerInner {
    factory: Arc<dyn PeerConnectionFactory>,
    signaling: SignalingChannel,
    sdp_options: SdpTransformOptions,
    connection: RwLock<Option<Arc<dyn PeerConnection>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    negotiation: Mutex<()>,
    ice: Mutex<IceQueue>,
    remote_id: RwLock<Option<Uuid>>,
    local_stream: RwLock<Option<MediaStream>>,
    /// Track ids already added to the current connection
    attached: Mutex<Vec<String>>,
    state: watch::Sender<PeerState>,
    connection_state: watch::Sender<PeerConnectionState>,
}

#[derive(Clone)]
pub struct PeerController {
    inner: Arc<PeerInner>,
}

impl PeerController {
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        signaling: SignalingChannel,
        sdp_options: SdpTransformOptions,
    ) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                factory,
                signaling,
                sdp_options,
                connection: RwLock::new(None),
                pump: Mutex::new(None),
                negotiation: Mutex::new(()),
                ice: Mutex::new(IceQueue::default()),
                remote_id: RwLock::new(None),
                local_stream: RwLock::new(None),
                attached: Mutex::new(Vec::new()),
                state: watch::Sender::new(PeerState::New),
                connection_state: watch::Sender::new(PeerConnectionState::New),
            }),
        }
    }

    pub fn state(&self) -> PeerState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PeerState> {
        self.inner.state.subscribe()
    }

    pub fn connection_state(&self) -> PeerConnectionState {
        *self.inner.connection_state.borrow()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<PeerConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub async fn connection(&self) -> Option<Arc<dyn PeerConnection>> {
        self.inner.connection.read().await.clone()
    }

    pub async fn remote_id(&self) -> Option<Uuid> {
        *self.inner.remote_id.read().await
    }

    pub fn signaling(&self) -> &SignalingChannel {
        &self.inner.signaling
    }

    /// Add the stream's tracks to the connection, creating it if needed.
    /// The stream is re-attached to any later replacement connection.
    pub async fn attach_stream(&self, stream: &MediaStream) -> bool {
        *self.inner.local_stream.write().await = Some(stream.clone());
        match self.ensure_connection().await {
            Ok(pc) => self.add_local_tracks(pc.as_ref()).await,
            Err(e) => {
                tracing::error!("Failed to create peer connection: {}", e);
                false
            }
        }
    }

    /// Create and send an offer that also asks to receive audio and video
    pub async fn create_offer(&self) -> bool {
        let _guard = self.inner.negotiation.lock().await;
        if self.state() == PeerState::HaveLocalOffer {
            tracing::warn!("Offer already awaiting an answer, not creating another");
            return false;
        }
        self.create_offer_locked().await
    }

    /// Answer the remote offer currently applied
    pub async fn create_answer(&self) -> bool {
        let _guard = self.inner.negotiation.lock().await;
        self.create_answer_locked().await
    }

    pub async fn set_remote_description(&self, description: SessionDescription) -> bool {
        let _guard = self.inner.negotiation.lock().await;
        self.set_remote_locked(description).await
    }

    /// Apply a remote candidate, or hold it until the remote description is set.
    /// Empty candidates are refused.
    pub async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> bool {
        if candidate.candidate.trim().is_empty() {
            tracing::debug!("Ignoring empty ICE candidate");
            return false;
        }

        {
            let mut ice = self.inner.ice.lock().await;
            if !ice.remote_description_set {
                ice.pending.push(candidate);
                tracing::debug!(
                    "Queued ICE candidate until remote description is set ({} pending)",
                    ice.pending.len()
                );
                return true;
            }
        }

        let Some(pc) = self.connection().await else {
            tracing::warn!("ICE candidate received without a peer connection");
            return false;
        };
        match pc.add_ice_candidate(candidate).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to add ICE candidate: {}", e);
                false
            }
        }
    }

    /// Close the connection and forget the remote peer and local stream
    pub async fn close(&self) {
        *self.inner.ice.lock().await = IceQueue::default();
        *self.inner.remote_id.write().await = None;
        *self.inner.local_stream.write().await = None;
        self.teardown(PeerState::Closed).await;
    }

    async fn ensure_connection(&self) -> Result<Arc<dyn PeerConnection>, RtcError> {
        let mut slot = self.inner.connection.write().await;
        if let Some(pc) = slot.as_ref() {
            return Ok(pc.clone());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pc = self.inner.factory.create(events_tx).await?;
        self.inner.attached.lock().await.clear();
        self.inner.state.send_replace(PeerState::New);
        self.inner
            .connection_state
            .send_replace(PeerConnectionState::New);

        let pump = tokio::spawn(Self::pump_events(Arc::downgrade(&self.inner), events_rx));
        if let Some(previous) = self.inner.pump.lock().await.replace(pump) {
            previous.abort();
        }

        self.add_local_tracks(pc.as_ref()).await;
        *slot = Some(pc.clone());
        tracing::info!("Peer connection created");
        Ok(pc)
    }

    async fn add_local_tracks(&self, pc: &dyn PeerConnection) -> bool {
        let Some(stream) = self.inner.local_stream.read().await.clone() else {
            return true;
        };

        let mut attached = self.inner.attached.lock().await;
        let mut ok = true;
        for track in stream.tracks() {
            if attached.iter().any(|id| id == track.id()) {
                continue;
            }
            match pc.add_track(track.clone()).await {
                Ok(_) => attached.push(track.id().to_string()),
                Err(e) => {
                    tracing::error!("Failed to add {} track: {}", track.kind().as_str(), e);
                    ok = false;
                }
            }
        }
        ok
    }

    async fn pump_events(inner: Weak<PeerInner>, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let controller = PeerController { inner };
            match event {
                PeerEvent::LocalCandidate(candidate) => {
                    let recipient = controller.remote_id().await;
                    controller
                        .inner
                        .signaling
                        .send_signal_to(recipient, Signal::IceCandidate(candidate))
                        .await;
                }
                PeerEvent::ConnectionState(state) => controller.on_connection_state(state),
            }
        }
    }

    fn on_connection_state(&self, state: PeerConnectionState) {
        tracing::info!("Peer connection state: {:?}", state);
        self.inner.connection_state.send_replace(state);
        let next = match state {
            PeerConnectionState::Connected => PeerState::Connected,
            PeerConnectionState::Failed => PeerState::Failed,
            PeerConnectionState::Closed => PeerState::Closed,
            _ => return,
        };
        self.inner.state.send_replace(next);
    }

    fn sync_signaling_state(&self, pc: &dyn PeerConnection) {
        let connected = self.connection_state() == PeerConnectionState::Connected;
        let signaling = pc.signaling_state();
        self.inner.state.send_modify(|state| {
            *state = match signaling {
                SignalingState::HaveLocalOffer => PeerState::HaveLocalOffer,
                SignalingState::HaveRemoteOffer => PeerState::HaveRemoteOffer,
                SignalingState::Stable if connected => PeerState::Connected,
                SignalingState::Stable if *state == PeerState::New => PeerState::New,
                SignalingState::Stable => PeerState::Stable,
                SignalingState::Closed => PeerState::Closed,
                _ => *state,
            };
        });
    }

    /// Create the local description, apply it and return the outgoing SDP
    async fn describe_local(
        &self,
        pc: &dyn PeerConnection,
        sdp_type: SdpType,
    ) -> Result<String, RtcError> {
        let description = match sdp_type {
            SdpType::Offer => pc.create_offer(OfferOptions::default()).await?,
            _ => pc.create_answer().await?,
        };
        let sdp = apply_transforms(&description.sdp, &self.inner.sdp_options);
        pc.set_local_description(description).await?;
        self.sync_signaling_state(pc);
        Ok(sdp)
    }

    async fn create_offer_locked(&self) -> bool {
        let pc = match self.ensure_connection().await {
            Ok(pc) => pc,
            Err(e) => {
                tracing::error!("Failed to create peer connection: {}", e);
                return false;
            }
        };

        match self.describe_local(pc.as_ref(), SdpType::Offer).await {
            Ok(sdp) => {
                let recipient = self.remote_id().await;
                let sent = self
                    .inner
                    .signaling
                    .send_signal_to(recipient, Signal::Offer { sdp })
                    .await;
                if sent {
                    tracing::info!("Offer sent");
                }
                sent
            }
            Err(e) => {
                tracing::error!("Failed to create offer: {}", e);
                false
            }
        }
    }

    async fn create_answer_locked(&self) -> bool {
        if self.state() != PeerState::HaveRemoteOffer {
            tracing::warn!("No remote offer to answer (state {:?})", self.state());
            return false;
        }
        let Some(pc) = self.connection().await else {
            return false;
        };

        match self.describe_local(pc.as_ref(), SdpType::Answer).await {
            Ok(sdp) => {
                let recipient = self.remote_id().await;
                let sent = self
                    .inner
                    .signaling
                    .send_signal_to(recipient, Signal::Answer { sdp })
                    .await;
                if sent {
                    tracing::info!("Answer sent");
                }
                sent
            }
            Err(e) => {
                tracing::error!("Failed to create answer: {}", e);
                false
            }
        }
    }

    async fn set_remote_locked(&self, description: SessionDescription) -> bool {
        let pc = if description.sdp_type == SdpType::Offer {
            match self.ensure_connection().await {
                Ok(pc) => pc,
                Err(e) => {
                    tracing::error!("Failed to create peer connection: {}", e);
                    return false;
                }
            }
        } else {
            match self.connection().await {
                Some(pc) => pc,
                None => {
                    tracing::warn!("Remote {:?} without a peer connection", description.sdp_type);
                    return false;
                }
            }
        };

        let sdp_type = description.sdp_type;
        if let Err(e) = pc.set_remote_description(description).await {
            tracing::warn!("Failed to set remote {:?}: {}", sdp_type, e);
            return false;
        }
        self.sync_signaling_state(pc.as_ref());
        self.flush_candidates(pc.as_ref()).await;
        true
    }

    async fn flush_candidates(&self, pc: &dyn PeerConnection) {
        let pending = {
            let mut ice = self.inner.ice.lock().await;
            ice.remote_description_set = true;
            std::mem::take(&mut ice.pending)
        };
        if !pending.is_empty() {
            tracing::debug!("Applying {} queued ICE candidates", pending.len());
        }
        for candidate in pending {
            if let Err(e) = pc.add_ice_candidate(candidate).await {
                tracing::warn!("Failed to add queued ICE candidate: {}", e);
            }
        }
    }

    async fn teardown(&self, next: PeerState) {
        let pc = self.inner.connection.write().await.take();
        if let Some(pump) = self.inner.pump.lock().await.take() {
            pump.abort();
        }
        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                tracing::warn!("Error closing peer connection: {}", e);
            }
            tracing::info!("Peer connection closed");
        }
        self.inner.state.send_replace(next);
        self.inner
            .connection_state
            .send_replace(PeerConnectionState::Closed);
    }

    async fn on_remote_offer(&self, sender_id: Uuid, sdp: String) {
        let _guard = self.inner.negotiation.lock().await;

        if self.state() == PeerState::HaveLocalOffer {
            // Colliding offers: the larger participant id keeps its own
            if self.inner.signaling.local_id() > sender_id {
                tracing::warn!("Ignoring offer from {} that collides with ours", sender_id);
                return;
            }
            tracing::info!("Offer collision with {}, yielding", sender_id);
            self.teardown(PeerState::New).await;
            self.inner.ice.lock().await.remote_description_set = false;
        }

        *self.inner.remote_id.write().await = Some(sender_id);
        if self.set_remote_locked(SessionDescription::offer(sdp)).await {
            self.create_answer_locked().await;
        }
    }

    async fn on_remote_leave(&self, sender_id: Uuid) {
        let remote = self.remote_id().await;
        if remote.is_some_and(|id| id != sender_id) {
            return;
        }
        tracing::info!("Remote participant {} left", sender_id);
        let _guard = self.inner.negotiation.lock().await;
        *self.inner.ice.lock().await = IceQueue::default();
        *self.inner.remote_id.write().await = None;
        self.teardown(PeerState::Closed).await;
    }
}

#[async_trait]
impl SignalHandler for PeerController {
    async fn on_signal(&self, inbound: InboundSignal) {
        match inbound.signal {
            Signal::Offer { sdp } => self.on_remote_offer(inbound.sender_id, sdp).await,
            Signal::Answer { sdp } => {
                self.inner
                    .remote_id
                    .write()
                    .await
                    .get_or_insert(inbound.sender_id);
                self.set_remote_description(SessionDescription::answer(sdp))
                    .await;
            }
            Signal::IceCandidate(candidate) => {
                self.add_ice_candidate(candidate).await;
            }
            Signal::Leave => self.on_remote_leave(inbound.sender_id).await,
        }
    }
}
