//! Video session lifecycle
//!
//! Join brings up local media, the peer connection and the signaling
//! subscription; leave tears all of it down. Each join and leave bumps a
//! generation counter so a join that is still in flight when the user leaves
//! stops at its next step without undoing the leave.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use carelink_protocol::{SessionStatus, Signal};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bandwidth::{BandwidthManager, StatsTrendEstimator};
use crate::config::ClientConfig;
use crate::media::LocalMediaController;
use crate::monitor::ConnectionMonitor;
use crate::notify::{Notification, Notifier};
use crate::peer::PeerController;
use crate::rtc::PeerConnectionState;
use crate::signaling::{SignalHandler, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Joining,
    InSession,
    Leaving,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub in_session: bool,
    pub in_waiting_room: bool,
    pub status: SessionStatus,
    /// Seconds since the call started
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub waiting_room: bool,
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            waiting_room: config.waiting_room,
        }
    }
}

#[derive(Default)]
struct Tasks {
    subscription: Option<Subscription>,
    timer: Option<JoinHandle<()>>,
    status: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct SessionController {
    options: SessionOptions,
    media: LocalMediaController,
    peer: PeerController,
    bandwidth: BandwidthManager,
    monitor: ConnectionMonitor,
    notifier: Arc<dyn Notifier>,
    state: Arc<watch::Sender<SessionSnapshot>>,
    generation: Arc<AtomicU64>,
    tasks: Arc<Mutex<Tasks>>,
}

impl SessionController {
    pub fn new(
        config: &ClientConfig,
        media: LocalMediaController,
        peer: PeerController,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let bandwidth = BandwidthManager::new(
            peer.clone(),
            Arc::new(StatsTrendEstimator::new()),
            config.bandwidth_interval(),
            config.initial_quality,
        );
        let monitor = ConnectionMonitor::new(peer.clone(), config.stats_interval());
        Self::with_parts(SessionOptions::from(config), media, peer, bandwidth, monitor, notifier)
    }

    pub fn with_parts(
        options: SessionOptions,
        media: LocalMediaController,
        peer: PeerController,
        bandwidth: BandwidthManager,
        monitor: ConnectionMonitor,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            options,
            media,
            peer,
            bandwidth,
            monitor,
            notifier,
            state: Arc::new(watch::Sender::new(SessionSnapshot::default())),
            generation: Arc::new(AtomicU64::new(0)),
            tasks: Arc::new(Mutex::new(Tasks::default())),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.peer.signaling().session_id()
    }

    pub fn media(&self) -> &LocalMediaController {
        &self.media
    }

    pub fn peer(&self) -> &PeerController {
        &self.peer
    }

    pub fn bandwidth(&self) -> &BandwidthManager {
        &self.bandwidth
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn is_in_session(&self) -> bool {
        self.state.borrow().in_session
    }

    pub fn is_in_waiting_room(&self) -> bool {
        self.state.borrow().in_waiting_room
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Join the session and start the call. Returns false when any step
    /// fails or a leave overtakes the join.
    pub async fn join_session(&self) -> bool {
        let mut started = false;
        self.state.send_if_modified(|s| {
            if matches!(s.phase, SessionPhase::Joining | SessionPhase::InSession) {
                return false;
            }
            s.phase = SessionPhase::Joining;
            s.status = SessionStatus::Connecting;
            started = true;
            true
        });
        if !started {
            tracing::warn!("Already joined or joining session {}", self.session_id());
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("Joining session {}", self.session_id());

        let handler: Arc<dyn SignalHandler> = Arc::new(self.peer.clone());
        match self.peer.signaling().subscribe(handler).await {
            Ok(subscription) => self.tasks.lock().await.subscription = Some(subscription),
            Err(e) => {
                tracing::error!("Failed to subscribe to signaling: {}", e);
                self.fail(generation, "Could not reach the session.").await;
                return false;
            }
        }

        let stream = self.media.get_media_stream(None).await;
        if !self.is_current(generation) {
            tracing::info!("Join abandoned, session left while acquiring media");
            return false;
        }
        let Some(stream) = stream else {
            self.fail(generation, "Could not access your camera or microphone.")
                .await;
            return false;
        };

        self.state.send_modify(|s| {
            s.phase = SessionPhase::InSession;
            s.in_session = true;
            s.in_waiting_room = self.options.waiting_room;
            s.elapsed_secs = 0;
        });
        self.start_timer().await;
        self.start_status_updates().await;

        let connected = self.peer.attach_stream(&stream).await && self.peer.create_offer().await;
        if !self.is_current(generation) {
            // The leave may have closed the peer before the offer reopened it
            if matches!(self.snapshot().phase, SessionPhase::Idle | SessionPhase::Failed) {
                self.peer.close().await;
            }
            return false;
        }
        if !connected {
            self.fail(generation, "Could not start the call.").await;
            return false;
        }

        self.bandwidth.apply_tier(self.bandwidth.current_tier()).await;
        self.bandwidth.start().await;
        self.monitor.start().await;
        tracing::info!("Joined session {}", self.session_id());
        true
    }

    /// Leave the session and release everything; safe to call in any phase
    pub async fn leave_session(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let was_in_session = self.is_in_session();
        self.state.send_modify(|s| s.phase = SessionPhase::Leaving);

        if was_in_session && !self.peer.signaling().send_signal(Signal::Leave).await {
            tracing::warn!("Could not announce leave to the session");
        }
        self.cleanup().await;

        self.state.send_replace(SessionSnapshot::default());
        tracing::info!("Left session {}", self.session_id());
    }

    /// Move the local participant out of the waiting room
    pub fn admit_from_waiting_room(&self) -> bool {
        let mut admitted = false;
        self.state.send_if_modified(|s| {
            admitted = s.in_session && s.in_waiting_room;
            if admitted {
                s.in_waiting_room = false;
            }
            admitted
        });
        if admitted {
            tracing::info!("Admitted from waiting room");
        }
        admitted
    }

    async fn fail(&self, generation: u64, message: &str) {
        if !self.is_current(generation) {
            return;
        }
        self.cleanup().await;
        if !self.is_current(generation) {
            return;
        }
        self.state.send_replace(SessionSnapshot {
            phase: SessionPhase::Failed,
            status: SessionStatus::Failed,
            ..SessionSnapshot::default()
        });
        self.notifier
            .notify(Notification::error("Unable to join session", message));
    }

    async fn cleanup(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        drop(tasks.subscription);
        if let Some(timer) = tasks.timer {
            timer.abort();
        }
        if let Some(status) = tasks.status {
            status.abort();
        }

        self.bandwidth.stop().await;
        self.monitor.stop().await;
        self.media.stop_stream().await;
        self.peer.close().await;
    }

    async fn start_timer(&self) {
        let state = self.state.clone();
        let timer = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                state.send_modify(|s| s.elapsed_secs += 1);
            }
        });
        if let Some(previous) = self.tasks.lock().await.timer.replace(timer) {
            previous.abort();
        }
    }

    async fn start_status_updates(&self) {
        let state = self.state.clone();
        let mut connection = self.peer.watch_connection_state();
        let status = tokio::spawn(async move {
            while connection.changed().await.is_ok() {
                let status = match *connection.borrow_and_update() {
                    PeerConnectionState::New | PeerConnectionState::Connecting => {
                        SessionStatus::Connecting
                    }
                    PeerConnectionState::Connected => SessionStatus::Connected,
                    PeerConnectionState::Disconnected | PeerConnectionState::Closed => {
                        SessionStatus::Disconnected
                    }
                    PeerConnectionState::Failed => SessionStatus::Failed,
                };
                state.send_if_modified(|s| {
                    let changed = s.status != status;
                    s.status = status;
                    changed
                });
            }
        });
        if let Some(previous) = self.tasks.lock().await.status.replace(status) {
            previous.abort();
        }
    }
}
