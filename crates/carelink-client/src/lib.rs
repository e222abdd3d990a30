//! CareLink client library
//!
//! Coordinates one-to-one telehealth video sessions: signaling over a
//! realtime channel, offer/answer negotiation, local capture, outgoing
//! quality control and connection statistics.

pub mod bandwidth;
pub mod config;
pub mod error;
pub mod media;
pub mod monitor;
pub mod notify;
pub mod peer;
pub mod rtc;
pub mod session;
pub mod signaling;

pub use bandwidth::{BandwidthManager, NetworkEstimator, StatsTrendEstimator};
pub use config::ClientConfig;
pub use error::{ConfigError, MediaError, RtcError, SignalingError};
pub use media::{LocalMediaController, MediaConstraints, MediaDevices, MediaStream, MediaTrack};
pub use monitor::{ConnectionMetrics, ConnectionMonitor};
pub use notify::{Notification, NotificationLevel, Notifier, TracingNotifier};
pub use peer::{PeerController, PeerState};
pub use session::{SessionController, SessionPhase, SessionSnapshot};
pub use signaling::{InboundSignal, MemoryBus, RealtimeTransport, SignalHandler, SignalingChannel};
