//! Per-session signaling channel
//!
//! Messages travel over a [`RealtimeTransport`] on the channel
//! `video-session:<session id>`. The channel drops the participant's own
//! echoes and messages addressed to someone else before handing typed
//! signals to a [`SignalHandler`].

pub mod memory;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use carelink_protocol::{Signal, SignalKind, SignalingMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::SignalingError;

pub use memory::MemoryBus;
pub use websocket::{JoinRequest, RelayEvent, RelayJoin, WsTransport};

pub fn channel_name(session_id: Uuid) -> String {
    format!("video-session:{}", session_id)
}

/// Publish/subscribe transport carrying signaling messages
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn publish(&self, channel: &str, message: SignalingMessage) -> Result<(), SignalingError>;

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<SignalingMessage>, SignalingError>;
}

/// A validated signal from another participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSignal {
    pub kind: SignalKind,
    pub signal: Signal,
    pub sender_id: Uuid,
}

#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn on_signal(&self, signal: InboundSignal);
}

/// Stops delivery when dropped
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct SignalingChannel {
    transport: Arc<dyn RealtimeTransport>,
    session_id: Uuid,
    local_id: Uuid,
    channel: String,
}

impl SignalingChannel {
    pub fn new(transport: Arc<dyn RealtimeTransport>, session_id: Uuid, local_id: Uuid) -> Self {
        Self {
            transport,
            session_id,
            local_id,
            channel: channel_name(session_id),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    /// Broadcast a signal to the session
    pub async fn send_signal(&self, signal: Signal) -> bool {
        self.send_signal_to(None, signal).await
    }

    /// Send a signal to one participant, or everyone when `recipient` is `None`
    pub async fn send_signal_to(&self, recipient: Option<Uuid>, signal: Signal) -> bool {
        let message = SignalingMessage::new(self.local_id, recipient, &signal);
        match self.transport.publish(&self.channel, message).await {
            Ok(()) => {
                tracing::debug!("Sent {:?} on {}", signal.kind(), self.channel);
                true
            }
            Err(e) => {
                tracing::error!("Failed to send {:?} signal: {}", signal.kind(), e);
                false
            }
        }
    }

    /// Deliver inbound signals to `handler`, one at a time, in arrival order
    pub async fn subscribe(
        &self,
        handler: Arc<dyn SignalHandler>,
    ) -> Result<Subscription, SignalingError> {
        let mut rx = self.transport.subscribe(&self.channel).await?;
        let local_id = self.local_id;
        let channel = self.channel.clone();

        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if message.sender_id == local_id || !message.is_addressed_to(local_id) {
                    continue;
                }
                match message.signal() {
                    Ok(signal) => {
                        handler
                            .on_signal(InboundSignal {
                                kind: message.kind,
                                signal,
                                sender_id: message.sender_id,
                            })
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!("Dropping malformed signal from {}: {}", message.sender_id, e);
                    }
                }
            }
            tracing::debug!("Signaling channel {} closed", channel);
        });

        tracing::info!("Subscribed to {}", self.channel);
        Ok(Subscription { task })
    }
}
