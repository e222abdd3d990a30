//! In-process transport for tests and single-process demos

use std::collections::HashMap;

use async_trait::async_trait;
use carelink_protocol::SignalingMessage;
use tokio::sync::{RwLock, mpsc};

use crate::error::SignalingError;

use super::RealtimeTransport;

/// Fan-out bus: every subscriber of a channel sees every message on it
#[derive(Default)]
pub struct MemoryBus {
    channels: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<SignalingMessage>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RealtimeTransport for MemoryBus {
    async fn publish(&self, channel: &str, message: SignalingMessage) -> Result<(), SignalingError> {
        let mut channels = self.channels.write().await;
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<SignalingMessage>, SignalingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
