//! Relay transport over WebSocket

use std::sync::Arc;

use async_trait::async_trait;
use carelink_protocol::{
    ClientMessage, Participant, ParticipantRole, ServerMessage, SessionSummary, SignalingMessage,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use crate::error::SignalingError;

use super::{RealtimeTransport, channel_name};

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub session_id: Uuid,
    pub token: String,
    pub display_name: String,
    pub role: ParticipantRole,
    pub user_id: Option<Uuid>,
}

/// The relay's answer to a join
#[derive(Debug, Clone)]
pub struct RelayJoin {
    pub participant_id: Uuid,
    pub session: SessionSummary,
    pub waiting: bool,
    pub participants: Vec<Participant>,
}

/// Session events that are not signaling messages
#[derive(Debug, Clone)]
pub enum RelayEvent {
    ParticipantJoined(Participant),
    ParticipantLeft(Uuid),
    Admitted(Uuid),
    SessionEnded,
    Error(String),
    Disconnected,
}

type Subscribers = Arc<RwLock<Vec<mpsc::UnboundedSender<SignalingMessage>>>>;

pub struct WsTransport {
    sender: mpsc::Sender<ClientMessage>,
    channel: String,
    subscribers: Subscribers,
    events: broadcast::Sender<RelayEvent>,
    joined: RelayJoin,
}

impl WsTransport {
    /// Connect and join; the relay must accept the join before anything else
    pub async fn connect(url: &str, join: JoinRequest) -> Result<Self, SignalingError> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<ClientMessage>(100);

        let join_msg = ClientMessage::Join {
            session_id: join.session_id,
            token: join.token,
            display_name: join.display_name,
            role: join.role,
            user_id: join.user_id,
        };
        let json = serde_json::to_string(&join_msg)?;
        write.send(Message::Text(json.into())).await?;

        let joined = match read.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text)? {
                ServerMessage::Joined {
                    participant_id,
                    session,
                    waiting,
                    participants,
                } => {
                    tracing::info!(
                        "Joined session {} as participant {} (waiting: {})",
                        session.id,
                        participant_id,
                        waiting
                    );
                    RelayJoin {
                        participant_id,
                        session,
                        waiting,
                        participants,
                    }
                }
                ServerMessage::Error { message } => return Err(SignalingError::Rejected(message)),
                other => {
                    return Err(SignalingError::UnexpectedResponse(format!("{:?}", other)));
                }
            },
            _ => return Err(SignalingError::Closed),
        };

        // Outgoing messages
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                if write.send(Message::Text(json.into())).await.is_err() {
                    tracing::error!("Failed to send WebSocket message");
                    break;
                }
            }
        });

        // Incoming messages
        let subscribers: Subscribers = Arc::new(RwLock::new(Vec::new()));
        let (events, _) = broadcast::channel(64);
        let subscribers_clone = subscribers.clone();
        let events_clone = events.clone();
        tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => Self::handle_message(&subscribers_clone, &events_clone, msg).await,
                        Err(e) => tracing::warn!("Ignoring unparseable relay message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by relay");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            subscribers_clone.write().await.clear();
            let _ = events_clone.send(RelayEvent::Disconnected);
        });

        // Keepalive
        let tx_ping = tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                if tx_ping.send(ClientMessage::Ping).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            sender: tx,
            channel: channel_name(joined.session.id),
            subscribers,
            events,
            joined,
        })
    }

    async fn handle_message(
        subscribers: &Subscribers,
        events: &broadcast::Sender<RelayEvent>,
        message: ServerMessage,
    ) {
        let event = match message {
            ServerMessage::Signal { message } => {
                subscribers
                    .write()
                    .await
                    .retain(|tx| tx.send(message.clone()).is_ok());
                return;
            }
            ServerMessage::ParticipantJoined { participant } => {
                tracing::info!("{} joined the session", participant.display_name);
                RelayEvent::ParticipantJoined(participant)
            }
            ServerMessage::ParticipantLeft { participant_id } => {
                tracing::info!("Participant {} left the session", participant_id);
                RelayEvent::ParticipantLeft(participant_id)
            }
            ServerMessage::Admitted { participant_id } => RelayEvent::Admitted(participant_id),
            ServerMessage::SessionEnded { session_id } => {
                tracing::info!("Session {} ended by host", session_id);
                RelayEvent::SessionEnded
            }
            ServerMessage::Error { message } => {
                tracing::warn!("Relay error: {}", message);
                RelayEvent::Error(message)
            }
            ServerMessage::Pong => return,
            ServerMessage::Joined { .. } => {
                tracing::warn!("Unexpected join confirmation");
                return;
            }
        };
        let _ = events.send(event);
    }

    pub fn joined(&self) -> &RelayJoin {
        &self.joined
    }

    pub fn participant_id(&self) -> Uuid {
        self.joined.participant_id
    }

    pub fn events(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), SignalingError> {
        self.sender.send(msg).await.map_err(|_| SignalingError::Closed)
    }

    /// Let a participant out of the waiting room; the relay checks the role
    pub async fn admit(&self, participant_id: Uuid) -> Result<(), SignalingError> {
        self.send(ClientMessage::Admit { participant_id }).await
    }

    pub async fn end_session(&self) -> Result<(), SignalingError> {
        self.send(ClientMessage::EndSession).await
    }

    pub async fn leave(&self) -> Result<(), SignalingError> {
        self.send(ClientMessage::Leave).await
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn publish(&self, channel: &str, message: SignalingMessage) -> Result<(), SignalingError> {
        if channel != self.channel {
            return Err(SignalingError::UnknownChannel(channel.to_string()));
        }
        self.send(ClientMessage::Signal { message }).await
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<SignalingMessage>, SignalingError> {
        if channel != self.channel {
            return Err(SignalingError::UnknownChannel(channel.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.push(tx);
        Ok(rx)
    }
}
