use crate::services::session::JoinSession;
use crate::state::AppState;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use carelink_protocol::{
    Action, ClientMessage, ParticipantRole, Permission, Resource, ServerMessage, SignalingMessage,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A joined participant on this socket
#[derive(Debug, Clone, Copy)]
struct Member {
    participant_id: Uuid,
    session_id: Uuid,
    role: ParticipantRole,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_direct(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            return false;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

async fn reject(sender: &mut SplitSink<WebSocket, Message>, message: impl Into<String>) {
    let _ = send_direct(
        sender,
        &ServerMessage::Error {
            message: message.into(),
        },
    )
    .await;
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // First message must be a join
    let join_msg = match receiver.next().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            tracing::warn!("WebSocket closed before join");
            return;
        }
    };

    let (session_id, join) = match serde_json::from_str::<ClientMessage>(&join_msg) {
        Ok(ClientMessage::Join {
            session_id,
            token,
            display_name,
            role,
            user_id,
        }) => (
            session_id,
            JoinSession {
                token,
                display_name,
                role,
                user_id,
            },
        ),
        Ok(_) => {
            reject(&mut sender, "First message must be a join").await;
            return;
        }
        Err(e) => {
            tracing::warn!("Invalid join message: {}", e);
            reject(&mut sender, "Invalid message format").await;
            return;
        }
    };

    let joined = match state.sessions.join(session_id, join).await {
        Ok(joined) => joined,
        Err(e) => {
            tracing::info!("Join to session {} refused: {}", session_id, e);
            reject(&mut sender, e.public_message()).await;
            return;
        }
    };

    let member = Member {
        participant_id: joined.participant.id,
        session_id,
        role: joined.participant.role,
    };

    let accepted = send_direct(
        &mut sender,
        &ServerMessage::Joined {
            participant_id: member.participant_id,
            session: joined.session.clone(),
            waiting: joined.waiting,
            participants: joined.others.clone(),
        },
    )
    .await;
    if !accepted {
        state.sessions.leave(session_id, member.participant_id).await;
        return;
    }

    // Create channel for outbound messages
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state
        .connections
        .add_connection(member.participant_id, session_id, tx)
        .await;
    state
        .connections
        .broadcast_to_session(
            session_id,
            &ServerMessage::ParticipantJoined {
                participant: joined.participant.clone(),
            },
            Some(member.participant_id),
        )
        .await;

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("Invalid message from {}: {}", member.participant_id, e);
                        continue;
                    }
                };

                if !handle_client_message(&state, member, client_msg).await {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error for {}: {}", member.participant_id, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect
    state.connections.remove_connection(member.participant_id).await;
    send_task.abort();

    if state.sessions.leave(session_id, member.participant_id).await {
        state
            .connections
            .broadcast_to_session(
                session_id,
                &ServerMessage::ParticipantLeft {
                    participant_id: member.participant_id,
                },
                None,
            )
            .await;
    }

    tracing::info!(
        "Participant {} disconnected from session {}",
        member.participant_id,
        session_id
    );
}

async fn send_error(state: &AppState, member: Member, message: impl Into<String>) {
    state
        .connections
        .send_to_participant(
            member.participant_id,
            &ServerMessage::Error {
                message: message.into(),
            },
        )
        .await;
}

/// Returns false when the connection should close
async fn handle_client_message(state: &AppState, member: Member, message: ClientMessage) -> bool {
    match message {
        ClientMessage::Join { .. } => {
            send_error(state, member, "Already joined").await;
        }
        ClientMessage::Signal { message } => {
            relay_signal(state, member, message).await;
        }
        ClientMessage::Admit { participant_id } => {
            if !member
                .role
                .allows(Permission::new(Resource::WaitingRoom, Action::Admit))
            {
                send_error(state, member, "Not allowed to admit participants").await;
                return true;
            }
            match state.sessions.admit(member.session_id, participant_id).await {
                Ok(()) => {
                    state
                        .connections
                        .broadcast_to_session(
                            member.session_id,
                            &ServerMessage::Admitted { participant_id },
                            None,
                        )
                        .await;
                }
                Err(e) => send_error(state, member, e.public_message()).await,
            }
        }
        ClientMessage::EndSession => {
            if !member.role.allows(Permission::new(Resource::Session, Action::End)) {
                send_error(state, member, "Not allowed to end the session").await;
                return true;
            }
            match state.sessions.end(member.session_id).await {
                Ok(()) => {
                    state
                        .connections
                        .broadcast_to_session(
                            member.session_id,
                            &ServerMessage::SessionEnded {
                                session_id: member.session_id,
                            },
                            None,
                        )
                        .await;
                }
                Err(e) => send_error(state, member, e.public_message()).await,
            }
        }
        ClientMessage::Leave => return false,
        ClientMessage::Ping => {
            state
                .connections
                .send_to_participant(member.participant_id, &ServerMessage::Pong)
                .await;
        }
    }
    true
}

/// Forward a signaling message, stamped with the sender's participant ID
async fn relay_signal(state: &AppState, member: Member, mut message: SignalingMessage) {
    if !member
        .role
        .allows(Permission::new(Resource::Session, Action::Signal))
    {
        send_error(state, member, "Not allowed to send media in this session").await;
        return;
    }
    if !state.sessions.is_active(member.session_id).await {
        send_error(state, member, "Session has ended").await;
        return;
    }
    if let Err(e) = message.signal() {
        tracing::warn!("Dropping malformed signal from {}: {}", member.participant_id, e);
        send_error(state, member, e.to_string()).await;
        return;
    }
    message.sender_id = member.participant_id;

    let kind = message.kind;
    let recipient_id = message.recipient_id;
    let forward = ServerMessage::Signal { message };
    match recipient_id {
        Some(recipient) => {
            let same_session =
                state.connections.session_of(recipient).await == Some(member.session_id);
            if !same_session
                || !state
                    .connections
                    .send_to_participant(recipient, &forward)
                    .await
            {
                send_error(state, member, "Recipient is not connected").await;
            }
        }
        None => {
            let delivered = state
                .connections
                .broadcast_to_session(member.session_id, &forward, Some(member.participant_id))
                .await;
            tracing::debug!(
                "Broadcast {:?} from {} to {} peers",
                kind,
                member.participant_id,
                delivered
            );
        }
    }
}
