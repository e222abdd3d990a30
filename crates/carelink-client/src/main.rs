use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use carelink_client::notify::{Notifier, TracingNotifier};
use carelink_client::rtc::{WebrtcPeerFactory, WebrtcSampleDevices};
use carelink_client::signaling::{JoinRequest, RelayEvent, SignalingChannel, WsTransport};
use carelink_client::{ClientConfig, LocalMediaController, PeerController, SessionController};
use carelink_protocol::{Action, ParticipantRole, Permission, Resource};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const USAGE: &str = "usage: carelink-call <session-id> <token> <display-name> [therapist|patient|observer] [config.toml]";

/// A line typed on stdin during the call
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Admit(Uuid),
    End,
    Leave,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("admit"), Some(id), None) => id
            .parse()
            .map(Command::Admit)
            .map_err(|_| format!("not a participant id: {}", id)),
        (Some("end"), None, None) => Ok(Command::End),
        (Some("leave") | Some("quit"), None, None) => Ok(Command::Leave),
        _ => Err(format!("unknown command {:?}; try `admit <id>`, `end` or `leave`", line.trim())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carelink_client=debug,carelink_media=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        anyhow::bail!(USAGE);
    }
    let session_id: Uuid = args[0].parse().context("invalid session id")?;
    let role = match args.get(3).map(String::as_str) {
        None | Some("patient") => ParticipantRole::Patient,
        Some("therapist") => ParticipantRole::Therapist,
        Some("observer") => ParticipantRole::Observer,
        Some(other) => anyhow::bail!("unknown role {}\n{}", other, USAGE),
    };
    let mut config = ClientConfig::load(args.get(4).map(PathBuf::from).as_deref())?;

    tracing::info!("Connecting to relay at {}", config.relay_url);
    let transport = Arc::new(
        WsTransport::connect(
            &config.relay_url,
            JoinRequest {
                session_id,
                token: args[1].clone(),
                display_name: args[2].clone(),
                role,
                user_id: None,
            },
        )
        .await?,
    );
    let joined = transport.joined().clone();
    config.waiting_room = config.waiting_room && joined.waiting;

    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let signaling = SignalingChannel::new(transport.clone(), joined.session.id, joined.participant_id);
    let factory = Arc::new(WebrtcPeerFactory::new(&config.ice_servers)?);
    let peer = PeerController::new(factory, signaling, config.sdp);
    let media = LocalMediaController::new(Arc::new(WebrtcSampleDevices), notifier.clone());
    let session = SessionController::new(&config, media, peer, notifier);

    if !session.join_session().await {
        anyhow::bail!("Failed to join session {}", session_id);
    }

    let can_admit = role.allows(Permission::new(Resource::WaitingRoom, Action::Admit));
    let can_end = role.allows(Permission::new(Resource::Session, Action::End));
    let mut waiting: HashMap<Uuid, String> = HashMap::new();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut events = transport.events();
    let mut metrics = session.monitor().subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Ok(RelayEvent::Admitted(id)) if id == joined.participant_id => {
                    session.admit_from_waiting_room();
                }
                Ok(RelayEvent::Admitted(id)) | Ok(RelayEvent::ParticipantLeft(id)) => {
                    waiting.remove(&id);
                }
                Ok(RelayEvent::ParticipantJoined(participant)) => {
                    if can_admit
                        && joined.session.waiting_room_enabled
                        && participant.role == ParticipantRole::Patient
                    {
                        tracing::info!(
                            "{} is in the waiting room, type `admit {}` to let them in",
                            participant.display_name,
                            participant.id
                        );
                        waiting.insert(participant.id, participant.display_name);
                    }
                }
                Ok(RelayEvent::SessionEnded) | Ok(RelayEvent::Disconnected) => break,
                Ok(other) => tracing::debug!("Relay event: {:?}", other),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} relay events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Command::Admit(id)) if !can_admit => {
                        tracing::warn!("Your role cannot admit participants ({})", id);
                    }
                    Ok(Command::Admit(id)) => match waiting.remove(&id) {
                        Some(name) => {
                            tracing::info!("Admitting {}", name);
                            transport.admit(id).await?;
                        }
                        None => tracing::warn!("Nobody with id {} is waiting", id),
                    },
                    Ok(Command::End) if !can_end => {
                        tracing::warn!("Your role cannot end the session");
                    }
                    Ok(Command::End) => transport.end_session().await?,
                    Ok(Command::Leave) => break,
                    Err(e) => tracing::warn!("{}", e),
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
            Ok(()) = metrics.changed() => {
                let latest = metrics.borrow_and_update().clone();
                if let Some(m) = latest {
                    let throughput = m.throughput();
                    tracing::info!(
                        "rtt {:.0} ms, loss {:.1}%, send {:.0} kbps, quality {}",
                        m.round_trip_time * 1000.0,
                        m.packet_loss * 100.0,
                        throughput.map(|t| t.send_bps / 1000.0).unwrap_or(0.0),
                        session.bandwidth().current_tier()
                    );
                }
            }
        }
    }

    session.leave_session().await;
    if let Err(e) = transport.leave().await {
        tracing::debug!("Relay already gone: {}", e);
    }
    Ok(())
}
