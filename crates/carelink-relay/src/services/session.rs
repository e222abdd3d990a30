//! In-memory session record store
//!
//! Participants are never removed from a session: leaving marks the record
//! inactive so the history stays available to the host. A session ends when
//! the host ends it, when everyone has left, or when it expires. Expired
//! sessions are dropped from the store by `expire_due`.

use crate::error::{AppError, Result};
use carelink_protocol::{Participant, ParticipantRole, SessionRecord, SessionSummary};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSession {
    pub name: Option<String>,
    pub max_participants: Option<u32>,
    pub ttl_minutes: Option<i64>,
    pub waiting_room_enabled: Option<bool>,
    #[serde(default)]
    pub recording_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct JoinSession {
    pub token: String,
    pub display_name: String,
    pub role: ParticipantRole,
    pub user_id: Option<Uuid>,
}

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct Joined {
    pub participant: Participant,
    pub session: SessionSummary,
    pub waiting: bool,
    /// Other active participants at join time
    pub others: Vec<Participant>,
}

struct SessionEntry {
    record: SessionRecord,
    participants: Vec<Participant>,
    waiting: HashSet<Uuid>,
}

impl SessionEntry {
    fn active_count(&self) -> usize {
        self.participants.iter().filter(|p| p.active).count()
    }

    fn deactivate(&mut self, now: DateTime<Utc>) {
        self.record.active = false;
        self.waiting.clear();
        for participant in self.participants.iter_mut().filter(|p| p.active) {
            participant.mark_left(now);
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionService {
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

impl SessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an instant session that starts now
    pub async fn create(
        &self,
        input: CreateSession,
        default_ttl_minutes: i64,
        default_max_participants: u32,
    ) -> Result<SessionRecord> {
        let max_participants = input.max_participants.unwrap_or(default_max_participants);
        if max_participants < 2 {
            return Err(AppError::BadRequest(
                "A session needs room for at least two participants".to_string(),
            ));
        }
        let ttl = input.ttl_minutes.unwrap_or(default_ttl_minutes);
        if ttl <= 0 {
            return Err(AppError::BadRequest("Session lifetime must be positive".to_string()));
        }

        let now = Utc::now();
        let record = SessionRecord {
            id: Uuid::new_v4(),
            name: input
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Instant session".to_string()),
            token: generate_token(),
            active: true,
            expires_at: now + Duration::minutes(ttl),
            max_participants,
            recording_enabled: input.recording_enabled,
            waiting_room_enabled: input.waiting_room_enabled.unwrap_or(true),
            created_at: now,
        };

        self.sessions.write().await.insert(
            record.id,
            SessionEntry {
                record: record.clone(),
                participants: Vec::new(),
                waiting: HashSet::new(),
            },
        );
        tracing::info!("Created session {} ({})", record.id, record.name);
        Ok(record)
    }

    pub async fn get(&self, id: Uuid) -> Result<SessionRecord> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
    }

    /// All participants ever joined, including those who left
    pub async fn participants(&self, id: Uuid) -> Result<Vec<Participant>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.participants.clone())
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
    }

    pub async fn verify_token(&self, id: Uuid, token: &str) -> Result<()> {
        if self.get(id).await?.token == token {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }

    pub async fn join(&self, session_id: Uuid, input: JoinSession) -> Result<Joined> {
        self.join_at(session_id, input, Utc::now()).await
    }

    async fn join_at(&self, session_id: Uuid, input: JoinSession, now: DateTime<Utc>) -> Result<Joined> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        if entry.record.token != input.token {
            return Err(AppError::Unauthorized);
        }
        if !entry.record.is_joinable_at(now) {
            let reason = if entry.record.active {
                "Session has expired"
            } else {
                "Session has ended"
            };
            return Err(AppError::Conflict(reason.to_string()));
        }
        if entry.active_count() >= entry.record.max_participants as usize {
            return Err(AppError::Conflict("Session is full".to_string()));
        }
        let display_name = input.display_name.trim();
        if display_name.is_empty() {
            return Err(AppError::BadRequest("Display name is required".to_string()));
        }

        let participant = Participant::new(input.user_id, display_name.to_string(), input.role);
        let waiting =
            entry.record.waiting_room_enabled && input.role == ParticipantRole::Patient;
        if waiting {
            entry.waiting.insert(participant.id);
        }

        let others = entry
            .participants
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect();
        entry.participants.push(participant.clone());

        tracing::info!(
            "{} joined session {} as {:?} (waiting: {})",
            participant.display_name,
            session_id,
            participant.role,
            waiting
        );

        Ok(Joined {
            participant,
            session: entry.record.summary(),
            waiting,
            others,
        })
    }

    /// Mark a participant as left. Returns false when they already had.
    ///
    /// The last active participant leaving ends the session.
    pub async fn leave(&self, session_id: Uuid, participant_id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&session_id) else {
            return false;
        };
        entry.waiting.remove(&participant_id);
        let Some(participant) = entry
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id && p.active)
        else {
            return false;
        };
        participant.mark_left(Utc::now());
        tracing::debug!("{} left session {}", participant.display_name, session_id);

        if entry.active_count() == 0 && entry.record.active {
            entry.record.active = false;
            entry.waiting.clear();
            tracing::info!("Session {} ended, everyone left", session_id);
        }
        true
    }

    /// Whether the session still accepts signaling
    pub async fn is_active(&self, session_id: Uuid) -> bool {
        let now = Utc::now();
        self.sessions
            .read()
            .await
            .get(&session_id)
            .is_some_and(|entry| entry.record.is_joinable_at(now))
    }

    /// End sessions that are past their expiry and drop them from the store.
    /// Returns the sessions that were still running, so their members can be
    /// told.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        sessions.retain(|id, entry| {
            if !entry.record.is_expired_at(now) {
                return true;
            }
            if entry.record.active {
                entry.deactivate(now);
                expired.push(*id);
                tracing::info!("Session {} expired", id);
            }
            false
        });
        expired
    }

    pub async fn is_waiting(&self, session_id: Uuid, participant_id: Uuid) -> bool {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .is_some_and(|entry| entry.waiting.contains(&participant_id))
    }

    /// Let a participant out of the waiting room
    pub async fn admit(&self, session_id: Uuid, participant_id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;
        if !entry.waiting.remove(&participant_id) {
            return Err(AppError::NotFound(
                "Participant is not in the waiting room".to_string(),
            ));
        }
        tracing::info!("Admitted {} to session {}", participant_id, session_id);
        Ok(())
    }

    /// Deactivate the session and mark everyone as left
    pub async fn end(&self, session_id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;
        entry.deactivate(Utc::now());
        tracing::info!("Session {} ended", session_id);
        Ok(())
    }
}
