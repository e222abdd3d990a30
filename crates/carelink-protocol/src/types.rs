use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{Action, Permission, Resource};

/// Session record as stored by the session store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub name: String,
    /// Opaque bearer string handed to invited participants
    pub token: String,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub max_participants: u32,
    pub recording_enabled: bool,
    pub waiting_room_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether a participant may join at `now`
    pub fn is_joinable_at(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired_at(now)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            name: self.name.clone(),
            active: self.active,
            expires_at: self.expires_at,
            max_participants: self.max_participants,
            recording_enabled: self.recording_enabled,
            waiting_room_enabled: self.waiting_room_enabled,
        }
    }
}

/// Session data without the bearer token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub max_participants: u32,
    pub recording_enabled: bool,
    pub waiting_room_enabled: bool,
}

/// Client-side lifecycle status of a video session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Therapist,
    Patient,
    Observer,
}

impl ParticipantRole {
    /// Static role to permission table
    pub fn permissions(self) -> &'static [Permission] {
        use Action::*;
        use Resource::*;
        const THERAPIST: &[Permission] = &[
            Permission::new(Session, Join),
            Permission::new(Session, End),
            Permission::new(Session, Signal),
            Permission::new(WaitingRoom, Admit),
            Permission::new(Participants, View),
            Permission::new(Recording, Start),
        ];
        const PATIENT: &[Permission] = &[
            Permission::new(Session, Join),
            Permission::new(Session, Signal),
            Permission::new(Participants, View),
        ];
        const OBSERVER: &[Permission] = &[
            Permission::new(Session, Join),
            Permission::new(Participants, View),
        ];

        match self {
            ParticipantRole::Therapist => THERAPIST,
            ParticipantRole::Patient => PATIENT,
            ParticipantRole::Observer => OBSERVER,
        }
    }

    pub fn allows(self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

/// A participant in a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    /// None for guests joining by link
    pub user_id: Option<Uuid>,
    pub display_name: String,
    pub role: ParticipantRole,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn new(user_id: Option<Uuid>, display_name: String, role: ParticipantRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            display_name,
            role,
            active: true,
            joined_at: Utc::now(),
            left_at: None,
        }
    }

    /// Soft delete: the record is kept with `active = false`
    pub fn mark_left(&mut self, at: DateTime<Utc>) {
        self.active = false;
        self.left_at = Some(at);
    }
}

/// ICE server configuration for WebRTC
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Media track kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "audio" => Some(TrackKind::Audio),
            "video" => Some(TrackKind::Video),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(active: bool, ttl_minutes: i64) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: Uuid::new_v4(),
            name: "Intake".to_string(),
            token: "tok".to_string(),
            active,
            expires_at: now + Duration::minutes(ttl_minutes),
            max_participants: 2,
            recording_enabled: false,
            waiting_room_enabled: true,
            created_at: now,
        }
    }

    #[test]
    fn test_joinable_requires_active_and_unexpired() {
        let now = Utc::now();
        assert!(record(true, 30).is_joinable_at(now));
        assert!(!record(false, 30).is_joinable_at(now));
        assert!(!record(true, -1).is_joinable_at(now));
    }

    #[test]
    fn test_mark_left_is_soft_delete() {
        let mut p = Participant::new(None, "Guest".to_string(), ParticipantRole::Patient);
        let at = Utc::now();
        p.mark_left(at);
        assert!(!p.active);
        assert_eq!(p.left_at, Some(at));
    }

    #[test]
    fn test_role_permissions() {
        let admit = Permission::new(Resource::WaitingRoom, Action::Admit);
        assert!(ParticipantRole::Therapist.allows(admit));
        assert!(!ParticipantRole::Patient.allows(admit));
        assert!(!ParticipantRole::Observer.allows(Permission::new(Resource::Session, Action::Signal)));
    }

    #[test]
    fn test_session_status_wire_names() {
        assert_eq!(serde_json::to_string(&SessionStatus::Connecting).unwrap(), "\"connecting\"");
    }
}
