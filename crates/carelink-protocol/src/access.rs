//! Role-based access control as closed types
//!
//! Permissions are `{resource, action}` pairs. They print and parse as
//! `"resource:action"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Session,
    WaitingRoom,
    Participants,
    Recording,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Join,
    Signal,
    End,
    Admit,
    View,
    Start,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Session => "session",
            Resource::WaitingRoom => "waiting_room",
            Resource::Participants => "participants",
            Resource::Recording => "recording",
        }
    }
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Join => "join",
            Action::Signal => "signal",
            Action::End => "end",
            Action::Admit => "admit",
            Action::View => "view",
            Action::Start => "start",
        }
    }
}

impl FromStr for Resource {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Resource::Session),
            "waiting_room" => Ok(Resource::WaitingRoom),
            "participants" => Ok(Resource::Participants),
            "recording" => Ok(Resource::Recording),
            other => Err(ProtocolError::UnknownResource(other.to_string())),
        }
    }
}

impl FromStr for Action {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "join" => Ok(Action::Join),
            "signal" => Ok(Action::Signal),
            "end" => Ok(Action::End),
            "admit" => Ok(Action::Admit),
            "view" => Ok(Action::View),
            "start" => Ok(Action::Start),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Permission {
    pub resource: Resource,
    pub action: Action,
}

impl Permission {
    pub const fn new(resource: Resource, action: Action) -> Self {
        Self { resource, action }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource.as_str(), self.action.as_str())
    }
}

impl FromStr for Permission {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedPermission(s.to_string()))?;
        if action.contains(':') {
            return Err(ProtocolError::MalformedPermission(s.to_string()));
        }
        Ok(Permission::new(resource.parse()?, action.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_permission() {
        let p: Permission = "waiting_room:admit".parse().unwrap();
        assert_eq!(p, Permission::new(Resource::WaitingRoom, Action::Admit));
        assert_eq!(p.to_string(), "waiting_room:admit");
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert!(matches!(
            "billing:view".parse::<Permission>(),
            Err(ProtocolError::UnknownResource(_))
        ));
        assert!(matches!(
            "session:delete".parse::<Permission>(),
            Err(ProtocolError::UnknownAction(_))
        ));
        assert!(matches!(
            "session".parse::<Permission>(),
            Err(ProtocolError::MalformedPermission(_))
        ));
        assert!(matches!(
            "session:join:now".parse::<Permission>(),
            Err(ProtocolError::MalformedPermission(_))
        ));
    }
}
