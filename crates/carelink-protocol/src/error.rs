use thiserror::Error;

use crate::messages::SignalKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed permission: {0}")]
    MalformedPermission(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Content does not match signal type {0:?}")]
    ContentMismatch(SignalKind),

    #[error("Empty session description in {0:?}")]
    EmptyDescription(SignalKind),
}
