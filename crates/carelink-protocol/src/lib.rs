//! Shared protocol definitions for CareLink video sessions
//!
//! Wire types for the per-session signaling channel, the relay WebSocket
//! protocol, session and participant records, and access control.

pub mod access;
pub mod error;
pub mod messages;
pub mod types;

pub use access::{Action, Permission, Resource};
pub use error::ProtocolError;
pub use messages::*;
pub use types::*;
