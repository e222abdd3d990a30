//! CareLink relay library
//!
//! Exposes the relay components for testing and embedding.

pub mod api;
pub mod error;
pub mod services;
pub mod state;
pub mod ws;

use std::time::Duration;

use carelink_protocol::ServerMessage;

/// How often expired sessions are swept from the store
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Create the relay application with fresh in-memory state
///
/// Must be called inside a Tokio runtime; it starts the expiry sweep.
pub fn create_app(config: state::Config) -> axum::Router {
    let state = state::AppState::new(config);
    spawn_expiry_sweep(state.clone(), EXPIRY_SWEEP_INTERVAL);
    api::create_router(state)
}

/// Periodically end expired sessions and tell their members
pub fn spawn_expiry_sweep(state: state::AppState, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            for session_id in state.sessions.expire_due(chrono::Utc::now()).await {
                state
                    .connections
                    .broadcast_to_session(session_id, &ServerMessage::SessionEnded { session_id }, None)
                    .await;
            }
        }
    })
}
