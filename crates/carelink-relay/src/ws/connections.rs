use carelink_protocol::ServerMessage;
use std::collections::{HashMap, HashSet};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

pub struct ConnectionManager {
    /// Map from participant ID to message sender channel
    senders: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
    /// Map from participant ID to the session it joined
    participant_sessions: RwLock<HashMap<Uuid, Uuid>>,
    /// Map from session ID to connected participant IDs
    session_members: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

fn serialize(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            None
        }
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            participant_sessions: RwLock::new(HashMap::new()),
            session_members: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_connection(
        &self,
        participant_id: Uuid,
        session_id: Uuid,
        sender: mpsc::UnboundedSender<String>,
    ) {
        self.senders.write().await.insert(participant_id, sender);
        self.participant_sessions
            .write()
            .await
            .insert(participant_id, session_id);
        self.session_members
            .write()
            .await
            .entry(session_id)
            .or_default()
            .insert(participant_id);

        tracing::debug!(
            "Participant {} connected to session {}",
            participant_id,
            session_id
        );
    }

    /// Returns the session the participant was connected to
    pub async fn remove_connection(&self, participant_id: Uuid) -> Option<Uuid> {
        let session_id = self
            .participant_sessions
            .write()
            .await
            .remove(&participant_id);

        if let Some(session_id) = session_id {
            let mut members = self.session_members.write().await;
            if let Some(set) = members.get_mut(&session_id) {
                set.remove(&participant_id);
                if set.is_empty() {
                    members.remove(&session_id);
                }
            }
            tracing::debug!(
                "Participant {} disconnected from session {}",
                participant_id,
                session_id
            );
        }

        self.senders.write().await.remove(&participant_id);
        session_id
    }

    /// Send to every connection in the session, optionally skipping one
    pub async fn broadcast_to_session(
        &self,
        session_id: Uuid,
        message: &ServerMessage,
        except: Option<Uuid>,
    ) -> usize {
        let Some(json) = serialize(message) else {
            return 0;
        };

        let members = self.session_members.read().await;
        let senders = self.senders.read().await;
        let Some(ids) = members.get(&session_id) else {
            tracing::debug!("No connections for session {}", session_id);
            return 0;
        };

        let mut delivered = 0;
        for id in ids.iter().filter(|id| Some(**id) != except) {
            if let Some(sender) = senders.get(id) {
                match sender.send(json.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => tracing::error!("Failed to send message to {}: {}", id, e),
                }
            }
        }
        delivered
    }

    pub async fn send_to_participant(&self, participant_id: Uuid, message: &ServerMessage) -> bool {
        let Some(json) = serialize(message) else {
            return false;
        };

        let senders = self.senders.read().await;
        match senders.get(&participant_id) {
            Some(sender) => match sender.send(json) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Failed to send message to {}: {}", participant_id, e);
                    false
                }
            },
            None => false,
        }
    }

    pub async fn session_of(&self, participant_id: Uuid) -> Option<Uuid> {
        self.participant_sessions
            .read()
            .await
            .get(&participant_id)
            .copied()
    }

    pub async fn connected_count(&self, session_id: Uuid) -> usize {
        self.session_members
            .read()
            .await
            .get(&session_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_skips_sender_and_other_sessions() {
        let manager = ConnectionManager::new();
        let session = Uuid::new_v4();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        manager.add_connection(alice, session, tx_a).await;
        manager.add_connection(bob, session, tx_b).await;
        manager.add_connection(carol, Uuid::new_v4(), tx_c).await;

        let delivered = manager
            .broadcast_to_session(session, &ServerMessage::Pong, Some(alice))
            .await;

        assert_eq!(delivered, 1);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_connection() {
        let manager = ConnectionManager::new();
        let session = Uuid::new_v4();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        manager.add_connection(id, session, tx).await;
        assert_eq!(manager.connected_count(session).await, 1);

        assert_eq!(manager.remove_connection(id).await, Some(session));
        assert_eq!(manager.remove_connection(id).await, None);
        assert_eq!(manager.connected_count(session).await, 0);
        assert!(!manager.send_to_participant(id, &ServerMessage::Pong).await);
    }
}
