use crate::services::session::SessionService;
use crate::ws::connections::ConnectionManager;
use carelink_protocol::IceServer;
use std::sync::Arc;

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
    /// Lifetime of an instant session
    pub session_ttl_minutes: i64,
    /// Capacity used when a session is created without one
    pub max_participants: u32,
}

#[derive(Clone)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let stun_servers = std::env::var("STUN_SERVERS")
            .map(|s| s.split(',').map(|u| u.trim().to_string()).filter(|u| !u.is_empty()).collect())
            .unwrap_or_else(|_| vec!["stun:stun.l.google.com:19302".to_string()]);

        let turn_servers = match std::env::var("TURN_URL") {
            Ok(url) => vec![TurnServer {
                url,
                username: std::env::var("TURN_USERNAME").unwrap_or_default(),
                credential: std::env::var("TURN_CREDENTIAL").unwrap_or_default(),
            }],
            Err(_) => vec![],
        };

        let session_ttl_minutes = env_or("SESSION_TTL_MINUTES", 60)?;
        let max_participants = env_or("MAX_PARTICIPANTS", 2)?;
        if session_ttl_minutes <= 0 {
            anyhow::bail!("SESSION_TTL_MINUTES must be positive");
        }

        Ok(Config {
            bind_address,
            stun_servers,
            turn_servers,
            session_ttl_minutes,
            max_participants,
        })
    }

    /// ICE servers handed to clients
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let stun = self.stun_servers.iter().map(|url| IceServer {
            urls: vec![url.clone()],
            username: None,
            credential: None,
        });
        let turn = self.turn_servers.iter().map(|turn| IceServer {
            urls: vec![turn.url.clone()],
            username: Some(turn.username.clone()),
            credential: Some(turn.credential.clone()),
        });
        stun.chain(turn).collect()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: SessionService,
    pub connections: Arc<ConnectionManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sessions: SessionService::new(),
            connections: Arc::new(ConnectionManager::new()),
        }
    }
}
