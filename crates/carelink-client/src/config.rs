//! Client configuration
//!
//! Values come from an optional TOML file, then `CARELINK__*` environment
//! variables (`CARELINK__SDP__MAX_BITRATE=900000`), then the defaults below.

use std::path::Path;
use std::time::Duration;

use carelink_media::{QualityTier, SdpTransformOptions};
use carelink_protocol::IceServer;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the signaling relay
    pub relay_url: String,
    pub ice_servers: Vec<IceServer>,
    /// Connection monitor polling period
    pub stats_interval_ms: u64,
    /// Bandwidth re-evaluation period
    pub bandwidth_interval_ms: u64,
    pub initial_quality: QualityTier,
    pub sdp: SdpTransformOptions,
    /// Enter the waiting room after joining when the session has one
    pub waiting_room: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8080/ws".to_string(),
            ice_servers: vec![IceServer {
                urls: vec![DEFAULT_STUN_SERVER.to_string()],
                username: None,
                credential: None,
            }],
            stats_interval_ms: 2_000,
            bandwidth_interval_ms: 10_000,
            initial_quality: QualityTier::Medium,
            sdp: SdpTransformOptions::default(),
            waiting_room: true,
        }
    }
}

impl ClientConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let config = builder
            .add_source(
                ::config::Environment::with_prefix("CARELINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the controllers cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stats_interval_ms == 0 {
            return Err(ConfigError::Invalid("stats_interval_ms must be positive".to_string()));
        }
        if self.bandwidth_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "bandwidth_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn bandwidth_interval(&self) -> Duration {
        Duration::from_millis(self.bandwidth_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.stats_interval(), Duration::from_secs(2));
        assert_eq!(config.bandwidth_interval(), Duration::from_secs(10));
        assert_eq!(config.initial_quality, QualityTier::Medium);
        assert!(config.sdp.prefer_h264);
        assert_eq!(config.ice_servers[0].urls[0], DEFAULT_STUN_SERVER);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("carelink-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
relay_url = "wss://relay.example.org/ws"
stats_interval_ms = 500
initial_quality = "high"

[sdp]
max_bitrate = 900000
"#,
        )
        .unwrap();

        let config = ClientConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.relay_url, "wss://relay.example.org/ws");
        assert_eq!(config.stats_interval_ms, 500);
        assert_eq!(config.initial_quality, QualityTier::High);
        assert_eq!(config.sdp.max_bitrate, Some(900_000));
        assert!(config.sdp.optimize_latency);
        assert_eq!(config.bandwidth_interval_ms, 10_000);
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let path = std::env::temp_dir().join(format!("carelink-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "stats_interval_ms = 0\n").unwrap();
        let result = ClientConfig::load(Some(&path));
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let config = ClientConfig {
            bandwidth_interval_ms: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("carelink-does-not-exist.toml");
        let config = ClientConfig::load(Some(&path)).unwrap();
        assert_eq!(config.stats_interval_ms, 2_000);
    }
}
