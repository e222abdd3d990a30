use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Sender limits for one quality tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BandwidthConstraints {
    /// Bits per second
    pub max_bitrate: u32,
    pub max_framerate: u32,
    pub max_resolution: Resolution,
}

/// Outgoing video quality tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown quality tier: {0}")]
pub struct UnknownTier(pub String);

impl QualityTier {
    pub const ALL: [QualityTier; 3] = [QualityTier::Low, QualityTier::Medium, QualityTier::High];

    /// Fixed constraints for this tier
    pub const fn constraints(self) -> BandwidthConstraints {
        match self {
            QualityTier::Low => BandwidthConstraints {
                max_bitrate: 250_000,
                max_framerate: 15,
                max_resolution: Resolution {
                    width: 320,
                    height: 240,
                },
            },
            QualityTier::Medium => BandwidthConstraints {
                max_bitrate: 750_000,
                max_framerate: 20,
                max_resolution: Resolution {
                    width: 640,
                    height: 480,
                },
            },
            QualityTier::High => BandwidthConstraints {
                max_bitrate: 2_500_000,
                max_framerate: 30,
                max_resolution: Resolution {
                    width: 1280,
                    height: 720,
                },
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(QualityTier::Low),
            "medium" => Ok(QualityTier::Medium),
            "high" => Ok(QualityTier::High),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}
