use thiserror::Error;

/// Errors from the peer connection engine
#[derive(Error, Debug)]
pub enum RtcError {
    #[error("WebRTC error: {0}")]
    Webrtc(#[from] webrtc::Error),

    #[error("No peer connection")]
    NotConnected,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Errors from local capture devices
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission to use camera or microphone was denied")]
    PermissionDenied,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("Neither audio nor video was requested")]
    NothingRequested,
}

impl MediaError {
    /// Short text suitable for a toast
    pub fn user_message(&self) -> &'static str {
        match self {
            MediaError::PermissionDenied => {
                "Please allow camera and microphone access to join the session."
            }
            MediaError::DeviceNotFound(_) => "No camera or microphone was found.",
            MediaError::Unavailable(_) => {
                "Your camera or microphone is in use by another application."
            }
            MediaError::NothingRequested => "Enable your camera or microphone to continue.",
        }
    }
}

/// Errors from the realtime signaling transport
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Transport closed")]
    Closed,

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Rejected by relay: {0}")]
    Rejected(String),

    #[error("Unexpected relay response: {0}")]
    UnexpectedResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
