//! Media utilities for CareLink video sessions
//!
//! This crate provides the engine-independent pieces of the media path:
//! - SDP rewriting (codec preference, bandwidth caps, latency hints)
//! - Outgoing video quality tiers

pub mod quality;
pub mod sdp;

pub use quality::{BandwidthConstraints, QualityTier, Resolution};
pub use sdp::{SdpTransformOptions, apply_transforms};
