//! WebRTC session conductor
//!
//! This crate orchestrates one WebRTC call end to end: peer connection
//! lifecycle, offer/answer negotiation, ICE candidate exchange, a
//! push-driven capture pipeline with pixel-format conversion and
//! frame-rate adaptation, render sinks, an unreliable control data
//! channel, and optional in-process STUN/TURN relays for closed
//! networks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Embedding application                                │
//! │  ↓ push_frame / signaling calls     ↑ SessionEvents   │
//! │  Conductor                                            │
//! │  ├─ PushSource → FrameAdapter → frame queue           │
//! │  ├─ PixelFormatBridge (packed ↔ planar YUV420)        │
//! │  ├─ VideoSink / AudioSink (render path)               │
//! │  ├─ control data channel (unordered, 1 retransmit)    │
//! │  └─ StunServer / TurnServer (relay bootstrap)         │
//! │     ↓                                                 │
//! │  webrtc-rs peer connection                            │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use conductor::ConductorConfig;
//!
//! let config = ConductorConfig::default().with_geometry(1280, 720, 30);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.fps, 30);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use conductor::{Conductor, ConductorConfig};
//!
//! # async fn example() -> conductor::Result<()> {
//! let (mut session, mut events) = Conductor::new(ConductorConfig::default())?;
//! session.initialize().await?;
//! session.create_offer().await?;
//! // Forward SessionEvent::SignalingSuccess / IceCandidate to the peer.
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channels;
pub mod config;
pub mod convert;
pub mod error;
pub mod media;
pub mod relay;
pub mod session;

pub use channels::{ChannelMessage, MAX_MESSAGE_SIZE};
pub use config::{ConductorConfig, IceServerConfig};
pub use convert::{PixelFormatBridge, PixelLayout};
pub use error::{Error, Result};
pub use media::{CaptureDriver, CaptureFormat, FrameAdapter, ScreenCapturer, VideoFrame};
pub use relay::{run_stun_server, run_turn_server, StunServer, TurnServer};
pub use session::{Conductor, SessionEvent, SessionState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the crate version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert_eq!(version(), VERSION);
    }
}
