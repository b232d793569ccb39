//! Error types for the conductor core

/// Result type alias using the conductor Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in session orchestration and media-pipeline
/// operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Session lifecycle error (wrong state, double initialize, ...)
    #[error("Session error: {0}")]
    SessionError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Pixel format conversion error
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// Capture source error
    #[error("Capture error: {0}")]
    CaptureError(String),

    /// STUN/TURN relay bootstrap error
    #[error("Relay error: {0}")]
    RelayError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtcError(err.to_string())
    }
}

impl Error {
    /// Check if this error is a configuration error (malformed address,
    /// URI, SDP). These are reported and recoverable, never fatal to a
    /// running session.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_) | Error::SdpError(_) | Error::IceCandidateError(_)
        )
    }

    /// Check if this error is a resource error (factory/connection/socket
    /// construction). These trigger full cleanup of partially-built state.
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_)
                | Error::RelayError(_)
                | Error::WebRtcError(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a transient media error (a single frame
    /// failed to convert). The frame is dropped and the pipeline continues.
    pub fn is_media_error(&self) -> bool {
        matches!(self, Error::EncodingError(_) | Error::MediaTrackError(_))
    }
}
