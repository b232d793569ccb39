//! Configuration types for the conductor session

use serde::{Deserialize, Serialize};

/// Process-scoped configuration for a conductor session.
///
/// One instance is handed to [`crate::session::Conductor::new`]; capture
/// geometry and the audio flag may still be adjusted before
/// `initialize()` commits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Capture frame width in pixels
    pub width: u32,

    /// Capture frame height in pixels
    pub height: u32,

    /// Target capture frame-rate in frames per second
    pub fps: u32,

    /// Enable the audio track and the remote audio sink (default: false)
    pub audio_enabled: bool,

    /// Quality-scaler toggle consumed by the frame adapter. When
    /// disabled, oversize candidate frames are forwarded uncropped.
    pub quality_scaling_enabled: bool,

    /// Include loopback addresses as ICE host candidates. Off by
    /// default; useful for same-host sessions and tests.
    pub include_loopback_candidates: bool,
}

/// One relay/STUN server descriptor.
///
/// Immutable once appended; the full set is snapshotted into the
/// connection configuration at `initialize()` time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URI (`stun:`, `turn:` or `turns:` scheme)
    pub uri: String,

    /// Username for TURN authentication (empty for STUN)
    pub username: String,

    /// Password for TURN authentication (empty for STUN)
    pub password: String,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            fps: 5,
            audio_enabled: false,
            quality_scaling_enabled: true,
            include_loopback_candidates: false,
        }
    }
}

impl ConductorConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `width` or `height` is zero
    /// - `fps` is not in range 1-120
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "capture dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }

        if self.fps == 0 || self.fps > 120 {
            return Err(Error::InvalidConfig(format!(
                "fps must be in range 1-120, got {}",
                self.fps
            )));
        }

        Ok(())
    }

    /// Set the capture geometry, chainable
    pub fn with_geometry(mut self, width: u32, height: u32, fps: u32) -> Self {
        self.width = width;
        self.height = height;
        self.fps = fps;
        self
    }

    /// Enable or disable audio, chainable
    pub fn with_audio(mut self, enabled: bool) -> Self {
        self.audio_enabled = enabled;
        self
    }
}
