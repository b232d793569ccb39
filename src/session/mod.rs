//! Session orchestration

pub mod conductor;
pub mod events;

pub use conductor::{Conductor, SessionState, AUDIO_LABEL, STREAM_LABEL, VIDEO_LABEL};
pub use events::{SessionEvent, SessionEventSender};
