//! Render sinks for local and remote video, plus the audio stub.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::convert::{PixelFormatBridge, PixelLayout};
use crate::session::events::{SessionEvent, SessionEventSender};
use crate::Result;

use super::VideoFrame;

/// Receives decoded frames for one rendered stream and emits them to
/// the session event queue as packed pixel buffers.
///
/// Each sink owns its own [`PixelFormatBridge`], so the packed scratch
/// buffer is reused across frames and resized only when the incoming
/// dimensions change.
pub struct VideoSink {
    bridge: PixelFormatBridge,
    layout: PixelLayout,
    events: SessionEventSender,
    remote: bool,
    track_id: Option<String>,
}

impl VideoSink {
    /// Sink for the local preview stream.
    pub fn local(events: SessionEventSender) -> Self {
        Self {
            bridge: PixelFormatBridge::new(),
            layout: PixelLayout::Bgra32,
            events,
            remote: false,
            track_id: None,
        }
    }

    /// Sink bound to a remote track.
    pub fn remote(events: SessionEventSender, track_id: String) -> Self {
        Self {
            bridge: PixelFormatBridge::new(),
            layout: PixelLayout::Bgra32,
            events,
            remote: true,
            track_id: Some(track_id),
        }
    }

    /// Identifier of the bound remote track, if this is a remote sink.
    pub fn track_id(&self) -> Option<&str> {
        self.track_id.as_deref()
    }

    /// Convert one decoded frame to packed pixels and emit it. A frame
    /// that cannot be converted is logged and dropped; the sink stays
    /// usable.
    pub fn on_frame(&mut self, frame: &VideoFrame) {
        match self.convert(frame) {
            Ok(pixels) => {
                let event = if self.remote {
                    SessionEvent::RemoteFrame {
                        pixels,
                        width: frame.width(),
                        height: frame.height(),
                    }
                } else {
                    SessionEvent::LocalFrame {
                        pixels,
                        width: frame.width(),
                        height: frame.height(),
                    }
                };
                let _ = self.events.send(event);
            }
            Err(err) => {
                warn!(remote = self.remote, %err, "dropping unconvertible frame");
            }
        }
    }

    fn convert(&mut self, frame: &VideoFrame) -> Result<Bytes> {
        let pixels = self.bridge.decode_planar(frame, self.layout)?;
        Ok(Bytes::copy_from_slice(pixels))
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        if let Some(id) = &self.track_id {
            debug!(track_id = %id, "video sink unbound");
        }
    }
}

/// Remote audio terminator. Decoded audio is accepted and discarded;
/// playback is left to the embedder.
#[derive(Default)]
pub struct AudioSink {
    frames: u64,
}

impl AudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one decoded audio frame.
    pub fn on_data(&mut self, samples: usize, sample_rate: u32, channels: u8) {
        self.frames += 1;
        if self.frames == 1 {
            debug!(samples, sample_rate, channels, "first remote audio frame");
        }
    }

    /// Number of frames received so far.
    pub fn frames_received(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_local_sink_emits_local_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = VideoSink::local(tx);

        let frame = VideoFrame::new(16, 16);
        sink.on_frame(&frame);

        match rx.try_recv().unwrap() {
            SessionEvent::LocalFrame {
                pixels,
                width,
                height,
            } => {
                assert_eq!(width, 16);
                assert_eq!(height, 16);
                assert_eq!(pixels.len(), 16 * 16 * 4);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_remote_sink_emits_remote_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = VideoSink::remote(tx, "video0".to_string());
        assert_eq!(sink.track_id(), Some("video0"));

        sink.on_frame(&VideoFrame::new(8, 8));
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::RemoteFrame { .. }
        ));
    }

    #[test]
    fn test_empty_frame_dropped_sink_survives() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = VideoSink::local(tx);

        sink.on_frame(&VideoFrame::new(0, 0));
        assert!(rx.try_recv().is_err());

        // Still usable after a dropped frame.
        sink.on_frame(&VideoFrame::new(4, 4));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_audio_sink_counts_frames() {
        let mut sink = AudioSink::new();
        sink.on_data(480, 48_000, 2);
        sink.on_data(480, 48_000, 2);
        assert_eq!(sink.frames_received(), 2);
    }
}
