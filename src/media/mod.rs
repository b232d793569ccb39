//! Media pipeline: frames, admission control, capture sources, sinks

pub mod adapter;
pub mod frame;
pub mod sink;
pub mod source;

pub use adapter::{AdaptedFrame, CropRect, FrameAdapter};
pub use frame::VideoFrame;
pub use sink::{AudioSink, VideoSink};
pub use source::{
    CaptureDriver, DeviceSource, FrameStore, FrameTx, PushSource, RawFrame, ScreenCapturer,
    ScreenInfo, ScreenSource, VideoSource,
};

/// One (width, height, frame-rate) capture tuple.
///
/// Every source supports exactly one format; there is no negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Target frame-rate in frames per second
    pub fps: u32,
}
