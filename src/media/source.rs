//! Capture source variants
//!
//! Three source flavours feed the transmit pipeline: a device-backed
//! source driving an OS capture device, a push-driven source fed packed
//! pixels by the embedding application, and a screen-backed source
//! pumped from an asynchronous screen capturer. All of them run their
//! frames through the [`FrameAdapter`] before anything reaches the
//! transmit path.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::convert::{PixelFormatBridge, PixelLayout};
use crate::{Error, Result};

use super::adapter::FrameAdapter;
use super::{CaptureFormat, VideoFrame};

/// Sending half of the transmit path accepted frames are handed into.
pub type FrameTx = mpsc::UnboundedSender<VideoFrame>;

/// Common lifecycle of all capture source variants.
pub trait VideoSource: Send {
    /// Begin producing frames in the given format. Fails if already
    /// running.
    fn start(&mut self, format: CaptureFormat) -> Result<()>;

    /// Stop producing frames. Safe to call when not running.
    fn stop(&mut self);

    /// Whether the source is currently producing frames.
    fn is_running(&self) -> bool;

    /// The single supported capture format.
    fn preferred_format(&self) -> CaptureFormat;
}

/// OS capture-device collaborator. The conductor only orchestrates;
/// device enumeration and opening live behind this boundary.
#[async_trait]
pub trait CaptureDriver: Send + Sync {
    /// Names of the available capture devices.
    fn enumerate(&self) -> Vec<String>;

    /// Open the named device.
    async fn open(&self, name: &str) -> Result<()>;
}

/// One enumerable screen source.
#[derive(Debug, Clone)]
pub struct ScreenInfo {
    /// Capturer-assigned identifier
    pub id: u64,
    /// Human-readable title
    pub title: String,
}

/// Most recent raw captured screen frame, packed BGRX.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Packed pixel data, 4 bytes per pixel
    pub data: Vec<u8>,
}

/// Slot the screen capturer's completion callback stores frames into.
pub type FrameStore = Arc<Mutex<Option<RawFrame>>>;

/// Screen-capture collaborator (external boundary). Capture itself is
/// asynchronous: completed frames land in the [`FrameStore`] and are
/// retrieved by a distinct pump call.
pub trait ScreenCapturer: Send {
    /// Enumerate the available screen sources.
    fn sources(&mut self) -> Vec<ScreenInfo>;

    /// Select the screen to capture.
    fn select(&mut self, id: u64) -> Result<()>;

    /// Begin asynchronous capture, storing completed frames in `store`.
    fn start(&mut self, store: FrameStore) -> Result<()>;

    /// Stop capturing.
    fn stop(&mut self);
}

/// Device-backed capture source.
///
/// Opens a named device exactly once; re-opening an already-open device
/// is a trivial success that retains the existing instance.
pub struct DeviceSource {
    driver: Arc<dyn CaptureDriver>,
    device: Option<String>,
    format: CaptureFormat,
    running: bool,
}

impl DeviceSource {
    /// Create a source for the given driver and format.
    pub fn new(driver: Arc<dyn CaptureDriver>, format: CaptureFormat) -> Self {
        Self {
            driver,
            device: None,
            format,
            running: false,
        }
    }

    /// Open the named device through the driver. A second open against
    /// an already-open device reports success without touching the
    /// driver again.
    pub async fn open(&mut self, name: &str) -> Result<()> {
        if let Some(open) = &self.device {
            debug!(device = %open, "capture device already open");
            return Ok(());
        }
        self.driver.open(name).await?;
        info!(device = name, "capture device opened");
        self.device = Some(name.to_string());
        Ok(())
    }

    /// Name of the open device, if any.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }
}

impl VideoSource for DeviceSource {
    fn start(&mut self, format: CaptureFormat) -> Result<()> {
        if self.running {
            return Err(Error::CaptureError("source already running".to_string()));
        }
        if self.device.is_none() {
            return Err(Error::CaptureError("no capture device open".to_string()));
        }
        self.format = format;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn preferred_format(&self) -> CaptureFormat {
        self.format
    }
}

/// Push-driven capture source.
///
/// Owns one mutable YUV420 buffer at the session's target dimensions.
/// External callers push packed pixel data which is converted in place;
/// each successful conversion that passes admission control is stamped
/// and handed to the transmit path.
pub struct PushSource {
    frame: VideoFrame,
    bridge: PixelFormatBridge,
    adapter: FrameAdapter,
    tx: FrameTx,
    format: CaptureFormat,
    quality_scaling: bool,
    running: bool,
    clock: Instant,
}

impl PushSource {
    /// Create a stopped source sized to `format`.
    pub fn new(format: CaptureFormat, quality_scaling: bool, tx: FrameTx) -> Self {
        Self {
            frame: VideoFrame::new(format.width, format.height),
            bridge: PixelFormatBridge::new(),
            adapter: FrameAdapter::new(format, quality_scaling),
            tx,
            format,
            quality_scaling,
            running: false,
            clock: Instant::now(),
        }
    }

    /// Convert a packed buffer into the owned frame and, if admitted,
    /// forward it. Returns whether the frame was accepted.
    pub fn push_packed(&mut self, packed: &[u8], layout: PixelLayout) -> Result<bool> {
        if !self.running {
            return Err(Error::CaptureError("source not running".to_string()));
        }

        self.bridge.encode_packed(packed, layout, &mut self.frame)?;

        let now_us = self.clock.elapsed().as_micros() as i64;
        let Some(decision) = self
            .adapter
            .adapt(self.format.width, self.format.height, now_us, now_us)
        else {
            return Ok(false);
        };

        self.frame.timestamp_us = decision.timestamp_us;
        // Hand an owned copy to the transmit path; the internal buffer
        // is reused for the next push.
        let _ = self.tx.send(self.frame.clone());
        Ok(true)
    }

    /// The most recently converted frame.
    pub fn frame(&self) -> &VideoFrame {
        &self.frame
    }
}

impl VideoSource for PushSource {
    fn start(&mut self, format: CaptureFormat) -> Result<()> {
        if self.running {
            return Err(Error::CaptureError("source already running".to_string()));
        }
        // Dimensions changed: buffer, bridge, and adapter are rebuilt in
        // lockstep.
        if format != self.format {
            self.frame = VideoFrame::new(format.width, format.height);
            self.bridge = PixelFormatBridge::new();
            self.format = format;
        }
        self.adapter = FrameAdapter::new(format, self.quality_scaling);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn preferred_format(&self) -> CaptureFormat {
        self.format
    }
}

/// Screen-backed capture source.
///
/// On start, enumerates screens, selects the first, and begins
/// asynchronous capture. The capturer's completion callback stores the
/// latest raw frame; [`ScreenSource::capture_frame`] is the externally
/// driven pump that retrieves it.
pub struct ScreenSource {
    capturer: Box<dyn ScreenCapturer>,
    store: FrameStore,
    format: CaptureFormat,
    running: bool,
}

impl ScreenSource {
    /// Create a stopped source around a capturer collaborator.
    pub fn new(capturer: Box<dyn ScreenCapturer>, format: CaptureFormat) -> Self {
        Self {
            capturer,
            store: Arc::new(Mutex::new(None)),
            format,
            running: false,
        }
    }

    /// Retrieve the most recent buffered raw frame, if one arrived since
    /// the last pump.
    pub fn capture_frame(&mut self) -> Option<RawFrame> {
        self.store.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl VideoSource for ScreenSource {
    fn start(&mut self, format: CaptureFormat) -> Result<()> {
        if self.running {
            return Err(Error::CaptureError("source already running".to_string()));
        }

        let screens = self.capturer.sources();
        for screen in &screens {
            info!(id = screen.id, title = %screen.title, "screen source");
        }
        let first = screens
            .first()
            .ok_or_else(|| Error::CaptureError("no screen sources available".to_string()))?;
        self.capturer.select(first.id)?;
        self.capturer.start(Arc::clone(&self.store))?;

        self.format = format;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.capturer.stop();
        }
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn preferred_format(&self) -> CaptureFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeDriver {
        opens: AtomicUsize,
    }

    #[async_trait]
    impl CaptureDriver for FakeDriver {
        fn enumerate(&self) -> Vec<String> {
            vec!["cam0".to_string(), "cam1".to_string()]
        }

        async fn open(&self, _name: &str) -> Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeScreen {
        started: bool,
    }

    impl ScreenCapturer for FakeScreen {
        fn sources(&mut self) -> Vec<ScreenInfo> {
            vec![ScreenInfo {
                id: 7,
                title: "primary".to_string(),
            }]
        }

        fn select(&mut self, id: u64) -> Result<()> {
            assert_eq!(id, 7);
            Ok(())
        }

        fn start(&mut self, store: FrameStore) -> Result<()> {
            self.started = true;
            // Simulate one completed capture.
            *store.lock().unwrap() = Some(RawFrame {
                width: 640,
                height: 360,
                data: vec![0u8; 640 * 360 * 4],
            });
            Ok(())
        }

        fn stop(&mut self) {
            self.started = false;
        }
    }

    fn format() -> CaptureFormat {
        CaptureFormat {
            width: 640,
            height: 360,
            fps: 5,
        }
    }

    #[tokio::test]
    async fn test_device_source_opens_once() {
        let driver = Arc::new(FakeDriver {
            opens: AtomicUsize::new(0),
        });
        let mut src = DeviceSource::new(Arc::clone(&driver) as Arc<dyn CaptureDriver>, format());

        src.open("cam0").await.unwrap();
        src.open("cam0").await.unwrap();
        src.open("cam1").await.unwrap(); // existing instance retained

        assert_eq!(driver.opens.load(Ordering::SeqCst), 1);
        assert_eq!(src.device(), Some("cam0"));
    }

    #[tokio::test]
    async fn test_device_source_start_requires_open() {
        let driver = Arc::new(FakeDriver {
            opens: AtomicUsize::new(0),
        });
        let mut src = DeviceSource::new(driver, format());
        assert!(src.start(format()).is_err());

        src.open("cam0").await.unwrap();
        assert!(src.start(format()).is_ok());
        assert!(src.is_running());
        // Start while running fails.
        assert!(src.start(format()).is_err());
        src.stop();
        assert!(!src.is_running());
    }

    #[test]
    fn test_push_source_forwards_accepted_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut src = PushSource::new(format(), true, tx);
        src.start(format()).unwrap();

        let packed = vec![128u8; 640 * 360 * 3];
        let accepted = src.push_packed(&packed, PixelLayout::Bgr24).unwrap();
        assert!(accepted);

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 360);
    }

    #[test]
    fn test_push_source_rejects_when_stopped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut src = PushSource::new(format(), true, tx);
        let packed = vec![0u8; 640 * 360 * 3];
        assert!(src.push_packed(&packed, PixelLayout::Bgr24).is_err());
    }

    #[test]
    fn test_push_source_rate_limits() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut src = PushSource::new(format(), true, tx);
        src.start(format()).unwrap();

        let packed = vec![64u8; 640 * 360 * 3];
        // Back-to-back pushes: the second arrives well inside the 200 ms
        // window for 5 fps and must be dropped.
        assert!(src.push_packed(&packed, PixelLayout::Bgr24).unwrap());
        assert!(!src.push_packed(&packed, PixelLayout::Bgr24).unwrap());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_screen_source_pump() {
        let mut src = ScreenSource::new(Box::new(FakeScreen { started: false }), format());
        assert!(src.capture_frame().is_none());

        src.start(format()).unwrap();
        let raw = src.capture_frame().expect("buffered frame");
        assert_eq!(raw.width, 640);
        // The pump drains the slot; a second pump has nothing.
        assert!(src.capture_frame().is_none());

        assert!(src.start(format()).is_err());
        src.stop();
        assert!(!src.is_running());
    }
}
