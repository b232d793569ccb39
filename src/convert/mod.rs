//! Pixel format bridge: packed color <-> planar YUV 4:2:0
//!
//! Converts between the packed color frames exchanged with the embedding
//! application and the planar I420 representation used on the wire. Both
//! directions are pure format conversions (BT.601, studio range): input
//! and output pixel counts always match, mismatches are caller errors.

use crate::media::VideoFrame;
use crate::{Error, Result};

/// Packed pixel layouts understood by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 3 bytes per pixel, R G B order
    Rgb24,
    /// 3 bytes per pixel, B G R order
    Bgr24,
    /// 4 bytes per pixel, R G B X order
    Rgba32,
    /// 4 bytes per pixel, B G R X order
    Bgra32,
}

impl PixelLayout {
    /// Bytes per packed pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::Rgb24 | PixelLayout::Bgr24 => 3,
            PixelLayout::Rgba32 | PixelLayout::Bgra32 => 4,
        }
    }

    /// Byte offsets of the (R, G, B) channels within one packed pixel
    fn rgb_offsets(&self) -> (usize, usize, usize) {
        match self {
            PixelLayout::Rgb24 | PixelLayout::Rgba32 => (0, 1, 2),
            PixelLayout::Bgr24 | PixelLayout::Bgra32 => (2, 1, 0),
        }
    }
}

/// Converts between packed color buffers and planar YUV420 frames.
///
/// The packed output buffer for the decode direction is allocated on
/// first use and reused across calls; it is reallocated only when the
/// frame dimensions or the requested layout change.
#[derive(Debug, Default)]
pub struct PixelFormatBridge {
    packed: Vec<u8>,
    packed_dims: Option<(u32, u32, PixelLayout)>,
}

impl PixelFormatBridge {
    /// Create a bridge with no buffers allocated yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a packed color buffer into an existing planar YUV420 frame.
    ///
    /// The packed buffer must hold exactly `width * height` pixels in the
    /// given layout for the destination frame's dimensions. On failure the
    /// destination plane contents are undefined.
    pub fn encode_packed(
        &mut self,
        packed: &[u8],
        layout: PixelLayout,
        frame: &mut VideoFrame,
    ) -> Result<()> {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        if width == 0 || height == 0 {
            return Err(Error::EncodingError("destination frame is empty".to_string()));
        }

        let bpp = layout.bytes_per_pixel();
        let expected = width * height * bpp;
        if packed.len() != expected {
            return Err(Error::EncodingError(format!(
                "packed buffer holds {} bytes, need exactly {}",
                packed.len(),
                expected
            )));
        }

        let (ro, go, bo) = layout.rgb_offsets();
        let stride_y = frame.stride_y();
        let stride_u = frame.stride_u();
        let (y_plane, u_plane, v_plane) = frame.planes_mut();

        for row in 0..height {
            for col in 0..width {
                let px = (row * width + col) * bpp;
                let r = packed[px + ro] as i32;
                let g = packed[px + go] as i32;
                let b = packed[px + bo] as i32;

                let y = (66 * r + 129 * g + 25 * b + 128) / 256 + 16;
                y_plane[row * stride_y + col] = clamp_u8(y);

                // One chroma sample per 2x2 block, taken at the block's
                // top-left pixel (matching 4:2:0 co-sited sampling).
                if row % 2 == 0 && col % 2 == 0 {
                    let u = (-38 * r - 74 * g + 112 * b + 128) / 256 + 128;
                    let v = (112 * r - 94 * g - 18 * b + 128) / 256 + 128;
                    let ci = (row / 2) * stride_u + col / 2;
                    u_plane[ci] = clamp_u8(u);
                    v_plane[ci] = clamp_u8(v);
                }
            }
        }

        Ok(())
    }

    /// Decode a planar YUV420 frame into a packed color buffer.
    ///
    /// Returns a slice into the bridge's reusable output buffer. The
    /// buffer is invalidated by the next call.
    pub fn decode_planar(&mut self, frame: &VideoFrame, layout: PixelLayout) -> Result<&[u8]> {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        if width == 0 || height == 0 {
            return Err(Error::EncodingError("source frame is empty".to_string()));
        }

        let bpp = layout.bytes_per_pixel();
        let needed = width * height * bpp;
        if self.packed_dims != Some((frame.width(), frame.height(), layout)) {
            self.packed = vec![0u8; needed];
            self.packed_dims = Some((frame.width(), frame.height(), layout));
        }

        let (ro, go, bo) = layout.rgb_offsets();
        let y_plane = frame.data_y();
        let u_plane = frame.data_u();
        let v_plane = frame.data_v();
        let stride_y = frame.stride_y();
        let stride_u = frame.stride_u();

        for row in 0..height {
            for col in 0..width {
                let ci = (row / 2) * stride_u + col / 2;
                let c = y_plane[row * stride_y + col] as i32 - 16;
                let d = u_plane[ci] as i32 - 128;
                let e = v_plane[ci] as i32 - 128;

                let r = (298 * c + 409 * e + 128) >> 8;
                let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
                let b = (298 * c + 516 * d + 128) >> 8;

                let px = (row * width + col) * bpp;
                self.packed[px + ro] = clamp_u8(r);
                self.packed[px + go] = clamp_u8(g);
                self.packed[px + bo] = clamp_u8(b);
                if bpp == 4 {
                    self.packed[px + 3] = 0xff;
                }
            }
        }

        Ok(&self.packed)
    }
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}
