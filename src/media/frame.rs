//! Planar YUV 4:2:0 frame buffer

/// A planar YUV420 (I420) video frame.
///
/// The three planes live in one contiguous allocation: Y first, then U,
/// then V. Chroma is subsampled 2:1 in both axes. A frame is owned
/// exclusively by whichever pipeline stage currently holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    stride_y: usize,
    stride_u: usize,
    stride_v: usize,
    data: Vec<u8>,
    /// Adjusted capture timestamp in microseconds, monotonically
    /// increasing across accepted frames.
    pub timestamp_us: i64,
}

impl VideoFrame {
    /// Allocate a zeroed frame for the given dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        let stride_y = width as usize;
        let stride_u = width.div_ceil(2) as usize;
        let stride_v = stride_u;
        let len = i420_data_size(height as usize, stride_y, stride_u, stride_v);
        Self {
            width,
            height,
            stride_y,
            stride_u,
            stride_v,
            data: vec![0u8; len],
            timestamp_us: 0,
        }
    }

    /// Frame width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row of the luma plane
    pub fn stride_y(&self) -> usize {
        self.stride_y
    }

    /// Bytes per row of the U chroma plane
    pub fn stride_u(&self) -> usize {
        self.stride_u
    }

    /// Bytes per row of the V chroma plane
    pub fn stride_v(&self) -> usize {
        self.stride_v
    }

    fn y_len(&self) -> usize {
        self.stride_y * self.height as usize
    }

    fn chroma_rows(&self) -> usize {
        self.height.div_ceil(2) as usize
    }

    /// Luma plane
    pub fn data_y(&self) -> &[u8] {
        &self.data[..self.y_len()]
    }

    /// U chroma plane
    pub fn data_u(&self) -> &[u8] {
        let start = self.y_len();
        &self.data[start..start + self.stride_u * self.chroma_rows()]
    }

    /// V chroma plane
    pub fn data_v(&self) -> &[u8] {
        let start = self.y_len() + self.stride_u * self.chroma_rows();
        &self.data[start..start + self.stride_v * self.chroma_rows()]
    }

    /// All three planes as one contiguous buffer (Y, U, V)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the three planes at once.
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let y_len = self.stride_y * self.height as usize;
        let u_len = self.stride_u * self.height.div_ceil(2) as usize;
        let (y, rest) = self.data.split_at_mut(y_len);
        let (u, v) = rest.split_at_mut(u_len);
        (y, u, v)
    }
}

/// Total byte size of an I420 buffer with the given strides.
pub fn i420_data_size(height: usize, stride_y: usize, stride_u: usize, stride_v: usize) -> usize {
    stride_y * height + (stride_u + stride_v) * height.div_ceil(2)
}
