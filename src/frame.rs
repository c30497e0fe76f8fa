use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// 8-bit monochrome
    Mono8,
    /// 8-bit RGB, interleaved
    Rgb8,
    /// 8-bit BGR, interleaved
    Bgr8,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mono8 => 1,
            FrameFormat::Rgb8 | FrameFormat::Bgr8 => 3,
        }
    }
}

/// Rotation options for frame post-processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    /// Rotate 90 degrees clockwise
    Rotate90,
    /// Rotate 180 degrees
    Rotate180,
    /// Rotate 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl Rotation {
    /// Get rotation angle in degrees
    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }
}

/// A single frame retrieved from the device
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Frame sequence number assigned by the controller
    pub id: u64,
    /// Coordinate frame the image was taken in, stamped by the controller
    pub camera_frame: Arc<str>,
    /// Time the frame was retrieved
    pub timestamp: DateTime<Utc>,
    /// Raw pixel data (shared ownership for cheap fan-out)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel layout
    pub format: FrameFormat,
}

impl FrameData {
    /// Create a new frame data instance
    pub fn new(
        id: u64,
        timestamp: DateTime<Utc>,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            camera_frame: Arc::from(""),
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    pub fn expected_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Validate frame data size against the pixel layout
    pub fn validate_size(&self) -> bool {
        self.data.len() == self.expected_size()
    }

    /// Arithmetic mean of all pixel intensities.
    ///
    /// For colour frames every channel byte contributes equally, which is the
    /// same as averaging the per-pixel channel means. An empty frame has a
    /// brightness of zero.
    pub fn mean_brightness(&self) -> f64 {
        calc_mean_brightness(&self.data)
    }
}

/// Mean intensity over a raw 8-bit buffer
pub fn calc_mean_brightness(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let sum: u64 = data.iter().map(|&px| px as u64).sum();
    sum as f64 / data.len() as f64
}

/// Post-capture transform invoked by the camera controller after every
/// successful grab.
pub trait FramePostProcessor: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Transform the frame in place of the original
    fn process(&self, frame: FrameData) -> FrameData;
}

/// Rotates raw frames by a multiple of 90 degrees
#[derive(Debug, Clone, Copy)]
pub struct RotationProcessor {
    rotation: Rotation,
}

impl RotationProcessor {
    pub fn new(rotation: Rotation) -> Self {
        Self { rotation }
    }

    fn rotate(&self, frame: &FrameData) -> (Vec<u8>, u32, u32) {
        let w = frame.width as usize;
        let h = frame.height as usize;
        let bpp = frame.format.bytes_per_pixel();
        let src = frame.data.as_slice();
        let mut out = vec![0u8; src.len()];

        let (out_w, out_h) = match self.rotation {
            Rotation::Rotate180 => (w, h),
            Rotation::Rotate90 | Rotation::Rotate270 => (h, w),
        };

        for y in 0..h {
            for x in 0..w {
                let (nx, ny) = match self.rotation {
                    Rotation::Rotate90 => (h - 1 - y, x),
                    Rotation::Rotate180 => (w - 1 - x, h - 1 - y),
                    Rotation::Rotate270 => (y, w - 1 - x),
                };
                let src_idx = (y * w + x) * bpp;
                let dst_idx = (ny * out_w + nx) * bpp;
                out[dst_idx..dst_idx + bpp].copy_from_slice(&src[src_idx..src_idx + bpp]);
            }
        }

        (out, out_w as u32, out_h as u32)
    }
}

impl FramePostProcessor for RotationProcessor {
    fn name(&self) -> &str {
        "rotation"
    }

    fn process(&self, frame: FrameData) -> FrameData {
        // Truncated frames pass through untouched
        if !frame.validate_size() {
            return frame;
        }
        let (data, width, height) = self.rotate(&frame);
        FrameData {
            data: Arc::new(data),
            width,
            height,
            ..frame
        }
    }
}
