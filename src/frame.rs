//! Raster frame container.
//!
//! Frame sources hand decoded rasters to the capture pipeline as `Frame`
//! instances: interleaved RGB8 pixels plus the instant the raster was decoded.
//! Frames are plain owned values; anyone holding one holds a snapshot copy,
//! never an alias into decoder-owned memory.

use std::time::{Duration, Instant};

/// One decoded raster frame in interleaved RGB8 order.
#[derive(Clone)]
pub struct Frame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    captured_at: Instant,
}

impl Frame {
    /// Wrap an RGB8 raster. Called only by frame sources, which size the
    /// buffer themselves.
    pub(crate) fn from_rgb8(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 3);
        Self {
            pixels,
            width,
            height,
            captured_at: Instant::now(),
        }
    }

    /// Wrap a BGR8 raster, converting to RGB8 in place.
    ///
    /// Stream decoders emit interleaved BGR (display/storage order); the
    /// encoding pipeline expects RGB, so the swap happens once, here.
    pub(crate) fn from_bgr8(mut pixels: Vec<u8>, width: u32, height: u32) -> Self {
        for px in pixels.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Self::from_rgb8(pixels, width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Interleaved RGB8 pixel data, row-major, no padding.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Time since this frame was decoded.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}
