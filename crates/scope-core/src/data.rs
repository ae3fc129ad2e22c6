//! Image frame container.

use std::fmt;

/// A single camera frame.
///
/// Pixels are stored row-major with channels interleaved. Samples wider than
/// 8 bits are stored as little-endian `u16`.
#[derive(Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Bits per sample (e.g., 8, 12, 16)
    pub bit_depth: u32,

    /// Samples per pixel: 1 for mono, 3 for RGB
    pub channels: u8,

    /// Raw pixel data
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a mono frame from 16-bit pixel data.
    pub fn from_u16(width: u32, height: u32, pixels: &[u16]) -> Self {
        let mut data = Vec::with_capacity(pixels.len() * 2);
        for pixel in pixels {
            data.extend_from_slice(&pixel.to_le_bytes());
        }

        Self {
            width,
            height,
            bit_depth: 16,
            channels: 1,
            data,
        }
    }

    /// Create a mono frame from 8-bit pixel data.
    pub fn from_u8(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bit_depth: 8,
            channels: 1,
            data,
        }
    }

    /// Create an RGB frame from interleaved 8-bit samples.
    pub fn from_rgb8(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bit_depth: 8,
            channels: 3,
            data,
        }
    }

    /// Create a frame from raw bytes with explicit layout.
    ///
    /// The caller must ensure the buffer length matches the layout.
    pub fn from_bytes(width: u32, height: u32, bit_depth: u32, channels: u8, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bit_depth,
            channels,
            data,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        if self.bit_depth <= 8 {
            1
        } else {
            2
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_color(&self) -> bool {
        self.channels >= 3
    }

    /// True when the buffer length agrees with the declared layout.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.pixel_count() * self.bytes_per_pixel()
    }

    /// Sample value of channel `c` at (x, y).
    pub fn sample(&self, x: u32, y: u32, c: u8) -> Option<u32> {
        if x >= self.width || y >= self.height || c >= self.channels {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * self.bytes_per_pixel()
            + usize::from(c) * self.bytes_per_sample();
        match self.bytes_per_sample() {
            1 => self.data.get(idx).map(|&v| u32::from(v)),
            _ => {
                let lo = *self.data.get(idx)?;
                let hi = *self.data.get(idx + 1)?;
                Some(u32::from(u16::from_le_bytes([lo, hi])))
            }
        }
    }

    /// Pixel value at (x, y); the first channel for colour frames.
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        self.sample(x, y, 0)
    }

    /// Per-pixel intensity as `f64`, row-major.
    ///
    /// Colour frames are reduced with ITU-R BT.601 luma weights.
    pub fn luminance(&self) -> Vec<f64> {
        let bps = self.bytes_per_sample();
        let bpp = self.bytes_per_pixel();
        let read = |offset: usize| -> f64 {
            if bps == 1 {
                f64::from(self.data[offset])
            } else {
                f64::from(u16::from_le_bytes([self.data[offset], self.data[offset + 1]]))
            }
        };

        let n = self.pixel_count().min(self.data.len() / bpp.max(1));
        let mut out = Vec::with_capacity(n);
        for p in 0..n {
            let base = p * bpp;
            if self.is_color() {
                let r = read(base);
                let g = read(base + bps);
                let b = read(base + 2 * bps);
                out.push(0.299 * r + 0.587 * g + 0.114 * b);
            } else {
                out.push(read(base));
            }
        }
        out
    }

    /// Mean intensity over all pixels.
    pub fn mean(&self) -> f64 {
        let lum = self.luminance();
        if lum.is_empty() {
            return 0.0;
        }
        lum.iter().sum::<f64>() / lum.len() as f64
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bit_depth", &self.bit_depth)
            .field("channels", &self.channels)
            .field("bytes", &self.data.len())
            .finish()
    }
}
