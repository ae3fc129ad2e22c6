//! Frame post-processing: centre crop, rotation, flips and channel reduction.

use scope_core::data::Frame;
use scope_core::types::{CameraProperties, Flip, Rotation};

/// Single-channel image as `f64` intensities, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(width * height, data.len());
        Self {
            width,
            height,
            data,
        }
    }

    pub fn from_frame(frame: &Frame) -> Self {
        Self::new(
            frame.width as usize,
            frame.height as usize,
            frame.luminance(),
        )
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }

    pub fn row_sums(&self) -> Vec<f64> {
        self.data
            .chunks_exact(self.width.max(1))
            .map(|row| row.iter().sum())
            .collect()
    }

    pub fn column_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.width];
        for row in self.data.chunks_exact(self.width.max(1)) {
            for (s, v) in sums.iter_mut().zip(row) {
                *s += v;
            }
        }
        sums
    }

    /// Rows `[y0, y1)` and columns `[x0, x1)`, clipped to the image.
    pub fn sub_image(&self, x0: usize, x1: usize, y0: usize, y1: usize) -> GrayImage {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        let x0 = x0.min(x1);
        let y0 = y0.min(y1);
        let mut data = Vec::with_capacity((x1 - x0) * (y1 - y0));
        for y in y0..y1 {
            data.extend_from_slice(&self.data[y * self.width + x0..y * self.width + x1]);
        }
        GrayImage::new(x1 - x0, y1 - y0, data)
    }
}

/// Centre crop to at most `width` x `height`.
pub fn crop_center(frame: &Frame, width: u32, height: u32) -> Frame {
    let width = width.min(frame.width);
    let height = height.min(frame.height);
    if width == frame.width && height == frame.height {
        return frame.clone();
    }
    let x0 = (frame.width - width) / 2;
    let y0 = (frame.height - height) / 2;
    let bpp = frame.bytes_per_pixel();
    let stride = frame.width as usize * bpp;
    let row_bytes = width as usize * bpp;
    let mut data = Vec::with_capacity(row_bytes * height as usize);
    for y in y0..y0 + height {
        let start = y as usize * stride + x0 as usize * bpp;
        data.extend_from_slice(&frame.data[start..start + row_bytes]);
    }
    Frame::from_bytes(width, height, frame.bit_depth, frame.channels, data)
}

/// Rebuild a frame by mapping each output pixel to a source pixel.
fn remap(frame: &Frame, width: u32, height: u32, source: impl Fn(u32, u32) -> (u32, u32)) -> Frame {
    let bpp = frame.bytes_per_pixel();
    let stride = frame.width as usize * bpp;
    let mut data = Vec::with_capacity(width as usize * height as usize * bpp);
    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = source(x, y);
            let start = sy as usize * stride + sx as usize * bpp;
            data.extend_from_slice(&frame.data[start..start + bpp]);
        }
    }
    Frame::from_bytes(width, height, frame.bit_depth, frame.channels, data)
}

/// Rotate clockwise.
pub fn rotate(frame: &Frame, rotation: Rotation) -> Frame {
    let (w, h) = (frame.width, frame.height);
    match rotation {
        Rotation::None => frame.clone(),
        Rotation::Cw90 => remap(frame, h, w, |x, y| (y, h - 1 - x)),
        Rotation::Cw180 => remap(frame, w, h, |x, y| (w - 1 - x, h - 1 - y)),
        Rotation::Cw270 => remap(frame, h, w, |x, y| (w - 1 - y, x)),
    }
}

pub fn flip(frame: &Frame, flip: Flip) -> Frame {
    let (w, h) = (frame.width, frame.height);
    match flip {
        Flip::Horizontal => remap(frame, w, h, |x, y| (w - 1 - x, y)),
        Flip::Vertical => remap(frame, w, h, |x, y| (x, h - 1 - y)),
        Flip::Both => remap(frame, w, h, |x, y| (w - 1 - x, h - 1 - y)),
    }
}

/// Apply the camera's configured rotation, then its flip.
pub fn rotate_and_flip(frame: &Frame, properties: &CameraProperties) -> Frame {
    let rotated = rotate(frame, properties.rotate_image_angle);
    match properties.flip_image {
        Some(f) => flip(&rotated, f),
        None => rotated,
    }
}

/// Luma reduction of a colour frame, keeping the sample width.
pub fn to_gray(frame: &Frame) -> Frame {
    if !frame.is_color() {
        return frame.clone();
    }
    let luma = frame.luminance();
    if frame.bytes_per_sample() == 1 {
        let data = luma.iter().map(|v| v.round().clamp(0.0, 255.0) as u8).collect();
        Frame::from_u8(frame.width, frame.height, data)
    } else {
        let pixels: Vec<u16> = luma
            .iter()
            .map(|v| v.round().clamp(0.0, 65535.0) as u16)
            .collect();
        let mut out = Frame::from_u16(frame.width, frame.height, &pixels);
        out.bit_depth = frame.bit_depth;
        out
    }
}

/// Extract one channel of a colour frame.
pub fn channel(frame: &Frame, index: u8) -> Frame {
    if !frame.is_color() || index >= frame.channels {
        return frame.clone();
    }
    let bps = frame.bytes_per_sample();
    let bpp = frame.bytes_per_pixel();
    let offset = index as usize * bps;
    let data = frame
        .data
        .chunks_exact(bpp)
        .flat_map(|px| px[offset..offset + bps].iter().copied())
        .collect();
    Frame::from_bytes(frame.width, frame.height, frame.bit_depth, 1, data)
}

/// The green channel of an RGB frame.
pub fn green_channel(frame: &Frame) -> Frame {
    channel(frame, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(width: u32, height: u32) -> Frame {
        let px: Vec<u16> = (0..(width * height) as u16).collect();
        Frame::from_u16(width, height, &px)
    }

    fn values(frame: &Frame) -> Vec<u32> {
        (0..frame.height)
            .flat_map(|y| (0..frame.width).map(move |x| (x, y)))
            .map(|(x, y)| frame.get(x, y).unwrap())
            .collect()
    }

    #[test]
    fn crop_takes_the_centre() {
        let frame = numbered(4, 4);
        let cropped = crop_center(&frame, 2, 2);
        assert_eq!(values(&cropped), vec![5, 6, 9, 10]);
        // oversized crops are clamped
        assert_eq!(crop_center(&frame, 10, 10), frame);
    }

    #[test]
    fn rotation_is_clockwise() {
        // 0 1 2
        // 3 4 5
        let frame = numbered(3, 2);
        let r90 = rotate(&frame, Rotation::Cw90);
        assert_eq!((r90.width, r90.height), (2, 3));
        assert_eq!(values(&r90), vec![3, 0, 4, 1, 5, 2]);
        assert_eq!(values(&rotate(&frame, Rotation::Cw180)), vec![5, 4, 3, 2, 1, 0]);
        assert_eq!(values(&rotate(&frame, Rotation::Cw270)), vec![2, 5, 1, 4, 0, 3]);
    }

    #[test]
    fn flips() {
        let frame = numbered(3, 2);
        assert_eq!(values(&flip(&frame, Flip::Horizontal)), vec![2, 1, 0, 5, 4, 3]);
        assert_eq!(values(&flip(&frame, Flip::Vertical)), vec![3, 4, 5, 0, 1, 2]);
    }

    #[test]
    fn colour_reductions() {
        let frame = Frame::from_rgb8(2, 1, vec![100, 200, 50, 0, 10, 0]);
        let green = green_channel(&frame);
        assert_eq!(green.channels, 1);
        assert_eq!(green.data, vec![200, 10]);

        let gray = to_gray(&frame);
        assert_eq!(gray.channels, 1);
        let expected = (0.299 * 100.0 + 0.587 * 200.0 + 0.114 * 50.0_f64).round() as u8;
        assert_eq!(gray.data[0], expected);
    }

    #[test]
    fn gray_image_sums_and_windows() {
        let img = GrayImage::new(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(img.row_sums(), vec![6.0, 15.0]);
        assert_eq!(img.column_sums(), vec![5.0, 7.0, 9.0]);
        let sub = img.sub_image(1, 5, 1, 2);
        assert_eq!(sub.data, vec![5.0, 6.0]);
    }
}
