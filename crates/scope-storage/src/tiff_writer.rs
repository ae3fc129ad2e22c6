//! TIFF export for camera frames.
//!
//! Frames are written uncompressed with their native sample width:
//! 8-bit and 16-bit grayscale, and 8-bit RGB for colour sensors.

use anyhow::{anyhow, Context, Result};
use image::codecs::tiff::TiffEncoder;
use image::ExtendedColorType;
use scope_core::data::Frame;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub struct TiffWriter;

impl TiffWriter {
    /// Write a single frame to `path` (created or overwritten).
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the frame layout is not one of mono 8/16-bit or RGB 8-bit
    /// - the buffer length does not match the layout
    /// - the file cannot be created or encoding fails
    pub fn write_frame<P: AsRef<Path>>(frame: &Frame, path: P) -> Result<()> {
        let path = path.as_ref();

        if !frame.is_consistent() {
            return Err(anyhow!(
                "Frame data size mismatch: expected {} bytes for {}x{}x{} {}bit, got {} bytes",
                frame.pixel_count() * frame.bytes_per_pixel(),
                frame.width,
                frame.height,
                frame.channels,
                frame.bit_depth,
                frame.data.len()
            ));
        }

        let (color, bytes): (ExtendedColorType, std::borrow::Cow<'_, [u8]>) =
            match (frame.channels, frame.bytes_per_sample()) {
                (1, 1) => (ExtendedColorType::L8, frame.data.as_slice().into()),
                (1, 2) => {
                    // Encoder expects native-endian samples.
                    let native: Vec<u8> = frame
                        .data
                        .chunks_exact(2)
                        .flat_map(|c| u16::from_le_bytes([c[0], c[1]]).to_ne_bytes())
                        .collect();
                    (ExtendedColorType::L16, native.into())
                }
                (3, 1) => (ExtendedColorType::Rgb8, frame.data.as_slice().into()),
                (channels, bps) => {
                    return Err(anyhow!(
                        "Unsupported frame layout: {} channels, {} bytes per sample",
                        channels,
                        bps
                    ))
                }
            };

        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        TiffEncoder::new(BufWriter::new(file))
            .encode(&bytes, frame.width, frame.height, color)
            .with_context(|| format!("Failed to encode TIFF to {:?}", path))?;

        tracing::debug!(
            path = ?path,
            dimensions = format!("{}x{}", frame.width, frame.height),
            bit_depth = frame.bit_depth,
            channels = frame.channels,
            "Wrote TIFF"
        );
        Ok(())
    }
}
