//! Laser spot localisation on focus-camera frames.

use crate::imaging::GrayImage;
use scope_core::limits::{
    TWO_INTERFACE_COLUMN_HALF_WIDTH, TWO_INTERFACE_ROW_HALF_WIDTH, TWO_INTERFACE_THRESHOLD,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpotError {
    #[error("no laser spot above threshold")]
    NoSpot,

    #[error("expected two interface reflections, found {found} peak(s)")]
    MissingInterface { found: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotDetection {
    /// Intensity fraction below which pixels are ignored (single interface).
    pub threshold: f64,
    pub two_interfaces: bool,
    /// With two interfaces, use the second (glass-water) reflection.
    pub use_glass_top: bool,
    pub min_peak_distance: usize,
}

impl Default for SpotDetection {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            two_interfaces: false,
            use_glass_top: true,
            min_peak_distance: 100,
        }
    }
}

/// Centroid in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLocation {
    pub x: f64,
    pub y: f64,
    /// Column distance from the brighter to the second peak (two interfaces).
    pub spacing_px: Option<f64>,
}

/// Locate the laser spot.
pub fn find_spot_location(image: &GrayImage, detection: &SpotDetection) -> Result<SpotLocation, SpotError> {
    if detection.two_interfaces {
        find_two_interface_spot(image, detection)
    } else {
        let (x, y) = thresholded_centroid(image, detection.threshold).ok_or(SpotError::NoSpot)?;
        Ok(SpotLocation {
            x,
            y,
            spacing_px: None,
        })
    }
}

/// Min-subtracted, thresholded, intensity-weighted centroid.
fn thresholded_centroid(image: &GrayImage, threshold: f64) -> Option<(f64, f64)> {
    let min = image.data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = image.data.iter().copied().fold(f64::NEG_INFINITY, f64::max) - min;
    if !(max > 0.0) {
        return None;
    }
    let cutoff = threshold * max;
    let (mut sum, mut sx, mut sy) = (0.0, 0.0, 0.0);
    for y in 0..image.height {
        for x in 0..image.width {
            let v = image.at(x, y) - min;
            if v < cutoff {
                continue;
            }
            sum += v;
            sx += v * x as f64;
            sy += v * y as f64;
        }
    }
    (sum > 0.0).then(|| (sx / sum, sy / sum))
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
        .0
}

fn find_two_interface_spot(
    image: &GrayImage,
    detection: &SpotDetection,
) -> Result<SpotLocation, SpotError> {
    let y0 = argmax(&image.row_sums());
    let row_start = y0.saturating_sub(TWO_INTERFACE_ROW_HALF_WIDTH);
    let band = image.sub_image(0, image.width, row_start, y0 + TWO_INTERFACE_ROW_HALF_WIDTH);

    let profile = band.column_sums();
    let mut peaks = find_peaks(&profile, detection.min_peak_distance);
    if peaks.len() < 2 {
        return Err(SpotError::MissingInterface { found: peaks.len() });
    }
    peaks.sort_by(|&a, &b| profile[b].total_cmp(&profile[a]));
    let (brightest, second) = (peaks[0], peaks[1]);
    let spacing = second as f64 - brightest as f64;
    let x1 = if detection.use_glass_top { second } else { brightest };

    let col_start = x1.saturating_sub(TWO_INTERFACE_COLUMN_HALF_WIDTH);
    let window = band.sub_image(col_start, x1 + TWO_INTERFACE_COLUMN_HALF_WIDTH, 0, band.height);
    let (x, y) =
        thresholded_centroid(&window, TWO_INTERFACE_THRESHOLD).ok_or(SpotError::NoSpot)?;
    Ok(SpotLocation {
        x: col_start as f64 + x,
        y: row_start as f64 + y,
        spacing_px: Some(spacing),
    })
}

/// Local maxima at least `min_distance` apart; taller peaks win conflicts.
///
/// Returned in ascending index order.
pub fn find_peaks(signal: &[f64], min_distance: usize) -> Vec<usize> {
    let n = signal.len();
    if n < 3 {
        return Vec::new();
    }
    let mut candidates = Vec::new();
    let mut i = 1;
    while i < n - 1 {
        if signal[i] > signal[i - 1] {
            // walk across a plateau and keep its middle
            let mut end = i;
            while end + 1 < n && signal[end + 1] == signal[i] {
                end += 1;
            }
            if end + 1 < n && signal[end + 1] < signal[i] {
                candidates.push((i + end) / 2);
            }
            i = end + 1;
        } else {
            i += 1;
        }
    }

    candidates.sort_by(|&a, &b| signal[b].total_cmp(&signal[a]));
    let mut kept: Vec<usize> = Vec::new();
    for c in candidates {
        if kept.iter().all(|&k| k.abs_diff(c) >= min_distance) {
            kept.push(c);
        }
    }
    kept.sort_unstable();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_image(width: usize, height: usize, spots: &[(f64, f64, f64)]) -> GrayImage {
        let mut data = vec![100.0; width * height];
        for y in 0..height {
            for x in 0..width {
                for &(cx, cy, peak) in spots {
                    let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                    data[y * width + x] += peak * (-d2 / 18.0).exp();
                }
            }
        }
        GrayImage::new(width, height, data)
    }

    #[test]
    fn single_spot_centroid() {
        let img = gaussian_image(64, 32, &[(20.3, 11.0, 5000.0)]);
        let spot = find_spot_location(&img, &SpotDetection::default()).unwrap();
        assert!((spot.x - 20.3).abs() < 0.1, "x = {}", spot.x);
        assert!((spot.y - 11.0).abs() < 0.1);
        assert_eq!(spot.spacing_px, None);
    }

    #[test]
    fn flat_image_has_no_spot() {
        let img = GrayImage::new(8, 8, vec![7.0; 64]);
        assert_eq!(find_spot_location(&img, &SpotDetection::default()), Err(SpotError::NoSpot));
    }

    #[test]
    fn peaks_respect_distance() {
        let signal = [0.0, 5.0, 0.0, 3.0, 0.0, 0.0, 4.0, 0.0];
        assert_eq!(find_peaks(&signal, 1), vec![1, 3, 6]);
        assert_eq!(find_peaks(&signal, 3), vec![1, 6]);
        assert_eq!(find_peaks(&[1.0, 2.0, 2.0, 2.0, 1.0], 1), vec![2]);
    }

    #[test]
    fn two_interfaces_select_the_requested_reflection() {
        let img = gaussian_image(400, 64, &[(100.0, 30.0, 8000.0), (260.0, 30.0, 3000.0)]);
        let mut detection = SpotDetection {
            two_interfaces: true,
            ..SpotDetection::default()
        };

        let glass_top = find_spot_location(&img, &detection).unwrap();
        assert!((glass_top.x - 260.0).abs() < 0.5, "x = {}", glass_top.x);
        assert_eq!(glass_top.spacing_px, Some(160.0));

        detection.use_glass_top = false;
        let brightest = find_spot_location(&img, &detection).unwrap();
        assert!((brightest.x - 100.0).abs() < 0.5);
        assert!((brightest.y - 30.0).abs() < 0.5);
    }

    #[test]
    fn single_reflection_is_an_error_in_two_interface_mode() {
        let img = gaussian_image(300, 32, &[(150.0, 16.0, 8000.0)]);
        let detection = SpotDetection {
            two_interfaces: true,
            ..SpotDetection::default()
        };
        assert_eq!(
            find_spot_location(&img, &detection),
            Err(SpotError::MissingInterface { found: 1 })
        );
    }
}
