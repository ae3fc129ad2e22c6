//! Synthetic scenes rendered by the mock cameras.
//!
//! Scenes that depend on focus read the simulated stage through a
//! [`PositionProbe`], so frames change as the controllers move Z.

use crate::mock_microcontroller::PositionProbe;
use scope_core::data::Frame;
use scope_core::types::Roi;
use std::f64::consts::PI;

/// What the camera asks a scene to draw.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub sensor_width: u32,
    pub sensor_height: u32,
    /// Sub-region of the sensor to return.
    pub roi: Roi,
    pub frame_number: u64,
    pub is_color: bool,
}

/// Produces frames for a mock camera.
pub trait SceneModel: Send + Sync {
    fn render(&self, request: &RenderRequest) -> Frame;
}

/// Evaluate `intensity(x, y)` (full-sensor coordinates, 0..=65535) over the ROI.
///
/// Mono frames are 16-bit; colour frames are RGB8 with a fixed tint so the
/// channels differ.
fn rasterize(request: &RenderRequest, intensity: impl Fn(f64, f64) -> f64) -> Frame {
    let Roi {
        x_offset,
        y_offset,
        width,
        height,
    } = request.roi;
    let n = width as usize * height as usize;

    if request.is_color {
        let mut data = Vec::with_capacity(n * 3);
        for y in 0..height {
            for x in 0..width {
                let v = intensity(f64::from(x + x_offset), f64::from(y + y_offset)) / 257.0;
                data.push((v * 0.8).clamp(0.0, 255.0) as u8);
                data.push(v.clamp(0.0, 255.0) as u8);
                data.push((v * 0.6).clamp(0.0, 255.0) as u8);
            }
        }
        Frame::from_rgb8(width, height, data)
    } else {
        let mut pixels = Vec::with_capacity(n);
        for y in 0..height {
            for x in 0..width {
                let v = intensity(f64::from(x + x_offset), f64::from(y + y_offset));
                pixels.push(v.clamp(0.0, 65535.0) as u16);
            }
        }
        Frame::from_u16(width, height, &pixels)
    }
}

/// Height of the stage in mm as seen by a scene.
fn stage_z_mm(probe: &PositionProbe, z_mm_per_count: f64) -> f64 {
    probe.raw().z as f64 * z_mm_per_count
}

// =============================================================================
// Test pattern
// =============================================================================

/// Static diagonal gradient with a checkerboard overlay.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestPattern;

impl SceneModel for TestPattern {
    fn render(&self, request: &RenderRequest) -> Frame {
        let w = f64::from(request.sensor_width.max(1));
        let h = f64::from(request.sensor_height.max(1));
        let cell = (request.sensor_width.min(request.sensor_height) / 16).max(1);
        rasterize(request, |x, y| {
            let gradient = (x / w + y / h) * 0.5 * 40000.0;
            let checker = ((x as u32 / cell) + (y as u32 / cell)) % 2;
            gradient + f64::from(checker) * 20000.0
        })
    }
}

// =============================================================================
// Focus target
// =============================================================================

/// Periodic grid whose contrast peaks when the stage is at `focus_z_mm`.
///
/// Contrast falls off as a Gaussian of the defocus, so every focus measure
/// is maximal at focus and decreases monotonically on both sides.
#[derive(Debug, Clone)]
pub struct FocusTarget {
    probe: PositionProbe,
    /// Physical Z per raw count, movement sign included.
    z_mm_per_count: f64,
    pub focus_z_mm: f64,
    pub depth_of_field_um: f64,
    pub period_px: f64,
    pub background: f64,
    pub amplitude: f64,
}

impl FocusTarget {
    pub fn new(probe: PositionProbe, z_mm_per_count: f64, focus_z_mm: f64) -> Self {
        Self {
            probe,
            z_mm_per_count,
            focus_z_mm,
            depth_of_field_um: 4.0,
            period_px: 8.0,
            background: 20000.0,
            amplitude: 15000.0,
        }
    }

    pub fn depth_of_field_um(mut self, dof: f64) -> Self {
        self.depth_of_field_um = dof.max(1e-3);
        self
    }

    /// Contrast factor in (0, 1] for the current stage height.
    pub fn contrast(&self) -> f64 {
        let defocus_um = (stage_z_mm(&self.probe, self.z_mm_per_count) - self.focus_z_mm) * 1000.0;
        (-(defocus_um / self.depth_of_field_um).powi(2)).exp()
    }
}

impl SceneModel for FocusTarget {
    fn render(&self, request: &RenderRequest) -> Frame {
        let contrast = self.contrast();
        let k = 2.0 * PI / self.period_px;
        rasterize(request, |x, y| {
            self.background + self.amplitude * contrast * (k * x).sin() * (k * y).sin()
        })
    }
}

// =============================================================================
// Laser spot
// =============================================================================

/// Secondary reflection for two-interface samples.
#[derive(Debug, Clone, Copy)]
pub struct SecondInterface {
    /// Column offset of the second spot relative to the first.
    pub offset_px: f64,
    /// Peak relative to the primary spot.
    pub relative_peak: f64,
}

/// Reflected laser spot whose column shifts linearly with stage Z.
#[derive(Debug, Clone)]
pub struct LaserSpot {
    probe: PositionProbe,
    z_mm_per_count: f64,
    /// Stage height at which the spot sits at `reference_x_px`.
    pub reference_z_mm: f64,
    pub reference_x_px: f64,
    pub y_px: f64,
    /// Spot shift in pixels per micrometre of Z.
    pub px_per_um: f64,
    pub sigma_px: f64,
    pub peak: f64,
    pub background: f64,
    pub second_interface: Option<SecondInterface>,
}

impl LaserSpot {
    pub fn new(probe: PositionProbe, z_mm_per_count: f64, reference_x_px: f64, y_px: f64) -> Self {
        Self {
            probe,
            z_mm_per_count,
            reference_z_mm: 0.0,
            reference_x_px,
            y_px,
            px_per_um: 2.5,
            sigma_px: 3.0,
            peak: 50000.0,
            background: 200.0,
            second_interface: None,
        }
    }

    pub fn px_per_um(mut self, px_per_um: f64) -> Self {
        self.px_per_um = px_per_um;
        self
    }

    pub fn second_interface(mut self, offset_px: f64, relative_peak: f64) -> Self {
        self.second_interface = Some(SecondInterface {
            offset_px,
            relative_peak,
        });
        self
    }

    /// Full-sensor column of the primary spot at the current stage height.
    pub fn spot_x(&self) -> f64 {
        let dz_um = (stage_z_mm(&self.probe, self.z_mm_per_count) - self.reference_z_mm) * 1000.0;
        self.reference_x_px + dz_um * self.px_per_um
    }
}

impl SceneModel for LaserSpot {
    fn render(&self, request: &RenderRequest) -> Frame {
        let x0 = self.spot_x();
        let two_sigma_sq = 2.0 * self.sigma_px * self.sigma_px;
        let spot = |x: f64, y: f64, cx: f64| {
            let d2 = (x - cx).powi(2) + (y - self.y_px).powi(2);
            (-d2 / two_sigma_sq).exp()
        };
        rasterize(request, |x, y| {
            let mut v = self.background + self.peak * spot(x, y, x0);
            if let Some(second) = self.second_interface {
                v += self.peak * second.relative_peak * spot(x, y, x0 + second.offset_px);
            }
            v
        })
    }
}
