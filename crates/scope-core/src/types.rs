//! Shared value types: axes, positions, trigger modes and channel settings.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Axes and raw device coordinates
// =============================================================================

/// Motorized stage axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
    Theta,
}

impl Axis {
    /// Linear axes in device order.
    pub const LINEAR: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
            Axis::Theta => "theta",
        };
        write!(f, "{}", label)
    }
}

/// Homing targets understood by the motion device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomeTarget {
    X,
    Y,
    Z,
    Xy,
}

/// Which end of travel a soft limit bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitSide {
    Positive,
    Negative,
}

impl LimitSide {
    pub fn opposite(self) -> Self {
        match self {
            LimitSide::Positive => LimitSide::Negative,
            LimitSide::Negative => LimitSide::Positive,
        }
    }
}

/// Device-level soft limit register, expressed in device (microstep) space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LimitCode {
    pub axis: Axis,
    pub side: LimitSide,
}

impl LimitCode {
    /// Returns `None` for axes without limit registers (theta).
    pub fn new(axis: Axis, side: LimitSide) -> Option<Self> {
        match axis {
            Axis::Theta => None,
            _ => Some(Self { axis, side }),
        }
    }
}

/// Raw microstep (or encoder) counts as reported by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPosition {
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub theta: i64,
}

impl RawPosition {
    pub fn get(&self, axis: Axis) -> i64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::Theta => self.theta,
        }
    }

    pub fn get_mut(&mut self, axis: Axis) -> &mut i64 {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
            Axis::Theta => &mut self.theta,
        }
    }
}

/// Periodic status packet from the motion device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceReport {
    pub position: RawPosition,
    /// Set when the joystick button (external input) was pressed.
    pub external_input_activated: bool,
}

/// Stage position in physical units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x_mm: f64,
    pub y_mm: f64,
    pub z_mm: f64,
    pub theta_rad: f64,
}

impl Position {
    pub fn z_um(&self) -> f64 {
        self.z_mm * 1000.0
    }
}

// =============================================================================
// Camera
// =============================================================================

/// How frames are triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    #[default]
    Software,
    Hardware,
    Continuous,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TriggerMode::Software => "software",
            TriggerMode::Hardware => "hardware",
            TriggerMode::Continuous => "continuous",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Mono8,
    Mono12,
    Mono16,
    Rgb24,
}

/// Sensor region of interest, in full-sensor pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
}

/// Clockwise rotation applied to every frame before analysis or saving.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    #[serde(rename = "0")]
    None,
    #[serde(rename = "90")]
    Cw90,
    #[serde(rename = "180")]
    Cw180,
    #[serde(rename = "270")]
    Cw270,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flip {
    Horizontal,
    Vertical,
    Both,
}

/// Static properties of a camera that shape frame post-processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraProperties {
    pub is_color: bool,
    pub rotate_image_angle: Rotation,
    pub flip_image: Option<Flip>,
    pub strobe_delay_us: u32,
}

// =============================================================================
// Channels and acquisition options
// =============================================================================

/// Named imaging channel: exposure, gain and illumination settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfiguration {
    pub id: u32,
    pub name: String,
    pub exposure_time_ms: f64,
    pub analog_gain: f64,
    pub illumination_source: u32,
    /// Percent, 0-100.
    pub illumination_intensity: f64,
    #[serde(default)]
    pub z_offset_um: Option<f64>,
    #[serde(default)]
    pub pixel_format: Option<PixelFormat>,
}

impl ChannelConfiguration {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            exposure_time_ms: 20.0,
            analog_gain: 0.0,
            illumination_source: 0,
            illumination_intensity: 20.0,
            z_offset_um: None,
            pixel_format: None,
        }
    }

    /// File-name friendly channel label.
    pub fn file_label(&self) -> String {
        self.name.replace(' ', "_")
    }
}

/// Focus measure used to score contrast-autofocus frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusOperator {
    /// Laplacian energy (LAPE).
    #[default]
    LaplacianEnergy,
    /// Gray-level variance (GLVA).
    GrayLevelVariance,
    Brenner,
}

/// Where a Z-stack starts relative to the focus plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZStacking {
    #[default]
    FromBottom,
    FromCenter,
}

/// How brightfield (LED matrix) frames from a colour sensor are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrightfieldSavingOption {
    #[default]
    Raw,
    Rgb2Gray,
    GreenChannelOnly,
}

/// Named positions of the slide/plate holder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlidePosition {
    #[default]
    Unknown,
    Loading,
    Scanning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theta_has_no_limit_register() {
        assert!(LimitCode::new(Axis::Theta, LimitSide::Positive).is_none());
        let code = LimitCode::new(Axis::Z, LimitSide::Negative).unwrap();
        assert_eq!(code.axis, Axis::Z);
        assert_eq!(code.side.opposite(), LimitSide::Positive);
    }

    #[test]
    fn raw_position_accessors() {
        let mut raw = RawPosition::default();
        *raw.get_mut(Axis::Y) = -42;
        assert_eq!(raw.get(Axis::Y), -42);
        assert_eq!(raw.get(Axis::X), 0);
    }

    #[test]
    fn rotation_serializes_as_degrees() {
        let json = serde_json::to_string(&Rotation::Cw270).unwrap();
        assert_eq!(json, "\"270\"");
        let back: Rotation = serde_json::from_str("\"90\"").unwrap();
        assert_eq!(back, Rotation::Cw90);
    }

    #[test]
    fn channel_file_label_replaces_spaces() {
        let cfg = ChannelConfiguration::new(3, "Fluorescence 488 nm Ex");
        assert_eq!(cfg.file_label(), "Fluorescence_488_nm_Ex");
    }
}
