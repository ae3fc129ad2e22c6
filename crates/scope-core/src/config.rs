//! Instrument configuration using Figment.
//!
//! Configuration is layered:
//! 1. Built-in defaults matching the reference instrument
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `SCOPE_` (`__` separates sections,
//!    e.g. `SCOPE_SLIDE__SWITCHING_TIMEOUT_S=20`)
//!
//! # Example
//! ```no_run
//! use scope_core::config::ScopeConfig;
//!
//! let config = ScopeConfig::load(Some("scope.toml".as_ref()))?;
//! println!("X pitch: {} mm", config.stage.x.screw_pitch_mm);
//! # Ok::<(), scope_core::ScopeError>(())
//! ```

use crate::error::{ScopeError, ScopeResult};
use crate::limits;
use crate::types::{Axis, BrightfieldSavingOption, FocusOperator, TriggerMode, ZStacking};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SCOPE_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub stage: StageConfig,
    pub live: LiveConfig,
    pub autofocus: AutofocusConfig,
    pub laser_af: LaserAfConfig,
    pub slide: SlideConfig,
    pub acquisition: AcquisitionConfig,
    pub storage: StorageConfig,
}

// =============================================================================
// Stage
// =============================================================================

/// Drive-train description of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Lead-screw pitch in mm per revolution. Unused for theta.
    pub screw_pitch_mm: f64,
    pub microstepping: u32,
    pub fullsteps_per_rev: u32,
    /// +1 or -1: maps physical direction onto device direction.
    pub movement_sign: i32,
    /// Encoder resolution in mm (rad for theta). Overrides the step size when set.
    #[serde(default)]
    pub encoder_step_size: Option<f64>,
}

impl AxisConfig {
    fn linear(screw_pitch_mm: f64, movement_sign: i32) -> Self {
        Self {
            screw_pitch_mm,
            microstepping: 256,
            fullsteps_per_rev: 200,
            movement_sign,
            encoder_step_size: None,
        }
    }

    pub fn usteps_per_rev(&self) -> f64 {
        f64::from(self.microstepping) * f64::from(self.fullsteps_per_rev)
    }

    fn validate(&self, axis: Axis) -> ScopeResult<()> {
        if axis != Axis::Theta && !(self.screw_pitch_mm > 0.0) {
            return Err(ScopeError::Configuration(format!(
                "{axis}: screw_pitch_mm must be positive"
            )));
        }
        if self.microstepping == 0 || self.fullsteps_per_rev == 0 {
            return Err(ScopeError::Configuration(format!(
                "{axis}: microstepping and fullsteps_per_rev must be non-zero"
            )));
        }
        if self.movement_sign != 1 && self.movement_sign != -1 {
            return Err(ScopeError::Configuration(format!(
                "{axis}: movement_sign must be 1 or -1, got {}",
                self.movement_sign
            )));
        }
        if let Some(step) = self.encoder_step_size {
            if !(step > 0.0) {
                return Err(ScopeError::Configuration(format!(
                    "{axis}: encoder_step_size must be positive"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub x: AxisConfig,
    pub y: AxisConfig,
    pub z: AxisConfig,
    pub theta: AxisConfig,
    /// Busy-flag polling period.
    pub sleep_time_s: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            x: AxisConfig::linear(2.54, 1),
            y: AxisConfig::linear(2.54, 1),
            z: AxisConfig::linear(0.3, -1),
            theta: AxisConfig {
                screw_pitch_mm: 1.0,
                microstepping: 16,
                fullsteps_per_rev: 200,
                movement_sign: 1,
                encoder_step_size: None,
            },
            sleep_time_s: 0.005,
        }
    }
}

impl StageConfig {
    pub fn axis(&self, axis: Axis) -> &AxisConfig {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
            Axis::Theta => &self.theta,
        }
    }

    /// Z overshoot used to take up backlash before approaching from below.
    pub fn z_backlash_usteps(&self) -> i64 {
        limits::z_backlash_usteps(self.z.microstepping)
    }
}

// =============================================================================
// Live view
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub trigger_mode: TriggerMode,
    pub trigger_fps: f64,
    /// Let the live controller switch illumination around each trigger.
    pub control_illumination: bool,
    /// In hardware mode, emit triggers from the internal timer.
    pub use_internal_timer_for_hardware_trigger: bool,
    /// LED-matrix colour balance, applied on top of the intensity.
    pub led_matrix_r_factor: f64,
    pub led_matrix_g_factor: f64,
    pub led_matrix_b_factor: f64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            trigger_mode: TriggerMode::Software,
            trigger_fps: 10.0,
            control_illumination: true,
            use_internal_timer_for_hardware_trigger: true,
            led_matrix_r_factor: 1.0,
            led_matrix_g_factor: 1.0,
            led_matrix_b_factor: 1.0,
        }
    }
}

// =============================================================================
// Contrast autofocus
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutofocusConfig {
    pub n_planes: u32,
    pub delta_z_um: f64,
    /// Stop when the score drops below this fraction of the best so far.
    pub stop_threshold: f64,
    pub crop_width: u32,
    pub crop_height: u32,
    pub focus_operator: FocusOperator,
    /// Run contrast AF on every Nth field of view within a row.
    pub fovs_per_af: u32,
}

impl Default for AutofocusConfig {
    fn default() -> Self {
        Self {
            n_planes: 10,
            delta_z_um: 1.524,
            stop_threshold: 0.85,
            crop_width: 800,
            crop_height: 800,
            focus_operator: FocusOperator::LaplacianEnergy,
            fovs_per_af: 3,
        }
    }
}

// =============================================================================
// Laser autofocus
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserAfConfig {
    /// Frames averaged per centroid measurement.
    pub averaging_n: u32,
    pub crop_width: u32,
    pub crop_height: u32,
    /// Residual below which a correction counts as converged.
    pub success_window_um: f64,
    /// Largest single correction move.
    pub range_um: f64,
    /// Z travel used to calibrate pixel scale.
    pub calibration_distance_um: f64,
    /// Pixels dimmer than this fraction of the peak are ignored.
    pub spot_threshold: f64,
    /// Minimum peak separation for two-interface detection.
    pub min_peak_distance_px: u32,
    pub has_two_interfaces: bool,
    pub use_glass_top: bool,
    pub focus_camera_exposure_ms: f64,
    pub focus_camera_analog_gain: f64,
    /// Run contrast AF before the first laser-AF initialization in a scan.
    pub contrast_af_before_init: bool,
    /// Calibration cache record location.
    pub cache_path: Option<PathBuf>,
}

impl Default for LaserAfConfig {
    fn default() -> Self {
        Self {
            averaging_n: 5,
            crop_width: 1536,
            crop_height: 256,
            success_window_um: 1.0,
            range_um: 200.0,
            calibration_distance_um: 6.0,
            spot_threshold: 0.2,
            min_peak_distance_px: 100,
            has_two_interfaces: false,
            use_glass_top: true,
            focus_camera_exposure_ms: 2.0,
            focus_camera_analog_gain: 0.0,
            contrast_af_before_init: false,
            cache_path: None,
        }
    }
}

// =============================================================================
// Slide positioning
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlideConfig {
    pub loading_x_mm: f64,
    pub loading_y_mm: f64,
    pub scanning_x_mm: f64,
    pub scanning_y_mm: f64,
    /// Wall-clock budget of one loading/scanning transition.
    pub switching_timeout_s: f64,
    pub retract_objective_before_moving: bool,
    pub objective_retracted_pos_mm: f64,
    pub homing_every_time: bool,
    /// Home X then Y with a move in between, instead of a combined XY home.
    pub home_x_and_y_separately: bool,
}

impl Default for SlideConfig {
    fn default() -> Self {
        Self {
            loading_x_mm: 30.0,
            loading_y_mm: 55.0,
            scanning_x_mm: 3.0,
            scanning_y_mm: 3.0,
            switching_timeout_s: 10.0,
            retract_objective_before_moving: false,
            objective_retracted_pos_mm: 0.1,
            homing_every_time: false,
            home_x_and_y_separately: false,
        }
    }
}

// =============================================================================
// Acquisition and storage
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub z_stacking: ZStacking,
    pub brightfield_saving: BrightfieldSavingOption,
    /// Optional centre crop applied before saving.
    pub crop_width: Option<u32>,
    pub crop_height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./acquisitions"),
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

impl ScopeConfig {
    /// Load defaults, then the TOML file (if given), then `SCOPE_` variables.
    pub fn load(path: Option<&Path>) -> ScopeResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(ScopeConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(ScopeError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        let config: ScopeConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        tracing::debug!(path = ?path, "Configuration loaded");
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults. Environment is ignored.
    pub fn from_toml_str(toml: &str) -> ScopeResult<Self> {
        let config: ScopeConfig = Figment::from(Serialized::defaults(ScopeConfig::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> ScopeResult<String> {
        toml::to_string_pretty(self).map_err(|e| ScopeError::Configuration(e.to_string()))
    }

    /// Semantic checks that parsing cannot express.
    pub fn validate(&self) -> ScopeResult<()> {
        for axis in [Axis::X, Axis::Y, Axis::Z, Axis::Theta] {
            self.stage.axis(axis).validate(axis)?;
        }
        positive_finite("stage.sleep_time_s", self.stage.sleep_time_s)?;
        positive_finite("live.trigger_fps", self.live.trigger_fps)?;
        let af = &self.autofocus;
        if !(af.stop_threshold > 0.0 && af.stop_threshold <= 1.0) {
            return Err(ScopeError::Configuration(format!(
                "autofocus.stop_threshold must be in (0, 1], got {}",
                af.stop_threshold
            )));
        }
        if af.fovs_per_af == 0 || af.n_planes == 0 {
            return Err(ScopeError::Configuration(
                "autofocus.fovs_per_af and autofocus.n_planes must be at least 1".into(),
            ));
        }
        let laser = &self.laser_af;
        if laser.averaging_n == 0 {
            return Err(ScopeError::Configuration(
                "laser_af.averaging_n must be at least 1".into(),
            ));
        }
        if !(laser.calibration_distance_um > 0.0) || !(laser.range_um > 0.0) {
            return Err(ScopeError::Configuration(
                "laser_af.calibration_distance_um and laser_af.range_um must be positive".into(),
            ));
        }
        if !(laser.spot_threshold >= 0.0 && laser.spot_threshold < 1.0) {
            return Err(ScopeError::Configuration(
                "laser_af.spot_threshold must be in [0, 1)".into(),
            ));
        }
        positive_finite("slide.switching_timeout_s", self.slide.switching_timeout_s)?;
        Ok(())
    }
}

fn positive_finite(name: &str, value: f64) -> ScopeResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ScopeError::Configuration(format!(
            "{name} must be positive and finite, got {value}"
        )))
    }
}
