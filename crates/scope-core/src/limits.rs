//! Shared constants of the motion and focusing algorithms.
//!
//! Tunables that vary per instrument live in [`ScopeConfig`](crate::config::ScopeConfig);
//! the values here are fixed properties of the control procedures.

use std::time::Duration;

// =============================================================================
// Motion
// =============================================================================

/// Lower bound of the Z backlash-clearing overshoot, in microsteps.
pub const Z_BACKLASH_MIN_USTEPS: i64 = 160;

/// Backlash overshoot per unit of Z microstepping.
pub const Z_BACKLASH_PER_MICROSTEP: i64 = 20;

/// Z backlash overshoot for a given microstepping factor.
pub fn z_backlash_usteps(z_microstepping: u32) -> i64 {
    Z_BACKLASH_MIN_USTEPS.max(Z_BACKLASH_PER_MICROSTEP * i64::from(z_microstepping))
}

// =============================================================================
// Illumination and triggering
// =============================================================================

/// Illumination sources below this index are LED-matrix patterns.
pub const LED_MATRIX_SOURCE_LIMIT: u32 = 10;

/// At or below this trigger rate illumination is switched off after every frame.
pub const SLOW_TRIGGER_FPS: f64 = 5.0;

/// Window over which the realized trigger rate is counted.
pub const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Shortest live trigger period; faster rates are clamped to it.
pub const MIN_TRIGGER_PERIOD: Duration = Duration::from_millis(1);

// =============================================================================
// Acquisition
// =============================================================================

/// Poll interval of the abort flag while waiting for the next time point.
pub const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// =============================================================================
// Laser autofocus
// =============================================================================

/// Camera ROI x offset and width granularity.
pub const ROI_X_ALIGN: u32 = 8;

/// Camera ROI y offset and height granularity.
pub const ROI_Y_ALIGN: u32 = 2;

/// Fallback pixel scale when calibration sees no spot motion.
pub const FALLBACK_PIXEL_TO_UM: f64 = 0.4;

/// Half-height of the row band kept around a two-interface spot pair.
pub const TWO_INTERFACE_ROW_HALF_WIDTH: usize = 96;

/// Half-width of the column window around the selected interface peak.
pub const TWO_INTERFACE_COLUMN_HALF_WIDTH: usize = 64;

/// Relative threshold applied inside the two-interface centroid window.
pub const TWO_INTERFACE_THRESHOLD: f64 = 0.1;
