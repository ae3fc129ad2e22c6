//! Device capability traits consumed by the control core.
//!
//! The motion/illumination microcontroller and the cameras are black boxes
//! reached only through these traits. Real drivers and the simulated devices
//! in `scope-driver-mock` both implement them.

use crate::data::Frame;
use crate::types::{Axis, CameraProperties, DeviceReport, HomeTarget, LimitCode, RawPosition, Roi, TriggerMode};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

// =============================================================================
// Microcontroller
// =============================================================================

/// Capability: Stage Motion
///
/// Raw motor control in device units (microsteps).
///
/// # Contract
/// - Motion commands return once the command is queued; completion is
///   observed through `is_busy()`
/// - `raw_position` reflects the last device report, in microsteps
///   (or encoder counts for encoder-equipped axes)
/// - Reports are also pushed to every subscriber of `subscribe_reports()`
///
/// # Thread Safety
/// - All methods are async and take `&self`
/// - Interior mutability should be used for state
#[async_trait]
pub trait StageDriver: Send + Sync {
    /// Move by `usteps` relative to the current position.
    async fn move_usteps(&self, axis: Axis, usteps: i64) -> Result<()>;

    /// Move to the absolute count `usteps`.
    async fn move_to_usteps(&self, axis: Axis, usteps: i64) -> Result<()>;

    async fn home(&self, target: HomeTarget) -> Result<()>;

    /// Declare the current position of `axis` as zero.
    async fn zero(&self, axis: Axis) -> Result<()>;

    /// Program a device-side soft limit register.
    async fn set_limit(&self, code: LimitCode, usteps: i64) -> Result<()>;

    /// True while a command is executing.
    async fn is_busy(&self) -> Result<bool>;

    async fn raw_position(&self) -> Result<RawPosition>;

    /// Subscribe to periodic device reports.
    fn subscribe_reports(&self) -> broadcast::Receiver<DeviceReport>;
}

/// Capability: Illumination Control
///
/// # Contract
/// - Sources below 10 address LED-matrix patterns and are set with
///   `set_illumination_led_matrix`; other sources use `set_illumination`
/// - Intensity is in percent
#[async_trait]
pub trait IlluminationDriver: Send + Sync {
    async fn turn_on_illumination(&self) -> Result<()>;

    async fn turn_off_illumination(&self) -> Result<()>;

    async fn set_illumination(&self, source: u32, intensity: f64) -> Result<()>;

    async fn set_illumination_led_matrix(&self, source: u32, r: f64, g: f64, b: f64) -> Result<()>;

    /// Switch the focus-sensing laser.
    async fn set_af_laser(&self, on: bool) -> Result<()>;
}

/// Capability: Hardware Triggering
#[async_trait]
pub trait HardwareTrigger: Send + Sync {
    /// Emit a camera trigger pulse, optionally gating illumination for
    /// `illumination_on_time_us`.
    async fn send_hardware_trigger(
        &self,
        control_illumination: bool,
        illumination_on_time_us: u64,
    ) -> Result<()>;

    /// Delay between the camera strobe and illumination.
    async fn set_strobe_delay_us(&self, strobe_delay_us: u32) -> Result<()>;
}

/// The full microcontroller surface: motion, illumination and triggering.
pub trait Microcontroller: StageDriver + IlluminationDriver + HardwareTrigger {}

impl<T: StageDriver + IlluminationDriver + HardwareTrigger> Microcontroller for T {}

// =============================================================================
// Camera
// =============================================================================

/// Capability: Camera
///
/// # Contract
/// - `read_frame` returns `Ok(None)` when no frame is available (timeout or
///   dropped frame); callers skip such frames
/// - With the callback enabled, frames are consumed by the live pipeline;
///   direct `read_frame` use requires the callback disabled
/// - `set_roi` uses full-sensor coordinates
#[async_trait]
pub trait Camera: Send + Sync {
    async fn start_streaming(&self) -> Result<()>;

    async fn stop_streaming(&self) -> Result<()>;

    fn is_streaming(&self) -> bool;

    async fn enable_callback(&self) -> Result<()>;

    async fn disable_callback(&self) -> Result<()>;

    fn callback_enabled(&self) -> bool;

    async fn set_trigger_mode(&self, mode: TriggerMode) -> Result<()>;

    /// Fire a software trigger.
    async fn send_trigger(&self) -> Result<()>;

    async fn read_frame(&self) -> Result<Option<Frame>>;

    async fn set_exposure_time_ms(&self, exposure_ms: f64) -> Result<()>;

    async fn exposure_time_ms(&self) -> Result<f64>;

    async fn set_analog_gain(&self, gain: f64) -> Result<()>;

    async fn set_roi(&self, roi: Roi) -> Result<()>;

    /// Full sensor size as (width, height).
    fn sensor_size(&self) -> (u32, u32);

    fn properties(&self) -> CameraProperties;
}
