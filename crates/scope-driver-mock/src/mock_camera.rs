//! Mock camera with trigger modes, ROI and scene-rendered frames.

use crate::common::{ErrorConfig, MockMode, MockRng};
use crate::scene::{RenderRequest, SceneModel, TestPattern};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use scope_core::capabilities::Camera;
use scope_core::data::Frame;
use scope_core::types::{CameraProperties, Roi, TriggerMode};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const DRIVER_TYPE: &str = "mock_camera";

/// Configuration for the mock camera.
#[derive(Debug, Clone, Deserialize)]
pub struct MockCameraConfig {
    /// Sensor width in pixels (default: 640)
    #[serde(default = "default_width")]
    pub width: u32,

    /// Sensor height in pixels (default: 480)
    #[serde(default = "default_height")]
    pub height: u32,

    /// Initial exposure in ms (default: 20)
    #[serde(default = "default_exposure")]
    pub exposure_ms: f64,

    /// Read noise standard deviation in counts (default: 0)
    #[serde(default)]
    pub noise_sigma: f64,
}

fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_exposure() -> f64 {
    20.0
}

impl Default for MockCameraConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            exposure_ms: default_exposure(),
            noise_sigma: 0.0,
        }
    }
}

#[derive(Debug)]
struct CameraState {
    streaming: bool,
    callback_enabled: bool,
    trigger_mode: TriggerMode,
    exposure_ms: f64,
    analog_gain: f64,
    roi: Roi,
    pending_triggers: u32,
    triggers_sent: u64,
    frames_read: u64,
    fail_next_reads: u32,
}

// =============================================================================
// Builder
// =============================================================================

pub struct MockCameraBuilder {
    config: MockCameraConfig,
    properties: CameraProperties,
    mode: MockMode,
    error_config: ErrorConfig,
    scene: Arc<dyn SceneModel>,
    seed: Option<u64>,
}

impl MockCameraBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            config: MockCameraConfig {
                width,
                height,
                ..Default::default()
            },
            properties: CameraProperties::default(),
            mode: MockMode::Instant,
            error_config: ErrorConfig::none(),
            scene: Arc::new(TestPattern),
            seed: None,
        }
    }

    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn scene(mut self, scene: Arc<dyn SceneModel>) -> Self {
        self.scene = scene;
        self
    }

    pub fn properties(mut self, properties: CameraProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn color(mut self, is_color: bool) -> Self {
        self.properties.is_color = is_color;
        self
    }

    pub fn noise(mut self, sigma: f64, seed: Option<u64>) -> Self {
        self.config.noise_sigma = sigma.max(0.0);
        self.seed = seed;
        self
    }

    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    pub fn build(self) -> MockCamera {
        let roi = Roi {
            x_offset: 0,
            y_offset: 0,
            width: self.config.width,
            height: self.config.height,
        };
        MockCamera {
            sensor: (self.config.width, self.config.height),
            properties: self.properties,
            mode: self.mode,
            error_config: self.error_config,
            scene: self.scene,
            noise_sigma: self.config.noise_sigma,
            rng: MockRng::new(self.seed),
            state: Mutex::new(CameraState {
                streaming: false,
                callback_enabled: false,
                trigger_mode: TriggerMode::Software,
                exposure_ms: self.config.exposure_ms,
                analog_gain: 0.0,
                roi,
                pending_triggers: 0,
                triggers_sent: 0,
                frames_read: 0,
                fail_next_reads: 0,
            }),
        }
    }
}

// =============================================================================
// MockCamera
// =============================================================================

/// Simulated camera.
///
/// In software trigger mode a frame is only delivered after `send_trigger`;
/// otherwise `read_frame` returns `None`, as a real camera would time out.
/// Hardware and continuous modes always deliver.
pub struct MockCamera {
    sensor: (u32, u32),
    properties: CameraProperties,
    mode: MockMode,
    error_config: ErrorConfig,
    scene: Arc<dyn SceneModel>,
    noise_sigma: f64,
    rng: MockRng,
    state: Mutex<CameraState>,
}

impl MockCamera {
    /// Instant-mode camera showing the test pattern.
    pub fn new(width: u32, height: u32) -> Self {
        Self::builder(width, height).build()
    }

    pub fn builder(width: u32, height: u32) -> MockCameraBuilder {
        MockCameraBuilder::new(width, height)
    }

    /// Make the next `n` reads return no frame.
    pub fn fail_next_reads(&self, n: u32) {
        self.state.lock().fail_next_reads = n;
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        self.state.lock().trigger_mode
    }

    pub fn roi(&self) -> Roi {
        self.state.lock().roi
    }

    pub fn analog_gain(&self) -> f64 {
        self.state.lock().analog_gain
    }

    pub fn triggers_sent(&self) -> u64 {
        self.state.lock().triggers_sent
    }

    pub fn frames_read(&self) -> u64 {
        self.state.lock().frames_read
    }
}

#[async_trait]
impl Camera for MockCamera {
    async fn start_streaming(&self) -> Result<()> {
        self.error_config.check_operation(DRIVER_TYPE, "stream")?;
        self.state.lock().streaming = true;
        tracing::debug!("MockCamera: streaming started");
        Ok(())
    }

    async fn stop_streaming(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.streaming = false;
        state.pending_triggers = 0;
        tracing::debug!("MockCamera: streaming stopped");
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    async fn enable_callback(&self) -> Result<()> {
        self.state.lock().callback_enabled = true;
        Ok(())
    }

    async fn disable_callback(&self) -> Result<()> {
        self.state.lock().callback_enabled = false;
        Ok(())
    }

    fn callback_enabled(&self) -> bool {
        self.state.lock().callback_enabled
    }

    async fn set_trigger_mode(&self, mode: TriggerMode) -> Result<()> {
        let mut state = self.state.lock();
        state.trigger_mode = mode;
        state.pending_triggers = 0;
        tracing::debug!(mode = %mode, "MockCamera: trigger mode set");
        Ok(())
    }

    async fn send_trigger(&self) -> Result<()> {
        self.error_config.check_operation(DRIVER_TYPE, "trigger")?;
        let mut state = self.state.lock();
        state.pending_triggers = state.pending_triggers.saturating_add(1);
        state.triggers_sent += 1;
        Ok(())
    }

    async fn read_frame(&self) -> Result<Option<Frame>> {
        self.error_config.check_operation(DRIVER_TYPE, "read_frame")?;

        let (request, exposure_ms) = {
            let mut state = self.state.lock();
            if state.fail_next_reads > 0 {
                state.fail_next_reads -= 1;
                tracing::debug!("MockCamera: dropping frame");
                return Ok(None);
            }
            if state.trigger_mode == TriggerMode::Software {
                if state.pending_triggers == 0 {
                    return Ok(None);
                }
                state.pending_triggers -= 1;
            }
            state.frames_read += 1;
            let request = RenderRequest {
                sensor_width: self.sensor.0,
                sensor_height: self.sensor.1,
                roi: state.roi,
                frame_number: state.frames_read,
                is_color: self.properties.is_color,
            };
            (request, state.exposure_ms)
        };

        if self.mode.is_timed() {
            sleep(Duration::from_secs_f64(exposure_ms.max(0.0) / 1000.0)).await;
        }

        let mut frame = self.scene.render(&request);
        if self.noise_sigma > 0.0 && !frame.is_color() && frame.bit_depth == 16 {
            for chunk in frame.data.chunks_exact_mut(2) {
                let v = f64::from(u16::from_le_bytes([chunk[0], chunk[1]]));
                let noisy = (v + self.rng.gaussian(self.noise_sigma)).clamp(0.0, 65535.0) as u16;
                chunk.copy_from_slice(&noisy.to_le_bytes());
            }
        }
        Ok(Some(frame))
    }

    async fn set_exposure_time_ms(&self, exposure_ms: f64) -> Result<()> {
        if !(exposure_ms > 0.0) {
            bail!("Exposure must be positive, got {exposure_ms} ms");
        }
        self.state.lock().exposure_ms = exposure_ms;
        Ok(())
    }

    async fn exposure_time_ms(&self) -> Result<f64> {
        Ok(self.state.lock().exposure_ms)
    }

    async fn set_analog_gain(&self, gain: f64) -> Result<()> {
        self.state.lock().analog_gain = gain;
        Ok(())
    }

    async fn set_roi(&self, roi: Roi) -> Result<()> {
        let (w, h) = self.sensor;
        if roi.width == 0
            || roi.height == 0
            || roi.x_offset + roi.width > w
            || roi.y_offset + roi.height > h
        {
            bail!("ROI {:?} outside {}x{} sensor", roi, w, h);
        }
        self.state.lock().roi = roi;
        tracing::debug!(roi = ?roi, "MockCamera: ROI set");
        Ok(())
    }

    fn sensor_size(&self) -> (u32, u32) {
        self.sensor
    }

    fn properties(&self) -> CameraProperties {
        self.properties
    }
}
