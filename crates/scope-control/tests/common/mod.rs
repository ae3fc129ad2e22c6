//! Test rig: mock microcontroller and camera wired to the controllers.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use scope_control::{AbortHandle, ImagingDevices, LiveController, NavigationController};
use scope_core::capabilities::{Camera, Microcontroller, StageDriver};
use scope_core::config::{ScopeConfig, StageConfig};
use scope_core::data::Frame;
use scope_core::types::{CameraProperties, Roi, TriggerMode};
use scope_core::{EventBus, ResourceArbiter};
use scope_driver_mock::{MockCamera, MockMicrocontroller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Physical Z (mm) per raw device count, movement sign included.
pub fn z_mm_per_count(stage: &StageConfig) -> f64 {
    f64::from(stage.z.movement_sign) * stage.z.screw_pitch_mm / stage.z.usteps_per_rev()
}

pub struct Rig {
    pub config: ScopeConfig,
    pub mcu: Arc<MockMicrocontroller>,
    pub camera: Arc<dyn Camera>,
    pub events: EventBus,
    pub arbiter: ResourceArbiter,
    pub navigation: Arc<NavigationController>,
    pub live: LiveController,
}

impl Rig {
    /// Build a rig whose camera is made from the microcontroller (for scenes
    /// that follow the stage) and the Z scale.
    pub fn new(
        config: ScopeConfig,
        make_camera: impl FnOnce(&MockMicrocontroller, f64) -> Arc<dyn Camera>,
    ) -> Self {
        let mcu = Arc::new(MockMicrocontroller::new());
        Self::with_mcu(config, mcu, make_camera)
    }

    pub fn with_mcu(
        config: ScopeConfig,
        mcu: Arc<MockMicrocontroller>,
        make_camera: impl FnOnce(&MockMicrocontroller, f64) -> Arc<dyn Camera>,
    ) -> Self {
        let camera = make_camera(&mcu, z_mm_per_count(&config.stage));
        let events = EventBus::new();
        let arbiter = ResourceArbiter::new();
        let stage: Arc<dyn StageDriver> = mcu.clone();
        let microcontroller: Arc<dyn Microcontroller> = mcu.clone();
        let navigation = Arc::new(NavigationController::new(
            stage,
            config.stage.clone(),
            events.clone(),
        ));
        let live = LiveController::new(
            Arc::clone(&camera),
            microcontroller,
            arbiter.clone(),
            events.clone(),
            config.live.clone(),
        );
        Self {
            config,
            mcu,
            camera,
            events,
            arbiter,
            navigation,
            live,
        }
    }

    /// Rig with a plain test-pattern camera.
    pub fn plain(width: u32, height: u32) -> Self {
        Self::new(ScopeConfig::default(), |_, _| {
            Arc::new(MockCamera::new(width, height))
        })
    }

    pub fn microcontroller(&self) -> Arc<dyn Microcontroller> {
        self.mcu.clone()
    }

    pub fn devices(&self) -> ImagingDevices {
        ImagingDevices {
            navigation: Arc::clone(&self.navigation),
            camera: Arc::clone(&self.camera),
            microcontroller: self.microcontroller(),
            live: self.live.clone(),
            events: self.events.clone(),
        }
    }
}

/// Camera wrapper that intervenes on chosen reads.
///
/// Reads are counted from 1 across the wrapper's lifetime, including reads
/// that deliver no frame.
pub struct HookedCamera {
    inner: Arc<dyn Camera>,
    reads: AtomicU64,
    abort_on: Mutex<Option<(u64, AbortHandle)>>,
    delay_on: Mutex<Option<(u64, Duration)>>,
}

impl HookedCamera {
    pub fn new(inner: Arc<dyn Camera>) -> Self {
        Self {
            inner,
            reads: AtomicU64::new(0),
            abort_on: Mutex::new(None),
            delay_on: Mutex::new(None),
        }
    }

    /// Request an abort right after read number `n` returns.
    pub fn abort_after_read(&self, n: u64, handle: AbortHandle) {
        *self.abort_on.lock() = Some((n, handle));
    }

    /// Make read number `n` take `delay` longer.
    pub fn delay_read(&self, n: u64, delay: Duration) {
        *self.delay_on.lock() = Some((n, delay));
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for HookedCamera {
    async fn start_streaming(&self) -> Result<()> {
        self.inner.start_streaming().await
    }

    async fn stop_streaming(&self) -> Result<()> {
        self.inner.stop_streaming().await
    }

    fn is_streaming(&self) -> bool {
        self.inner.is_streaming()
    }

    async fn enable_callback(&self) -> Result<()> {
        self.inner.enable_callback().await
    }

    async fn disable_callback(&self) -> Result<()> {
        self.inner.disable_callback().await
    }

    fn callback_enabled(&self) -> bool {
        self.inner.callback_enabled()
    }

    async fn set_trigger_mode(&self, mode: TriggerMode) -> Result<()> {
        self.inner.set_trigger_mode(mode).await
    }

    async fn send_trigger(&self) -> Result<()> {
        self.inner.send_trigger().await
    }

    async fn read_frame(&self) -> Result<Option<Frame>> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = (*self.delay_on.lock())
            .filter(|(at, _)| *at == n)
            .map(|(_, d)| d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let frame = self.inner.read_frame().await;
        if let Some((at, handle)) = self.abort_on.lock().as_ref() {
            if *at == n {
                handle.abort();
            }
        }
        frame
    }

    async fn set_exposure_time_ms(&self, exposure_ms: f64) -> Result<()> {
        self.inner.set_exposure_time_ms(exposure_ms).await
    }

    async fn exposure_time_ms(&self) -> Result<f64> {
        self.inner.exposure_time_ms().await
    }

    async fn set_analog_gain(&self, gain: f64) -> Result<()> {
        self.inner.set_analog_gain(gain).await
    }

    async fn set_roi(&self, roi: Roi) -> Result<()> {
        self.inner.set_roi(roi).await
    }

    fn sensor_size(&self) -> (u32, u32) {
        self.inner.sensor_size()
    }

    fn properties(&self) -> CameraProperties {
        self.inner.properties()
    }
}
