//! Live view: trigger timing, illumination switching and frame pumping.
//!
//! # State machine
//!
//! ```text
//! ┌──────┐  start_live()  ┌──────────────────────────────┐
//! │ Idle │───────────────▶│ LiveSoftware / LiveHardware / │
//! └──────┘◀───────────────│ LiveContinuous               │
//!            stop_live()  └──────────────────────────────┘
//!                           set_trigger_mode() moves between
//!                           the three live states
//! ```
//!
//! While live, a loop task ticks at the trigger rate. Each tick sends a
//! software or hardware trigger when the mode calls for one, then reads a
//! frame and publishes it for display.

use parking_lot::Mutex;
use scope_core::arbiter::{Owner, ResourceArbiter, ResourceGuard};
use scope_core::capabilities::{Camera, Microcontroller};
use scope_core::config::LiveConfig;
use scope_core::data::Frame;
use scope_core::error::ScopeResult;
use scope_core::events::{EventBus, ScopeEvent};
use scope_core::limits::{
    FPS_WINDOW, LED_MATRIX_SOURCE_LIMIT, MIN_TRIGGER_PERIOD, SLOW_TRIGGER_FPS,
};
use scope_core::types::{ChannelConfiguration, TriggerMode};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Observable state of the live view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Idle,
    LiveSoftware,
    LiveHardware,
    LiveContinuous,
}

#[derive(Debug)]
struct FpsCounter {
    window_start: Instant,
    triggers: u32,
    fps_real: f64,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            triggers: 0,
            fps_real: 0.0,
        }
    }

    /// Count a trigger; returns the new rate when a window closes.
    fn tick(&mut self) -> Option<f64> {
        self.triggers += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed < FPS_WINDOW {
            return None;
        }
        self.fps_real = f64::from(self.triggers) / elapsed.as_secs_f64();
        self.triggers = 0;
        self.window_start = Instant::now();
        Some(self.fps_real)
    }
}

#[derive(Debug)]
struct LiveStatus {
    is_live: bool,
    trigger_mode: TriggerMode,
    fps_trigger: f64,
    illumination_on: bool,
    configuration: Option<ChannelConfiguration>,
    trigger_id: u64,
    guard: Option<ResourceGuard>,
    live_loop: Option<JoinHandle<()>>,
    fps: FpsCounter,
}

struct LiveInner {
    camera: Arc<dyn Camera>,
    microcontroller: Arc<dyn Microcontroller>,
    arbiter: ResourceArbiter,
    events: EventBus,
    config: LiveConfig,
    for_displacement_measurement: bool,
    status: Mutex<LiveStatus>,
}

/// Live view of one camera. Cheap to clone.
#[derive(Clone)]
pub struct LiveController {
    inner: Arc<LiveInner>,
}

impl LiveController {
    pub fn new(
        camera: Arc<dyn Camera>,
        microcontroller: Arc<dyn Microcontroller>,
        arbiter: ResourceArbiter,
        events: EventBus,
        config: LiveConfig,
    ) -> Self {
        Self::build(camera, microcontroller, arbiter, events, config, false)
    }

    /// Live view of the focus camera: drives the AF laser instead of the
    /// sample illumination.
    pub fn for_displacement_measurement(
        camera: Arc<dyn Camera>,
        microcontroller: Arc<dyn Microcontroller>,
        arbiter: ResourceArbiter,
        events: EventBus,
        config: LiveConfig,
    ) -> Self {
        Self::build(camera, microcontroller, arbiter, events, config, true)
    }

    fn build(
        camera: Arc<dyn Camera>,
        microcontroller: Arc<dyn Microcontroller>,
        arbiter: ResourceArbiter,
        events: EventBus,
        config: LiveConfig,
        for_displacement_measurement: bool,
    ) -> Self {
        let status = LiveStatus {
            is_live: false,
            trigger_mode: config.trigger_mode,
            fps_trigger: config.trigger_fps,
            illumination_on: false,
            configuration: None,
            trigger_id: 0,
            guard: None,
            live_loop: None,
            fps: FpsCounter::new(),
        };
        Self {
            inner: Arc::new(LiveInner {
                camera,
                microcontroller,
                arbiter,
                events,
                config,
                for_displacement_measurement,
                status: Mutex::new(status),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn camera(&self) -> &Arc<dyn Camera> {
        &self.inner.camera
    }

    pub fn is_live(&self) -> bool {
        self.inner.status.lock().is_live
    }

    pub fn state(&self) -> LiveState {
        let status = self.inner.status.lock();
        if !status.is_live {
            return LiveState::Idle;
        }
        match status.trigger_mode {
            TriggerMode::Software => LiveState::LiveSoftware,
            TriggerMode::Hardware => LiveState::LiveHardware,
            TriggerMode::Continuous => LiveState::LiveContinuous,
        }
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        self.inner.status.lock().trigger_mode
    }

    pub fn fps_trigger(&self) -> f64 {
        self.inner.status.lock().fps_trigger
    }

    /// Software trigger rate measured over the last complete window.
    pub fn fps_real(&self) -> f64 {
        self.inner.status.lock().fps.fps_real
    }

    pub fn trigger_id(&self) -> u64 {
        self.inner.status.lock().trigger_id
    }

    pub fn illumination_on(&self) -> bool {
        self.inner.status.lock().illumination_on
    }

    pub fn control_illumination(&self) -> bool {
        self.inner.config.control_illumination
    }

    pub fn current_configuration(&self) -> Option<ChannelConfiguration> {
        self.inner.status.lock().configuration.clone()
    }

    fn needs_timer(&self, mode: TriggerMode) -> bool {
        match mode {
            TriggerMode::Software => true,
            TriggerMode::Hardware => self.inner.config.use_internal_timer_for_hardware_trigger,
            TriggerMode::Continuous => false,
        }
    }

    // -------------------------------------------------------------------------
    // Start / stop
    // -------------------------------------------------------------------------

    /// Start streaming and the live loop. No-op when already live.
    pub async fn start_live(&self) -> ScopeResult<()> {
        if self.is_live() {
            return Ok(());
        }
        let guard = self.inner.arbiter.try_acquire(Owner::Live)?;
        let camera = &self.inner.camera;
        camera.start_streaming().await?;
        camera.enable_callback().await?;
        if self.inner.for_displacement_measurement {
            self.inner.microcontroller.set_af_laser(true).await?;
        }

        let mode = {
            let mut status = self.inner.status.lock();
            status.is_live = true;
            status.guard = Some(guard);
            status.fps = FpsCounter::new();
            status.trigger_mode
        };
        self.spawn_live_loop();
        info!(mode = %mode, "Live view started");
        self.inner.events.publish(ScopeEvent::LiveStarted(mode));
        Ok(())
    }

    /// Stop the live loop and release the camera. No-op when not live.
    pub async fn stop_live(&self) -> ScopeResult<()> {
        let (guard, mode, live_loop) = {
            let mut status = self.inner.status.lock();
            if !status.is_live {
                return Ok(());
            }
            status.is_live = false;
            (status.guard.take(), status.trigger_mode, status.live_loop.take())
        };
        stop_loop(live_loop).await;

        if mode == TriggerMode::Continuous {
            self.inner.camera.stop_streaming().await?;
        }
        if self.inner.config.control_illumination {
            self.turn_off_illumination().await?;
        }
        if self.inner.for_displacement_measurement {
            self.inner.microcontroller.set_af_laser(false).await?;
        }
        drop(guard);
        info!("Live view stopped");
        self.inner.events.publish(ScopeEvent::LiveStopped);
        Ok(())
    }

    fn spawn_live_loop(&self) {
        let mut status = self.inner.status.lock();
        if let Some(handle) = status.live_loop.take() {
            handle.abort();
        }
        let period = trigger_period(status.fps_trigger);
        let weak = Arc::downgrade(&self.inner);
        status.live_loop = Some(tokio::spawn(run_live_loop(weak, period)));
        debug!(period = ?period, "Live loop started");
    }

    /// Stop the loop and wait until no tick is in flight.
    async fn pause_live_loop(&self) {
        let live_loop = self.inner.status.lock().live_loop.take();
        stop_loop(live_loop).await;
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    /// Switch trigger mode, restarting the live loop if live.
    pub async fn set_trigger_mode(&self, mode: TriggerMode) -> ScopeResult<()> {
        self.pause_live_loop().await;
        self.inner.camera.set_trigger_mode(mode).await?;
        if mode == TriggerMode::Hardware {
            let delay = self.inner.camera.properties().strobe_delay_us;
            self.inner.microcontroller.set_strobe_delay_us(delay).await?;
        }
        let live = {
            let mut status = self.inner.status.lock();
            status.trigger_mode = mode;
            status.is_live
        };
        if live {
            self.spawn_live_loop();
        }
        debug!(mode = %mode, "Trigger mode set");
        Ok(())
    }

    /// Change the trigger rate. Non-positive and non-finite rates are ignored.
    pub fn set_trigger_fps(&self, fps: f64) {
        if !fps.is_finite() || fps <= 1e-6 {
            warn!(fps, "Ignoring invalid trigger rate");
            return;
        }
        let live = {
            let mut status = self.inner.status.lock();
            status.fps_trigger = fps;
            status.is_live
        };
        if live {
            self.spawn_live_loop();
        }
    }

    /// Apply a channel: exposure, gain and illumination.
    ///
    /// When live the loop is paused and illumination switched off while the
    /// settings change, then both are restored.
    pub async fn set_microscope_mode(&self, configuration: &ChannelConfiguration) -> ScopeResult<()> {
        let live = self.is_live();
        let control = self.inner.config.control_illumination;
        if live {
            self.pause_live_loop().await;
            if control {
                self.turn_off_illumination().await?;
            }
        }

        let camera = &self.inner.camera;
        camera.set_exposure_time_ms(configuration.exposure_time_ms).await?;
        camera.set_analog_gain(configuration.analog_gain).await?;
        self.set_illumination(
            configuration.illumination_source,
            configuration.illumination_intensity,
        )
        .await?;
        self.inner.status.lock().configuration = Some(configuration.clone());
        debug!(channel = %configuration.name, "Microscope mode set");

        if live {
            if control {
                self.turn_on_illumination().await?;
            }
            self.spawn_live_loop();
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Illumination
    // -------------------------------------------------------------------------

    pub async fn turn_on_illumination(&self) -> ScopeResult<()> {
        self.inner.microcontroller.turn_on_illumination().await?;
        self.inner.status.lock().illumination_on = true;
        Ok(())
    }

    pub async fn turn_off_illumination(&self) -> ScopeResult<()> {
        self.inner.microcontroller.turn_off_illumination().await?;
        self.inner.status.lock().illumination_on = false;
        Ok(())
    }

    /// Select a source. Sources below the LED-matrix limit take an RGB
    /// triple derived from `intensity` (percent) and the colour factors.
    pub async fn set_illumination(&self, source: u32, intensity: f64) -> ScopeResult<()> {
        let mcu = &self.inner.microcontroller;
        if source < LED_MATRIX_SOURCE_LIMIT {
            let cfg = &self.inner.config;
            let level = intensity / 100.0;
            mcu.set_illumination_led_matrix(
                source,
                level * cfg.led_matrix_r_factor,
                level * cfg.led_matrix_g_factor,
                level * cfg.led_matrix_b_factor,
            )
            .await?;
        } else {
            mcu.set_illumination(source, intensity).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Triggering and frames
    // -------------------------------------------------------------------------

    /// Send one trigger according to the current mode.
    pub async fn trigger_acquisition(&self) -> ScopeResult<()> {
        let (mode, illumination_on) = {
            let status = self.inner.status.lock();
            (status.trigger_mode, status.illumination_on)
        };
        match mode {
            TriggerMode::Software => {
                if self.inner.config.control_illumination && !illumination_on {
                    self.turn_on_illumination().await?;
                }
                let measured = {
                    let mut status = self.inner.status.lock();
                    status.trigger_id += 1;
                    status.fps.tick()
                };
                self.inner.camera.send_trigger().await?;
                if let Some(fps) = measured {
                    self.inner.events.publish(ScopeEvent::FpsMeasured(fps));
                }
            }
            TriggerMode::Hardware => {
                let exposure_ms = self.inner.camera.exposure_time_ms().await?;
                self.inner.status.lock().trigger_id += 1;
                self.inner
                    .microcontroller
                    .send_hardware_trigger(
                        self.inner.config.control_illumination,
                        (exposure_ms * 1000.0).round() as u64,
                    )
                    .await?;
            }
            TriggerMode::Continuous => {}
        }
        Ok(())
    }

    /// Publish a frame for display.
    ///
    /// At slow trigger rates illumination is switched off between frames.
    pub async fn on_new_frame(&self, frame: Frame) -> ScopeResult<()> {
        self.inner
            .events
            .publish(ScopeEvent::ImageToDisplay(Arc::new(frame)));
        let switch_off = {
            let status = self.inner.status.lock();
            status.fps_trigger <= SLOW_TRIGGER_FPS
                && self.inner.config.control_illumination
                && status.illumination_on
        };
        if switch_off {
            self.turn_off_illumination().await?;
        }
        Ok(())
    }

    async fn tick(&self) -> ScopeResult<()> {
        if self.needs_timer(self.trigger_mode()) {
            self.trigger_acquisition().await?;
        }
        if self.inner.camera.callback_enabled() {
            if let Some(frame) = self.inner.camera.read_frame().await? {
                self.on_new_frame(frame).await?;
            }
        }
        Ok(())
    }
}

fn trigger_period(fps: f64) -> Duration {
    let seconds = 1.0 / fps;
    if seconds.is_finite() && seconds > MIN_TRIGGER_PERIOD.as_secs_f64() {
        Duration::from_secs_f64(seconds)
    } else {
        MIN_TRIGGER_PERIOD
    }
}

/// Abort a live loop and wait for it to unwind.
async fn stop_loop(live_loop: Option<JoinHandle<()>>) {
    if let Some(handle) = live_loop {
        handle.abort();
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Live loop ended abnormally");
            }
        }
    }
}

async fn run_live_loop(weak: Weak<LiveInner>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let live = LiveController { inner };
        if let Err(e) = live.tick().await {
            warn!(error = %e, "Live tick failed");
        }
    }
}
