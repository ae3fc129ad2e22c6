//! Multi-dimensional acquisition: regions × Y × X (serpentine) × Z × channels,
//! repeated over time points.
//!
//! ```text
//! run_acquisition
//!   ├─ validate plan, take the Acquisition slot, stop live
//!   └─ task
//!        for t in time points (overrun slots are skipped, never queued)
//!          for region
//!            for i in rows            (Y)
//!              for j in columns       (X, direction flips every row)
//!                [contrast AF] [laser AF]
//!                for k in planes      (Z, abort polled here)
//!                  for channel: set mode, snap, process, save
//!        restore live state, publish AcquisitionFinished
//! ```
//!
//! The task keeps the accumulated microstep displacement of the current
//! region (`dx`, `dy`) and plane (`dz`) so an abort can put the stage back
//! where the grid started.

use crate::autofocus::{run_contrast_autofocus, AutofocusParams};
use crate::devices::ImagingDevices;
use crate::imaging;
use crate::laser_autofocus::LaserAutofocusController;
use crate::scan_plan::{ScanCoordinate, ScanPlan};
use chrono::Local;
use scope_core::arbiter::{Owner, ResourceArbiter, ResourceGuard};
use scope_core::config::{AcquisitionConfig, AutofocusConfig, LaserAfConfig};
use scope_core::data::Frame;
use scope_core::error::{ScopeError, ScopeResult};
use scope_core::events::ScopeEvent;
use scope_core::limits::{ABORT_POLL_INTERVAL, LED_MATRIX_SOURCE_LIMIT, Z_BACKLASH_MIN_USTEPS};
use scope_core::types::{Axis, BrightfieldSavingOption, ChannelConfiguration, TriggerMode, ZStacking};
use scope_storage::{
    AcquisitionParameters, AcquisitionWriter, CoordinateRow, ExperimentLayout, ImageKey,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Summary of a finished (or aborted) acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionReport {
    pub experiment_dir: PathBuf,
    pub images_written: u64,
    pub time_points_run: u32,
    pub time_points_skipped: u32,
    pub aborted: bool,
    /// Frames the camera failed to deliver, including autofocus planes.
    pub frame_failures: u64,
}

/// Cooperative abort flag shared with a running acquisition.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A running acquisition.
pub struct AcquisitionHandle {
    abort: AbortHandle,
    task: JoinHandle<ScopeResult<AcquisitionReport>>,
}

impl AcquisitionHandle {
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task and return its report.
    pub async fn join(self) -> ScopeResult<AcquisitionReport> {
        self.task
            .await
            .map_err(|e| ScopeError::Device(anyhow::anyhow!("acquisition task failed: {e}")))?
    }
}

/// Settings the acquisition reads from the instrument configuration.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionSettings {
    pub autofocus: AutofocusConfig,
    pub acquisition: AcquisitionConfig,
    pub laser_af: LaserAfConfig,
}

pub struct MultiPointController {
    devices: ImagingDevices,
    laser_af: Option<Arc<LaserAutofocusController>>,
    arbiter: ResourceArbiter,
    settings: AcquisitionSettings,
    abort: AbortHandle,
}

/// Live/camera state captured before a run and restored afterwards.
struct LiveSnapshot {
    was_live: bool,
    callback_was_enabled: bool,
    configuration: Option<ChannelConfiguration>,
}

impl MultiPointController {
    pub fn new(
        devices: ImagingDevices,
        laser_af: Option<Arc<LaserAutofocusController>>,
        arbiter: ResourceArbiter,
        settings: AcquisitionSettings,
    ) -> Self {
        Self {
            devices,
            laser_af,
            arbiter,
            settings,
            abort: AbortHandle::default(),
        }
    }

    /// Flag polled by the running acquisition. Shared across runs.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn abort(&self) {
        info!("Acquisition abort requested");
        self.abort.abort();
    }

    /// Run an acquisition to completion.
    pub async fn run_acquisition(&self, plan: ScanPlan) -> ScopeResult<AcquisitionReport> {
        self.start_acquisition(plan).await?.join().await
    }

    /// Validate `plan`, take over the camera and stage and spawn the
    /// acquisition task. Clears any earlier abort request.
    #[instrument(skip(self, plan), fields(experiment = %plan.experiment_id))]
    pub async fn start_acquisition(&self, plan: ScanPlan) -> ScopeResult<AcquisitionHandle> {
        plan.validate()?;
        if plan.laser_af && self.laser_af.is_none() {
            return Err(ScopeError::InvalidPlan(
                "laser autofocus requested but no focus camera is configured".into(),
            ));
        }
        if let Some(held_by) = self.arbiter.holder().filter(|o| *o != Owner::Live) {
            return Err(ScopeError::ResourceBusy {
                requested: Owner::Acquisition,
                held_by,
            });
        }

        let writer = AcquisitionWriter::create(ExperimentLayout::new(
            plan.base_path.clone(),
            plan.experiment_id.clone(),
        ))?;

        let live = &self.devices.live;
        let camera = &self.devices.camera;
        let snapshot = LiveSnapshot {
            was_live: live.is_live(),
            callback_was_enabled: camera.callback_enabled(),
            configuration: live.current_configuration(),
        };
        if snapshot.was_live {
            live.stop_live().await?;
        }
        camera.disable_callback().await?;
        let guard = match self.arbiter.try_acquire(Owner::Acquisition) {
            Ok(guard) => guard,
            Err(e) => {
                restore_live(&self.devices, &snapshot).await?;
                return Err(e);
            }
        };
        if !camera.is_streaming() {
            if let Err(e) = camera.start_streaming().await {
                drop(guard);
                restore_live(&self.devices, &snapshot).await?;
                return Err(e.into());
            }
        }
        self.devices.navigation.set_joystick_button_action(false);
        self.abort.reset();

        let trigger_mode = live.trigger_mode();
        let task = AcquisitionTask {
            af_params: AutofocusParams::from_config(&self.settings.autofocus, trigger_mode),
            fovs_per_af: self.settings.autofocus.fovs_per_af.max(1),
            contrast_af_before_laser_init: self.settings.laser_af.contrast_af_before_init,
            acquisition: self.settings.acquisition.clone(),
            devices: self.devices.clone(),
            laser_af: self.laser_af.clone(),
            abort: self.abort.clone(),
            trigger_mode,
            regions: plan.coordinates.as_ref().map(|c| c.coordinates.clone()),
            plan,
            writer,
            grid: GridState::default(),
            frame_failures: 0,
        };
        info!(
            images_per_time_point = task.plan.images_per_time_point(),
            time_points = task.plan.nt,
            "Acquisition starting"
        );

        let devices = self.devices.clone();
        let handle = tokio::spawn(async move { finish(devices, task.run().await, snapshot, guard).await });
        Ok(AcquisitionHandle {
            abort: self.abort.clone(),
            task: handle,
        })
    }
}

async fn restore_live(devices: &ImagingDevices, snapshot: &LiveSnapshot) -> ScopeResult<()> {
    if let Some(configuration) = &snapshot.configuration {
        devices.live.set_microscope_mode(configuration).await?;
    }
    if snapshot.callback_was_enabled {
        devices.camera.stop_streaming().await?;
        devices.camera.enable_callback().await?;
        devices.camera.start_streaming().await?;
    }
    if snapshot.was_live {
        devices.live.start_live().await?;
    }
    Ok(())
}

/// Release the instrument after the task, whatever its outcome.
async fn finish(
    devices: ImagingDevices,
    result: ScopeResult<AcquisitionReport>,
    snapshot: LiveSnapshot,
    guard: ResourceGuard,
) -> ScopeResult<AcquisitionReport> {
    devices.navigation.set_joystick_button_action(true);
    drop(guard);
    let restored = restore_live(&devices, &snapshot).await;
    let aborted = result.as_ref().map_or(true, |r| r.aborted);
    devices
        .events
        .publish(ScopeEvent::AcquisitionFinished { aborted });
    match &result {
        Ok(report) => info!(
            images = report.images_written,
            time_points = report.time_points_run,
            skipped = report.time_points_skipped,
            aborted = report.aborted,
            "Acquisition finished"
        ),
        Err(e) => warn!(error = %e, "Acquisition failed"),
    }
    let report = result?;
    restored?;
    Ok(report)
}

/// Displacement bookkeeping of the current region, in stage-direction microsteps.
#[derive(Debug, Default)]
struct GridState {
    dx: i64,
    dy: i64,
    /// Z displacement from the start of the current cell's stack.
    dz: i64,
    /// +1 while scanning X forward, -1 on the way back.
    direction: i64,
    fov_counter: u32,
}

enum Flow {
    Continue,
    Aborted,
}

struct AcquisitionTask {
    devices: ImagingDevices,
    laser_af: Option<Arc<LaserAutofocusController>>,
    plan: ScanPlan,
    /// Mutable copy of the plan's regions; autofocus refreshes their Z.
    regions: Option<Vec<ScanCoordinate>>,
    af_params: AutofocusParams,
    fovs_per_af: u32,
    contrast_af_before_laser_init: bool,
    acquisition: AcquisitionConfig,
    trigger_mode: TriggerMode,
    abort: AbortHandle,
    writer: AcquisitionWriter,
    grid: GridState,
    frame_failures: u64,
}

impl AcquisitionTask {
    async fn run(mut self) -> ScopeResult<AcquisitionReport> {
        self.writer.write_parameters(&self.parameters())?;

        let dt = Duration::from_secs_f64(self.plan.delta_t_s);
        let nt = self.plan.nt;
        let start = Instant::now();
        let (mut t, mut run, mut skipped) = (0u32, 0u32, 0u32);
        let mut aborted = false;

        while t < nt {
            info!(time_point = t, "Time point");
            let flow = self.run_time_point(t).await?;
            run += 1;
            if matches!(flow, Flow::Aborted) {
                aborted = true;
                break;
            }
            t += 1;
            if dt.is_zero() {
                continue;
            }
            while t < nt && start.elapsed() > dt * t {
                warn!(time_point = t, "Previous time point overran, skipping");
                skipped += 1;
                t += 1;
            }
            if t >= nt {
                break;
            }
            if self.wait_until(start + dt * t).await {
                info!(next_time_point = t, "Acquisition aborted between time points");
                aborted = true;
                break;
            }
        }

        self.writer.finish()?;
        Ok(AcquisitionReport {
            experiment_dir: self.writer.layout().experiment_dir(),
            images_written: self.writer.images_written(),
            time_points_run: run,
            time_points_skipped: skipped,
            aborted,
            frame_failures: self.frame_failures,
        })
    }

    /// Sleep until `target`, polling the abort flag. Returns true on abort.
    async fn wait_until(&self, target: Instant) -> bool {
        loop {
            if self.abort.is_aborted() {
                return true;
            }
            let now = Instant::now();
            if now >= target {
                return false;
            }
            sleep(ABORT_POLL_INTERVAL.min(target - now)).await;
        }
    }

    fn parameters(&self) -> AcquisitionParameters {
        let plan = &self.plan;
        AcquisitionParameters {
            run_uid: Uuid::new_v4(),
            experiment_id: plan.experiment_id.clone(),
            started: Local::now(),
            dx_mm: plan.delta_x_mm,
            nx: plan.nx,
            dy_mm: plan.delta_y_mm,
            ny: plan.ny,
            dz_um: plan.delta_z_um,
            nz: plan.nz,
            dt_s: plan.delta_t_s,
            nt: plan.nt,
            with_af: plan.contrast_af,
            with_reflection_af: plan.laser_af,
            z_stacking: plan.z_stacking,
            channels: plan.configurations.iter().map(|c| c.name.clone()).collect(),
            regions: plan
                .coordinates
                .as_ref()
                .map(|c| c.names())
                .unwrap_or_default(),
        }
    }

    async fn run_time_point(&mut self, t: u32) -> ScopeResult<Flow> {
        self.writer.begin_time_point(t)?;
        let region_count = self.regions.as_ref().map_or(1, Vec::len);
        for index in 0..region_count {
            if let Flow::Aborted = self.scan_region(t, index, region_count).await? {
                self.writer.flush_time_point()?;
                return Ok(Flow::Aborted);
            }
        }
        self.writer.flush_time_point()?;
        Ok(Flow::Continue)
    }

    fn region_name(&self, index: usize) -> String {
        self.regions
            .as_ref()
            .and_then(|r| r.get(index))
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    /// Move to the grid origin of a named region.
    async fn move_to_region(&self, region: &ScanCoordinate) -> ScopeResult<()> {
        let nav = &self.devices.navigation;
        let plan = &self.plan;
        let x0 = region.x_mm - plan.delta_x_mm * f64::from(plan.nx - 1) / 2.0;
        let y0 = region.y_mm - plan.delta_y_mm * f64::from(plan.ny - 1) / 2.0;
        debug!(region = %region.name, x0, y0, "Moving to region");
        nav.move_to(x0, y0).await?;
        nav.wait_till_idle().await?;

        if let Some(z_mm) = region.z_mm {
            if z_mm < nav.position().z_mm {
                // approach from below
                let backlash = nav.config().z_backlash_usteps();
                let target = nav.mm_to_usteps(Axis::Z, z_mm);
                nav.move_to_usteps(Axis::Z, target - backlash).await?;
                nav.wait_till_idle().await?;
                nav.step(Axis::Z, backlash).await?;
            } else {
                nav.move_absolute(Axis::Z, z_mm).await?;
                nav.wait_till_idle().await?;
            }
        }
        Ok(())
    }

    async fn scan_region(&mut self, t: u32, index: usize, region_count: usize) -> ScopeResult<Flow> {
        let region = self.regions.as_ref().and_then(|r| r.get(index)).cloned();
        if let Some(region) = &region {
            self.move_to_region(region).await?;
        }
        let name = self.region_name(index);
        let nav = Arc::clone(&self.devices.navigation);
        let plan = &self.plan;
        let (nx, ny) = (plan.nx, plan.ny);
        let dx = nav.mm_to_usteps(Axis::X, plan.delta_x_mm);
        let dy = nav.mm_to_usteps(Axis::Y, plan.delta_y_mm);

        self.grid = GridState {
            direction: 1,
            ..GridState::default()
        };
        let z_start = nav.z_usteps();

        for i in 0..ny {
            self.grid.fov_counter = 0;
            for step in 0..nx {
                let j = if self.grid.direction > 0 { step } else { nx - 1 - step };
                if let Flow::Aborted = self.image_cell(t, index, &name, i, j).await? {
                    self.unwind().await?;
                    return Ok(Flow::Aborted);
                }
                self.grid.fov_counter += 1;
                if step < nx - 1 {
                    let delta = self.grid.direction * dx;
                    nav.step(Axis::X, delta).await?;
                    self.grid.dx += delta;
                }
            }
            self.grid.direction = -self.grid.direction;
            if i < ny - 1 {
                nav.step(Axis::Y, dy).await?;
                self.grid.dy += dy;
            }
        }

        if region_count == 1 {
            nav.step(Axis::Y, -dy * i64::from(ny - 1)).await?;
            if self.grid.direction < 0 {
                nav.step(Axis::X, -dx * i64::from(nx - 1)).await?;
            }
            nav.move_to_usteps(Axis::Z, z_start).await?;
            nav.wait_till_idle().await?;
        }
        Ok(Flow::Continue)
    }

    async fn image_cell(
        &mut self,
        t: u32,
        region_index: usize,
        region: &str,
        i: u32,
        j: u32,
    ) -> ScopeResult<Flow> {
        if self.abort.is_aborted() {
            return Ok(Flow::Aborted);
        }
        let plan = &self.plan;
        let af_due = (plan.nz == 1 || plan.z_stacking == ZStacking::FromCenter)
            && plan.contrast_af
            && self.grid.fov_counter % self.fovs_per_af == 0;
        if af_due {
            self.contrast_autofocus().await?;
            let z_mm = self.devices.navigation.position().z_mm;
            if let Some(r) = self.regions.as_mut().and_then(|r| r.get_mut(region_index)) {
                r.z_mm = Some(z_mm);
            }
        }
        if self.plan.laser_af {
            self.laser_autofocus(t, region, i, j).await?;
        }
        self.z_stack(t, region, i, j).await
    }

    async fn contrast_autofocus(&mut self) -> ScopeResult<()> {
        if let Some(channel) = self.plan.autofocus_channel() {
            self.devices.live.set_microscope_mode(channel).await?;
        }
        match run_contrast_autofocus(&self.devices, &self.af_params).await {
            Ok(outcome) => {
                debug!(best_index = outcome.best_index, "Cell autofocus done");
                Ok(())
            }
            Err(ScopeError::FrameUnavailable(reason)) => {
                warn!(%reason, "Autofocus got no frames, keeping current Z");
                self.frame_failures += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn laser_autofocus(&mut self, t: u32, region: &str, i: u32, j: u32) -> ScopeResult<()> {
        let Some(laser) = self.laser_af.clone() else {
            return Ok(());
        };
        if !laser.is_initialized() {
            info!("Initializing laser autofocus at the first field of view");
            laser.initialize_auto().await?;
            if self.contrast_af_before_laser_init {
                self.contrast_autofocus().await?;
            }
            laser.set_reference().await?;
            return Ok(());
        }

        for attempt in 0..2 {
            match laser.move_to_target(0.0).await {
                Ok(correction) => debug!(
                    attempt,
                    moved_um = correction.moved_um,
                    residual_um = correction.residual_um,
                    "Laser AF correction"
                ),
                Err(e) => {
                    warn!(error = %e, region, i, j, "Laser autofocus failed, imaging at current Z");
                    if let Some(frame) = laser.last_frame() {
                        let name = format!("{region}_{i}_{j}_laser_af_failed");
                        self.writer.save_aux_image(t, &name, &frame)?;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    async fn z_stack(&mut self, t: u32, region: &str, i: u32, j: u32) -> ScopeResult<Flow> {
        let nav = Arc::clone(&self.devices.navigation);
        let nz = self.plan.nz;
        let from_center = self.plan.z_stacking == ZStacking::FromCenter;
        let dz = nav.mm_to_usteps(Axis::Z, self.plan.delta_z_um / 1000.0);
        let half = dz * i64::from((nz - 1) / 2);
        self.grid.dz = 0;

        if nz > 1 {
            if from_center {
                nav.step(Axis::Z, -half).await?;
                self.grid.dz -= half;
            }
            nav.step(Axis::Z, -Z_BACKLASH_MIN_USTEPS).await?;
            nav.step(Axis::Z, Z_BACKLASH_MIN_USTEPS).await?;
        }

        for k in 0..nz {
            if self.abort.is_aborted() {
                return Ok(Flow::Aborted);
            }
            self.devices.events.publish(ScopeEvent::AcquisitionProgress {
                time_point: t,
                region: region.to_string(),
                i,
                j,
                k,
            });
            let configurations = self.plan.configurations.clone();
            for configuration in &configurations {
                self.image_channel(t, region, (i, j, k), configuration).await?;
            }
            let position = nav.position();
            self.writer.append_coordinate(CoordinateRow {
                region: region.to_string(),
                i,
                j,
                k,
                x_mm: position.x_mm,
                y_mm: position.y_mm,
                z_um: position.z_um(),
                time: Local::now().format("%Y-%m-%d_%H-%M-%S%.6f").to_string(),
            });
            if k < nz - 1 {
                nav.step(Axis::Z, dz).await?;
                self.grid.dz += dz;
            }
        }

        if nz > 1 {
            let backlash = nav.config().z_backlash_usteps();
            let travelled = dz * i64::from(nz - 1);
            let back = if from_center { -travelled + half } else { -travelled };
            nav.step(Axis::Z, back - backlash).await?;
            nav.step(Axis::Z, backlash).await?;
        }
        self.grid.dz = 0;
        Ok(Flow::Continue)
    }

    async fn image_channel(
        &mut self,
        t: u32,
        region: &str,
        (i, j, k): (u32, u32, u32),
        configuration: &ChannelConfiguration,
    ) -> ScopeResult<()> {
        let nav = Arc::clone(&self.devices.navigation);
        let offset = configuration
            .z_offset_um
            .filter(|um| *um != 0.0)
            .map(|um| nav.mm_to_usteps(Axis::Z, um / 1000.0))
            .unwrap_or(0);
        if offset != 0 {
            nav.step(Axis::Z, offset).await?;
        }

        self.devices.live.set_microscope_mode(configuration).await?;
        match self.devices.snap(self.trigger_mode).await? {
            Some(frame) => {
                let frame = self.devices.process(&frame, self.crop());
                let frame = convert_colour(frame, configuration, self.acquisition.brightfield_saving);
                let position = nav.position();
                let key = ImageKey {
                    time_point: t,
                    region,
                    i,
                    j,
                    k,
                    channel: &configuration.file_label(),
                };
                let path = self
                    .writer
                    .save_image(&key, &frame, (position.x_mm, position.y_mm, position.z_um()))?;
                debug!(path = ?path, "Image saved");
                self.devices
                    .events
                    .publish(ScopeEvent::ImageToDisplay(Arc::new(frame)));
            }
            None => {
                warn!(region, i, j, k, channel = %configuration.name, "No frame delivered, skipping");
                self.frame_failures += 1;
            }
        }

        if offset != 0 {
            nav.step(Axis::Z, -offset).await?;
        }
        Ok(())
    }

    fn crop(&self) -> Option<(u32, u32)> {
        self.acquisition.crop_width.zip(self.acquisition.crop_height)
    }

    /// Undo the grid displacement after an abort.
    async fn unwind(&mut self) -> ScopeResult<()> {
        warn!(
            dx = self.grid.dx,
            dy = self.grid.dy,
            dz = self.grid.dz,
            "Acquisition aborted, returning stage to the grid origin"
        );
        self.devices.live.turn_off_illumination().await?;
        let nav = Arc::clone(&self.devices.navigation);
        if self.grid.dx != 0 {
            nav.step(Axis::X, -self.grid.dx).await?;
        }
        if self.grid.dy != 0 {
            nav.step(Axis::Y, -self.grid.dy).await?;
        }
        let backlash = nav.config().z_backlash_usteps();
        nav.step(Axis::Z, -self.grid.dz - backlash).await?;
        nav.step(Axis::Z, backlash).await?;
        self.grid = GridState::default();
        Ok(())
    }
}

/// Brightfield frames from colour sensors follow the saving option;
/// everything else is stored as delivered.
fn convert_colour(
    frame: Frame,
    configuration: &ChannelConfiguration,
    saving: BrightfieldSavingOption,
) -> Frame {
    if !frame.is_color() || configuration.illumination_source >= LED_MATRIX_SOURCE_LIMIT {
        return frame;
    }
    match saving {
        BrightfieldSavingOption::Raw => frame,
        BrightfieldSavingOption::Rgb2Gray => imaging::to_gray(&frame),
        BrightfieldSavingOption::GreenChannelOnly => imaging::green_channel(&frame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb() -> Frame {
        Frame::from_rgb8(2, 1, vec![10, 20, 30, 40, 50, 60])
    }

    fn channel(source: u32) -> ChannelConfiguration {
        let mut configuration = ChannelConfiguration::new(0, "channel");
        configuration.illumination_source = source;
        configuration
    }

    #[test]
    fn brightfield_colour_follows_the_saving_option() {
        let brightfield = channel(0);
        let raw = convert_colour(rgb(), &brightfield, BrightfieldSavingOption::Raw);
        assert_eq!(raw, rgb());

        let green = convert_colour(rgb(), &brightfield, BrightfieldSavingOption::GreenChannelOnly);
        assert_eq!(green.channels, 1);
        assert_eq!(green.data, vec![20, 50]);

        let gray = convert_colour(rgb(), &brightfield, BrightfieldSavingOption::Rgb2Gray);
        assert_eq!(gray.channels, 1);
        assert_eq!(gray.width, 2);
    }

    #[test]
    fn fluorescence_and_mono_frames_are_untouched() {
        let fluorescence = channel(12);
        let kept = convert_colour(rgb(), &fluorescence, BrightfieldSavingOption::GreenChannelOnly);
        assert_eq!(kept, rgb());

        let mono = Frame::from_u8(2, 1, vec![1, 2]);
        let kept = convert_colour(mono.clone(), &channel(0), BrightfieldSavingOption::Rgb2Gray);
        assert_eq!(kept, mono);
    }
}
