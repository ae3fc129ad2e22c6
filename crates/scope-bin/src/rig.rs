//! Simulated instrument behind the CLI.

use scope_control::Microscope;
use scope_core::capabilities::Camera;
use scope_core::config::StageConfig;
use scope_core::error::ScopeResult;
use scope_core::ScopeConfig;
use scope_driver_mock::{FocusTarget, LaserSpot, MockCamera, MockMicrocontroller};
use std::sync::Arc;

const MAIN_SENSOR: (u32, u32) = (512, 512);
const FOCUS_SENSOR: (u32, u32) = (2048, 512);
/// Height of the simulated sample's best focus.
const SAMPLE_FOCUS_Z_MM: f64 = 0.002;

fn z_mm_per_count(stage: &StageConfig) -> f64 {
    f64::from(stage.z.movement_sign) * stage.z.screw_pitch_mm / stage.z.usteps_per_rev()
}

/// A microscope on mock hardware: a focus-target main camera and a
/// laser-spot focus camera, both following the mock stage.
pub async fn simulated_microscope(config: ScopeConfig) -> ScopeResult<Microscope> {
    let mcu = Arc::new(MockMicrocontroller::new());
    let scale = z_mm_per_count(&config.stage);

    let target = FocusTarget::new(mcu.probe(), scale, SAMPLE_FOCUS_Z_MM);
    let camera: Arc<dyn Camera> = Arc::new(
        MockCamera::builder(MAIN_SENSOR.0, MAIN_SENSOR.1)
            .scene(Arc::new(target))
            .build(),
    );

    let spot = LaserSpot::new(
        mcu.probe(),
        scale,
        f64::from(FOCUS_SENSOR.0) / 2.0,
        f64::from(FOCUS_SENSOR.1) / 2.0,
    );
    let focus_camera: Arc<dyn Camera> = Arc::new(
        MockCamera::builder(FOCUS_SENSOR.0, FOCUS_SENSOR.1)
            .scene(Arc::new(spot))
            .build(),
    );

    Microscope::new(config, mcu, camera, Some(focus_camera)).await
}
