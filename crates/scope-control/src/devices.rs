//! Device handles shared by the scanning procedures.

use crate::imaging;
use crate::live::LiveController;
use crate::navigation::NavigationController;
use scope_core::capabilities::{Camera, Microcontroller};
use scope_core::data::Frame;
use scope_core::error::ScopeResult;
use scope_core::events::EventBus;
use scope_core::types::TriggerMode;
use std::sync::Arc;

/// Everything a focus or acquisition task drives: stage, main camera,
/// microcontroller and the live controller that owns illumination state.
#[derive(Clone)]
pub struct ImagingDevices {
    pub navigation: Arc<NavigationController>,
    pub camera: Arc<dyn Camera>,
    pub microcontroller: Arc<dyn Microcontroller>,
    pub live: LiveController,
    pub events: EventBus,
}

impl ImagingDevices {
    /// Trigger one exposure in `mode` and read the frame.
    ///
    /// Software mode switches illumination on around the exposure; hardware
    /// mode lets the microcontroller time it. `None` means the camera
    /// delivered nothing.
    pub async fn snap(&self, mode: TriggerMode) -> ScopeResult<Option<Frame>> {
        match mode {
            TriggerMode::Software => {
                self.live.turn_on_illumination().await?;
                self.camera.send_trigger().await?;
            }
            TriggerMode::Hardware => {
                let exposure_ms = self.camera.exposure_time_ms().await?;
                self.microcontroller
                    .send_hardware_trigger(true, (exposure_ms * 1000.0).round() as u64)
                    .await?;
            }
            TriggerMode::Continuous => {}
        }
        let frame = self.camera.read_frame().await?;
        if mode == TriggerMode::Software {
            self.live.turn_off_illumination().await?;
        }
        Ok(frame)
    }

    /// Centre crop, then the camera's rotation and flip.
    pub fn process(&self, frame: &Frame, crop: Option<(u32, u32)>) -> Frame {
        let cropped = match crop {
            Some((w, h)) => imaging::crop_center(frame, w, h),
            None => frame.clone(),
        };
        imaging::rotate_and_flip(&cropped, &self.camera.properties())
    }
}
