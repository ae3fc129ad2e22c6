//! Wiring of the controllers around one set of devices.

use crate::autofocus::AutofocusController;
use crate::configuration_store::ConfigurationStore;
use crate::devices::ImagingDevices;
use crate::laser_autofocus::LaserAutofocusController;
use crate::live::LiveController;
use crate::multipoint::{AcquisitionSettings, MultiPointController};
use crate::navigation::NavigationController;
use crate::slide_position::SlidePositionController;
use scope_core::arbiter::ResourceArbiter;
use scope_core::capabilities::{Camera, Microcontroller, StageDriver};
use scope_core::config::ScopeConfig;
use scope_core::error::ScopeResult;
use scope_core::events::EventBus;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Every controller of one instrument, sharing one arbiter and event bus.
pub struct Microscope {
    pub config: ScopeConfig,
    pub events: EventBus,
    pub arbiter: ResourceArbiter,
    pub navigation: Arc<NavigationController>,
    pub live: LiveController,
    /// Live view of the focus camera. It has its own arbiter: the focus
    /// camera is not shared with the main imaging path.
    pub focus_live: Option<LiveController>,
    pub autofocus: AutofocusController,
    pub laser_af: Option<Arc<LaserAutofocusController>>,
    pub slide: Arc<SlidePositionController>,
    pub multipoint: MultiPointController,
    pub configurations: ConfigurationStore,
    position_listener: JoinHandle<()>,
}

impl Microscope {
    /// Build the controllers, start position tracking and read the current
    /// stage position. A cached laser-AF calibration is restored if present.
    pub async fn new<M>(
        config: ScopeConfig,
        microcontroller: Arc<M>,
        camera: Arc<dyn Camera>,
        focus_camera: Option<Arc<dyn Camera>>,
    ) -> ScopeResult<Self>
    where
        M: Microcontroller + 'static,
    {
        let events = EventBus::new();
        let arbiter = ResourceArbiter::new();
        let stage: Arc<dyn StageDriver> = microcontroller.clone();
        let mcu: Arc<dyn Microcontroller> = microcontroller;

        let navigation = Arc::new(NavigationController::new(
            stage,
            config.stage.clone(),
            events.clone(),
        ));
        let position_listener = navigation.spawn_position_listener();
        navigation.refresh_position().await?;

        let live = LiveController::new(
            Arc::clone(&camera),
            Arc::clone(&mcu),
            arbiter.clone(),
            events.clone(),
            config.live.clone(),
        );
        let devices = ImagingDevices {
            navigation: Arc::clone(&navigation),
            camera,
            microcontroller: Arc::clone(&mcu),
            live: live.clone(),
            events: events.clone(),
        };

        let (focus_live, laser_af) = match focus_camera {
            Some(focus_camera) => {
                let focus_live = LiveController::for_displacement_measurement(
                    Arc::clone(&focus_camera),
                    Arc::clone(&mcu),
                    ResourceArbiter::new(),
                    events.clone(),
                    config.live.clone(),
                );
                let laser_af = Arc::new(LaserAutofocusController::new(
                    focus_camera,
                    Arc::clone(&mcu),
                    Arc::clone(&navigation),
                    arbiter.clone(),
                    events.clone(),
                    config.laser_af.clone(),
                ));
                if laser_af.load_cache().await?.is_some() {
                    info!("Laser AF ready from cached calibration");
                }
                (Some(focus_live), Some(laser_af))
            }
            None => (None, None),
        };

        let autofocus =
            AutofocusController::new(devices.clone(), arbiter.clone(), config.autofocus.clone());
        let slide = Arc::new(SlidePositionController::new(
            Arc::clone(&navigation),
            live.clone(),
            arbiter.clone(),
            events.clone(),
            config.slide.clone(),
        ));
        let multipoint = MultiPointController::new(
            devices,
            laser_af.clone(),
            arbiter.clone(),
            AcquisitionSettings {
                autofocus: config.autofocus.clone(),
                acquisition: config.acquisition.clone(),
                laser_af: config.laser_af.clone(),
            },
        );

        info!(
            laser_af = laser_af.is_some(),
            "Microscope controllers initialized"
        );
        Ok(Self {
            config,
            events,
            arbiter,
            navigation,
            live,
            focus_live,
            autofocus,
            laser_af,
            slide,
            multipoint,
            configurations: ConfigurationStore::with_defaults(),
            position_listener,
        })
    }
}

impl Drop for Microscope {
    fn drop(&mut self) {
        self.position_listener.abort();
    }
}
