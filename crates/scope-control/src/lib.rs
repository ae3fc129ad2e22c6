//! Control core of a motorized microscope.
//!
//! - **navigation**: physical-unit stage moves, soft limits, position tracking
//! - **live**: live-view state machine, triggering and illumination
//! - **autofocus**: contrast autofocus and focus maps
//! - **laser_autofocus**: reflection-spot autofocus with a focus camera
//! - **slide_position**: loading/scanning transitions with a timeout
//! - **multipoint**: multi-dimensional acquisition with abort and unwind
//!
//! Controllers drive hardware only through the traits in
//! [`scope_core::capabilities`]. [`Microscope`] wires them together.

pub mod autofocus;
pub mod configuration_store;
pub mod devices;
pub mod focus_map;
pub mod focus_measure;
pub mod imaging;
pub mod laser_autofocus;
pub mod live;
pub mod microscope;
pub mod multipoint;
pub mod navigation;
pub mod scan_plan;
pub mod slide_position;
pub mod spot;
pub mod wait;

pub use autofocus::{AutofocusController, AutofocusOutcome, AutofocusParams, FocusSeries};
pub use configuration_store::{ConfigurationField, ConfigurationStore};
pub use devices::ImagingDevices;
pub use focus_map::FocusMap;
pub use laser_autofocus::{LaserAfCalibration, LaserAfMove, LaserAutofocusController};
pub use live::{LiveController, LiveState};
pub use microscope::Microscope;
pub use multipoint::{
    AbortHandle, AcquisitionHandle, AcquisitionReport, AcquisitionSettings, MultiPointController,
};
pub use navigation::NavigationController;
pub use scan_plan::{ScanCoordinate, ScanCoordinates, ScanPlan, WellId, WellplateFormat};
pub use slide_position::SlidePositionController;
pub use wait::Deadline;
