//! Simulated hardware for the microscope control stack.
//!
//! All mock devices are async-safe (`tokio::time::sleep`, never
//! `std::thread::sleep`) and expose inspection hooks for tests.
//!
//! # Available Mock Devices
//!
//! - [`MockMicrocontroller`] - stage counters, soft limits, busy flag,
//!   illumination, AF laser and hardware triggering
//! - [`MockCamera`] - trigger modes, ROI, dropped-frame injection
//!
//! # Scenes
//!
//! Cameras render frames from a [`SceneModel`]:
//!
//! - [`TestPattern`] - static gradient and checkerboard
//! - [`FocusTarget`] - contrast that peaks at a chosen stage height
//! - [`LaserSpot`] - reflected laser spot that shifts with stage height
//!
//! ```rust,ignore
//! let mcu = Arc::new(MockMicrocontroller::new());
//! let scene = FocusTarget::new(mcu.probe(), z_mm_per_count, 0.010);
//! let camera = MockCamera::builder(256, 256).scene(Arc::new(scene)).build();
//! ```

pub mod common;
mod mock_camera;
mod mock_microcontroller;
mod scene;

pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng};

pub use mock_camera::{MockCamera, MockCameraBuilder, MockCameraConfig};
pub use mock_microcontroller::{
    MockMicrocontroller, MockMicrocontrollerBuilder, MockMicrocontrollerConfig, MotionCommand,
    PositionProbe,
};
pub use scene::{FocusTarget, LaserSpot, RenderRequest, SceneModel, SecondInterface, TestPattern};
