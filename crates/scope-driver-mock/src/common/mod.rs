//! Shared infrastructure for the simulated devices.
//!
//! - **mode**: how quickly simulated hardware responds
//! - **errors**: scripted and random failure injection
//! - **rng**: seeded randomness for reproducible noise and failures

pub mod errors;
pub mod mode;
pub mod rng;

pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use rng::MockRng;
