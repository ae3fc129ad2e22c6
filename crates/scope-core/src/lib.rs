//! Core types and traits for the microscope control stack.
//!
//! This crate holds everything the controllers, drivers and storage layers
//! agree on:
//!
//! - **capabilities**: async device traits (stage, illumination, trigger, camera)
//! - **types**: axes, positions, trigger modes, channel configurations
//! - **data**: the [`Frame`](data::Frame) image container
//! - **config**: figment-backed [`ScopeConfig`](config::ScopeConfig)
//! - **arbiter**: single-owner arbitration of the shared camera/stage
//! - **events**: broadcast notifications for UI consumers
//! - **error**: the [`ScopeError`](error::ScopeError) taxonomy

pub mod arbiter;
pub mod capabilities;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod limits;
pub mod types;

pub use arbiter::{Owner, ResourceArbiter, ResourceGuard};
pub use config::ScopeConfig;
pub use data::Frame;
pub use error::{ScopeError, ScopeResult};
pub use events::{EventBus, ScopeEvent};
