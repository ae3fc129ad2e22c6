//! Persistence for multi-dimensional acquisitions.
//!
//! Directory layout of one experiment:
//!
//! ```text
//! <base>/<experiment_id>/
//!     acquisition parameters.json
//!     tiles.json
//!     0/                              time point
//!         coordinates.csv
//!         <region>_<i>_<j>_<k>_<channel>.tiff
//!     1/
//!         ...
//! ```

pub mod coordinates;
pub mod layout;
pub mod parameters;
pub mod tiff_writer;
pub mod tiles;
mod writer;

pub use coordinates::{CoordinateRow, CoordinatesLog};
pub use layout::ExperimentLayout;
pub use parameters::AcquisitionParameters;
pub use tiff_writer::TiffWriter;
pub use tiles::{TileIndex, TileRecord};
pub use writer::{AcquisitionWriter, ImageKey};
