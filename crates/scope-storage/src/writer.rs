//! Acquisition sink: images, coordinates and tile index of one experiment.

use crate::coordinates::{CoordinateRow, CoordinatesLog};
use crate::layout::ExperimentLayout;
use crate::parameters::AcquisitionParameters;
use crate::tiff_writer::TiffWriter;
use crate::tiles::{TileIndex, TileRecord};
use scope_core::data::Frame;
use scope_core::error::{ScopeError, ScopeResult};
use std::path::PathBuf;

/// Grid address of one saved image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageKey<'a> {
    pub time_point: u32,
    pub region: &'a str,
    pub i: u32,
    pub j: u32,
    pub k: u32,
    pub channel: &'a str,
}

/// Writes one experiment to disk.
///
/// Images go straight to disk; coordinate rows are buffered per time point
/// and flushed by [`flush_time_point`](Self::flush_time_point), which is
/// also what an aborted run calls to keep the partial log.
#[derive(Debug)]
pub struct AcquisitionWriter {
    layout: ExperimentLayout,
    coordinates: CoordinatesLog,
    current_time_point: Option<u32>,
    tiles: TileIndex,
    images_written: u64,
}

impl AcquisitionWriter {
    /// Create the experiment directory.
    pub fn create(layout: ExperimentLayout) -> ScopeResult<Self> {
        std::fs::create_dir_all(layout.experiment_dir())?;
        tracing::info!(dir = ?layout.experiment_dir(), "Experiment directory created");
        Ok(Self {
            layout,
            coordinates: CoordinatesLog::new(),
            current_time_point: None,
            tiles: TileIndex::default(),
            images_written: 0,
        })
    }

    pub fn layout(&self) -> &ExperimentLayout {
        &self.layout
    }

    pub fn write_parameters(&self, parameters: &AcquisitionParameters) -> ScopeResult<()> {
        parameters.write_json(&self.layout.parameters_path())
    }

    /// Create `<experiment>/<t>/` and start a fresh coordinates log.
    pub fn begin_time_point(&mut self, time_point: u32) -> ScopeResult<PathBuf> {
        let dir = self.layout.time_point_dir(time_point);
        std::fs::create_dir_all(&dir)?;
        self.coordinates = CoordinatesLog::new();
        self.current_time_point = Some(time_point);
        Ok(dir)
    }

    /// Save a frame and index it. `position` is (x mm, y mm, z um).
    pub fn save_image(
        &mut self,
        key: &ImageKey<'_>,
        frame: &Frame,
        position: (f64, f64, f64),
    ) -> ScopeResult<PathBuf> {
        let path = self
            .layout
            .image_path(key.time_point, key.region, (key.i, key.j, key.k), key.channel);
        TiffWriter::write_frame(frame, &path)
            .map_err(|e| ScopeError::Storage(format!("{e:#}")))?;

        let relative = path
            .strip_prefix(self.layout.experiment_dir())
            .map(PathBuf::from)
            .unwrap_or_else(|_| path.clone());
        self.tiles.push(TileRecord {
            time_point: key.time_point,
            region: key.region.to_string(),
            i: key.i,
            j: key.j,
            k: key.k,
            channel: key.channel.to_string(),
            x_mm: position.0,
            y_mm: position.1,
            z_um: position.2,
            path: relative,
        });
        self.images_written += 1;
        Ok(path)
    }

    /// Save an auxiliary frame (e.g. a failed focus image) under the current time point.
    pub fn save_aux_image(&self, time_point: u32, name: &str, frame: &Frame) -> ScopeResult<PathBuf> {
        let path = self
            .layout
            .time_point_dir(time_point)
            .join(format!("{}.{}", name, crate::layout::IMAGE_EXTENSION));
        TiffWriter::write_frame(frame, &path)
            .map_err(|e| ScopeError::Storage(format!("{e:#}")))?;
        Ok(path)
    }

    pub fn append_coordinate(&mut self, row: CoordinateRow) {
        self.coordinates.push(row);
    }

    pub fn coordinates(&self) -> &CoordinatesLog {
        &self.coordinates
    }

    /// Write the current time point's coordinates log.
    pub fn flush_time_point(&self) -> ScopeResult<()> {
        let Some(time_point) = self.current_time_point else {
            return Ok(());
        };
        self.coordinates
            .write_csv(&self.layout.coordinates_path(time_point))
    }

    /// Write the tile index. Call once at the end of the run.
    pub fn finish(&self) -> ScopeResult<()> {
        self.tiles.write_json(&self.layout.tiles_path())?;
        tracing::info!(
            experiment = self.layout.experiment_id(),
            images = self.images_written,
            "Acquisition data written"
        );
        Ok(())
    }

    pub fn tiles(&self) -> &TileIndex {
        &self.tiles
    }

    pub fn images_written(&self) -> u64 {
        self.images_written
    }
}
