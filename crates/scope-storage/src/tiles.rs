//! Tile index for downstream stitching (`tiles.json`).

use scope_core::error::ScopeResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One saved image and where the stage was when it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub time_point: u32,
    pub region: String,
    pub i: u32,
    pub j: u32,
    pub k: u32,
    pub channel: String,
    pub x_mm: f64,
    pub y_mm: f64,
    pub z_um: f64,
    /// Relative to the experiment directory.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileIndex {
    pub tiles: Vec<TileRecord>,
}

impl TileIndex {
    pub fn push(&mut self, record: TileRecord) {
        self.tiles.push(record);
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tiles of one region and channel at one time point, ordered by (k, i, j).
    pub fn region_channel(&self, time_point: u32, region: &str, channel: &str) -> Vec<&TileRecord> {
        let mut tiles: Vec<&TileRecord> = self
            .tiles
            .iter()
            .filter(|t| t.time_point == time_point && t.region == region && t.channel == channel)
            .collect();
        tiles.sort_by_key(|t| (t.k, t.i, t.j));
        tiles
    }

    pub fn write_json(&self, path: &Path) -> ScopeResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!(path = ?path, tiles = self.tiles.len(), "Wrote tile index");
        Ok(())
    }

    pub fn read_json(path: &Path) -> ScopeResult<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(i: u32, j: u32, channel: &str) -> TileRecord {
        TileRecord {
            time_point: 0,
            region: "B2".into(),
            i,
            j,
            k: 0,
            channel: channel.into(),
            x_mm: j as f64,
            y_mm: i as f64,
            z_um: 0.0,
            path: PathBuf::from(format!("0/B2_{i}_{j}_0_{channel}.tiff")),
        }
    }

    #[test]
    fn region_channel_filters_and_orders() {
        let mut index = TileIndex::default();
        index.push(tile(1, 0, "BF"));
        index.push(tile(0, 1, "BF"));
        index.push(tile(0, 0, "DAPI"));
        index.push(tile(0, 0, "BF"));

        let bf = index.region_channel(0, "B2", "BF");
        let order: Vec<(u32, u32)> = bf.iter().map(|t| (t.i, t.j)).collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0)]);
        assert!(index.region_channel(1, "B2", "BF").is_empty());
    }
}
