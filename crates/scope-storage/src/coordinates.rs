//! Per-time-point coordinates log (`coordinates.csv`).

use scope_core::error::{ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Stage position at which one (i, j, k) cell was imaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateRow {
    pub region: String,
    pub i: u32,
    pub j: u32,
    pub k: u32,
    #[serde(rename = "x (mm)")]
    pub x_mm: f64,
    #[serde(rename = "y (mm)")]
    pub y_mm: f64,
    #[serde(rename = "z (um)")]
    pub z_um: f64,
    /// Local wall-clock time, `%Y-%m-%d_%H-%M-%S.%6f`.
    pub time: String,
}

/// Rows accumulated during one time point.
#[derive(Debug, Default, Clone)]
pub struct CoordinatesLog {
    rows: Vec<CoordinateRow>,
}

impl CoordinatesLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: CoordinateRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[CoordinateRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write every row, with header, to `path` (overwrites).
    pub fn write_csv(&self, path: &Path) -> ScopeResult<()> {
        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| ScopeError::Storage(format!("open {}: {}", path.display(), e)))?;
        if self.rows.is_empty() {
            writer
                .write_record(["region", "i", "j", "k", "x (mm)", "y (mm)", "z (um)", "time"])
                .map_err(|e| ScopeError::Storage(e.to_string()))?;
        }
        for row in &self.rows {
            writer
                .serialize(row)
                .map_err(|e| ScopeError::Storage(e.to_string()))?;
        }
        writer.flush()?;
        tracing::debug!(path = ?path, rows = self.rows.len(), "Wrote coordinates");
        Ok(())
    }

    pub fn read_csv(path: &Path) -> ScopeResult<Self> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| ScopeError::Storage(format!("open {}: {}", path.display(), e)))?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<CoordinateRow>, _>>()
            .map_err(|e| ScopeError::Storage(e.to_string()))?;
        Ok(Self { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(i: u32, j: u32) -> CoordinateRow {
        CoordinateRow {
            region: "A1".into(),
            i,
            j,
            k: 0,
            x_mm: 1.25,
            y_mm: 2.5,
            z_um: 1000.0,
            time: "2024-01-01_00-00-00.000000".into(),
        }
    }

    #[test]
    fn csv_has_unit_headers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coordinates.csv");
        let mut log = CoordinatesLog::new();
        log.push(row(0, 0));
        log.push(row(0, 1));
        log.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, "region,i,j,k,x (mm),y (mm),z (um),time");

        let back = CoordinatesLog::read_csv(&path).unwrap();
        assert_eq!(back.rows(), log.rows());
    }

    #[test]
    fn empty_log_still_has_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coordinates.csv");
        CoordinatesLog::new().write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("region,i,j,k"));
        assert!(CoordinatesLog::read_csv(&path).unwrap().is_empty());
    }
}
