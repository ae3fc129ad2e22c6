//! Acquisition plans and the regions they visit.

use scope_core::error::{ScopeError, ScopeResult};
use scope_core::types::{ChannelConfiguration, ZStacking};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Named region centre. Regions without Z keep the current focus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCoordinate {
    pub name: String,
    pub x_mm: f64,
    pub y_mm: f64,
    #[serde(default)]
    pub z_mm: Option<f64>,
}

impl ScanCoordinate {
    pub fn new(name: impl Into<String>, x_mm: f64, y_mm: f64) -> Self {
        Self {
            name: name.into(),
            x_mm,
            y_mm,
            z_mm: None,
        }
    }

    pub fn with_z(mut self, z_mm: f64) -> Self {
        self.z_mm = Some(z_mm);
        self
    }
}

/// Ordered list of regions, visited in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanCoordinates {
    pub coordinates: Vec<ScanCoordinate>,
}

impl ScanCoordinates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, coordinate: ScanCoordinate) {
        self.coordinates.push(coordinate);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScanCoordinate> {
        self.coordinates.iter()
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.coordinates.iter().map(|c| c.name.clone()).collect()
    }
}

impl FromIterator<ScanCoordinate> for ScanCoordinates {
    fn from_iter<I: IntoIterator<Item = ScanCoordinate>>(iter: I) -> Self {
        Self {
            coordinates: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Well plates
// =============================================================================

/// Well address such as `B3`: zero-based row and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WellId {
    pub row: u32,
    pub column: u32,
}

impl WellId {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for WellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = char::from(b'A' + (self.row % 26) as u8);
        write!(f, "{}{}", letter, self.column + 1)
    }
}

impl FromStr for WellId {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let row = chars
            .next()
            .filter(char::is_ascii_alphabetic)
            .map(|c| u32::from(c.to_ascii_uppercase()) - u32::from('A'))
            .ok_or_else(|| ScopeError::InvalidPlan(format!("invalid well id '{s}'")))?;
        let column: u32 = chars
            .as_str()
            .parse()
            .ok()
            .filter(|c| *c >= 1)
            .ok_or_else(|| ScopeError::InvalidPlan(format!("invalid well id '{s}'")))?;
        Ok(Self {
            row,
            column: column - 1,
        })
    }
}

/// Geometry of a standard multi-well plate, in stage millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WellplateFormat {
    pub wells: u32,
    pub a1_x_mm: f64,
    pub a1_y_mm: f64,
    pub spacing_mm: f64,
    pub well_size_mm: f64,
    pub rows: u32,
    pub columns: u32,
}

impl WellplateFormat {
    /// The 6, 12, 24, 96 and 384 well plates.
    pub fn standard(wells: u32) -> Option<Self> {
        let (a1_x_mm, a1_y_mm, spacing_mm, well_size_mm, rows, columns) = match wells {
            6 => (24.55, 23.01, 39.2, 34.94, 2, 3),
            12 => (24.75, 16.86, 26.0, 22.05, 3, 4),
            24 => (24.45, 22.07, 19.3, 15.54, 4, 6),
            96 => (11.31, 10.75, 9.0, 6.21, 8, 12),
            384 => (12.05, 9.05, 4.5, 3.3, 16, 24),
            _ => return None,
        };
        Some(Self {
            wells,
            a1_x_mm,
            a1_y_mm,
            spacing_mm,
            well_size_mm,
            rows,
            columns,
        })
    }

    /// Centre of `well` as (x mm, y mm).
    pub fn well_center(&self, well: WellId) -> ScopeResult<(f64, f64)> {
        if well.row >= self.rows || well.column >= self.columns {
            return Err(ScopeError::InvalidPlan(format!(
                "well {well} is outside a {}-well plate",
                self.wells
            )));
        }
        Ok((
            self.a1_x_mm + f64::from(well.column) * self.spacing_mm,
            self.a1_y_mm + f64::from(well.row) * self.spacing_mm,
        ))
    }

    /// Named region per selected well, in selection order.
    pub fn well_coordinates(&self, selection: &[WellId]) -> ScopeResult<ScanCoordinates> {
        selection
            .iter()
            .map(|&well| {
                let (x, y) = self.well_center(well)?;
                Ok(ScanCoordinate::new(well.to_string(), x, y))
            })
            .collect()
    }
}

// =============================================================================
// Scan plan
// =============================================================================

/// Immutable description of one multi-dimensional acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPlan {
    pub nx: u32,
    pub ny: u32,
    pub nz: u32,
    pub nt: u32,
    pub delta_x_mm: f64,
    pub delta_y_mm: f64,
    pub delta_z_um: f64,
    pub delta_t_s: f64,
    pub contrast_af: bool,
    pub laser_af: bool,
    pub z_stacking: ZStacking,
    /// Channels imaged at every Z plane, in order.
    pub configurations: Vec<ChannelConfiguration>,
    /// Channel applied before contrast autofocus. Defaults to the first channel.
    pub autofocus_configuration: Option<ChannelConfiguration>,
    /// Regions to visit; `None` scans around the current position.
    pub coordinates: Option<ScanCoordinates>,
    pub experiment_id: String,
    pub base_path: PathBuf,
}

impl ScanPlan {
    /// Single field of view, single time point, no autofocus.
    pub fn new(
        experiment_id: impl Into<String>,
        base_path: impl Into<PathBuf>,
        configurations: Vec<ChannelConfiguration>,
    ) -> Self {
        Self {
            nx: 1,
            ny: 1,
            nz: 1,
            nt: 1,
            delta_x_mm: 0.9,
            delta_y_mm: 0.9,
            delta_z_um: 1.5,
            delta_t_s: 0.0,
            contrast_af: false,
            laser_af: false,
            z_stacking: ZStacking::FromBottom,
            configurations,
            autofocus_configuration: None,
            coordinates: None,
            experiment_id: experiment_id.into(),
            base_path: base_path.into(),
        }
    }

    pub fn grid(mut self, nx: u32, ny: u32, nz: u32) -> Self {
        self.nx = nx;
        self.ny = ny;
        self.nz = nz;
        self
    }

    pub fn time_points(mut self, nt: u32, delta_t_s: f64) -> Self {
        self.nt = nt;
        self.delta_t_s = delta_t_s;
        self
    }

    pub fn steps(mut self, delta_x_mm: f64, delta_y_mm: f64, delta_z_um: f64) -> Self {
        self.delta_x_mm = delta_x_mm;
        self.delta_y_mm = delta_y_mm;
        self.delta_z_um = delta_z_um;
        self
    }

    pub fn with_coordinates(mut self, coordinates: ScanCoordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    /// Channel used for contrast autofocus.
    pub fn autofocus_channel(&self) -> Option<&ChannelConfiguration> {
        self.autofocus_configuration
            .as_ref()
            .or_else(|| self.configurations.first())
    }

    /// Images the plan writes per time point, assuming every frame arrives.
    pub fn images_per_time_point(&self) -> u64 {
        let regions = self.coordinates.as_ref().map_or(1, |c| c.len().max(1)) as u64;
        regions
            * u64::from(self.nx)
            * u64::from(self.ny)
            * u64::from(self.nz)
            * self.configurations.len() as u64
    }

    pub fn validate(&self) -> ScopeResult<()> {
        let invalid = |msg: String| Err(ScopeError::InvalidPlan(msg));
        if self.nx == 0 || self.ny == 0 || self.nz == 0 || self.nt == 0 {
            return invalid(format!(
                "grid dimensions must be at least 1 (nx={}, ny={}, nz={}, nt={})",
                self.nx, self.ny, self.nz, self.nt
            ));
        }
        for (name, value) in [
            ("delta_x_mm", self.delta_x_mm),
            ("delta_y_mm", self.delta_y_mm),
            ("delta_z_um", self.delta_z_um),
            ("delta_t_s", self.delta_t_s),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("{name} must be a finite, non-negative number"));
            }
        }
        if self.configurations.is_empty() {
            return invalid("at least one channel configuration is required".into());
        }
        let id = self.experiment_id.trim();
        if id.is_empty() || id.contains(['/', '\\']) {
            return invalid(format!("invalid experiment id '{}'", self.experiment_id));
        }
        if let Some(coordinates) = &self.coordinates {
            if coordinates.is_empty() {
                return invalid("coordinate list is empty".into());
            }
            let mut seen = HashSet::new();
            for c in coordinates.iter() {
                if c.name.is_empty() || !seen.insert(c.name.as_str()) {
                    return invalid(format!("region names must be unique and non-empty ('{}')", c.name));
                }
                if c.name.contains(['/', '\\']) {
                    return invalid(format!("region name '{}' contains a path separator", c.name));
                }
                let z_finite = c.z_mm.map_or(true, f64::is_finite);
                if !c.x_mm.is_finite() || !c.y_mm.is_finite() || !z_finite {
                    return invalid(format!("region '{}' has a non-finite position", c.name));
                }
            }
        }
        Ok(())
    }
}
