//! `acquisition parameters.json`, written once per experiment.

use chrono::{DateTime, Local};
use scope_core::error::ScopeResult;
use scope_core::types::ZStacking;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Scan description saved next to the images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParameters {
    pub run_uid: Uuid,
    pub experiment_id: String,
    pub started: DateTime<Local>,
    #[serde(rename = "dx(mm)")]
    pub dx_mm: f64,
    #[serde(rename = "Nx")]
    pub nx: u32,
    #[serde(rename = "dy(mm)")]
    pub dy_mm: f64,
    #[serde(rename = "Ny")]
    pub ny: u32,
    #[serde(rename = "dz(um)")]
    pub dz_um: f64,
    #[serde(rename = "Nz")]
    pub nz: u32,
    #[serde(rename = "dt(s)")]
    pub dt_s: f64,
    #[serde(rename = "Nt")]
    pub nt: u32,
    pub with_af: bool,
    pub with_reflection_af: bool,
    pub z_stacking: ZStacking,
    pub channels: Vec<String>,
    pub regions: Vec<String>,
}

impl AcquisitionParameters {
    pub fn write_json(&self, path: &Path) -> ScopeResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        tracing::debug!(path = ?path, "Wrote acquisition parameters");
        Ok(())
    }

    pub fn read_json(path: &Path) -> ScopeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_units() {
        let params = AcquisitionParameters {
            run_uid: Uuid::new_v4(),
            experiment_id: "exp".into(),
            started: Local::now(),
            dx_mm: 0.9,
            nx: 2,
            dy_mm: 0.9,
            ny: 2,
            dz_um: 1.5,
            nz: 1,
            dt_s: 0.0,
            nt: 1,
            with_af: false,
            with_reflection_af: false,
            z_stacking: ZStacking::FromBottom,
            channels: vec!["BF".into()],
            regions: vec!["0".into()],
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["dx(mm)"], 0.9);
        assert_eq!(json["Nx"], 2);
        assert_eq!(json["z_stacking"], "from_bottom");

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("acquisition parameters.json");
        params.write_json(&path).unwrap();
        assert_eq!(AcquisitionParameters::read_json(&path).unwrap(), params);
    }
}
