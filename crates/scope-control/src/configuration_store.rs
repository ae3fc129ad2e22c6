//! Ordered channel configurations, persisted as JSON.

use scope_core::error::{ScopeError, ScopeResult};
use scope_core::types::{ChannelConfiguration, PixelFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// One editable field of a [`ChannelConfiguration`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationField {
    Name(String),
    ExposureTimeMs(f64),
    AnalogGain(f64),
    IlluminationSource(u32),
    IlluminationIntensity(f64),
    ZOffsetUm(Option<f64>),
    PixelFormat(Option<PixelFormat>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationStore {
    configurations: Vec<ChannelConfiguration>,
}

impl ConfigurationStore {
    pub fn new(configurations: Vec<ChannelConfiguration>) -> Self {
        Self { configurations }
    }

    /// Brightfield plus the common fluorescence channels.
    pub fn with_defaults() -> Self {
        let mut bf = ChannelConfiguration::new(0, "BF LED matrix full");
        bf.exposure_time_ms = 12.0;
        bf.illumination_source = 0;
        bf.illumination_intensity = 5.0;

        let fluorescence = [
            (1, "Fluorescence 405 nm Ex", 11),
            (2, "Fluorescence 488 nm Ex", 12),
            (3, "Fluorescence 561 nm Ex", 14),
        ];
        let mut configurations = vec![bf];
        configurations.extend(fluorescence.into_iter().map(|(id, name, source)| {
            let mut cfg = ChannelConfiguration::new(id, name);
            cfg.exposure_time_ms = 100.0;
            cfg.illumination_source = source;
            cfg.illumination_intensity = 50.0;
            cfg
        }));
        Self { configurations }
    }

    pub fn all(&self) -> &[ChannelConfiguration] {
        &self.configurations
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&ChannelConfiguration> {
        self.configurations.iter().find(|c| c.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&ChannelConfiguration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    /// Configurations with the given names, in the order requested.
    pub fn select(&self, names: &[&str]) -> ScopeResult<Vec<ChannelConfiguration>> {
        names
            .iter()
            .map(|name| {
                self.by_name(name).cloned().ok_or_else(|| {
                    ScopeError::Configuration(format!("unknown channel configuration '{name}'"))
                })
            })
            .collect()
    }

    /// Add a configuration, replacing any with the same id.
    pub fn insert(&mut self, configuration: ChannelConfiguration) {
        match self.configurations.iter_mut().find(|c| c.id == configuration.id) {
            Some(existing) => *existing = configuration,
            None => self.configurations.push(configuration),
        }
    }

    pub fn update(&mut self, id: u32, field: ConfigurationField) -> ScopeResult<&ChannelConfiguration> {
        let cfg = self
            .configurations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ScopeError::Configuration(format!("no channel configuration with id {id}")))?;
        match field {
            ConfigurationField::Name(name) => cfg.name = name,
            ConfigurationField::ExposureTimeMs(ms) if ms > 0.0 => cfg.exposure_time_ms = ms,
            ConfigurationField::AnalogGain(gain) => cfg.analog_gain = gain,
            ConfigurationField::IlluminationSource(source) => cfg.illumination_source = source,
            ConfigurationField::IlluminationIntensity(pct) if (0.0..=100.0).contains(&pct) => {
                cfg.illumination_intensity = pct
            }
            ConfigurationField::ZOffsetUm(offset) => cfg.z_offset_um = offset,
            ConfigurationField::PixelFormat(format) => cfg.pixel_format = format,
            other => {
                return Err(ScopeError::Configuration(format!(
                    "value out of range for channel {id}: {other:?}"
                )))
            }
        }
        debug!(id, name = %cfg.name, "Channel configuration updated");
        Ok(cfg)
    }

    pub fn load_json(path: &Path) -> ScopeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let configurations: Vec<ChannelConfiguration> = serde_json::from_str(&text)?;
        Ok(Self { configurations })
    }

    pub fn save_json(&self, path: &Path) -> ScopeResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(&self.configurations)?)?;
        debug!(path = ?path, count = self.configurations.len(), "Channel configurations saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id_and_name() {
        let store = ConfigurationStore::with_defaults();
        assert_eq!(store.len(), 4);
        assert_eq!(store.get(2).map(|c| c.illumination_source), Some(12));
        assert_eq!(store.by_name("BF LED matrix full").map(|c| c.id), Some(0));
        assert!(store.get(99).is_none());
    }

    #[test]
    fn select_keeps_requested_order() {
        let store = ConfigurationStore::with_defaults();
        let picked = store
            .select(&["Fluorescence 561 nm Ex", "BF LED matrix full"])
            .unwrap();
        assert_eq!(picked.iter().map(|c| c.id).collect::<Vec<_>>(), vec![3, 0]);
        assert!(store.select(&["DAPI"]).is_err());
    }

    #[test]
    fn update_validates_ranges() {
        let mut store = ConfigurationStore::with_defaults();
        store.update(1, ConfigurationField::ExposureTimeMs(42.0)).unwrap();
        assert_eq!(store.get(1).unwrap().exposure_time_ms, 42.0);

        assert!(store.update(1, ConfigurationField::IlluminationIntensity(150.0)).is_err());
        assert!(store.update(1, ConfigurationField::ExposureTimeMs(0.0)).is_err());
        assert!(store.update(7, ConfigurationField::AnalogGain(1.0)).is_err());
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        let mut store = ConfigurationStore::with_defaults();
        store
            .update(0, ConfigurationField::ZOffsetUm(Some(-1.5)))
            .unwrap();
        store.save_json(&path).unwrap();

        let loaded = ConfigurationStore::load_json(&path).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(loaded.get(0).unwrap().z_offset_um, Some(-1.5));
    }
}
