use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{record::RecordingSettings, render::RenderConfig, scene::Scene, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub render: RenderConfig,
    pub recording: RecordingSettings,
    pub scene: Scene,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(?path, "configuration loaded");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.render.validate()?;
        self.recording.validate()?;
        self.scene.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{camera::Projection, BhDiverError};

    #[test]
    fn defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn loads_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "scene": { "mass": 2.0, "camera": { "projection": "equirectangular" } },
                "render": { "export": { "super_sampling": 3 } }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.scene.mass, 2.0);
        assert_eq!(config.scene.camera.projection, Projection::Equirectangular);
        assert_eq!(config.render.export.super_sampling, 3);
        assert_eq!(config.render.viewport, RenderConfig::default().viewport);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.scene.relativity = false;

        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "scene": { "mass": -3.0 } }"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(BhDiverError::InvalidConfig(_))));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(BhDiverError::Json(_))));

        assert!(matches!(
            AppConfig::load(dir.path().join("missing.json")),
            Err(BhDiverError::Io(_))
        ));
    }
}
