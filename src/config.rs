//! Render settings.
//!
//! Stored as pretty JSON. Missing fields take their defaults, so a settings
//! file only needs the values it changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::estimator::{EstimatorConfig, EstimatorKind, QualityLevel, BDPT_MAX_SUBPATH_LEN};
use crate::renderer::{MonteCarloRenderer, DEFAULT_TILE_SIZE};
use crate::scene::{Preset, Projection, Scene};
use crate::util::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    // Image
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub exposure: f32,

    // Sampling
    pub samples: u32,
    pub max_bounces: u32,
    pub estimator: EstimatorKind,
    pub quality: QualityLevel,
    pub seed: u64,
    pub clamp_ceiling: f32,
    pub rr_start_bounce: u32,
    pub max_subpath_len: usize,
    pub atomic_update: bool,

    // Session
    pub devices: usize,
    pub publish_interval_ms: u64,

    pub scene: Preset,
    /// Replaces the preset camera's projection.
    pub projection: Option<Projection>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        let est = EstimatorConfig::default();
        Self {
            width: 512,
            height: 512,
            tile_width: DEFAULT_TILE_SIZE.0,
            tile_height: DEFAULT_TILE_SIZE.1,
            exposure: 0.0,
            samples: 64,
            max_bounces: est.max_bounces,
            estimator: EstimatorKind::PathTracing,
            quality: QualityLevel::Normal,
            seed: 0,
            clamp_ceiling: est.clamp_ceiling,
            rr_start_bounce: est.rr_start_bounce,
            max_subpath_len: BDPT_MAX_SUBPATH_LEN,
            atomic_update: false,
            devices: 1,
            publish_interval_ms: 250,
            scene: Preset::Cornell,
            projection: None,
        }
    }
}

impl RenderSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid_argument(format!(
                "image size {}x{}",
                self.width, self.height
            )));
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(Error::invalid_argument(format!(
                "tile size {}x{}",
                self.tile_width, self.tile_height
            )));
        }
        if self.devices == 0 {
            return Err(Error::invalid_argument("at least one device is required"));
        }
        if !self.exposure.is_finite() {
            return Err(Error::invalid_argument("exposure must be finite"));
        }
        if let Some(projection) = &self.projection {
            projection.validate()?;
        }
        self.estimator_config().validate()
    }

    pub fn estimator_config(&self) -> EstimatorConfig {
        EstimatorConfig {
            max_bounces: self.max_bounces,
            clamp_ceiling: self.clamp_ceiling,
            rr_start_bounce: self.rr_start_bounce,
            max_subpath_len: self.max_subpath_len,
            ..EstimatorConfig::default()
        }
    }

    /// Tile size clipped to the image, so small images do not allocate
    /// full-size work buffers.
    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width.min(self.width), self.tile_height.min(self.height))
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn build_scene(&self) -> Result<Scene> {
        let scene = self.scene.build(self.width, self.height)?;
        Ok(match self.projection {
            Some(projection) => {
                let camera = scene.camera().with_projection(projection);
                scene.with_camera(camera)
            }
            None => scene,
        })
    }

    /// Renderer for device `device`. Devices get distinct seeds.
    pub fn create_renderer(&self, device: usize) -> Result<MonteCarloRenderer> {
        let estimator = self.estimator.create(self.estimator_config())?;
        let mut renderer = MonteCarloRenderer::new(estimator, self.tile_size())?;
        renderer.set_quality(self.quality);
        renderer.set_atomic_update(self.atomic_update);
        renderer.set_random_seed(self.seed.wrapping_add(device as u64));
        Ok(renderer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = RenderSettings {
            width: 64,
            estimator: EstimatorKind::Bdpt,
            scene: Preset::Fog,
            devices: 3,
            ..Default::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(RenderSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let s: RenderSettings = serde_json::from_str(r#"{"samples": 4, "estimator": "bdpt"}"#).unwrap();
        assert_eq!(s.samples, 4);
        assert_eq!(s.estimator, EstimatorKind::Bdpt);
        assert_eq!(s.width, RenderSettings::default().width);
    }

    #[test]
    fn test_validation() {
        assert!(RenderSettings::default().validate().is_ok());
        let bad = RenderSettings {
            devices: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::InvalidArgument(_))));
        let bad = RenderSettings {
            max_subpath_len: 99,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::KernelBuild(_))));
        let bad = RenderSettings {
            projection: Some(Projection::Orthographic { height: -1.0 }),
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_projection_reaches_scene_camera() {
        let s: RenderSettings = serde_json::from_str(
            r#"{"width": 8, "height": 8, "projection": {"type": "perspective_dof", "aperture": 0.05, "focus_distance": 3.0}}"#,
        )
        .unwrap();
        let scene = s.build_scene().unwrap();
        assert_eq!(
            scene.camera().projection,
            Projection::PerspectiveDof {
                aperture: 0.05,
                focus_distance: 3.0
            }
        );
        assert!(RenderSettings::default().build_scene().unwrap().camera().is_pinhole());
    }

    #[test]
    fn test_tile_size_clipped() {
        let s = RenderSettings {
            width: 32,
            height: 16,
            ..Default::default()
        };
        assert_eq!(s.tile_size(), (32, 16));
    }
}
