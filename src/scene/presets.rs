//! Built-in scenes for the CLI, benchmarks and tests.

use std::fmt;
use std::str::FromStr;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{Camera, Material, Scene, SceneBuilder, Volume};
use crate::util::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Closed room with coloured walls, a ceiling light, a diffuse and a
    /// mirror box.
    #[default]
    Cornell,
    /// Diffuse plane under a small square area light.
    LitPlane,
    /// The room filled with a scattering medium.
    Fog,
    /// Open ground plane under a constant sky and a point light.
    Sky,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Self::Cornell, Self::LitPlane, Self::Fog, Self::Sky];

    pub fn name(self) -> &'static str {
        match self {
            Self::Cornell => "cornell",
            Self::LitPlane => "lit_plane",
            Self::Fog => "fog",
            Self::Sky => "sky",
        }
    }

    pub fn build(self, width: u32, height: u32) -> Result<Scene> {
        let mut b = SceneBuilder::new();
        match self {
            Self::Cornell => {
                room(&mut b)?;
                b.set_camera(room_camera(width, height));
            }
            Self::LitPlane => {
                let grey = b.add_material(Material::diffuse(Vec3::splat(0.5)));
                b.add_quad_facing(Vec3::ZERO, Vec3::Y, 2.0, grey)?;
                b.add_emissive_quad(Vec3::Y, Vec3::NEG_Y, 0.25, Vec3::splat(10.0))?;
                b.set_camera(Camera::look_at(
                    Vec3::new(0.0, 2.0, 3.0),
                    Vec3::ZERO,
                    Vec3::Y,
                    45.0,
                    width,
                    height,
                ));
            }
            Self::Fog => {
                room(&mut b)?;
                let boundary = b.add_material(Material::Passthrough);
                let shape = b.add_box(Vec3::new(-0.9, -0.99, -0.9), Vec3::new(0.9, 0.6, 0.9), boundary)?;
                let fog = b.add_volume(Volume::new(Vec3::splat(0.05), Vec3::splat(0.35), 0.3));
                b.set_shape_volume(shape, fog)?;
                b.set_camera(room_camera(width, height));
            }
            Self::Sky => {
                let ground = b.add_material(Material::diffuse(Vec3::splat(0.6)));
                b.add_quad_facing(Vec3::ZERO, Vec3::Y, 5.0, ground)?;
                let red = b.add_material(Material::diffuse(Vec3::new(0.7, 0.2, 0.15)));
                b.add_box(Vec3::new(-0.5, 0.0, -0.5), Vec3::new(0.5, 1.0, 0.5), red)?;
                b.set_environment(Vec3::new(0.4, 0.5, 0.7));
                b.add_point_light(Vec3::new(2.0, 4.0, 2.0), Vec3::splat(30.0));
                b.set_camera(Camera::look_at(
                    Vec3::new(0.0, 1.5, 5.0),
                    Vec3::new(0.0, 0.5, 0.0),
                    Vec3::Y,
                    45.0,
                    width,
                    height,
                ));
            }
        }
        b.build()
    }
}

fn room_camera(width: u32, height: u32) -> Camera {
    Camera::look_at(Vec3::new(0.0, 0.0, 3.4), Vec3::ZERO, Vec3::Y, 40.0, width, height)
}

/// Unit room open towards +z, lit from the ceiling.
fn room(b: &mut SceneBuilder) -> Result<()> {
    let white = b.add_material(Material::diffuse(Vec3::splat(0.73)));
    let red = b.add_material(Material::diffuse(Vec3::new(0.65, 0.05, 0.05)));
    let green = b.add_material(Material::diffuse(Vec3::new(0.12, 0.45, 0.15)));
    let mirror = b.add_material(Material::mirror(Vec3::splat(0.9)));

    b.add_quad_facing(Vec3::NEG_Y, Vec3::Y, 1.0, white)?;
    b.add_quad_facing(Vec3::Y, Vec3::NEG_Y, 1.0, white)?;
    b.add_quad_facing(Vec3::NEG_Z, Vec3::Z, 1.0, white)?;
    b.add_quad_facing(Vec3::NEG_X, Vec3::X, 1.0, red)?;
    b.add_quad_facing(Vec3::X, Vec3::NEG_X, 1.0, green)?;

    b.add_box(Vec3::new(-0.6, -1.0, -0.5), Vec3::new(-0.1, -0.2, 0.0), white)?;
    b.add_box(Vec3::new(0.15, -1.0, -0.1), Vec3::new(0.6, -0.5, 0.4), mirror)?;

    b.add_emissive_quad(Vec3::new(0.0, 0.999, 0.0), Vec3::NEG_Y, 0.3, Vec3::splat(12.0))?;
    Ok(())
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::invalid_argument(format!("unknown scene preset '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_build() {
        for p in Preset::ALL {
            let scene = p.build(32, 24).unwrap();
            assert_eq!(scene.camera().width, 32);
            assert!(!scene.light_distribution().is_empty(), "{p} has no lights");
        }
    }

    #[test]
    fn test_preset_names_parse() {
        for p in Preset::ALL {
            assert_eq!(p.name().parse::<Preset>().unwrap(), p);
        }
        assert!("nope".parse::<Preset>().is_err());
    }

    #[test]
    fn test_fog_has_medium_boundary() {
        let scene = Preset::Fog.build(8, 8).unwrap();
        assert_eq!(scene.volumes().len(), 1);
        assert!(scene.shapes().iter().any(|s| s.volume == Some(0)));
    }
}
