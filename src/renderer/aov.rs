//! Arbitrary output variables from the first hit.

use std::fmt;
use std::str::FromStr;

use glam::{Vec3, Vec4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::Film;
use crate::core::Intersection;
use crate::device::AccumulateMode;
use crate::scene::Scene;
use crate::util::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AovKind {
    Position,
    ShadingNormal,
    GeometricNormal,
    Uv,
    Albedo,
    Depth,
    ShapeId,
}

impl AovKind {
    pub const ALL: [AovKind; 7] = [
        Self::Position,
        Self::ShadingNormal,
        Self::GeometricNormal,
        Self::Uv,
        Self::Albedo,
        Self::Depth,
        Self::ShapeId,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::ShadingNormal => "shading_normal",
            Self::GeometricNormal => "geometric_normal",
            Self::Uv => "uv",
            Self::Albedo => "albedo",
            Self::Depth => "depth",
            Self::ShapeId => "shape_id",
        }
    }

    /// Value for one first hit. Misses are zero.
    pub fn value(self, scene: &Scene, hit: &Intersection) -> Vec3 {
        let Some(sp) = scene.surface(hit) else {
            return Vec3::ZERO;
        };
        match self {
            Self::Position => sp.position,
            Self::ShadingNormal => sp.shading_normal,
            Self::GeometricNormal => sp.geometric_normal,
            Self::Uv => sp.uv.extend(0.0),
            Self::Albedo => scene.material(sp.material).map_or(Vec3::ZERO, |m| m.albedo()),
            Self::Depth => Vec3::splat(hit.t()),
            Self::ShapeId => Vec3::splat(sp.shape as f32),
        }
    }
}

impl fmt::Display for AovKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AovKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| Error::invalid_argument(format!("unknown AOV '{s}'")))
    }
}

/// `FillAovs`: add the first-hit value of every slot, with one sample, to
/// each attached film at the slot's output cell.
pub fn fill_aovs(scene: &Scene, hits: &[Intersection], cells: &[u32], aovs: &[(AovKind, Film)], mode: AccumulateMode) {
    hits.par_iter().zip(cells.par_iter()).for_each(|(hit, &cell)| {
        for (kind, film) in aovs {
            let v = kind.value(scene, hit);
            film.buffer().add(cell as usize, Vec4::new(v.x, v.y, v.z, 1.0), mode);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Preset;

    #[test]
    fn test_names_round_trip() {
        for k in AovKind::ALL {
            assert_eq!(k.name().parse::<AovKind>().unwrap(), k);
        }
        assert!("beauty".parse::<AovKind>().is_err());
    }

    #[test]
    fn test_miss_is_zero() {
        let scene = Preset::LitPlane.build(2, 2).unwrap();
        for k in AovKind::ALL {
            assert_eq!(k.value(&scene, &Intersection::MISS), Vec3::ZERO);
        }
    }
}
