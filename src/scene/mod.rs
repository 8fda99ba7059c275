//! Immutable scene description shared by every estimator.
//!
//! A [`Scene`] is assembled with [`SceneBuilder`] and never changes after
//! `build()`. Estimators borrow it for the duration of an estimate; render
//! sessions clone it (geometry is plain data, the intersector is behind an
//! `Arc`).

pub mod camera;
pub mod geometry;
pub mod light;
pub mod material;
pub mod presets;
pub mod volume;

pub use camera::{Camera, Projection, CAMERA_FAR};
pub use geometry::{Geometry, Shape, SurfacePoint};
pub use light::{EmissionSample, Light, LightDistribution, LightSample, ENVIRONMENT_DISTANCE};
pub use material::Material;
pub use presets::Preset;
pub use volume::Volume;

use std::fmt;
use std::sync::Arc;

use diffuse_bsdf::Frame;
use glam::{Vec2, Vec3};

use crate::accel::{BvhIntersector, IntersectionService};
use crate::core::{visibility, ActiveCount, Intersection, Ray};
use crate::util::{Error, Result};

/// Renderable scene.
#[derive(Clone)]
pub struct Scene {
    geometry: Geometry,
    shapes: Vec<Shape>,
    materials: Vec<Material>,
    lights: Vec<Light>,
    /// Over all lights, used by next-event estimation.
    light_distribution: LightDistribution,
    /// Over lights that can start a light subpath (no environment).
    emitter_distribution: LightDistribution,
    volumes: Vec<Volume>,
    camera: Camera,
    environment: Option<usize>,
    radius: f32,
    accel: Arc<dyn IntersectionService>,
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("triangles", &self.geometry.triangles.len())
            .field("shapes", &self.shapes.len())
            .field("materials", &self.materials.len())
            .field("lights", &self.lights.len())
            .field("volumes", &self.volumes.len())
            .field("environment", &self.environment)
            .field("accel", &self.accel.name())
            .finish()
    }
}

impl Scene {
    pub fn builder() -> SceneBuilder {
        SceneBuilder::new()
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn shape(&self, id: usize) -> Option<&Shape> {
        self.shapes.get(id)
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn material(&self, id: usize) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn light(&self, id: usize) -> Option<&Light> {
        self.lights.get(id)
    }

    pub fn light_distribution(&self) -> &LightDistribution {
        &self.light_distribution
    }

    pub fn emitter_distribution(&self) -> &LightDistribution {
        &self.emitter_distribution
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn volume(&self, id: usize) -> Option<&Volume> {
        self.volumes.get(id)
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Index of the environment light, if any.
    pub fn environment(&self) -> Option<usize> {
        self.environment
    }

    pub fn has_environment(&self) -> bool {
        self.environment.is_some()
    }

    /// Environment radiance seen along any escaping direction.
    pub fn environment_radiance(&self) -> Vec3 {
        match self.environment.and_then(|i| self.lights.get(i)) {
            Some(Light::Environment { radiance }) => *radiance,
            _ => Vec3::ZERO,
        }
    }

    /// Bounding sphere radius of the geometry.
    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn accel(&self) -> &dyn IntersectionService {
        self.accel.as_ref()
    }

    /// Same scene seen through another camera.
    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera = camera;
        self
    }

    /// Same scene with a different intersection service.
    pub fn with_intersector(mut self, accel: Arc<dyn IntersectionService>) -> Self {
        self.accel = accel;
        self
    }

    /// Resolve a hit into a shading point.
    pub fn surface(&self, isect: &Intersection) -> Option<SurfacePoint> {
        if !isect.is_hit() {
            return None;
        }
        let prim = usize::try_from(isect.prim_id).ok()?;
        if prim >= self.geometry.triangles.len() {
            return None;
        }
        let shape = isect.shape_id as usize;
        let material = self.shapes.get(shape)?.material as usize;
        let (position, shading_normal, geometric_normal, uv) =
            self.geometry.interpolate(prim, isect.barycentrics());
        Some(SurfacePoint {
            position,
            shading_normal,
            geometric_normal,
            uv,
            shape,
            material,
            prim,
        })
    }

    /// Distance from `origin` along `dir` to the first medium boundary,
    /// capped at `max_t`. Media are assumed not to nest.
    pub fn medium_extent(&self, origin: Vec3, dir: Vec3, max_t: f32) -> f32 {
        let ray = Ray::new(origin, dir, max_t, visibility::INTERFACE);
        let mut hit = [Intersection::MISS];
        self.accel.query_intersection(&[ray], ActiveCount::new(1), &mut hit);
        if hit[0].is_hit() {
            hit[0].t().min(max_t)
        } else {
            max_t
        }
    }

    /// Area light attached to a shape.
    pub fn shape_light(&self, shape: usize) -> Option<usize> {
        self.shapes.get(shape)?.light.map(|l| l as usize)
    }
}

/// Incremental scene assembly.
#[derive(Debug, Default)]
pub struct SceneBuilder {
    geometry: Geometry,
    shapes: Vec<Shape>,
    materials: Vec<Material>,
    lights: Vec<Light>,
    volumes: Vec<Volume>,
    camera: Option<Camera>,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_material(&mut self, material: Material) -> u32 {
        self.materials.push(material);
        (self.materials.len() - 1) as u32
    }

    /// Add a triangle mesh as one shape. Normals and uvs are per vertex.
    pub fn add_mesh(
        &mut self,
        positions: &[Vec3],
        normals: Option<&[Vec3]>,
        uvs: Option<&[Vec2]>,
        triangles: &[[u32; 3]],
        material: u32,
    ) -> Result<u32> {
        if material as usize >= self.materials.len() {
            return Err(Error::invalid_scene(format!("material {material} does not exist")));
        }
        if triangles.is_empty() {
            return Err(Error::invalid_scene("mesh has no triangles"));
        }
        if let Some(bad) = triangles.iter().flatten().find(|&&i| i as usize >= positions.len()) {
            return Err(Error::invalid_scene(format!(
                "triangle index {bad} out of range for {} vertices",
                positions.len()
            )));
        }
        if normals.is_some_and(|n| n.len() != positions.len())
            || uvs.is_some_and(|uv| uv.len() != positions.len())
        {
            return Err(Error::invalid_scene("vertex attribute count mismatch"));
        }

        let base = self.geometry.positions.len() as u32;
        let shape_id = self.shapes.len() as u32;
        let first_triangle = self.geometry.triangles.len() as u32;

        self.geometry.positions.extend_from_slice(positions);
        match normals {
            Some(n) => self.geometry.normals.extend(n.iter().map(|v| v.normalize_or_zero())),
            None => self.geometry.normals.extend(std::iter::repeat(Vec3::ZERO).take(positions.len())),
        }
        match uvs {
            Some(uv) => self.geometry.uvs.extend_from_slice(uv),
            None => self.geometry.uvs.extend(std::iter::repeat(Vec2::ZERO).take(positions.len())),
        }

        let mut area = 0.0;
        for t in triangles {
            self.geometry.triangles.push([t[0] + base, t[1] + base, t[2] + base]);
            self.geometry.triangle_shape.push(shape_id);
            area += self.geometry.triangle_area(self.geometry.triangles.len() - 1);
            self.geometry.triangle_cdf.push(area);
        }
        let cdf = &mut self.geometry.triangle_cdf[first_triangle as usize..];
        if area > 0.0 {
            cdf.iter_mut().for_each(|c| *c /= area);
        }

        self.shapes.push(Shape {
            first_triangle,
            triangle_count: triangles.len() as u32,
            material,
            volume: None,
            mask: visibility::ALL,
            area,
            light: None,
        });
        Ok(shape_id)
    }

    /// Planar quad; the face normal is `(c1 - c0) x (c2 - c0)`.
    pub fn add_quad(&mut self, corners: [Vec3; 4], material: u32) -> Result<u32> {
        self.add_mesh(&corners, None, None, &[[0, 1, 2], [0, 2, 3]], material)
    }

    /// Square quad centred on `center` facing `normal`.
    pub fn add_quad_facing(&mut self, center: Vec3, normal: Vec3, half_extent: f32, material: u32) -> Result<u32> {
        let f = Frame::from_normal(normal.normalize_or_zero());
        let (s, t) = (f.s * half_extent, f.t * half_extent);
        self.add_quad([center - s - t, center + s - t, center + s + t, center - s + t], material)
    }

    /// Axis-aligned box with outward-facing normals.
    pub fn add_box(&mut self, min: Vec3, max: Vec3, material: u32) -> Result<u32> {
        let corner = |i: u32| {
            Vec3::new(
                if i & 1 != 0 { max.x } else { min.x },
                if i & 2 != 0 { max.y } else { min.y },
                if i & 4 != 0 { max.z } else { min.z },
            )
        };
        let positions: Vec<Vec3> = (0..8).map(corner).collect();
        const FACES: [[u32; 4]; 6] = [
            [0, 4, 6, 2],
            [1, 3, 7, 5],
            [0, 1, 5, 4],
            [2, 6, 7, 3],
            [0, 2, 3, 1],
            [4, 5, 7, 6],
        ];
        let triangles: Vec<[u32; 3]> = FACES
            .iter()
            .flat_map(|f| [[f[0], f[1], f[2]], [f[0], f[2], f[3]]])
            .collect();
        self.add_mesh(&positions, None, None, &triangles, material)
    }

    /// Turn an emissive shape into an area light.
    pub fn add_area_light(&mut self, shape: u32) -> Result<u32> {
        let s = self
            .shapes
            .get(shape as usize)
            .ok_or_else(|| Error::invalid_scene(format!("shape {shape} does not exist")))?;
        let radiance = match self.materials.get(s.material as usize) {
            Some(Material::Emissive { radiance }) => *radiance,
            _ => return Err(Error::invalid_scene(format!("shape {shape} is not emissive"))),
        };
        let id = self.lights.len() as u32;
        self.lights.push(Light::Area { shape, radiance });
        self.shapes[shape as usize].light = Some(id);
        Ok(id)
    }

    /// Emissive square facing `normal`, registered as an area light.
    /// Returns the shape id.
    pub fn add_emissive_quad(&mut self, center: Vec3, normal: Vec3, half_extent: f32, radiance: Vec3) -> Result<u32> {
        let material = self.add_material(Material::emissive(radiance));
        let shape = self.add_quad_facing(center, normal, half_extent, material)?;
        self.add_area_light(shape)?;
        Ok(shape)
    }

    pub fn add_volume(&mut self, volume: Volume) -> u32 {
        self.volumes.push(volume);
        (self.volumes.len() - 1) as u32
    }

    /// Fill a closed shape with a medium.
    pub fn set_shape_volume(&mut self, shape: u32, volume: u32) -> Result<()> {
        if volume as usize >= self.volumes.len() {
            return Err(Error::invalid_scene(format!("volume {volume} does not exist")));
        }
        let s = self
            .shapes
            .get_mut(shape as usize)
            .ok_or_else(|| Error::invalid_scene(format!("shape {shape} does not exist")))?;
        s.volume = Some(volume);
        Ok(())
    }

    pub fn add_point_light(&mut self, position: Vec3, intensity: Vec3) -> u32 {
        self.lights.push(Light::Point { position, intensity });
        (self.lights.len() - 1) as u32
    }

    /// Constant environment. Replaces a previous one.
    pub fn set_environment(&mut self, radiance: Vec3) -> u32 {
        if let Some(i) = self.lights.iter().position(Light::is_environment) {
            self.lights[i] = Light::Environment { radiance };
            return i as u32;
        }
        self.lights.push(Light::Environment { radiance });
        (self.lights.len() - 1) as u32
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = Some(camera);
    }

    /// Finish the scene and build the BVH.
    pub fn build(mut self) -> Result<Scene> {
        if self.geometry.triangles.is_empty() {
            return Err(Error::invalid_scene("scene has no geometry"));
        }
        for shape in &mut self.shapes {
            if self.materials[shape.material as usize].is_passthrough() {
                shape.mask = visibility::PRIMARY | visibility::SECONDARY | visibility::INTERFACE;
            }
        }

        let masks: Vec<u32> = self.shapes.iter().map(|s| s.mask).collect();
        let accel = BvhIntersector::new(
            &self.geometry.positions,
            &self.geometry.triangles,
            &self.geometry.triangle_shape,
            &masks,
        );
        let radius = accel.bounds().radius().max(1e-3);

        let light_distribution = LightDistribution::new(
            self.lights.len(),
            self.lights
                .iter()
                .enumerate()
                .map(|(i, l)| (i, l.power(&self.shapes, radius))),
        );
        let emitter_distribution = LightDistribution::new(
            self.lights.len(),
            self.lights
                .iter()
                .enumerate()
                .filter(|(_, l)| !l.is_environment())
                .map(|(i, l)| (i, l.power(&self.shapes, radius))),
        );
        let environment = self.lights.iter().position(Light::is_environment);

        tracing::debug!(
            triangles = self.geometry.triangles.len(),
            shapes = self.shapes.len(),
            lights = self.lights.len(),
            volumes = self.volumes.len(),
            "scene built"
        );

        Ok(Scene {
            geometry: self.geometry,
            shapes: self.shapes,
            materials: self.materials,
            lights: self.lights,
            light_distribution,
            emitter_distribution,
            volumes: self.volumes,
            camera: self.camera.unwrap_or_default(),
            environment,
            radius,
            accel: Arc::new(accel),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActiveCount, Ray};

    #[test]
    fn test_box_normals_point_outward() {
        let mut b = SceneBuilder::new();
        let m = b.add_material(Material::default());
        b.add_box(Vec3::splat(-1.0), Vec3::ONE, m).unwrap();
        let scene = b.build().unwrap();
        let geo = scene.geometry();
        for prim in 0..geo.triangles.len() {
            let (a, bb, c) = geo.corners(prim);
            let centroid = (a + bb + c) / 3.0;
            let (_, _, ng, _) = geo.interpolate(prim, Vec2::splat(1.0 / 3.0));
            assert!(ng.dot(centroid) > 0.0, "triangle {prim} faces inward");
        }
        assert!((scene.shapes()[0].area - 24.0).abs() < 1e-4);
    }

    #[test]
    fn test_emissive_quad_registers_light() {
        let mut b = SceneBuilder::new();
        let shape = b
            .add_emissive_quad(Vec3::Y, Vec3::NEG_Y, 0.5, Vec3::splat(5.0))
            .unwrap();
        let scene = b.build().unwrap();
        assert_eq!(scene.shape_light(shape as usize), Some(0));
        assert_eq!(scene.light_distribution().pdf(0), 1.0);
        let (_, n) = scene
            .geometry()
            .sample_shape(&scene.shapes()[shape as usize], Vec2::splat(0.5))
            .unwrap();
        assert!((n - Vec3::NEG_Y).length() < 1e-5);
    }

    #[test]
    fn test_surface_from_intersection() {
        let mut b = SceneBuilder::new();
        let m = b.add_material(Material::default());
        b.add_quad_facing(Vec3::ZERO, Vec3::Y, 1.0, m).unwrap();
        let scene = b.build().unwrap();

        let rays = [Ray::new(Vec3::new(0.2, 1.0, 0.1), Vec3::NEG_Y, 10.0, visibility::ALL)];
        let mut hits = [Intersection::MISS];
        scene.accel().query_intersection(&rays, ActiveCount::new(1), &mut hits);
        let sp = scene.surface(&hits[0]).unwrap();
        assert!((sp.position - Vec3::new(0.2, 0.0, 0.1)).length() < 1e-4);
        assert!((sp.geometric_normal - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_passthrough_hidden_from_shadow_rays() {
        let mut b = SceneBuilder::new();
        let m = b.add_material(Material::Passthrough);
        b.add_quad_facing(Vec3::ZERO, Vec3::Y, 1.0, m).unwrap();
        let scene = b.build().unwrap();
        assert_eq!(scene.shapes()[0].mask & visibility::SHADOW, 0);
    }

    #[test]
    fn test_medium_extent_stops_at_boundary() {
        let mut b = SceneBuilder::new();
        let wall = b.add_material(Material::default());
        let boundary = b.add_material(Material::Passthrough);
        b.add_quad_facing(Vec3::new(0.0, 0.5, 0.0), Vec3::NEG_Y, 1.0, wall).unwrap();
        b.add_box(Vec3::splat(-1.0), Vec3::ONE, boundary).unwrap();
        let scene = b.build().unwrap();

        // The opaque wall at y = 0.5 does not count as a boundary.
        let up = scene.medium_extent(Vec3::ZERO, Vec3::Y, 100.0);
        assert!((up - 1.0).abs() < 1e-4, "{up}");
        assert_eq!(scene.medium_extent(Vec3::ZERO, Vec3::X, 0.25), 0.25);
    }

    #[test]
    fn test_invalid_scene() {
        assert!(matches!(SceneBuilder::new().build(), Err(Error::InvalidScene(_))));
        let mut b = SceneBuilder::new();
        assert!(b.add_quad([Vec3::ZERO; 4], 3).is_err());
        let m = b.add_material(Material::default());
        let err = b.add_mesh(&[Vec3::ZERO], None, None, &[[0, 1, 2]], m).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
