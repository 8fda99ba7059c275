//! Subpath vertices and their per-pixel strips.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::device::Allocator;
use crate::scene::{Camera, SurfacePoint};
use crate::util::Result;

/// Vertices per subpath strip.
pub const BDPT_MAX_SUBPATH_LEN: usize = 8;

/// Vertex flag bits.
pub mod vertex_flags {
    /// Scattering at the vertex is a delta distribution.
    pub const DELTA: u32 = 1 << 0;
    /// Light vertex on a light with a delta position.
    pub const DELTA_LIGHT: u32 = 1 << 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VertexKind {
    Camera = 0,
    Surface = 1,
    Volume = 2,
    Light = 3,
}

impl VertexKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Camera),
            1 => Some(Self::Surface),
            2 => Some(Self::Volume),
            3 => Some(Self::Light),
            _ => None,
        }
    }
}

/// Subpath vertex (80 bytes).
///
/// `pdf_fwd` is the area density of generating this vertex from its
/// predecessor, `pdf_rev` the area density of generating it from its
/// successor in the opposite direction. A zero geometric normal marks a
/// vertex without a surface (camera, point light).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PathVertex {
    pub position: [f32; 3],
    pub pdf_fwd: f32,
    pub shading_normal: [f32; 3],
    pub pdf_rev: f32,
    pub geometric_normal: [f32; 3],
    /// Material id, -1 for endpoints.
    pub material: i32,
    pub flow: [f32; 3],
    pub kind: u32,
    pub uv: [f32; 2],
    pub flags: u32,
    /// Light id of light vertices, -1 otherwise.
    pub light: i32,
}

impl PathVertex {
    pub const EMPTY: Self = Self {
        position: [0.0; 3],
        pdf_fwd: 0.0,
        shading_normal: [0.0; 3],
        pdf_rev: 0.0,
        geometric_normal: [0.0; 3],
        material: -1,
        flow: [0.0; 3],
        kind: VertexKind::Surface as u32,
        uv: [0.0; 2],
        flags: 0,
        light: -1,
    };

    /// Eye subpath origin. The view direction is kept as shading normal.
    pub fn camera(camera: &Camera, position: Vec3) -> Self {
        Self {
            position: position.to_array(),
            shading_normal: camera.forward.to_array(),
            flow: [1.0; 3],
            kind: VertexKind::Camera as u32,
            ..Self::EMPTY
        }
    }

    pub fn surface(sp: &SurfacePoint, flow: Vec3, pdf_fwd: f32) -> Self {
        Self {
            position: sp.position.to_array(),
            pdf_fwd,
            shading_normal: sp.shading_normal.to_array(),
            geometric_normal: sp.geometric_normal.to_array(),
            material: sp.material as i32,
            flow: flow.to_array(),
            kind: VertexKind::Surface as u32,
            uv: sp.uv.to_array(),
            ..Self::EMPTY
        }
    }

    /// Vertex on light `light`. `normal` is `None` for point lights.
    pub fn light(light: usize, position: Vec3, normal: Option<Vec3>, flow: Vec3, pdf_fwd: f32, delta: bool) -> Self {
        let n = normal.unwrap_or(Vec3::ZERO).to_array();
        Self {
            position: position.to_array(),
            pdf_fwd,
            shading_normal: n,
            geometric_normal: n,
            flow: flow.to_array(),
            kind: VertexKind::Light as u32,
            flags: if delta { vertex_flags::DELTA_LIGHT } else { 0 },
            light: light as i32,
            ..Self::EMPTY
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    #[inline]
    pub fn shading_normal(&self) -> Vec3 {
        Vec3::from_array(self.shading_normal)
    }

    /// Geometric normal, `None` for vertices without a surface.
    #[inline]
    pub fn normal(&self) -> Option<Vec3> {
        let n = Vec3::from_array(self.geometric_normal);
        (n != Vec3::ZERO).then_some(n)
    }

    #[inline]
    pub fn flow(&self) -> Vec3 {
        Vec3::from_array(self.flow)
    }

    #[inline]
    pub fn uv(&self) -> Vec2 {
        Vec2::from_array(self.uv)
    }

    #[inline]
    pub fn kind(&self) -> Option<VertexKind> {
        VertexKind::from_u32(self.kind)
    }

    pub fn material_id(&self) -> Option<usize> {
        usize::try_from(self.material).ok()
    }

    pub fn light_id(&self) -> Option<usize> {
        usize::try_from(self.light).ok()
    }

    #[inline]
    pub fn is_delta(&self) -> bool {
        self.flags & vertex_flags::DELTA != 0
    }

    #[inline]
    pub fn is_delta_light(&self) -> bool {
        self.flags & vertex_flags::DELTA_LIGHT != 0
    }

    /// Surface vertex a connection can end on.
    #[inline]
    pub fn is_connectible(&self) -> bool {
        self.kind() == Some(VertexKind::Surface) && !self.is_delta()
    }
}

/// Fixed-capacity vertex strips, one per pixel.
#[derive(Debug)]
pub struct Subpaths {
    stride: usize,
    pub vertices: Vec<PathVertex>,
    pub lens: Vec<u32>,
}

impl Subpaths {
    pub fn allocate(alloc: &mut Allocator, size: usize, stride: usize) -> Result<Self> {
        Ok(Self {
            stride,
            vertices: alloc.buffer(size * stride, PathVertex::EMPTY)?,
            lens: alloc.buffer(size, 0u32)?,
        })
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Vertices of `pixel`'s subpath.
    #[inline]
    pub fn path(&self, pixel: usize) -> &[PathVertex] {
        let start = pixel * self.stride;
        let len = (self.lens[pixel] as usize).min(self.stride);
        &self.vertices[start..start + len]
    }

    /// Append `v` to `pixel`'s strip. Returns false when the strip is full.
    pub fn push(&mut self, pixel: usize, v: PathVertex) -> bool {
        let len = self.lens[pixel] as usize;
        if len >= self.stride {
            return false;
        }
        self.vertices[pixel * self.stride + len] = v;
        self.lens[pixel] += 1;
        true
    }

    /// Last vertex of `pixel`'s strip.
    pub fn last_mut(&mut self, pixel: usize) -> Option<&mut PathVertex> {
        let len = self.lens[pixel] as usize;
        if len == 0 {
            return None;
        }
        self.vertices.get_mut(pixel * self.stride + len - 1)
    }

    pub fn clear(&mut self, n: usize) {
        self.lens[..n].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceLimits;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<PathVertex>(), 80);
    }

    #[test]
    fn test_strip_push_and_capacity() {
        let mut alloc = Allocator::new(DeviceLimits::default());
        let mut strips = Subpaths::allocate(&mut alloc, 2, 2).unwrap();
        let v = PathVertex {
            pdf_fwd: 0.5,
            ..PathVertex::EMPTY
        };
        assert!(strips.push(1, v));
        assert!(strips.push(1, v));
        assert!(!strips.push(1, v));
        assert_eq!(strips.path(1).len(), 2);
        assert!(strips.path(0).is_empty());
        strips.last_mut(1).unwrap().pdf_rev = 3.0;
        assert_eq!(strips.path(1)[1].pdf_rev, 3.0);
        strips.clear(2);
        assert!(strips.path(1).is_empty());
    }

    #[test]
    fn test_endpoint_normals() {
        let point = PathVertex::light(0, Vec3::ONE, None, Vec3::ONE, 1.0, true);
        assert!(point.normal().is_none());
        assert!(point.is_delta_light());
        assert!(!point.is_connectible());
        let area = PathVertex::light(1, Vec3::ZERO, Some(Vec3::Y), Vec3::ONE, 0.25, false);
        assert_eq!(area.normal(), Some(Vec3::Y));
        assert_eq!(area.light_id(), Some(1));
    }
}
