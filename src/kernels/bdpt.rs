//! Kernels of the bidirectional path tracer.
//!
//! Eye and light subpaths are traced with the same slot conventions as the
//! path tracer; vertices land in per-pixel strips. Connection kernels then
//! run once per strategy with slot `i` = pixel `i`.

use glam::Vec3;
use rayon::prelude::*;
use smallvec::SmallVec;

use super::path_tracing::SlotInputs;
use super::{KernelContext, OutputTarget, Sampler, Stream};
use crate::core::{visibility, Intersection, PathState, Ray};
use crate::estimator::bdpt::mis::{mis_weight, ConnectionPdfs, MisVertex, SplitCaps};
use crate::estimator::bdpt::vertex::{vertex_flags, PathVertex, Subpaths, VertexKind, BDPT_MAX_SUBPATH_LEN};
use crate::scene::{Camera, Scene, CAMERA_FAR};
use crate::util::{offset_origin, safe_div, safe_div_f32, solid_angle_to_area, PDF_EPSILON, RAY_EPSILON};

/// Splat index of a caustic slot with nothing to deposit.
pub const NO_SPLAT: u32 = u32::MAX;

/// Which end a subpath starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubpathMode {
    Eye,
    Light,
}

impl SubpathMode {
    /// Vertices a subpath may hold for a bounce limit.
    pub fn vertex_cap(self, max_bounces: u32, strip_len: usize) -> usize {
        let depth = match self {
            Self::Eye => max_bounces as usize + 2,
            Self::Light => max_bounces as usize + 1,
        };
        depth.min(strip_len)
    }
}

/// Prefix lengths the strategy set can build for a bounce limit and strip
/// length. Light subpaths are only joined to a pinhole camera.
pub fn split_caps(camera: &Camera, max_bounces: u32, strip_len: usize) -> SplitCaps {
    SplitCaps {
        eye: SubpathMode::Eye.vertex_cap(max_bounces, strip_len),
        light: SubpathMode::Light.vertex_cap(max_bounces, strip_len),
        caustics: camera.is_pinhole(),
    }
}

/// Per-pixel result of one `SampleSurface` slot.
#[derive(Debug, Clone, Copy)]
pub struct VertexUpdate {
    pub path: PathState,
    /// Reverse density for the vertex currently last in the strip.
    pub prev_pdf_rev: Option<f32>,
    /// Vertex to append.
    pub vertex: Option<PathVertex>,
}

pub type VertexUpdates = Vec<(u32, VertexUpdate)>;

/// Apply `SampleSurface` results to the strips and path states.
pub fn apply_vertex_updates(paths: &mut [PathState], strips: &mut Subpaths, updates: VertexUpdates) {
    for (pixel, update) in updates {
        let pixel = pixel as usize;
        if let (Some(pdf), Some(last)) = (update.prev_pdf_rev, strips.last_mut(pixel)) {
            last.pdf_rev = pdf;
        }
        let mut path = update.path;
        if let Some(v) = update.vertex {
            if !strips.push(pixel, v) {
                path.kill();
            }
        }
        paths[pixel] = path;
    }
}

/// Slot-indexed outputs of a connection kernel.
pub struct ConnectionOutputs<'a> {
    pub shadow_rays: &'a mut [Ray],
    pub contributions: &'a mut [Vec3],
}

type MisList = SmallVec<[MisVertex; BDPT_MAX_SUBPATH_LEN]>;

fn mis_list(vertices: &[PathVertex]) -> MisList {
    vertices.iter().map(MisVertex::from).collect()
}

#[inline]
fn direction(from: Vec3, to: Vec3) -> Vec3 {
    (to - from).normalize_or_zero()
}

/// BSDF of a surface vertex for the pair of directions.
fn eval_f(scene: &Scene, v: &PathVertex, wo: Vec3, wi: Vec3) -> Vec3 {
    v.material_id()
        .and_then(|m| scene.material(m))
        .map_or(Vec3::ZERO, |m| m.eval(wo, wi, v.shading_normal()))
}

/// Area density at `next` of light vertex `v` emitting towards it.
fn pdf_light(scene: &Scene, v: &PathVertex, next: &PathVertex) -> f32 {
    let Some(light) = v.light_id().and_then(|l| scene.light(l)) else {
        return 0.0;
    };
    let p = v.position();
    let pdf_dir = light.pdf_le_dir(v.normal(), direction(p, next.position()));
    solid_angle_to_area(pdf_dir, p, next.position(), next.normal())
}

/// Density of starting a light subpath at light vertex `v`.
fn pdf_light_origin(scene: &Scene, v: &PathVertex) -> f32 {
    v.light_id()
        .and_then(|l| {
            let light = scene.light(l)?;
            Some(scene.emitter_distribution().pdf(l) * light.pdf_le_pos(scene.shapes()))
        })
        .unwrap_or(0.0)
}

/// Area density at `next` of continuing from `v` after arriving from `prev`.
fn pdf_area(scene: &Scene, v: &PathVertex, prev: Option<&PathVertex>, next: &PathVertex) -> f32 {
    let p = v.position();
    let wn = direction(p, next.position());
    let pdf_dir = match v.kind() {
        Some(VertexKind::Camera) => scene.camera().pdf_dir(wn),
        Some(VertexKind::Light) => return pdf_light(scene, v, next),
        Some(VertexKind::Surface) => {
            let material = v.material_id().and_then(|m| scene.material(m));
            match (prev, material) {
                (Some(prev), Some(m)) => m.pdf(direction(p, prev.position()), wn, v.shading_normal()),
                _ => 0.0,
            }
        }
        Some(VertexKind::Volume) | None => 0.0,
    };
    solid_angle_to_area(pdf_dir, p, next.position(), next.normal())
}

/// Shadow ray from vertex `from` stopping just short of `to`.
fn connection_ray(from: &PathVertex, to: Vec3) -> Option<Ray> {
    let p = from.position();
    let d = to - p;
    let dist = d.length();
    if dist <= RAY_EPSILON {
        return None;
    }
    let dir = d / dist;
    let origin = from.normal().map_or(p, |n| offset_origin(p, n, dir));
    Some(Ray::new(origin, dir, dist * (1.0 - 1e-3), visibility::SHADOW))
}

/// Weight of an eye subpath ending on an emitter (`hit` as light vertex).
fn emission_weight(scene: &Scene, eye: &[PathVertex], hit: &PathVertex, caps: SplitCaps) -> f32 {
    let Some(pt_minus) = eye.last() else {
        return 1.0;
    };
    let pdfs = ConnectionPdfs {
        pt: Some(pdf_light_origin(scene, hit)),
        pt_minus: Some(pdf_light(scene, hit, pt_minus)),
        ..Default::default()
    };
    let mut vertices = mis_list(eye);
    vertices.push(MisVertex::from(hit));
    mis_weight(&vertices, &[], false, caps, pdfs)
}

/// `GenerateVertices`: camera vertex for every pixel with an active primary
/// ray. The ray pdf is set to the camera's directional pdf.
pub fn generate_vertices(camera: &Camera, rays: &mut [Ray], strips: &mut Subpaths) {
    let stride = strips.stride();
    let n = rays.len();
    strips.vertices[..n * stride]
        .par_chunks_mut(stride)
        .zip(strips.lens[..n].par_iter_mut())
        .zip(rays.par_iter_mut())
        .for_each(|((strip, len), ray)| {
            if !ray.is_active() {
                *len = 0;
                return;
            }
            *ray = ray.with_pdf(camera.pdf_dir(ray.direction()));
            strip[0] = PathVertex::camera(camera, ray.origin());
            *len = 1;
        });
}

/// Light vertex, first ray and path throughput of a new light subpath.
fn emit(scene: &Scene, sampler: &mut Sampler) -> Option<(PathVertex, Ray, Vec3)> {
    let (light_id, select_pdf) = scene.emitter_distribution().sample(sampler.next_1d())?;
    let light = scene.light(light_id)?;
    let u_pos = sampler.next_2d();
    let u_dir = sampler.next_2d();
    let es = light.sample_le(scene.geometry(), scene.shapes(), u_pos, u_dir)?;
    let pdf_fwd = select_pdf * es.pdf_pos;
    if pdf_fwd <= PDF_EPSILON || es.pdf_dir <= PDF_EPSILON {
        return None;
    }
    let vertex = PathVertex::light(
        light_id,
        es.position,
        es.normal,
        safe_div(es.radiance, pdf_fwd),
        pdf_fwd,
        es.delta_pos,
    );
    let cos = es.normal.map_or(1.0, |n| n.dot(es.dir).abs());
    let beta = safe_div(es.radiance * cos, pdf_fwd * es.pdf_dir);
    let origin = es.normal.map_or(es.position, |n| offset_origin(es.position, n, es.dir));
    let ray = Ray::new(origin, es.dir, CAMERA_FAR, visibility::SECONDARY).with_pdf(es.pdf_dir);
    Some((vertex, ray, beta))
}

/// `GenerateLightVertices`: light vertex and first ray for every pixel.
/// Pixels whose emission sample fails start with a killed path.
pub fn generate_light_vertices(
    ctx: &KernelContext<'_>,
    seeds: &[u32],
    rays: &mut [Ray],
    paths: &mut [PathState],
    strips: &mut Subpaths,
) {
    let stride = strips.stride();
    let n = rays.len();
    strips.vertices[..n * stride]
        .par_chunks_mut(stride)
        .zip(strips.lens[..n].par_iter_mut())
        .zip(rays.par_iter_mut())
        .zip(paths[..n].par_iter_mut())
        .enumerate()
        .for_each(|(i, (((strip, len), ray), path))| {
            let mut sampler = ctx.sampler(seeds[i], Stream::Emission);
            match emit(ctx.scene, &mut sampler) {
                Some((vertex, first, beta)) => {
                    strip[0] = vertex;
                    *len = 1;
                    *ray = first;
                    path.set_throughput(beta);
                }
                None => {
                    *len = 0;
                    *ray = Ray::INACTIVE;
                    path.kill();
                }
            }
        });
}

/// `SampleSurface`: append the hit as a vertex and sample the next
/// direction. In eye mode a hit emitter adds the s = 0 contribution and
/// ends the subpath; in light mode emitters just end it.
pub fn sample_surface(
    ctx: &KernelContext<'_>,
    mode: SubpathMode,
    input: SlotInputs<'_>,
    strips: &Subpaths,
    next_rays: &mut [Ray],
    out: OutputTarget<'_>,
) -> VertexUpdates {
    let scene = ctx.scene;
    let cap = mode.vertex_cap(ctx.max_bounces, strips.stride());
    let caps = split_caps(scene.camera(), ctx.max_bounces, strips.stride());
    let stream = match mode {
        SubpathMode::Eye => Stream::Surface,
        SubpathMode::Light => Stream::LightPath,
    };

    next_rays
        .par_iter_mut()
        .enumerate()
        .map(|(i, next)| {
            *next = Ray::INACTIVE;
            let pixel = input.pixels[i];
            let mut path = input.paths[pixel as usize];
            let end = |mut path: PathState, vertex: Option<PathVertex>| {
                path.kill();
                (
                    pixel,
                    VertexUpdate {
                        path,
                        prev_pdf_rev: None,
                        vertex,
                    },
                )
            };

            let strip = strips.path(pixel as usize);
            let src = input.compacted[i] as usize;
            let ray = input.rays[src];
            let (Some(prev), Some(sp)) = (strip.last(), scene.surface(&input.hits[src])) else {
                return end(path, None);
            };
            let Some(material) = scene.material(sp.material) else {
                return end(path, None);
            };
            let wo = -ray.direction();
            let ng = sp.geometric_normal;

            if material.is_passthrough() {
                let dir = ray.direction();
                *next = Ray::new(offset_origin(sp.position, ng, dir), dir, CAMERA_FAR, ray.mask).with_pdf(ray.pdf());
                let update = VertexUpdate {
                    path,
                    prev_pdf_rev: None,
                    vertex: None,
                };
                return (pixel, update);
            }

            let flow = path.throughput();
            let pdf_fwd = solid_angle_to_area(ray.pdf(), prev.position(), sp.position, Some(ng));
            let mut vertex = PathVertex::surface(&sp, flow, pdf_fwd);

            if material.is_emissive() {
                let le = material.emission(wo, ng);
                if mode == SubpathMode::Eye && le != Vec3::ZERO && strip.len() + 1 <= cap {
                    let weight = match scene.shape_light(sp.shape) {
                        Some(light) => {
                            let hit = PathVertex {
                                kind: VertexKind::Light as u32,
                                light: light as i32,
                                ..vertex
                            };
                            emission_weight(scene, strip, &hit, caps)
                        }
                        None => 1.0,
                    };
                    out.add(pixel as usize, flow * le * weight);
                }
                return end(path, None);
            }

            if strip.len() + 1 >= cap {
                return end(path, Some(vertex));
            }

            let ns = sp.shading_normal;
            let mut sampler = ctx.sampler(input.seeds[pixel as usize], stream);
            let Some(bs) = material.sample(wo, ns, sampler.next_2d()).filter(|bs| bs.pdf > 0.0) else {
                return end(path, Some(vertex));
            };
            let cos = bs.wi.dot(ns).abs();
            let (pdf_next, pdf_rev) = if bs.delta {
                vertex.flags |= vertex_flags::DELTA;
                (0.0, 0.0)
            } else {
                (bs.pdf, material.pdf(bs.wi, wo, ns))
            };
            path.set_throughput(flow * bs.f * safe_div_f32(cos, bs.pdf));
            *next = Ray::new(
                offset_origin(sp.position, ng, bs.wi),
                bs.wi,
                CAMERA_FAR,
                visibility::SECONDARY,
            )
            .with_pdf(pdf_next);
            let update = VertexUpdate {
                path,
                prev_pdf_rev: Some(solid_angle_to_area(pdf_rev, sp.position, prev.position(), prev.normal())),
                vertex: Some(vertex),
            };
            (pixel, update)
        })
        .collect()
}

/// `ShadeMiss` for eye subpaths: escaped rays see the environment with
/// weight one.
pub fn shade_escaped(
    rays: &[Ray],
    hits: &[Intersection],
    pixels: &[u32],
    paths: &[PathState],
    radiance: Vec3,
    out: OutputTarget<'_>,
) {
    hits.par_iter()
        .zip(rays.par_iter())
        .zip(pixels.par_iter())
        .for_each(|((hit, ray), &pixel)| {
            let path = &paths[pixel as usize];
            if hit.is_hit() || !ray.is_active() || !path.is_alive() {
                return;
            }
            out.add(pixel as usize, path.throughput() * radiance);
        });
}

fn direct(
    ctx: &KernelContext<'_>,
    eye: &[PathVertex],
    t: usize,
    seed: u32,
    caps: SplitCaps,
) -> Option<(Ray, Vec3)> {
    let scene = ctx.scene;
    if t < 2 || eye.len() < t {
        return None;
    }
    let (pt, pt_minus) = (&eye[t - 1], &eye[t - 2]);
    if !pt.is_connectible() {
        return None;
    }
    let mut sampler = ctx.sampler(seed, Stream::Connect);
    let (light_id, select_pdf) = scene.emitter_distribution().sample(sampler.next_1d())?;
    let light = scene.light(light_id)?;
    let p = pt.position();
    let ls = light.sample_li(scene.geometry(), scene.shapes(), p, sampler.next_2d())?;

    let wo = direction(p, pt_minus.position());
    let f = eval_f(scene, pt, wo, ls.wi) * ls.wi.dot(pt.shading_normal()).abs();
    if f == Vec3::ZERO {
        return None;
    }
    let l = safe_div(pt.flow() * f * ls.radiance, select_pdf * ls.pdf);

    let pdf_origin = select_pdf * light.pdf_le_pos(scene.shapes());
    let qs = PathVertex::light(
        light_id,
        ls.position,
        ls.normal,
        safe_div(ls.radiance, pdf_origin),
        pdf_origin,
        ls.delta,
    );
    let pdfs = ConnectionPdfs {
        pt: Some(pdf_light(scene, &qs, pt)),
        pt_minus: Some(pdf_area(scene, pt, Some(&qs), pt_minus)),
        qs: Some(pdf_area(scene, pt, Some(pt_minus), &qs)),
        qs_minus: None,
    };
    let weight = mis_weight(
        &mis_list(&eye[..t]),
        &[MisVertex::from(&qs)],
        qs.is_delta_light(),
        caps,
        pdfs,
    );
    Some((connection_ray(pt, ls.position)?, l * weight))
}

/// `ConnectDirect` (s = 1): join eye vertex `t - 1` to a fresh light
/// sample.
pub fn connect_direct(ctx: &KernelContext<'_>, t: usize, eye: &Subpaths, seeds: &[u32], out: ConnectionOutputs<'_>) {
    let ctx = ctx.at_bounce(t as u32);
    let caps = split_caps(ctx.scene.camera(), ctx.max_bounces, eye.stride());
    out.shadow_rays
        .par_iter_mut()
        .zip(out.contributions.par_iter_mut())
        .enumerate()
        .for_each(|(pixel, (shadow, contribution))| {
            (*shadow, *contribution) =
                direct(&ctx, eye.path(pixel), t, seeds[pixel], caps).unwrap_or((Ray::INACTIVE, Vec3::ZERO));
        });
}

fn join(
    scene: &Scene,
    eye: &[PathVertex],
    light: &[PathVertex],
    s: usize,
    t: usize,
    caps: SplitCaps,
) -> Option<(Ray, Vec3)> {
    if s < 2 || t < 2 || eye.len() < t || light.len() < s {
        return None;
    }
    let (pt, pt_minus) = (&eye[t - 1], &eye[t - 2]);
    let (qs, qs_minus) = (&light[s - 1], &light[s - 2]);
    if !pt.is_connectible() || !qs.is_connectible() {
        return None;
    }
    let d = qs.position() - pt.position();
    let dist2 = d.length_squared();
    if dist2 <= PDF_EPSILON {
        return None;
    }
    let w = d / dist2.sqrt();
    let f_pt = eval_f(scene, pt, direction(pt.position(), pt_minus.position()), w);
    let f_qs = eval_f(scene, qs, direction(qs.position(), qs_minus.position()), -w);
    let g = w.dot(pt.shading_normal()).abs() * w.dot(qs.shading_normal()).abs() / dist2;
    let l = pt.flow() * f_pt * f_qs * qs.flow() * g;
    if l == Vec3::ZERO {
        return None;
    }
    let pdfs = ConnectionPdfs {
        pt: Some(pdf_area(scene, qs, Some(qs_minus), pt)),
        pt_minus: Some(pdf_area(scene, pt, Some(qs), pt_minus)),
        qs: Some(pdf_area(scene, pt, Some(pt_minus), qs)),
        qs_minus: Some(pdf_area(scene, qs, Some(pt), qs_minus)),
    };
    let weight = mis_weight(
        &mis_list(&eye[..t]),
        &mis_list(&light[..s]),
        light[0].is_delta_light(),
        caps,
        pdfs,
    );
    Some((connection_ray(pt, qs.position())?, l * weight))
}

/// `Connect` (s, t >= 2): join eye vertex `t - 1` to light vertex `s - 1`.
pub fn connect(
    scene: &Scene,
    (s, t): (usize, usize),
    caps: SplitCaps,
    eye: &Subpaths,
    light: &Subpaths,
    out: ConnectionOutputs<'_>,
) {
    out.shadow_rays
        .par_iter_mut()
        .zip(out.contributions.par_iter_mut())
        .enumerate()
        .for_each(|(pixel, (shadow, contribution))| {
            (*shadow, *contribution) = join(scene, eye.path(pixel), light.path(pixel), s, t, caps)
                .unwrap_or((Ray::INACTIVE, Vec3::ZERO));
        });
}

fn caustic(scene: &Scene, light: &[PathVertex], s: usize, caps: SplitCaps) -> Option<(Ray, Vec3, u32)> {
    if s < 2 || light.len() < s {
        return None;
    }
    let (qs, qs_minus) = (&light[s - 1], &light[s - 2]);
    if !qs.is_connectible() {
        return None;
    }
    let camera = scene.camera();
    let cell = camera.raster_index(camera.project(qs.position())?)?;
    let d = camera.position - qs.position();
    let dist2 = d.length_squared();
    if dist2 <= PDF_EPSILON {
        return None;
    }
    let w = d / dist2.sqrt();
    let importance = camera.importance(-w);
    let cos_camera = (-w).dot(camera.forward);
    let f = eval_f(scene, qs, direction(qs.position(), qs_minus.position()), w);
    let l = qs.flow() * f * (importance * w.dot(qs.shading_normal()).abs() * cos_camera / dist2);
    if l == Vec3::ZERO {
        return None;
    }
    let pt = PathVertex::camera(camera, camera.position);
    let pdfs = ConnectionPdfs {
        pt: Some(pdf_area(scene, qs, Some(qs_minus), &pt)),
        pt_minus: None,
        qs: Some(pdf_area(scene, &pt, None, qs)),
        qs_minus: Some(pdf_area(scene, qs, Some(&pt), qs_minus)),
    };
    let weight = mis_weight(
        &[MisVertex::from(&pt)],
        &mis_list(&light[..s]),
        light[0].is_delta_light(),
        caps,
        pdfs,
    );
    Some((connection_ray(qs, camera.position)?, l * weight, cell as u32))
}

/// `ConnectCaustics` (t = 1): project light vertex `s - 1` onto the image.
/// Contributions are pre-scaled by `scale` (image pixels per light path).
pub fn connect_caustics(
    scene: &Scene,
    s: usize,
    caps: SplitCaps,
    light: &Subpaths,
    scale: f32,
    out: ConnectionOutputs<'_>,
    splats: &mut [u32],
) {
    out.shadow_rays
        .par_iter_mut()
        .zip(out.contributions.par_iter_mut())
        .zip(splats.par_iter_mut())
        .enumerate()
        .for_each(|(pixel, ((shadow, contribution), splat))| {
            match caustic(scene, light.path(pixel), s, caps) {
                Some((ray, l, cell)) => {
                    *shadow = ray;
                    *contribution = l * scale;
                    *splat = cell;
                }
                None => {
                    *shadow = Ray::INACTIVE;
                    *contribution = Vec3::ZERO;
                    *splat = NO_SPLAT;
                }
            }
        });
}

/// `GatherCausticContributions`: atomically splat unoccluded caustic
/// contributions into their raster cells.
pub fn gather_caustic_contributions(
    shadow_rays: &[Ray],
    occluded: &[u32],
    contributions: &[Vec3],
    splats: &[u32],
    out: OutputTarget<'_>,
) {
    shadow_rays
        .par_iter()
        .zip(occluded.par_iter())
        .zip(contributions.par_iter())
        .zip(splats.par_iter())
        .for_each(|(((ray, &occ), &c), &cell)| {
            if ray.is_active() && occ == 0 && cell != NO_SPLAT {
                out.splat(cell as usize, c);
            }
        });
}
