//! Kernels of the wavefront path tracer.
//!
//! Slot conventions for bounce `b`:
//! - before compaction, slot `i` of the current ray half belongs to pixel
//!   `pixels[i]` (the previous half of `pixel_indices`);
//! - after compaction, slot `i` reads its ray and hit from slot
//!   `compacted[i]` and belongs to the restored `pixels[i]`; its next ray
//!   goes to slot `i` of the other half.

use diffuse_bsdf::{mis, phase, warp};
use glam::Vec3;
use rayon::prelude::*;

use super::{max_component, KernelContext, OutputTarget, Stream};
use crate::core::{visibility, Intersection, PathFlags, PathState, Ray};
use crate::estimator::{MissedRayHandler, QualityLevel};
use crate::scene::{LightSample, Volume, CAMERA_FAR, ENVIRONMENT_DISTANCE};
use crate::util::{offset_origin, safe_div, safe_div_f32};

/// Path updates produced by a kernel, applied with [`scatter_paths`].
pub type PathUpdates = Vec<(u32, PathState)>;

/// Apply per-pixel path updates.
pub fn scatter_paths(paths: &mut [PathState], updates: PathUpdates) {
    for (pixel, state) in updates {
        paths[pixel as usize] = state;
    }
}

/// Slot-indexed inputs read by the shading kernels.
#[derive(Clone, Copy)]
pub struct SlotInputs<'a> {
    /// Rays of the current half.
    pub rays: &'a [Ray],
    pub hits: &'a [Intersection],
    /// Pixel owning each (restored) slot.
    pub pixels: &'a [u32],
    /// Source slot of each compacted slot.
    pub compacted: &'a [u32],
    pub paths: &'a [PathState],
    pub seeds: &'a [u32],
}

/// Slot-indexed outputs of the shading kernels.
pub struct SlotOutputs<'a> {
    pub next_rays: &'a mut [Ray],
    pub shadow_rays: &'a mut [Ray],
    pub light_samples: &'a mut [Vec3],
}

/// Shadow ray towards a light sample, stopping short of the light.
fn shadow_ray(origin: Vec3, ls: &LightSample) -> Ray {
    let max_t = if ls.distance >= ENVIRONMENT_DISTANCE {
        ENVIRONMENT_DISTANCE
    } else {
        ls.distance * (1.0 - 1e-3)
    };
    Ray::new(origin, ls.wi, max_t, visibility::SHADOW)
}

/// `EvaluateVolume`: free-flight sampling in the path's medium.
pub fn evaluate_volume(
    ctx: &KernelContext<'_>,
    rays: &[Ray],
    pixels: &[u32],
    paths: &[PathState],
    seeds: &[u32],
    out: OutputTarget<'_>,
    hits: &mut [Intersection],
) -> PathUpdates {
    let scene = ctx.scene;
    hits.par_iter_mut()
        .zip(rays.par_iter())
        .zip(pixels.par_iter())
        .filter_map(|((hit, ray), &pixel)| {
            let mut path = paths[pixel as usize];
            if !path.is_alive() {
                return None;
            }
            let volume = scene.volume(path.medium()?)?;
            let density = volume.sampling_density();
            if density <= 0.0 {
                return None;
            }

            let mut sampler = ctx.sampler(seeds[pixel as usize], Stream::Volume);
            let distance = -(1.0 - sampler.next_1d()).ln() / density;
            let t_hit = hit.t().min(ray.max_t());
            let throughput = path.throughput();

            if distance < t_hit {
                let tr = volume.transmittance(distance);
                let pdf = density * (-density * distance).exp();
                if ctx.quality != QualityLevel::Rough && volume.emission != Vec3::ZERO {
                    out.add(
                        pixel as usize,
                        safe_div(throughput * tr * volume.sigma_a * volume.emission, pdf),
                    );
                }
                path.set_throughput(safe_div(throughput * tr * volume.sigma_s, pdf));
                path.flags.insert(PathFlags::SCATTERED);
                hit.uvwt[3] = distance;
            } else {
                let tr = volume.transmittance(t_hit);
                path.set_throughput(safe_div(throughput * tr, (-density * t_hit).exp()));
            }
            Some((pixel, path))
        })
        .collect()
}

/// `ShadeMiss`: environment radiance for paths escaping after bounce 0.
pub fn shade_miss(
    ctx: &KernelContext<'_>,
    rays: &[Ray],
    hits: &[Intersection],
    pixels: &[u32],
    paths: &[PathState],
    out: OutputTarget<'_>,
) {
    let scene = ctx.scene;
    let Some(env) = scene.environment() else {
        return;
    };
    let radiance = scene.environment_radiance();
    let light_pdf = scene.light_distribution().pdf(env) * warp::uniform_sphere_pdf();

    hits.par_iter()
        .zip(rays.par_iter())
        .zip(pixels.par_iter())
        .for_each(|((hit, ray), &pixel)| {
            let path = &paths[pixel as usize];
            if hit.is_hit() || !path.is_alive() || path.is_scattered() {
                return;
            }
            let weight = if path.skips_light_mis() {
                1.0
            } else {
                mis::balance(ray.pdf(), light_pdf)
            };
            out.add(pixel as usize, path.throughput() * radiance * weight);
        });
}

/// `FilterPathStream`: predicate 1 for paths that continue, kills the rest.
pub fn filter_path_stream(
    ctx: &KernelContext<'_>,
    hits: &[Intersection],
    pixels: &[u32],
    paths: &[PathState],
    predicates: &mut [u32],
) -> PathUpdates {
    let floor = ctx.limits.throughput_floor;
    predicates
        .par_iter_mut()
        .zip(hits.par_iter())
        .zip(pixels.par_iter())
        .filter_map(|((pred, hit), &pixel)| {
            let mut path = paths[pixel as usize];
            let keep = path.is_alive()
                && max_component(path.throughput()) > floor
                && (hit.is_hit() || path.is_scattered());
            *pred = u32::from(keep);
            if keep || !path.is_alive() {
                return None;
            }
            path.kill();
            Some((pixel, path))
        })
        .collect()
}

/// `ShadeVolume`: next-event estimation and phase sampling at scatter
/// points. Slots whose path did not scatter are left untouched.
pub fn shade_volume(ctx: &KernelContext<'_>, input: SlotInputs<'_>, output: SlotOutputs<'_>) -> PathUpdates {
    let scene = ctx.scene;
    output
        .next_rays
        .par_iter_mut()
        .zip(output.shadow_rays.par_iter_mut())
        .zip(output.light_samples.par_iter_mut())
        .enumerate()
        .filter_map(|(i, ((next, shadow), sample))| {
            let pixel = input.pixels[i];
            let mut path = input.paths[pixel as usize];
            if !path.is_scattered() {
                return None;
            }
            let src = input.compacted[i] as usize;
            let ray = input.rays[src];
            let position = ray.at(input.hits[src].t());
            let wo = -ray.direction();
            let throughput = path.throughput();
            let volume = path.medium().and_then(|v| scene.volume(v)).copied().unwrap_or(Volume::new(
                Vec3::ZERO,
                Vec3::ZERO,
                0.0,
            ));

            *shadow = Ray::INACTIVE;
            *sample = Vec3::ZERO;
            let seed = input.seeds[pixel as usize];
            if ctx.quality != QualityLevel::Rough {
                let mut ls_sampler = ctx.sampler(seed, Stream::Light);
                let picked = scene.light_distribution().sample(ls_sampler.next_1d());
                if let Some((light, select_pdf)) = picked {
                    let ls = scene.lights()[light].sample_li(
                        scene.geometry(),
                        scene.shapes(),
                        position,
                        ls_sampler.next_2d(),
                    );
                    if let Some(ls) = ls {
                        let ph = phase::eval(wo, ls.wi, volume.g);
                        let light_pdf = select_pdf * ls.pdf;
                        let weight = if ls.delta || ctx.is_last_pass() {
                            1.0
                        } else {
                            mis::balance(light_pdf, ph)
                        };
                        let tr = volume.transmittance(scene.medium_extent(position, ls.wi, ls.distance));
                        *sample = safe_div(throughput * ls.radiance * tr * ph * weight, light_pdf);
                        *shadow = shadow_ray(position, &ls);
                    }
                }
            }

            let mut sampler = ctx.sampler(seed, Stream::Volume);
            let _ = sampler.next_1d();
            let (wi, pdf) = phase::sample(wo, volume.g, sampler.next_2d());
            path.flags.remove(PathFlags::SCATTERED);
            path.flags.remove(PathFlags::SPECULAR);
            if ctx.quality == QualityLevel::Rough {
                path.flags.insert(PathFlags::UNSAMPLED);
            } else {
                path.flags.remove(PathFlags::UNSAMPLED);
            }
            *next = if pdf > 0.0 {
                Ray::new(position, wi, CAMERA_FAR, visibility::SECONDARY).with_pdf(pdf)
            } else {
                path.kill();
                Ray::INACTIVE
            };
            Some((pixel, path))
        })
        .collect()
}

/// `ShadeSurface`: emission, interfaces, Russian roulette, light sampling
/// and BSDF sampling at surface hits. Scattered slots are left untouched.
pub fn shade_surface(
    ctx: &KernelContext<'_>,
    input: SlotInputs<'_>,
    output: SlotOutputs<'_>,
    out: OutputTarget<'_>,
) -> PathUpdates {
    let scene = ctx.scene;
    output
        .next_rays
        .par_iter_mut()
        .zip(output.shadow_rays.par_iter_mut())
        .zip(output.light_samples.par_iter_mut())
        .enumerate()
        .filter_map(|(i, ((next, shadow), sample))| {
            let pixel = input.pixels[i];
            let mut path = input.paths[pixel as usize];
            if path.is_scattered() {
                return None;
            }
            *next = Ray::INACTIVE;
            *shadow = Ray::INACTIVE;
            *sample = Vec3::ZERO;

            let src = input.compacted[i] as usize;
            let ray = input.rays[src];
            let hit = input.hits[src];
            let (Some(sp), true) = (scene.surface(&hit), path.is_alive()) else {
                path.kill();
                return Some((pixel, path));
            };
            let Some(material) = scene.material(sp.material) else {
                path.kill();
                return Some((pixel, path));
            };
            let wo = -ray.direction();
            let ng = sp.geometric_normal;
            let ns = sp.shading_normal;
            let mut throughput = path.throughput();

            if material.is_emissive() {
                let le = material.emission(wo, ng);
                if le != Vec3::ZERO {
                    let weight = if ctx.bounce == 0 || path.skips_light_mis() {
                        1.0
                    } else {
                        match scene.shape_light(sp.shape) {
                            Some(light) => {
                                let select_pdf = scene.light_distribution().pdf(light);
                                let pdf = scene.lights()[light].pdf_li(
                                    scene.shapes(),
                                    ray.source(),
                                    sp.position,
                                    ng,
                                );
                                mis::balance(ray.pdf(), select_pdf * pdf)
                            }
                            None => 1.0,
                        }
                    };
                    out.add(pixel as usize, throughput * le * weight);
                }
                path.kill();
                return Some((pixel, path));
            }

            if material.is_passthrough() {
                let dir = ray.direction();
                let boundary = scene.shape(sp.shape).and_then(|s| s.volume);
                let medium = if dir.dot(ng) < 0.0 { boundary } else { None };
                path.set_medium(medium.map(|v| v as usize));
                *next = Ray::new(offset_origin(sp.position, ng, dir), dir, CAMERA_FAR, ray.mask)
                    .with_pdf(ray.pdf())
                    .with_travelled(ray.travelled() + hit.t());
                return Some((pixel, path));
            }

            let seed = input.seeds[pixel as usize];
            if ctx.bounce >= ctx.roulette_start() {
                let q = max_component(throughput).min(1.0);
                if q <= 0.0 || ctx.sampler(seed, Stream::Roulette).next_1d() >= q {
                    path.kill();
                    return Some((pixel, path));
                }
                throughput /= q;
            }

            if !material.is_delta() {
                let mut ls_sampler = ctx.sampler(seed, Stream::Light);
                let picked = scene.light_distribution().sample(ls_sampler.next_1d());
                if let Some((light, select_pdf)) = picked {
                    let ls = scene.lights()[light].sample_li(
                        scene.geometry(),
                        scene.shapes(),
                        sp.position,
                        ls_sampler.next_2d(),
                    );
                    if let Some(ls) = ls {
                        let f = material.eval(wo, ls.wi, ns) * ls.wi.dot(ns).abs();
                        if f != Vec3::ZERO {
                            let light_pdf = select_pdf * ls.pdf;
                            let weight = if ls.delta || ctx.is_last_pass() {
                                1.0
                            } else {
                                mis::balance(light_pdf, material.pdf(wo, ls.wi, ns))
                            };
                            let origin = offset_origin(sp.position, ng, ls.wi);
                            let tr = path.medium().and_then(|v| scene.volume(v)).map_or(Vec3::ONE, |v| {
                                v.transmittance(scene.medium_extent(origin, ls.wi, ls.distance))
                            });
                            *sample = safe_div(throughput * f * ls.radiance * tr * weight, light_pdf);
                            *shadow = shadow_ray(origin, &ls);
                        }
                    }
                }
            }

            let mut bsdf_sampler = ctx.sampler(seed, Stream::Surface);
            match material.sample(wo, ns, bsdf_sampler.next_2d()) {
                Some(bs) if bs.pdf > 0.0 => {
                    let cos = bs.wi.dot(ns).abs();
                    path.set_throughput(throughput * bs.f * safe_div_f32(cos, bs.pdf));
                    path.flags.remove(PathFlags::UNSAMPLED);
                    if bs.delta {
                        path.flags.insert(PathFlags::SPECULAR);
                    } else {
                        path.flags.remove(PathFlags::SPECULAR);
                    }
                    *next = Ray::new(
                        offset_origin(sp.position, ng, bs.wi),
                        bs.wi,
                        CAMERA_FAR,
                        visibility::SECONDARY,
                    )
                    .with_pdf(bs.pdf);
                }
                _ => path.kill(),
            }
            Some((pixel, path))
        })
        .collect()
}

/// `ShadeBackground` / `HandleMissedRays`: radiance for primary rays that
/// escaped without scattering. At bounce 0 slot `i` is pixel `i`.
pub fn shade_background(
    rays: &[Ray],
    hits: &[Intersection],
    predicates: &[u32],
    paths: &[PathState],
    background: Vec3,
    handler: Option<&dyn MissedRayHandler>,
    out: OutputTarget<'_>,
) {
    hits.par_iter()
        .zip(rays.par_iter())
        .zip(predicates.par_iter())
        .enumerate()
        .for_each(|(pixel, ((hit, ray), &pred))| {
            if hit.is_hit() || pred != 0 || !ray.is_active() {
                return;
            }
            let radiance = match handler {
                Some(h) => h.radiance(ray),
                None => background,
            };
            out.add(pixel, paths[pixel].throughput() * radiance);
        });
}

/// `AdvanceIterationCount`: one more sample for each of the `n` pixels.
pub fn advance_iteration_count(n: usize, out: OutputTarget<'_>) {
    (0..n).into_par_iter().for_each(|pixel| out.add_samples(pixel, 1.0));
}

/// `GatherLightSamples`: deposit unoccluded light samples.
pub fn gather_light_samples(
    shadow_rays: &[Ray],
    occluded: &[u32],
    light_samples: &[Vec3],
    pixels: &[u32],
    out: OutputTarget<'_>,
) {
    shadow_rays
        .par_iter()
        .zip(occluded.par_iter())
        .zip(light_samples.par_iter())
        .zip(pixels.par_iter())
        .for_each(|(((ray, &occ), &sample), &pixel)| {
            if ray.is_active() && occ == 0 {
                out.add(pixel as usize, sample);
            }
        });
}

/// `GatherVisibility`: 1 per unoccluded and 0 per occluded candidate, one
/// sample count each.
pub fn gather_visibility(shadow_rays: &[Ray], occluded: &[u32], pixels: &[u32], out: OutputTarget<'_>) {
    shadow_rays
        .par_iter()
        .zip(occluded.par_iter())
        .zip(pixels.par_iter())
        .for_each(|((ray, &occ), &pixel)| {
            if !ray.is_active() {
                return;
            }
            let v = if occ == 0 { 1.0 } else { 0.0 };
            out.buffer.add(out.cell(pixel as usize), Vec3::splat(v).extend(1.0), out.mode);
        });
}
