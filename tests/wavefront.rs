//! Pipeline properties of the wavefront path tracer.

use approx::assert_relative_eq;
use glam::{Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use wavetrace::core::ActiveCount;
use wavetrace::device::{compact, ComputeQueue, DeviceLimits, Kernel, OutputBuffer, Parity};
use wavetrace::estimator::{
    EstimateOptions, Estimator, EstimatorConfig, EstimatorKind, QualityLevel, RandomBufferType,
    RenderData,
};
use wavetrace::kernels::camera::generate_primary_rays;
use wavetrace::scene::{Camera, Material, Preset, Scene};

fn fill_primary_rays(est: &mut dyn Estimator, scene: &Scene, launch_seed: u32) -> usize {
    let n = scene.camera().pixel_count();
    let cells: Vec<u32> = (0..n as u32).collect();
    generate_primary_rays(scene.camera(), &cells, launch_seed, 0, true, est.ray_buffer_mut().unwrap());
    n
}

fn estimator(kind: EstimatorKind, config: EstimatorConfig, size: usize) -> Box<dyn Estimator> {
    let mut est = kind.create(config).unwrap();
    est.set_work_buffer_size(size).unwrap();
    est
}

/// Camera facing a large one-sided emitter that is not registered as a
/// light.
fn emissive_wall(width: u32, height: u32, with_plane: bool) -> Scene {
    let mut b = Scene::builder();
    let glow = b.add_material(Material::emissive(Vec3::splat(2.0)));
    if with_plane {
        let grey = b.add_material(Material::diffuse(Vec3::splat(0.5)));
        b.add_quad_facing(Vec3::new(0.0, -0.5, 0.0), Vec3::Y, 3.0, grey).unwrap();
        b.add_quad_facing(Vec3::new(0.0, 0.5, -1.0), Vec3::Z, 0.5, glow).unwrap();
    } else {
        b.add_quad_facing(Vec3::ZERO, Vec3::Z, 10.0, glow).unwrap();
    }
    b.set_camera(Camera::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y, 45.0, width, height));
    b.build().unwrap()
}

#[test]
fn compaction_matches_predicates() {
    let mut rng = StdRng::seed_from_u64(11);
    for len in [0usize, 1, 7, 64, 1000, 5000] {
        let predicates: Vec<u32> = (0..len).map(|_| u32::from(rng.gen_bool(0.4))).collect();
        let mut out = vec![u32::MAX; len];
        let live = compact(&predicates, &mut out);
        let expected: Vec<u32> = (0..len as u32).filter(|&i| predicates[i as usize] == 1).collect();
        assert_eq!(live.get(), expected.len());
        assert_eq!(&out[..live.get()], expected.as_slice());
    }
}

#[test]
fn restored_indices_track_origin_pixels() {
    let size = 257;
    let mut rng = StdRng::seed_from_u64(3);
    let (mut data, _) = RenderData::allocate(size, DeviceLimits::default(), &mut rng).unwrap();
    let mut queue = ComputeQueue::new("test");
    let mut live = data.init_paths(size);
    let mut model: Vec<u32> = (0..size as u32).collect();

    for bounce in 0..6 {
        let preds: Vec<u32> = (0..live.get()).map(|_| u32::from(rng.gen_bool(0.7))).collect();
        data.predicates[..live.get()].copy_from_slice(&preds);
        live = data.compact_and_restore(&mut queue, bounce, live);
        model = model.iter().zip(&preds).filter(|(_, &p)| p == 1).map(|(&px, _)| px).collect();
        assert_eq!(live.get(), model.len());
        assert_eq!(&data.pixel_indices.current(Parity::of(bounce))[..live.get()], model.as_slice());
    }
}

/// Kernels that add radiance once per path slot.
const PER_SLOT_RADIANCE: [Kernel; 7] = [
    Kernel::EvaluateVolume,
    Kernel::ShadeMiss,
    Kernel::ShadeSurface,
    Kernel::ShadeBackground,
    Kernel::GatherLightSamples,
    Kernel::SampleSurface,
    Kernel::GatherContributions,
];

#[test]
fn contributions_are_finite_non_negative_and_clamped() {
    let ceiling = 0.25;
    let config = EstimatorConfig {
        clamp_ceiling: ceiling,
        max_bounces: 4,
        ..Default::default()
    };
    for preset in [Preset::Cornell, Preset::Fog, Preset::Sky] {
        let scene = preset.build(12, 12).unwrap();
        for kind in [EstimatorKind::PathTracing, EstimatorKind::Bdpt] {
            let mut est = estimator(kind, config, 144);
            est.set_random_seed(9);
            let n = fill_primary_rays(est.as_mut(), &scene, 1);
            let out = OutputBuffer::new(n);
            est.estimate(&scene, n, QualityLevel::Normal, &out, &EstimateOptions::default())
                .unwrap();

            // Each launch adds at most one clamped contribution per pixel;
            // caustic splats add at most one per light path.
            let count = |kernels: &[Kernel]| {
                est.queue().launches().iter().filter(|l| kernels.contains(&l.kernel)).count() as f32
            };
            let per_pixel = count(&PER_SLOT_RADIANCE);
            let splats = count(&[Kernel::GatherCausticContributions]);
            for c in out.snapshot() {
                assert!(c.is_finite(), "{preset} {kind}: {c}");
                assert!(c.min_element() >= 0.0, "{preset} {kind}: {c}");
                assert_eq!(c.w, 1.0);
                if kind == EstimatorKind::PathTracing {
                    let bound = ceiling * per_pixel * (1.0 + 1e-5);
                    assert!(c.truncate().max_element() <= bound, "{preset} {kind}: {c}");
                }
            }
            let total = out.total().truncate().max_element();
            assert!(
                total <= ceiling * n as f32 * (per_pixel + splats) * (1.0 + 1e-5),
                "{preset} {kind}: {total}"
            );
        }
    }
}

#[test]
fn replay_after_reseed_is_bit_identical() {
    let scene = Preset::Cornell.build(10, 10).unwrap();
    let mut est = estimator(EstimatorKind::PathTracing, EstimatorConfig::default(), 100);

    let run = |est: &mut Box<dyn Estimator>| {
        est.set_random_seed(1234);
        let n = fill_primary_rays(est.as_mut(), &scene, 5);
        let out = OutputBuffer::new(n);
        est.estimate(&scene, n, QualityLevel::Normal, &out, &EstimateOptions::default())
            .unwrap();
        let rays: Vec<[f32; 4]> = est.ray_buffer().unwrap().iter().map(|r| r.o).collect();
        let seeds = est.random_buffer(RandomBufferType::RandomSeed).map(<[u32]>::to_vec);
        (out.snapshot(), rays, seeds)
    };
    let a = run(&mut est);
    let b = run(&mut est);
    let bits = |v: &[Vec4]| v.iter().map(|c| c.to_array().map(f32::to_bits)).collect::<Vec<_>>();
    assert_eq!(bits(&a.0), bits(&b.0));
    assert_eq!(a.1, b.1);
    assert_eq!(a.2, b.2);
}

#[test]
fn single_bounce_without_lights_only_shows_emitters() {
    let scene = emissive_wall(16, 16, true);
    assert!(scene.lights().is_empty());
    let config = EstimatorConfig {
        max_bounces: 1,
        ..Default::default()
    };
    let mut est = estimator(EstimatorKind::PathTracing, config, 256);
    let n = scene.camera().pixel_count();

    // Pixel-centre first hits decide which pixels see the emitter.
    let cells: Vec<u32> = (0..n as u32).collect();
    generate_primary_rays(scene.camera(), &cells, 0, 0, false, est.ray_buffer_mut().unwrap());
    est.trace_first_hit(&scene, n).unwrap();
    let emitter_hit: Vec<bool> = est
        .first_hit_buffer()
        .unwrap()
        .iter()
        .map(|h| {
            scene
                .surface(h)
                .and_then(|sp| scene.material(sp.material))
                .is_some_and(Material::is_emissive)
        })
        .collect();
    assert!(emitter_hit.iter().any(|&e| e));
    assert!(emitter_hit.iter().any(|&e| !e));

    generate_primary_rays(scene.camera(), &cells, 0, 0, false, est.ray_buffer_mut().unwrap());
    let out = OutputBuffer::new(n);
    est.estimate(&scene, n, QualityLevel::Normal, &out, &EstimateOptions::default())
        .unwrap();
    for (i, c) in out.snapshot().into_iter().enumerate() {
        if emitter_hit[i] {
            assert_eq!(c.truncate(), Vec3::splat(2.0), "pixel {i}");
        } else {
            assert_eq!(c.truncate(), Vec3::ZERO, "pixel {i}");
        }
    }
}

#[test]
fn compaction_reaches_zero_and_shading_stops() {
    let scene = emissive_wall(8, 8, false);
    let config = EstimatorConfig {
        max_bounces: 4,
        ..Default::default()
    };
    let mut est = estimator(EstimatorKind::PathTracing, config, 64);
    let n = fill_primary_rays(est.as_mut(), &scene, 3);
    let out = OutputBuffer::new(n);
    est.estimate(&scene, n, QualityLevel::Normal, &out, &EstimateOptions::default())
        .unwrap();

    let log = est.bounce_log();
    assert_eq!(log[0].survivors, n);
    assert_eq!(log[1].rays, n);
    assert_eq!(log[1].survivors, 0);
    assert!(log[2..].iter().all(|r| r.rays == 0 && r.survivors == 0));

    for launch in est.queue().launches() {
        if launch.kernel.is_shading() {
            assert_eq!(launch.bounce, Some(0), "{launch:?}");
        }
    }
    assert!(est.queue().skipped() > 0);
    assert_eq!(est.queue().fired(Kernel::AdvanceIterationCount).count(), 1);
    assert_relative_eq!(out.total().x, 2.0 * n as f32, max_relative = 1e-6);
}

#[test]
fn atomic_and_plain_updates_agree_for_injective_indices() {
    let scene = Preset::Cornell.build(12, 8).unwrap();
    let n = scene.camera().pixel_count();
    let mut results = Vec::new();
    for atomic in [false, true] {
        let mut est = estimator(EstimatorKind::PathTracing, EstimatorConfig::default(), n);
        est.set_random_seed(77);
        fill_primary_rays(est.as_mut(), &scene, 4);
        // Reversed cells: injective but not the identity.
        for (i, c) in est.output_index_buffer_mut().unwrap()[..n].iter_mut().enumerate() {
            *c = (n - 1 - i) as u32;
        }
        let out = OutputBuffer::new(n);
        let options = EstimateOptions {
            use_output_indices: true,
            atomic_update: atomic,
            ..Default::default()
        };
        est.estimate(&scene, n, QualityLevel::Normal, &out, &options).unwrap();
        results.push(out.snapshot());
    }
    for (a, b) in results[0].iter().zip(&results[1]) {
        for k in 0..4 {
            assert_relative_eq!(a[k], b[k], max_relative = 1e-5, epsilon = 1e-6);
        }
    }
}

#[test]
fn empty_estimate_fires_nothing() {
    let scene = Preset::LitPlane.build(4, 4).unwrap();
    let mut est = estimator(EstimatorKind::PathTracing, EstimatorConfig::default(), 16);
    let out = OutputBuffer::new(16);
    est.estimate(&scene, 0, QualityLevel::Normal, &out, &EstimateOptions::default())
        .unwrap();
    assert!(est.queue().launches().is_empty());
    assert_eq!(est.sample_counter(), 1);
    assert_eq!(*est.ray_count_mut().unwrap(), ActiveCount::ZERO);
}
