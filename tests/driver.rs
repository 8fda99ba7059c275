//! Tile driver, settings and multi-device session.

use std::collections::HashSet;

use wavetrace::config::RenderSettings;
use wavetrace::device::Kernel;
use wavetrace::estimator::EstimatorKind;
use wavetrace::kernels::camera::generate_tile_domain;
use wavetrace::renderer::{tiles, Film};
use wavetrace::scene::Preset;
use wavetrace::session::{RenderSession, Snapshot};

fn settings(width: u32, height: u32) -> RenderSettings {
    RenderSettings {
        width,
        height,
        tile_width: 5,
        tile_height: 3,
        max_bounces: 2,
        publish_interval_ms: 0,
        scene: Preset::LitPlane,
        ..Default::default()
    }
}

#[test]
fn tile_domains_cover_film_exactly_once() {
    for (w, h, tw, th) in [(13, 7, 5, 3), (8, 8, 8, 8), (3, 9, 4, 2), (1, 1, 16, 16)] {
        let mut seen = HashSet::new();
        let mut cells = vec![0u32; (tw * th) as usize];
        for tile in tiles(w, h, tw, th) {
            let n = generate_tile_domain(&tile, w, &mut cells).get();
            assert_eq!(n, tile.pixel_count());
            for &c in &cells[..n] {
                assert!(seen.insert(c), "cell {c} visited twice in {w}x{h} / {tw}x{th}");
            }
        }
        assert_eq!(seen.len(), (w * h) as usize);
        assert!(seen.iter().all(|&c| c < w * h));
    }
}

#[test]
fn renderer_adds_one_sample_per_pixel_for_both_estimators() {
    for kind in [EstimatorKind::PathTracing, EstimatorKind::Bdpt] {
        let s = RenderSettings {
            estimator: kind,
            ..settings(13, 7)
        };
        let scene = s.build_scene().unwrap();
        let mut renderer = s.create_renderer(0).unwrap();
        let film = Film::new(13, 7).unwrap();
        for _ in 0..3 {
            renderer.render(&scene, &film).unwrap();
        }
        assert_eq!(renderer.sample_counter(), 3);
        assert_eq!(renderer.queue().fired(Kernel::GenerateTileDomain).count(), 3 * 3);
        for c in film.buffer().snapshot() {
            assert_eq!(c.w, 3.0, "{kind}");
        }
    }
}

#[test]
fn settings_file_round_trip_renders() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let s = RenderSettings {
        estimator: EstimatorKind::Bdpt,
        seed: 42,
        ..settings(6, 4)
    };
    s.save(&path).unwrap();
    let loaded = RenderSettings::load(&path).unwrap();
    assert_eq!(loaded, s);

    let scene = loaded.build_scene().unwrap();
    let mut renderer = loaded.create_renderer(0).unwrap();
    assert_eq!(renderer.tile_size(), (5, 3));
    let film = Film::new(6, 4).unwrap();
    renderer.render(&scene, &film).unwrap();
    assert_eq!(film.buffer().total().w, 24.0);

    std::fs::write(&path, r#"{ "width": 0 }"#).unwrap();
    assert!(RenderSettings::load(&path).is_err());
    std::fs::write(&path, "not json").unwrap();
    assert!(RenderSettings::load(&path).is_err());
}

#[test]
fn session_sample_weight_matches_sample_count() {
    let s = RenderSettings {
        devices: 3,
        ..settings(8, 6)
    };
    let pixels = 48.0;
    let scene = s.build_scene().unwrap();
    let mut session = RenderSession::new(s, scene).unwrap();
    assert_eq!(session.worker_count(), 2);

    session.render_to(6).unwrap();
    assert!(session.samples() >= 6);
    assert_eq!(session.film().buffer().total().w, session.samples() as f32 * pixels);

    // Whatever the workers rendered for state 0 is dropped from now on.
    session.set_scene(Preset::LitPlane.build(8, 6).unwrap()).unwrap();
    assert_eq!(session.film().buffer().total().w, 0.0);
    session.render_to(4).unwrap();
    session.stop();
    assert_eq!(session.worker_count(), 0);
    assert_eq!(session.film().buffer().total().w, session.samples() as f32 * pixels);

    let stale = Snapshot {
        device: 2,
        state: 0,
        samples: 1,
        data: vec![glam::Vec4::ONE; 48],
    };
    let before = session.stale_dropped();
    assert!(!session.accumulate(&stale));
    assert_eq!(session.stale_dropped(), before + 1);

    let stats = session.device_stats();
    assert_eq!(stats.len(), 3);
    assert!(stats[0].samples >= 1);
    assert!(stats.iter().all(|d| d.error.is_none()));
}
