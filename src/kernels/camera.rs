//! Tile domain and primary ray generation.

use glam::Vec2;
use rayon::prelude::*;

use super::rng::{Sampler, Stream};
use crate::core::{ActiveCount, Ray};
use crate::renderer::Tile;
use crate::scene::Camera;

/// Film cell of every slot in `tile`, row-major inside the tile. Returns
/// the number of slots written.
pub fn generate_tile_domain(tile: &Tile, film_width: u32, output_indices: &mut [u32]) -> ActiveCount {
    let n = tile.pixel_count();
    let w = tile.width.max(1) as usize;
    output_indices[..n]
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, out)| {
            let x = tile.x as usize + i % w;
            let y = tile.y as usize + i / w;
            *out = (y * film_width as usize + x) as u32;
        });
    ActiveCount::new(n)
}

/// Camera rays for every slot of the tile domain. `output_indices` holds
/// film cells from [`generate_tile_domain`]. With `jitter` the sample
/// position is uniform inside the pixel and the lens position uniform on
/// the aperture, otherwise both are centred.
pub fn generate_primary_rays(
    camera: &Camera,
    output_indices: &[u32],
    launch_seed: u32,
    sample: u32,
    jitter: bool,
    rays: &mut [Ray],
) {
    let width = camera.width.max(1);
    rays[..output_indices.len()]
        .par_iter_mut()
        .zip(output_indices.par_iter())
        .for_each(|(ray, &cell)| {
            let x = cell % width;
            let y = cell / width;
            let (offset, lens) = if jitter {
                let mut sampler = Sampler::new(cell, launch_seed, sample, 0, Stream::Camera);
                (sampler.next_2d(), sampler.next_2d())
            } else {
                (Vec2::splat(0.5), Vec2::splat(0.5))
            };
            let r = camera.generate_ray(Vec2::new(x as f32, y as f32) + offset, lens);
            *ray = r.with_pdf(camera.pdf_dir(r.direction()));
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_domain_indices() {
        let tile = Tile {
            x: 2,
            y: 1,
            width: 3,
            height: 2,
        };
        let mut out = vec![0; 8];
        let n = generate_tile_domain(&tile, 10, &mut out);
        assert_eq!(n.get(), 6);
        assert_eq!(&out[..6], &[12, 13, 14, 22, 23, 24]);
    }

    #[test]
    fn test_primary_rays_are_active_and_face_forward() {
        let cam = Camera::default().with_resolution(4, 4);
        let cells: Vec<u32> = (0..16).collect();
        let mut rays = vec![Ray::INACTIVE; 16];
        generate_primary_rays(&cam, &cells, 1, 0, true, &mut rays);
        for r in &rays {
            assert!(r.is_active());
            assert!(r.direction().dot(cam.forward) > 0.0);
            assert!(r.pdf() > 0.0);
        }
    }

    #[test]
    fn test_lens_position_jitters_with_sample() {
        let cam = Camera::default().with_resolution(4, 4).with_depth_of_field(0.5, 3.0);
        let cells = [5u32];
        let mut rays = [Ray::INACTIVE];
        generate_primary_rays(&cam, &cells, 1, 0, false, &mut rays);
        assert!((rays[0].origin() - cam.position).length() < 1e-6);
        assert_eq!(rays[0].pdf(), 0.0);

        let origins: Vec<_> = (0..4)
            .map(|sample| {
                generate_primary_rays(&cam, &cells, 1, sample, true, &mut rays);
                rays[0].origin()
            })
            .collect();
        assert!(origins.iter().all(|o| (*o - cam.position).length() <= 0.5 + 1e-5));
        assert!(origins.windows(2).any(|w| (w[0] - w[1]).length() > 1e-3));
    }
}
