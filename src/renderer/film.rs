//! Accumulation film.

use std::sync::Arc;

use glam::{Vec3, Vec4};

use crate::device::OutputBuffer;
use crate::util::{Error, Result};

/// Float4 film: xyz summed radiance, w sample count.
///
/// Cloning shares the underlying buffer.
#[derive(Debug, Clone)]
pub struct Film {
    width: u32,
    height: u32,
    buffer: Arc<OutputBuffer>,
}

impl Film {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::invalid_argument(format!("film size {width}x{height}")));
        }
        Ok(Self {
            width,
            height,
            buffer: Arc::new(OutputBuffer::new(width as usize * height as usize)),
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn buffer(&self) -> &Arc<OutputBuffer> {
        &self.buffer
    }

    pub fn clear(&self) {
        self.buffer.clear();
    }

    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.buffer.get((y * self.width + x) as usize)
    }

    /// Average radiance per pixel. Pixels without samples are black.
    pub fn resolve(&self) -> Vec<Vec3> {
        self.buffer
            .snapshot()
            .into_iter()
            .map(|c| if c.w > 0.0 { c.truncate() / c.w } else { Vec3::ZERO })
            .collect()
    }

    /// 8-bit sRGB-ish pixels: `2^exposure` scale, clamp, gamma 2.2.
    pub fn to_rgba8(&self, exposure: f32) -> Vec<u8> {
        let scale = exposure.exp2();
        let encode = |v: f32| ((v * scale).clamp(0.0, 1.0).powf(1.0 / 2.2) * 255.0).round() as u8;
        self.resolve()
            .into_iter()
            .flat_map(|c| [encode(c.x), encode(c.y), encode(c.z), 255])
            .collect()
    }

    /// Write the resolved film. `.hdr` and `.exr` keep linear floats,
    /// anything else is written as 8-bit RGBA.
    #[cfg(feature = "image")]
    pub fn save(&self, path: &std::path::Path, exposure: f32) -> Result<()> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "hdr" | "exr" => {
                let data: Vec<f32> = self.resolve().into_iter().flat_map(|c| c.to_array()).collect();
                let img = image::Rgb32FImage::from_raw(self.width, self.height, data)
                    .ok_or_else(|| Error::other("film size does not match pixel data"))?;
                img.save(path)?;
            }
            _ => {
                let img = image::RgbaImage::from_raw(self.width, self.height, self.to_rgba8(exposure))
                    .ok_or_else(|| Error::other("film size does not match pixel data"))?;
                img.save(path)?;
            }
        }
        tracing::info!(path = %path.display(), "film saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AccumulateMode;

    #[test]
    fn test_resolve_divides_by_samples() {
        let film = Film::new(2, 1).unwrap();
        film.buffer().add(0, Vec4::new(2.0, 4.0, 6.0, 2.0), AccumulateMode::Plain);
        let px = film.resolve();
        assert_eq!(px[0], Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(px[1], Vec3::ZERO);
    }

    #[test]
    fn test_to_rgba8_clamps() {
        let film = Film::new(1, 1).unwrap();
        film.buffer().add(0, Vec4::new(10.0, 0.0, 1.0, 1.0), AccumulateMode::Plain);
        assert_eq!(film.to_rgba8(0.0), vec![255, 0, 255, 255]);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(Film::new(0, 3), Err(Error::InvalidArgument(_))));
    }

    #[cfg(feature = "image")]
    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let film = Film::new(3, 2).unwrap();
        film.buffer().add(4, Vec4::new(0.5, 0.5, 0.5, 1.0), AccumulateMode::Plain);
        film.save(&path, 0.0).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (3, 2));
    }
}
