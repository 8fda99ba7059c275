//! Math type re-exports and shading-path numeric helpers.
//!
//! Every division on the shading path goes through one of the guarded
//! helpers below so that degenerate pdfs zero a contribution instead of
//! producing NaN or infinity.

pub use glam::{UVec2, Vec2, Vec3, Vec4};

/// Below this a pdf is treated as zero.
pub const PDF_EPSILON: f32 = 1e-7;

/// Offset applied along the geometric normal when spawning rays.
pub const RAY_EPSILON: f32 = 1e-4;

/// Relative luminance (Rec. 709).
#[inline]
pub fn luminance(c: Vec3) -> f32 {
    c.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// `num / pdf`, or zero when the pdf is degenerate.
#[inline]
pub fn safe_div(num: Vec3, pdf: f32) -> Vec3 {
    if pdf > PDF_EPSILON && pdf.is_finite() {
        num / pdf
    } else {
        Vec3::ZERO
    }
}

/// Scalar counterpart of [`safe_div`].
#[inline]
pub fn safe_div_f32(num: f32, den: f32) -> f32 {
    if den > PDF_EPSILON && den.is_finite() {
        num / den
    } else {
        0.0
    }
}

/// Make a radiance value safe to accumulate: non-finite and negative
/// channels become zero, each channel is clamped to `ceiling`.
#[inline]
pub fn sanitize_radiance(c: Vec3, ceiling: f32) -> Vec3 {
    let fix = |v: f32| {
        if v.is_finite() && v > 0.0 {
            v.min(ceiling)
        } else {
            0.0
        }
    };
    Vec3::new(fix(c.x), fix(c.y), fix(c.z))
}

/// Convert a solid-angle density at `from` into an area density at `to`.
/// `to_normal` is `None` for points without a surface (media, lights
/// without orientation).
#[inline]
pub fn solid_angle_to_area(pdf: f32, from: Vec3, to: Vec3, to_normal: Option<Vec3>) -> f32 {
    let d = to - from;
    let dist2 = d.length_squared();
    if dist2 <= PDF_EPSILON {
        return 0.0;
    }
    let cos = match to_normal {
        Some(n) => (d.dot(n) / dist2.sqrt()).abs(),
        None => 1.0,
    };
    pdf * cos / dist2
}

/// Spawn point offset to the side of `n` that `dir` leaves through.
#[inline]
pub fn offset_origin(p: Vec3, n: Vec3, dir: Vec3) -> Vec3 {
    if dir.dot(n) >= 0.0 {
        p + n * RAY_EPSILON
    } else {
        p - n * RAY_EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_radiance() {
        let c = sanitize_radiance(Vec3::new(f32::NAN, -1.0, 50.0), 10.0);
        assert_eq!(c, Vec3::new(0.0, 0.0, 10.0));
        let c = sanitize_radiance(Vec3::new(f32::INFINITY, 0.5, 2.0), 10.0);
        assert_eq!(c, Vec3::new(0.0, 0.5, 2.0));
    }

    #[test]
    fn test_safe_div_zero_pdf() {
        assert_eq!(safe_div(Vec3::ONE, 0.0), Vec3::ZERO);
        assert_eq!(safe_div(Vec3::ONE, 2.0), Vec3::splat(0.5));
        assert_eq!(safe_div_f32(1.0, f32::NAN), 0.0);
    }

    #[test]
    fn test_solid_angle_to_area() {
        let pdf = solid_angle_to_area(1.0, Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0), Some(Vec3::NEG_Y));
        assert!((pdf - 0.25).abs() < 1e-6);
        assert_eq!(solid_angle_to_area(1.0, Vec3::ZERO, Vec3::ZERO, None), 0.0);
    }
}
