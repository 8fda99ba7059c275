//! Balance-heuristic weights for bidirectional strategies.
//!
//! A path of `k = s + t` vertices can be produced by every split into a
//! light prefix of `s` vertices and an eye prefix of `t` vertices. The
//! weight of the split actually used is `1 / (1 + Σ r_i)`, where each `r_i`
//! is the density of another split relative to this one. Ratios are built
//! by walking backwards along both subpaths and multiplying
//! `pdf_rev / pdf_fwd` of the vertex that changes sides. Splits whose
//! prefixes do not fit the subpath strips are never sampled and add no
//! ratio.

use smallvec::SmallVec;

use super::vertex::{PathVertex, BDPT_MAX_SUBPATH_LEN};

/// The densities a weight computation needs from one vertex.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MisVertex {
    pub pdf_fwd: f32,
    pub pdf_rev: f32,
    pub delta: bool,
}

impl From<&PathVertex> for MisVertex {
    fn from(v: &PathVertex) -> Self {
        Self {
            pdf_fwd: v.pdf_fwd,
            pdf_rev: v.pdf_rev,
            delta: v.is_delta(),
        }
    }
}

/// Reverse densities that only exist once the two subpaths are joined.
///
/// `pt` / `pt_minus` are the last two eye vertices, `qs` / `qs_minus` the
/// last two light vertices. `None` keeps the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConnectionPdfs {
    pub pt: Option<f32>,
    pub pt_minus: Option<f32>,
    pub qs: Option<f32>,
    pub qs_minus: Option<f32>,
}

/// Longest eye and light prefixes the strategy set can build, and whether
/// light subpaths are joined straight to the camera (one eye vertex).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitCaps {
    pub eye: usize,
    pub light: usize,
    pub caustics: bool,
}

impl SplitCaps {
    /// Every split is available.
    pub const UNBOUNDED: Self = Self {
        eye: usize::MAX,
        light: usize::MAX,
        caustics: true,
    };
}

type Scratch = SmallVec<[MisVertex; BDPT_MAX_SUBPATH_LEN]>;

#[inline]
fn remap0(pdf: f32) -> f32 {
    if pdf != 0.0 {
        pdf
    } else {
        1.0
    }
}

fn patched(vertices: &[MisVertex], last: Option<f32>, second_last: Option<f32>) -> Scratch {
    let mut out: Scratch = vertices.iter().copied().collect();
    let n = out.len();
    if n >= 1 {
        if let Some(pdf) = last {
            out[n - 1].pdf_rev = pdf;
        }
        // The connection vertex is sampled by a non-delta strategy.
        out[n - 1].delta = false;
    }
    if n >= 2 {
        if let Some(pdf) = second_last {
            out[n - 2].pdf_rev = pdf;
        }
    }
    out
}

/// Weight of the strategy that joins `light` (s vertices, light end first)
/// to `eye` (t vertices, camera first). `delta_light` marks a light with a
/// delta position. Splits with no eye vertex are not counted, nor are
/// splits with more eye or light vertices than `caps` allows, nor the
/// camera splits when `caps.caustics` is off.
pub fn mis_weight(
    eye: &[MisVertex],
    light: &[MisVertex],
    delta_light: bool,
    caps: SplitCaps,
    pdfs: ConnectionPdfs,
) -> f32 {
    let (s, t) = (light.len(), eye.len());
    if s + t == 2 {
        return 1.0;
    }
    let eye = patched(eye, pdfs.pt, pdfs.pt_minus);
    let light = patched(light, pdfs.qs, pdfs.qs_minus);

    let mut sum = 0.0f32;

    let k = s + t;
    let mut ri = 1.0f32;
    for i in (1..t).rev() {
        ri *= remap0(eye[i].pdf_rev) / remap0(eye[i].pdf_fwd);
        // Split with `i` eye vertices.
        if k - i <= caps.light && (i > 1 || caps.caustics) && !eye[i].delta && !eye[i - 1].delta {
            sum += ri;
        }
    }

    let mut ri = 1.0f32;
    for i in (0..s).rev() {
        ri *= remap0(light[i].pdf_rev) / remap0(light[i].pdf_fwd);
        let prev_delta = if i > 0 { light[i - 1].delta } else { delta_light };
        // Split with `i` light vertices.
        if k - i <= caps.eye && !light[i].delta && !prev_delta {
            sum += ri;
        }
    }

    let w = 1.0 / (1.0 + sum);
    if w.is_finite() {
        w
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Split a full path with per-vertex eye-side and light-side densities
    /// into the eye and light prefixes of strategy `t`.
    fn split(eye_pdf: &[f32], light_pdf: &[f32], delta: &[bool], t: usize) -> (Vec<MisVertex>, Vec<MisVertex>) {
        let k = eye_pdf.len();
        let eye = (0..t)
            .map(|j| MisVertex {
                pdf_fwd: eye_pdf[j],
                pdf_rev: light_pdf[j],
                delta: delta[j],
            })
            .collect();
        let light = (t..k)
            .rev()
            .map(|j| MisVertex {
                pdf_fwd: light_pdf[j],
                pdf_rev: eye_pdf[j],
                delta: delta[j],
            })
            .collect();
        (eye, light)
    }

    #[test]
    fn test_weights_sum_to_one() {
        let eye_pdf = [1.0, 0.8, 2.5, 0.3, 1.7];
        let light_pdf = [0.4, 1.2, 0.6, 3.0, 0.9];
        let delta = [false; 5];
        let total: f32 = (1..=5)
            .map(|t| {
                let (eye, light) = split(&eye_pdf, &light_pdf, &delta, t);
                mis_weight(&eye, &light, false, SplitCaps::UNBOUNDED, ConnectionPdfs::default())
            })
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_delta_vertex_excludes_neighbouring_splits() {
        // x2 is a mirror: splits that would connect at x2 are impossible.
        let eye_pdf = [1.0, 0.8, 2.5, 0.0, 1.7];
        let light_pdf = [0.4, 0.0, 0.6, 3.0, 0.9];
        let delta = [false, false, true, false, false];
        let total: f32 = [1, 4, 5]
            .into_iter()
            .map(|t| {
                let (eye, light) = split(&eye_pdf, &light_pdf, &delta, t);
                mis_weight(&eye, &light, false, SplitCaps::UNBOUNDED, ConnectionPdfs::default())
            })
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_two_vertex_paths_have_one_strategy() {
        let v = MisVertex {
            pdf_fwd: 0.5,
            pdf_rev: 2.0,
            delta: false,
        };
        assert_eq!(mis_weight(&[v, v], &[], false, SplitCaps::UNBOUNDED, ConnectionPdfs::default()), 1.0);
    }

    #[test]
    fn test_overrides_do_not_touch_inputs() {
        let v = MisVertex {
            pdf_fwd: 1.0,
            pdf_rev: 1.0,
            delta: false,
        };
        let eye = [v, v];
        let light = [v];
        let pdfs = ConnectionPdfs {
            pt: Some(3.0),
            ..Default::default()
        };
        let w = mis_weight(&eye, &light, false, SplitCaps::UNBOUNDED, pdfs);
        // r(eye[1]) = 3, r(light[0]) = 1
        assert_relative_eq!(w, 1.0 / 5.0, epsilon = 1e-6);
        assert_eq!(eye[1].pdf_rev, 1.0);
    }

    #[test]
    fn test_delta_light_excludes_hitting_it() {
        let v = MisVertex {
            pdf_fwd: 1.0,
            pdf_rev: 1.0,
            delta: false,
        };
        let w = mis_weight(&[v, v], &[v], true, SplitCaps::UNBOUNDED, ConnectionPdfs::default());
        assert_relative_eq!(w, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_capped_splits_sum_to_one() {
        // Strips of three vertices: a 5-vertex path is only built by
        // t = 2 (s = 3) and t = 3 (s = 2).
        let eye_pdf = [1.0, 0.8, 2.5, 0.3, 1.7];
        let light_pdf = [0.4, 1.2, 0.6, 3.0, 0.9];
        let delta = [false; 5];
        let caps = SplitCaps {
            eye: 3,
            light: 3,
            caustics: true,
        };
        let weight = |t: usize, caps: SplitCaps| {
            let (eye, light) = split(&eye_pdf, &light_pdf, &delta, t);
            mis_weight(&eye, &light, false, caps, ConnectionPdfs::default())
        };
        let total = weight(2, caps) + weight(3, caps);
        assert_relative_eq!(total, 1.0, epsilon = 1e-5);
        assert!(weight(2, SplitCaps::UNBOUNDED) + weight(3, SplitCaps::UNBOUNDED) < 0.99);
    }

    #[test]
    fn test_lens_camera_drops_camera_split() {
        // Eye vertex 1 has no camera density; without the t = 1 split the
        // remaining strategies of a 4-vertex path still sum to one.
        let eye_pdf = [1.0, 0.0, 2.5, 0.3];
        let light_pdf = [0.4, 1.2, 0.6, 3.0];
        let delta = [false; 4];
        let caps = SplitCaps {
            caustics: false,
            ..SplitCaps::UNBOUNDED
        };
        let total: f32 = (2..=4)
            .map(|t| {
                let (eye, light) = split(&eye_pdf, &light_pdf, &delta, t);
                mis_weight(&eye, &light, false, caps, ConnectionPdfs::default())
            })
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-5);
    }
}
