//! UV-space rasterizer that turns one triangle into surface samples.

use crate::convert::solver::{solve_triangle_frame, SurfaceFrame, ThinAxis};
use crate::math::{rgb_to_sh_dc, Vec2, Vec3};
use crate::mesh::{Material, Triangle};
use crate::splat::Gaussian;

const BARY_EPSILON: f32 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleParams {
    /// Side length of the square UV raster, in pixels.
    pub resolution: u32,
    /// Isotropic footprint in UV units (`sigma_texels / resolution`).
    pub sigma_uv: f32,
    pub thin_axis: ThinAxis,
}

/// Inclusive pixel rectangle covered by a triangle's clamped UV bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn pixel_count(&self) -> usize {
        (self.x1 - self.x0 + 1) as usize * (self.y1 - self.y0 + 1) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriangleOutcome {
    /// Zero-area UV (or collapsed 3D) triangle; nothing emitted.
    Degenerate,
    Sampled { samples: usize },
}

pub fn pixel_center_uv(px: u32, py: u32, resolution: u32) -> Vec2 {
    let res = resolution as f32;
    Vec2::new((px as f32 + 0.5) / res, (py as f32 + 0.5) / res)
}

/// Clamped UV bounding box in pixel coordinates, or `None` for non-finite UVs.
pub fn uv_pixel_bounds(uvs: &[Vec2; 3], resolution: u32) -> Option<PixelRect> {
    if resolution == 0 || uvs.iter().any(|uv| !(uv.x.is_finite() && uv.y.is_finite())) {
        return None;
    }
    let res = resolution as f32;
    let max_px = resolution - 1;
    let to_px = |v: f32| ((v.clamp(0.0, 1.0) * res).floor() as u32).min(max_px);

    let min_u = uvs[0].x.min(uvs[1].x).min(uvs[2].x);
    let max_u = uvs[0].x.max(uvs[1].x).max(uvs[2].x);
    let min_v = uvs[0].y.min(uvs[1].y).min(uvs[2].y);
    let max_v = uvs[0].y.max(uvs[1].y).max(uvs[2].y);

    Some(PixelRect {
        x0: to_px(min_u),
        y0: to_px(min_v),
        x1: to_px(max_u),
        y1: to_px(max_v),
    })
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Sign-based half-plane test. Points on an edge count as inside for both
/// neighbouring triangles, so shared edges are resolved the same way every run.
pub fn point_in_triangle(uvs: &[Vec2; 3], p: Vec2) -> bool {
    let w0 = edge(uvs[1], uvs[2], p);
    let w1 = edge(uvs[2], uvs[0], p);
    let w2 = edge(uvs[0], uvs[1], p);
    let has_neg = w0 < 0.0 || w1 < 0.0 || w2 < 0.0;
    let has_pos = w0 > 0.0 || w1 > 0.0 || w2 > 0.0;
    !(has_neg && has_pos)
}

/// Barycentric weights of `p`; `None` for a zero-area triangle.
pub fn barycentric(uvs: &[Vec2; 3], p: Vec2) -> Option<[f32; 3]> {
    let area = edge(uvs[0], uvs[1], uvs[2]);
    if !area.is_finite() || area.abs() < BARY_EPSILON {
        return None;
    }
    let w0 = edge(uvs[1], uvs[2], p) / area;
    let w1 = edge(uvs[2], uvs[0], p) / area;
    Some([w0, w1, 1.0 - w0 - w1])
}

fn interpolate(values: &[Vec3; 3], w: [f32; 3]) -> Vec3 {
    values[0] * w[0] + values[1] * w[1] + values[2] * w[2]
}

fn shading_normal(tri: &Triangle, material: &Material, uv: Vec2, w: [f32; 3]) -> Vec3 {
    let face = tri.face_normal().try_normalize(1e-12).unwrap_or_else(Vec3::z);
    let n = interpolate(&tri.normals, w)
        .try_normalize(1e-12)
        .unwrap_or(face);

    let (Some(tangents), Some(ts_normal)) = (tri.tangents.as_ref(), material.sample_normal(uv))
    else {
        return n;
    };

    let t4 = tangents[0] * w[0] + tangents[1] * w[1] + tangents[2] * w[2];
    let handedness = if tangents[0].w < 0.0 { -1.0 } else { 1.0 };
    let t = Vec3::new(t4.x, t4.y, t4.z);
    // Gram-Schmidt against the interpolated normal.
    let Some(t) = (t - n * n.dot(&t)).try_normalize(1e-12) else {
        return n;
    };
    let b = n.cross(&t) * handedness;
    (t * ts_normal.x + b * ts_normal.y + n * ts_normal.z)
        .try_normalize(1e-12)
        .unwrap_or(n)
}

fn make_gaussian(
    tri: &Triangle,
    material: &Material,
    frame: &SurfaceFrame,
    uv: Vec2,
    w: [f32; 3],
) -> Gaussian {
    let position = interpolate(&tri.positions, w);
    let normal = shading_normal(tri, material, uv, w);
    let sample = material.sample(uv);
    Gaussian {
        position: position.into(),
        normal: normal.into(),
        scale: frame.scale,
        rotation: frame.rotation,
        color: rgb_to_sh_dc(sample.color),
        opacity: sample.alpha,
        metallic: sample.metallic,
        roughness: sample.roughness,
    }
}

/// Rasterizes `tri` over its UV footprint and hands every covered pixel to `emit`.
///
/// The solver runs once; every emitted Gaussian shares its scale and rotation.
pub fn rasterize_triangle<F>(
    tri: &Triangle,
    material: &Material,
    params: &SampleParams,
    mut emit: F,
) -> TriangleOutcome
where
    F: FnMut(Gaussian),
{
    let Some(frame) =
        solve_triangle_frame(params.sigma_uv, &tri.positions, &tri.uvs, params.thin_axis)
    else {
        return TriangleOutcome::Degenerate;
    };
    let Some(rect) = uv_pixel_bounds(&tri.uvs, params.resolution) else {
        return TriangleOutcome::Degenerate;
    };
    // Barycentric solvability depends only on the UVs; reject before emitting.
    if barycentric(&tri.uvs, tri.uvs[0]).is_none() {
        return TriangleOutcome::Degenerate;
    }

    let mut samples = 0;
    for py in rect.y0..=rect.y1 {
        for px in rect.x0..=rect.x1 {
            let uv = pixel_center_uv(px, py, params.resolution);
            if !point_in_triangle(&tri.uvs, uv) {
                continue;
            }
            let Some(w) = barycentric(&tri.uvs, uv) else {
                continue;
            };
            emit(make_gaussian(tri, material, &frame, uv, w));
            samples += 1;
        }
    }
    TriangleOutcome::Sampled { samples }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::sh_dc_to_rgb;
    use crate::mesh::{Tangent, Texture};
    use approx::assert_relative_eq;

    fn params(resolution: u32) -> SampleParams {
        SampleParams {
            resolution,
            sigma_uv: 1.0 / resolution as f32,
            thin_axis: ThinAxis::default(),
        }
    }

    fn xy_triangle(uvs: [Vec2; 3]) -> Triangle {
        Triangle {
            positions: [
                Vec3::new(uvs[0].x, uvs[0].y, 0.0),
                Vec3::new(uvs[1].x, uvs[1].y, 0.0),
                Vec3::new(uvs[2].x, uvs[2].y, 0.0),
            ],
            uvs,
            normals: [Vec3::z(); 3],
            tangents: None,
        }
    }

    #[test]
    fn bounds_clamp_to_unit_square() {
        let uvs = [Vec2::new(-0.5, 0.25), Vec2::new(2.0, 0.25), Vec2::new(0.5, 0.75)];
        let rect = uv_pixel_bounds(&uvs, 8).unwrap();
        assert_eq!(rect, PixelRect { x0: 0, y0: 2, x1: 7, y1: 6 });
        assert_eq!(rect.pixel_count(), 40);
        assert!(uv_pixel_bounds(&[Vec2::new(f32::NAN, 0.0); 3], 8).is_none());
    }

    #[test]
    fn half_plane_test_accepts_both_windings_and_edges() {
        let ccw = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)];
        let cw = [ccw[0], ccw[2], ccw[1]];
        let p = Vec2::new(0.25, 0.25);
        assert!(point_in_triangle(&ccw, p));
        assert!(point_in_triangle(&cw, p));
        assert!(point_in_triangle(&ccw, Vec2::new(0.5, 0.5)));
        assert!(!point_in_triangle(&ccw, Vec2::new(0.75, 0.75)));
    }

    #[test]
    fn barycentric_rejects_collinear() {
        let line = [Vec2::new(0.0, 0.0), Vec2::new(0.5, 0.5), Vec2::new(1.0, 1.0)];
        assert!(barycentric(&line, Vec2::new(0.2, 0.2)).is_none());

        let tri = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)];
        let w = barycentric(&tri, Vec2::new(0.25, 0.5)).unwrap();
        assert_relative_eq!(w[0], 0.25, epsilon = 1e-6);
        assert_relative_eq!(w[1], 0.25, epsilon = 1e-6);
        assert_relative_eq!(w[2], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn sliver_below_barycentric_precision_is_skipped_whole() {
        // Solvable UV Jacobian, but too small for f32 barycentrics.
        let tri = xy_triangle([Vec2::new(0.0, 0.0), Vec2::new(5e-7, 0.0), Vec2::new(0.0, 5e-7)]);
        assert!(solve_triangle_frame(0.0625, &tri.positions, &tri.uvs, ThinAxis::default()).is_some());

        let mut count = 0;
        let outcome = rasterize_triangle(&tri, &Material::default(), &params(16), |_| count += 1);
        assert_eq!(outcome, TriangleOutcome::Degenerate);
        assert_eq!(count, 0);
    }

    #[test]
    fn two_triangles_cover_the_square() {
        let a = xy_triangle([Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0)]);
        let b = xy_triangle([Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)]);
        let material = Material::default();
        let mut count = 0;
        for tri in [a, b] {
            rasterize_triangle(&tri, &material, &params(16), |_| count += 1);
        }
        // Pixel centres on the shared diagonal land in both triangles.
        assert_eq!(count, 16 * 16 + 16);
    }

    #[test]
    fn samples_share_frame_and_interpolate_position() {
        let tri = xy_triangle([Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)]);
        let material = Material::flat([0.5, 0.25, 1.0, 0.75], 0.1, 0.9);
        let mut out = Vec::new();
        let outcome = rasterize_triangle(&tri, &material, &params(8), |g| out.push(g));
        assert_eq!(outcome, TriangleOutcome::Sampled { samples: out.len() });
        assert!(!out.is_empty());

        let first = out[0];
        for g in &out {
            assert_eq!(g.scale, first.scale);
            assert_eq!(g.rotation, first.rotation);
            assert_relative_eq!(g.position[2], 0.0);
            assert!(g.position[0] + g.position[1] <= 1.0 + 1e-6);
            assert_relative_eq!(g.opacity, 0.75);
            assert_relative_eq!(g.metallic, 0.1);
            let rgb = sh_dc_to_rgb(g.color);
            assert_relative_eq!(rgb[1], 0.25, epsilon = 1e-5);
        }
    }

    #[test]
    fn degenerate_uv_triangle_emits_nothing() {
        let mut tri = xy_triangle([Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)]);
        tri.uvs = [Vec2::new(0.1, 0.1), Vec2::new(0.5, 0.5), Vec2::new(0.9, 0.9)];
        let outcome = rasterize_triangle(&tri, &Material::default(), &params(8), |_| {
            panic!("degenerate triangle emitted a sample")
        });
        assert_eq!(outcome, TriangleOutcome::Degenerate);
    }

    #[test]
    fn transparent_texels_still_emit() {
        let tri = xy_triangle([Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)]);
        let mut material = Material::default();
        material.albedo = Some(Texture::solid([255, 255, 255, 0]));
        let mut out = Vec::new();
        rasterize_triangle(&tri, &material, &params(4), |g| out.push(g));
        assert!(!out.is_empty());
        assert!(out.iter().all(|g| g.opacity == 0.0));
    }

    #[test]
    fn normal_map_bends_normal_along_tangent() {
        let mut tri = xy_triangle([Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)]);
        tri.tangents = Some([Tangent::new(1.0, 0.0, 0.0, 1.0); 3]);
        let mut material = Material::default();
        // Tangent-space normal tilted towards +x.
        material.normal = Some(Texture::solid([218, 128, 218, 255]));
        let mut out = Vec::new();
        rasterize_triangle(&tri, &material, &params(4), |g| out.push(g));
        let n = Vec3::from(out[0].normal);
        assert!(n.x > 0.5);
        assert!(n.z > 0.5);
        assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-5);
    }
}
