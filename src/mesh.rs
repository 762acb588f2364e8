//! Normalized mesh input handed over by the (out-of-crate) OBJ/GLTF loaders.
//!
//! Every mesh is pre-triangulated and carries exactly one resolved material.
//! Texture pixels live on the CPU as RGBA8; albedo and emissive texels are
//! sRGB-encoded, everything else is linear data.

use nalgebra::Vector4;

use crate::error::{MeshSplatError, Result};
use crate::math::{srgb_to_linear, Vec2, Vec3};

#[derive(Debug, Clone)]
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 4]>,
}

impl Texture {
    pub fn new(width: u32, height: u32, pixels: Vec<[u8; 4]>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| MeshSplatError::InvalidConfig("texture size overflow".to_string()))?;
        if width == 0 || height == 0 {
            return Err(MeshSplatError::InvalidConfig(
                "texture must be at least 1x1".to_string(),
            ));
        }
        if pixels.len() != expected {
            return Err(MeshSplatError::InvalidConfig(format!(
                "texture expects {expected} pixels, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: vec![rgba],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        let p = self.pixels[y * self.width as usize + x];
        [
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
            p[3] as f32 / 255.0,
        ]
    }

    /// Bilinear lookup with clamp-to-edge addressing. Returns raw unorm channels.
    ///
    /// UV (0,0) is the first stored row; coordinates outside `[0,1]` and
    /// non-finite coordinates clamp to the border texels.
    pub fn sample(&self, uv: Vec2) -> [f32; 4] {
        let u = if uv.x.is_finite() { uv.x.clamp(0.0, 1.0) } else { 0.0 };
        let v = if uv.y.is_finite() { uv.y.clamp(0.0, 1.0) } else { 0.0 };

        let fx = u * self.width as f32 - 0.5;
        let fy = v * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let a = self.texel(x0, y0);
        let b = self.texel(x0 + 1, y0);
        let c = self.texel(x0, y0 + 1);
        let d = self.texel(x0 + 1, y0 + 1);

        let mut out = [0.0; 4];
        for i in 0..4 {
            let top = a[i] + (b[i] - a[i]) * tx;
            let bottom = c[i] + (d[i] - c[i]) * tx;
            out[i] = top + (bottom - top) * ty;
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct Material {
    /// Linear RGBA multiplier for the albedo texture (or the albedo itself when untextured).
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: [f32; 3],
    pub normal_scale: f32,
    pub occlusion_strength: f32,
    pub albedo: Option<Texture>,
    pub normal: Option<Texture>,
    /// glTF layout: G = roughness, B = metallic.
    pub metallic_roughness: Option<Texture>,
    pub occlusion: Option<Texture>,
    pub emissive: Option<Texture>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            emissive_factor: [0.0, 0.0, 0.0],
            normal_scale: 1.0,
            occlusion_strength: 1.0,
            albedo: None,
            normal: None,
            metallic_roughness: None,
            occlusion: None,
            emissive: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialSample {
    pub color: [f32; 3],
    pub alpha: f32,
    pub metallic: f32,
    pub roughness: f32,
}

impl Material {
    pub fn flat(color: [f32; 4], metallic: f32, roughness: f32) -> Self {
        Self {
            base_color_factor: color,
            metallic_factor: metallic,
            roughness_factor: roughness,
            ..Self::default()
        }
    }

    /// Resolves the shading inputs at `uv`: textures when bound, scalar factors otherwise.
    pub fn sample(&self, uv: Vec2) -> MaterialSample {
        let f = self.base_color_factor;
        let mut color = [f[0], f[1], f[2]];
        let mut alpha = f[3];

        if let Some(tex) = &self.albedo {
            let t = tex.sample(uv);
            for i in 0..3 {
                color[i] *= srgb_to_linear(t[i]);
            }
            alpha *= t[3];
        }

        if let Some(tex) = &self.occlusion {
            let ao = tex.sample(uv)[0];
            let ao = 1.0 + self.occlusion_strength * (ao - 1.0);
            for c in &mut color {
                *c *= ao;
            }
        }

        let mut emissive = self.emissive_factor;
        if let Some(tex) = &self.emissive {
            let t = tex.sample(uv);
            for i in 0..3 {
                emissive[i] *= srgb_to_linear(t[i]);
            }
        }
        for i in 0..3 {
            color[i] += emissive[i];
        }

        let mut metallic = self.metallic_factor;
        let mut roughness = self.roughness_factor;
        if let Some(tex) = &self.metallic_roughness {
            let t = tex.sample(uv);
            roughness *= t[1];
            metallic *= t[2];
        }

        MaterialSample {
            color,
            alpha: alpha.clamp(0.0, 1.0),
            metallic: metallic.clamp(0.0, 1.0),
            roughness: roughness.clamp(0.0, 1.0),
        }
    }

    /// Tangent-space normal from the normal map, scaled by `normal_scale`.
    pub fn sample_normal(&self, uv: Vec2) -> Option<Vec3> {
        let tex = self.normal.as_ref()?;
        let t = tex.sample(uv);
        let n = Vec3::new(
            (t[0] * 2.0 - 1.0) * self.normal_scale,
            (t[1] * 2.0 - 1.0) * self.normal_scale,
            t[2] * 2.0 - 1.0,
        );
        n.try_normalize(1e-12)
    }
}

/// Tangent with glTF handedness in `w`.
pub type Tangent = Vector4<f32>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub positions: [Vec3; 3],
    pub uvs: [Vec2; 3],
    pub normals: [Vec3; 3],
    pub tangents: Option<[Tangent; 3]>,
}

impl Triangle {
    pub fn face_normal(&self) -> Vec3 {
        let e1 = self.positions[1] - self.positions[0];
        let e2 = self.positions[2] - self.positions[0];
        e1.cross(&e2)
    }
}

#[derive(Debug, Clone)]
pub struct Mesh {
    pub triangles: Vec<Triangle>,
    pub material: Material,
}

impl Mesh {
    pub fn new(triangles: Vec<Triangle>, material: Material) -> Self {
        Self {
            triangles,
            material,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn checker() -> Texture {
        Texture::new(
            2,
            2,
            vec![
                [255, 0, 0, 255],
                [0, 255, 0, 255],
                [0, 0, 255, 255],
                [255, 255, 255, 0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn rejects_mismatched_pixel_count() {
        assert!(Texture::new(2, 2, vec![[0; 4]; 3]).is_err());
        assert!(Texture::new(0, 1, vec![]).is_err());
    }

    #[test]
    fn texel_centers_sample_exactly() {
        let tex = checker();
        assert_eq!(tex.sample(Vec2::new(0.25, 0.25)), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(tex.sample(Vec2::new(0.75, 0.75)), [1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn out_of_range_uv_clamps_to_border() {
        let tex = checker();
        assert_eq!(tex.sample(Vec2::new(-4.0, -3.0)), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(tex.sample(Vec2::new(7.0, 9.0)), [1.0, 1.0, 1.0, 0.0]);
        assert_eq!(
            tex.sample(Vec2::new(f32::NAN, f32::INFINITY)),
            tex.sample(Vec2::new(0.0, 0.0))
        );
    }

    #[test]
    fn flat_material_uses_factors() {
        let m = Material::flat([0.2, 0.4, 0.6, 0.5], 0.7, 0.3);
        let s = m.sample(Vec2::new(0.5, 0.5));
        assert_eq!(s.color, [0.2, 0.4, 0.6]);
        assert_relative_eq!(s.alpha, 0.5);
        assert_relative_eq!(s.metallic, 0.7);
        assert_relative_eq!(s.roughness, 0.3);
    }

    #[test]
    fn metallic_roughness_texture_uses_gltf_channels() {
        let mut m = Material::flat([1.0; 4], 1.0, 1.0);
        m.metallic_roughness = Some(Texture::solid([0, 51, 255, 255]));
        let s = m.sample(Vec2::new(0.1, 0.9));
        assert_relative_eq!(s.roughness, 0.2, epsilon = 1e-6);
        assert_relative_eq!(s.metallic, 1.0);
    }

    #[test]
    fn albedo_texture_is_decoded_from_srgb() {
        let mut m = Material::default();
        m.albedo = Some(Texture::solid([188, 188, 188, 0]));
        let s = m.sample(Vec2::new(0.5, 0.5));
        assert_relative_eq!(s.color[0], srgb_to_linear(188.0 / 255.0), epsilon = 1e-6);
        assert_eq!(s.alpha, 0.0);
    }

    #[test]
    fn flat_normal_map_points_up() {
        let mut m = Material::default();
        m.normal = Some(Texture::solid([128, 128, 255, 255]));
        let n = m.sample_normal(Vec2::new(0.5, 0.5)).unwrap();
        assert!(n.z > 0.999);
        assert!(Material::default().sample_normal(Vec2::new(0.5, 0.5)).is_none());
    }
}
