use std::f32::consts::{PI, TAU};

use crate::error::Result;
use crate::math::{hsv_to_rgb, Vec2, Vec3};
use crate::mesh::{Material, Mesh, Tangent, Texture, Triangle};

// --- Procedural textures ---

/// Square checkerboard, `cells` squares per side, hue shifting along u.
pub fn checker_texture(size: u32, cells: u32) -> Result<Texture> {
    let size = size.max(1);
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size) as usize);
    for y in 0..size {
        for x in 0..size {
            let dark = ((x / cell) + (y / cell)) % 2 == 0;
            let hue = x as f32 / size as f32 * 300.0;
            let [r, g, b] = hsv_to_rgb(hue, 0.65, if dark { 0.35 } else { 0.95 });
            pixels.push([r, g, b, 255]);
        }
    }
    Texture::new(size, size, pixels)
}

fn checker_material() -> Result<Material> {
    Ok(Material {
        albedo: Some(checker_texture(64, 8)?),
        metallic_factor: 0.1,
        roughness_factor: 0.6,
        ..Material::default()
    })
}

fn flat_triangle(positions: [Vec3; 3], uvs: [Vec2; 3]) -> Triangle {
    let normal = (positions[1] - positions[0])
        .cross(&(positions[2] - positions[0]))
        .try_normalize(1e-12)
        .unwrap_or_else(Vec3::z);
    Triangle {
        positions,
        uvs,
        normals: [normal; 3],
        tangents: None,
    }
}

fn push_quad(triangles: &mut Vec<Triangle>, corners: [Vec3; 4], uvs: [Vec2; 4]) {
    triangles.push(flat_triangle(
        [corners[0], corners[1], corners[2]],
        [uvs[0], uvs[1], uvs[2]],
    ));
    triangles.push(flat_triangle(
        [corners[0], corners[2], corners[3]],
        [uvs[0], uvs[2], uvs[3]],
    ));
}

// --- Demo meshes ---

/// Unit quad in the XY plane, facing +z, covering the whole UV square.
pub fn quad_mesh() -> Result<Mesh> {
    let corners = [
        Vec3::new(-0.5, -0.5, 0.0),
        Vec3::new(0.5, -0.5, 0.0),
        Vec3::new(0.5, 0.5, 0.0),
        Vec3::new(-0.5, 0.5, 0.0),
    ];
    let uvs = [
        Vec2::new(0.0, 1.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(0.0, 0.0),
    ];
    let mut triangles = Vec::with_capacity(2);
    push_quad(&mut triangles, corners, uvs);
    Ok(Mesh::new(triangles, checker_material()?))
}

/// Unit cube. Faces occupy disjoint cells of a 3x2 UV atlas.
pub fn cube_mesh() -> Result<Mesh> {
    // (normal, u axis, v axis)
    let faces = [
        (Vec3::x(), -Vec3::z(), Vec3::y()),
        (-Vec3::x(), Vec3::z(), Vec3::y()),
        (Vec3::y(), Vec3::x(), -Vec3::z()),
        (-Vec3::y(), Vec3::x(), Vec3::z()),
        (Vec3::z(), Vec3::x(), Vec3::y()),
        (-Vec3::z(), -Vec3::x(), Vec3::y()),
    ];
    const INSET: f32 = 0.01;

    let mut triangles = Vec::with_capacity(12);
    for (i, (n, u, v)) in faces.into_iter().enumerate() {
        let center = n * 0.5;
        let corners = [
            center - u * 0.5 - v * 0.5,
            center + u * 0.5 - v * 0.5,
            center + u * 0.5 + v * 0.5,
            center - u * 0.5 + v * 0.5,
        ];
        let (col, row) = ((i % 3) as f32, (i / 3) as f32);
        let u0 = col / 3.0 + INSET;
        let u1 = (col + 1.0) / 3.0 - INSET;
        let v0 = row / 2.0 + INSET;
        let v1 = (row + 1.0) / 2.0 - INSET;
        let uvs = [
            Vec2::new(u0, v1),
            Vec2::new(u1, v1),
            Vec2::new(u1, v0),
            Vec2::new(u0, v0),
        ];
        push_quad(&mut triangles, corners, uvs);
    }
    Ok(Mesh::new(triangles, checker_material()?))
}

/// Unit-radius UV sphere with smooth normals and tangents.
pub fn sphere_mesh(segments: u32, rings: u32) -> Result<Mesh> {
    let segments = segments.max(3);
    let rings = rings.max(2);

    let vertex = |s: u32, r: u32| {
        let u = s as f32 / segments as f32;
        let v = r as f32 / rings as f32;
        let phi = u * TAU;
        let theta = v * PI;
        let normal = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
        let tangent = Tangent::new(-phi.sin(), 0.0, phi.cos(), 1.0);
        (normal, Vec2::new(u, v), tangent)
    };

    let mut triangles = Vec::with_capacity((segments * rings * 2) as usize);
    for r in 0..rings {
        for s in 0..segments {
            let quad = [vertex(s, r), vertex(s + 1, r), vertex(s + 1, r + 1), vertex(s, r + 1)];
            for [a, b, c] in [[0, 1, 2], [0, 2, 3]] {
                let tri = Triangle {
                    positions: [quad[a].0, quad[b].0, quad[c].0],
                    uvs: [quad[a].1, quad[b].1, quad[c].1],
                    normals: [quad[a].0, quad[b].0, quad[c].0],
                    tangents: Some([quad[a].2, quad[b].2, quad[c].2]),
                };
                // Pole rows collapse one edge; the converter skips those.
                triangles.push(tri);
            }
        }
    }
    Ok(Mesh::new(triangles, checker_material()?))
}
