use std::io::Write;

use crate::error::Result;
use crate::math::{linear_to_srgb, logit, sh_dc_to_rgb, unorm_to_u8, Vec3};
use crate::splat::Gaussian;

use super::{encode_octahedral, PlyFormat, SH_REST_COEFFS};

fn float_properties(with_sh_rest: bool) -> Vec<String> {
    let mut names: Vec<String> = ["x", "y", "z", "nx", "ny", "nz", "f_dc_0", "f_dc_1", "f_dc_2"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if with_sh_rest {
        names.extend((0..SH_REST_COEFFS).map(|i| format!("f_rest_{i}")));
        names.push("opacity".into());
    } else {
        names.extend(["metallic", "roughness", "opacity"].map(String::from));
    }
    names.extend(
        ["scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3"].map(String::from),
    );
    names
}

const COMPRESSED_LAYOUT: [(&str, &str); 18] = [
    ("float", "x"),
    ("float", "y"),
    ("float", "z"),
    ("uint8", "normal_oct_u"),
    ("uint8", "normal_oct_v"),
    ("uint8", "red"),
    ("uint8", "green"),
    ("uint8", "blue"),
    ("uint8", "metallic"),
    ("uint8", "roughness"),
    ("uint8", "opacity"),
    ("float", "scale_0"),
    ("float", "scale_1"),
    ("float", "scale_2"),
    ("uint8", "rot_0"),
    ("uint8", "rot_1"),
    ("uint8", "rot_2"),
    ("uint8", "rot_3"),
];

fn write_header<W: Write>(out: &mut W, count: usize, format: PlyFormat) -> Result<()> {
    writeln!(out, "ply")?;
    writeln!(out, "format binary_little_endian 1.0")?;
    writeln!(out, "element vertex {count}")?;
    match format {
        PlyFormat::Pbr | PlyFormat::Standard3dgs => {
            for name in float_properties(format == PlyFormat::Standard3dgs) {
                writeln!(out, "property float {name}")?;
            }
        }
        PlyFormat::CompressedPbr => {
            for (ty, name) in COMPRESSED_LAYOUT {
                writeln!(out, "property {ty} {name}")?;
            }
        }
    }
    writeln!(out, "end_header")?;
    Ok(())
}

fn put_f32s(buf: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

fn quantize_rotation_component(q: f32) -> u8 {
    ((q.clamp(-1.0, 1.0) + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
}

fn encode_record(buf: &mut Vec<u8>, g: &Gaussian, format: PlyFormat) {
    match format {
        PlyFormat::Pbr => {
            put_f32s(buf, &g.position);
            put_f32s(buf, &g.normal);
            put_f32s(buf, &g.color);
            put_f32s(buf, &[g.metallic, g.roughness, g.opacity]);
            put_f32s(buf, &g.scale);
            put_f32s(buf, &g.rotation);
        }
        PlyFormat::Standard3dgs => {
            put_f32s(buf, &g.position);
            put_f32s(buf, &g.normal);
            put_f32s(buf, &g.color);
            put_f32s(buf, &[0.0; SH_REST_COEFFS]);
            put_f32s(buf, &[logit(g.opacity)]);
            put_f32s(buf, &g.scale);
            put_f32s(buf, &g.rotation);
        }
        PlyFormat::CompressedPbr => {
            put_f32s(buf, &g.position);
            buf.extend_from_slice(&encode_octahedral(Vec3::from(g.normal)));
            let rgb = sh_dc_to_rgb(g.color);
            buf.extend(rgb.iter().map(|&c| unorm_to_u8(linear_to_srgb(c))));
            buf.extend([g.metallic, g.roughness, g.opacity].map(unorm_to_u8));
            put_f32s(buf, &g.scale);
            buf.extend(g.rotation.map(quantize_rotation_component));
        }
    }
}

/// Writes `gaussians` as a binary little-endian PLY in the requested layout.
pub fn write_ply<W: Write>(out: &mut W, gaussians: &[Gaussian], format: PlyFormat) -> Result<()> {
    write_header(out, gaussians.len(), format)?;

    let mut buf = Vec::with_capacity(4096);
    for chunk in gaussians.chunks(1024) {
        buf.clear();
        for g in chunk {
            encode_record(&mut buf, g, format);
        }
        out.write_all(&buf)?;
    }
    Ok(())
}
