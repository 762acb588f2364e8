//! Binary little-endian PLY export and import of converted splats.

mod read;
mod write;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{MeshSplatError, Result};
use crate::math::{oct_decode, oct_encode, snorm_to_u8, u8_to_snorm, Vec2, Vec3};
use crate::splat::Gaussian;

pub use read::read_ply;
pub use write::write_ply;

/// Number of higher-order SH coefficients in a degree-3 3DGS file.
pub const SH_REST_COEFFS: usize = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlyFormat {
    /// Full-precision splats with normals and metallic/roughness.
    #[default]
    Pbr,
    /// Layout read by common 3DGS viewers. Opacity is stored as a logit.
    Standard3dgs,
    /// Quantized PBR: octahedral normal, sRGB colour and unorm bytes.
    CompressedPbr,
}

impl PlyFormat {
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Self::Pbr),
            1 => Ok(Self::Standard3dgs),
            2 => Ok(Self::CompressedPbr),
            other => Err(MeshSplatError::InvalidConfig(format!(
                "unknown PLY format code {other} (expected 0, 1 or 2)"
            ))),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Pbr => 0,
            Self::Standard3dgs => 1,
            Self::CompressedPbr => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pbr => "pbr",
            Self::Standard3dgs => "3dgs",
            Self::CompressedPbr => "compressed-pbr",
        }
    }
}

pub fn write_ply_file(path: &Path, gaussians: &[Gaussian], format: PlyFormat) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        MeshSplatError::Ply(format!("failed to create '{}': {e}", path.display()))
    })?;
    let mut writer = BufWriter::new(file);
    write_ply(&mut writer, gaussians, format)?;
    writer.flush()?;
    log::info!(
        "wrote {} gaussians to {} ({})",
        gaussians.len(),
        path.display(),
        format.name()
    );
    Ok(())
}

pub fn read_ply_file(path: &Path) -> Result<(PlyFormat, Vec<Gaussian>)> {
    let file = File::open(path)
        .map_err(|e| MeshSplatError::Ply(format!("failed to read '{}': {e}", path.display())))?;
    read_ply(BufReader::new(file))
}

/// Octahedral encoding of a direction into two unorm bytes.
pub fn encode_octahedral(n: Vec3) -> [u8; 2] {
    let e = oct_encode(n);
    [snorm_to_u8(e.x), snorm_to_u8(e.y)]
}

pub fn decode_octahedral(bytes: [u8; 2]) -> Vec3 {
    oct_decode(Vec2::new(u8_to_snorm(bytes[0]), u8_to_snorm(bytes[1])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};

    #[test]
    fn format_codes() {
        for code in 0..3 {
            assert_eq!(PlyFormat::from_code(code).unwrap().code(), code);
        }
        assert!(PlyFormat::from_code(3).is_err());
    }

    #[test]
    fn octahedral_axes_are_exact() {
        for n in [Vec3::x(), -Vec3::x(), Vec3::y(), -Vec3::y(), Vec3::z(), -Vec3::z()] {
            let d = decode_octahedral(encode_octahedral(n));
            assert!(d.dot(&n) > 0.999, "{n:?} -> {d:?}");
        }
    }

    #[test]
    fn octahedral_error_is_small() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            let n = Vec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            );
            let Some(n) = n.try_normalize(1e-3) else {
                continue;
            };
            let d = decode_octahedral(encode_octahedral(n));
            assert_relative_eq!(d.norm(), 1.0, epsilon = 1e-5);
            assert!(d.dot(&n) > 0.99);
        }
    }
}
