use std::io::Read;

use crate::error::{MeshSplatError, Result};
use crate::math::{quat_normalize, rgb_to_sh_dc, sigmoid, srgb_to_linear, u8_to_unorm, Vec3};
use crate::splat::Gaussian;

use super::{decode_octahedral, PlyFormat};

#[derive(Debug, Clone, Copy)]
enum PlyType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Float,
    Double,
}

impl PlyType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "char" | "int8" => Some(Self::Char),
            "uchar" | "uint8" => Some(Self::UChar),
            "short" | "int16" => Some(Self::Short),
            "ushort" | "uint16" => Some(Self::UShort),
            "int" | "int32" => Some(Self::Int),
            "uint" | "uint32" => Some(Self::UInt),
            "float" | "float32" => Some(Self::Float),
            "double" | "float64" => Some(Self::Double),
            _ => None,
        }
    }

    fn size(self) -> usize {
        match self {
            Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort => 2,
            Self::Int | Self::UInt | Self::Float => 4,
            Self::Double => 8,
        }
    }

    fn read_as_f32(self, bytes: &[u8]) -> f32 {
        match self {
            Self::Char => i8::from_le_bytes([bytes[0]]) as f32,
            Self::UChar => bytes[0] as f32,
            Self::Short => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            Self::UShort => u16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            Self::Int => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            Self::UInt => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            Self::Float => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            Self::Double => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&bytes[0..8]);
                f64::from_le_bytes(arr) as f32
            }
        }
    }
}

/// Fields a vertex property can land in; anything else is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Position(usize),
    Normal(usize),
    NormalOct(usize),
    Dc(usize),
    Rgb(usize),
    Metallic,
    Roughness,
    Opacity,
    Scale(usize),
    Rotation(usize),
    Skip,
}

impl Field {
    fn from_name(name: &str) -> Self {
        match name {
            "x" => Self::Position(0),
            "y" => Self::Position(1),
            "z" => Self::Position(2),
            "nx" => Self::Normal(0),
            "ny" => Self::Normal(1),
            "nz" => Self::Normal(2),
            "normal_oct_u" => Self::NormalOct(0),
            "normal_oct_v" => Self::NormalOct(1),
            "f_dc_0" => Self::Dc(0),
            "f_dc_1" => Self::Dc(1),
            "f_dc_2" => Self::Dc(2),
            "red" | "r" => Self::Rgb(0),
            "green" | "g" => Self::Rgb(1),
            "blue" | "b" => Self::Rgb(2),
            "metallic" => Self::Metallic,
            "roughness" => Self::Roughness,
            "opacity" => Self::Opacity,
            "scale_0" => Self::Scale(0),
            "scale_1" => Self::Scale(1),
            "scale_2" => Self::Scale(2),
            "rot_0" => Self::Rotation(0),
            "rot_1" => Self::Rotation(1),
            "rot_2" => Self::Rotation(2),
            "rot_3" => Self::Rotation(3),
            _ => Self::Skip,
        }
    }
}

#[derive(Debug, Clone)]
struct PlyProperty {
    field: Field,
    ty: PlyType,
}

#[derive(Debug)]
struct PlyHeader {
    vertex_count: usize,
    properties: Vec<PlyProperty>,
    /// Bytes of per-vertex data following the header.
    stride: usize,
    format: PlyFormat,
}

fn parse_error(message: impl Into<String>) -> MeshSplatError {
    MeshSplatError::Ply(message.into())
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    let marker = b"end_header";
    let pos = data.windows(marker.len()).position(|w| w == marker)?;
    let mut end = pos + marker.len();
    while end < data.len() && data[end] != b'\n' {
        end += 1;
    }
    if end < data.len() {
        end += 1;
    }
    Some(end)
}

fn parse_header(text: &str) -> Result<PlyHeader> {
    let mut lines = text.lines().map(str::trim);
    if lines.next() != Some("ply") {
        return Err(parse_error("missing 'ply' magic"));
    }

    let mut is_binary_le = false;
    let mut vertex_count: Option<usize> = None;
    let mut in_vertex_element = false;
    let mut seen_other_element = false;
    let mut properties = Vec::new();
    let mut names = Vec::new();

    for line in lines {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [] | ["comment", ..] | ["obj_info", ..] => {}
            ["format", kind, ..] => is_binary_le = *kind == "binary_little_endian",
            ["element", name, count] => {
                in_vertex_element = *name == "vertex";
                if in_vertex_element {
                    if seen_other_element {
                        return Err(parse_error("vertex element must come first"));
                    }
                    vertex_count = Some(
                        count
                            .parse::<usize>()
                            .map_err(|e| parse_error(format!("bad vertex count '{count}': {e}")))?,
                    );
                } else {
                    seen_other_element = true;
                }
            }
            ["property", "list", ..] if in_vertex_element => {
                return Err(parse_error(
                    "list properties in vertex element are unsupported",
                ));
            }
            ["property", ty, name] if in_vertex_element => {
                let ty = PlyType::parse(ty)
                    .ok_or_else(|| parse_error(format!("unsupported property type '{ty}'")))?;
                names.push(*name);
                properties.push(PlyProperty {
                    field: Field::from_name(name),
                    ty,
                });
            }
            _ => {}
        }
    }

    if !is_binary_le {
        return Err(parse_error("only binary_little_endian format is supported"));
    }
    let vertex_count = vertex_count.ok_or_else(|| parse_error("missing vertex element"))?;
    if properties.is_empty() {
        return Err(parse_error("vertex element has no properties"));
    }

    let stride = properties.iter().try_fold(0usize, |acc, prop| {
        acc.checked_add(prop.ty.size())
            .ok_or_else(|| parse_error("size overflow computing vertex stride"))
    })?;

    let format = if names.contains(&"normal_oct_u") {
        PlyFormat::CompressedPbr
    } else if names.contains(&"metallic") {
        PlyFormat::Pbr
    } else {
        PlyFormat::Standard3dgs
    };

    Ok(PlyHeader {
        vertex_count,
        properties,
        stride,
        format,
    })
}

#[derive(Debug, Default)]
struct RawVertex {
    position: [f32; 3],
    normal: [f32; 3],
    normal_oct: [f32; 2],
    dc: Option<[f32; 3]>,
    rgb: Option<[f32; 3]>,
    metallic: f32,
    roughness: f32,
    opacity: Option<f32>,
    scale: Option<[f32; 3]>,
    rotation: Option<[f32; 4]>,
}

impl RawVertex {
    fn assign(&mut self, field: Field, value: f32) {
        match field {
            Field::Position(i) => self.position[i] = value,
            Field::Normal(i) => self.normal[i] = value,
            Field::NormalOct(i) => self.normal_oct[i] = value,
            Field::Dc(i) => self.dc.get_or_insert([0.0; 3])[i] = value,
            Field::Rgb(i) => self.rgb.get_or_insert([0.0; 3])[i] = value,
            Field::Metallic => self.metallic = value,
            Field::Roughness => self.roughness = value,
            Field::Opacity => self.opacity = Some(value),
            Field::Scale(i) => self.scale.get_or_insert([0.05_f32.ln(); 3])[i] = value,
            Field::Rotation(i) => self.rotation.get_or_insert([0.0; 4])[i] = value,
            Field::Skip => {}
        }
    }

    fn into_gaussian(self, format: PlyFormat) -> Gaussian {
        let compressed = format == PlyFormat::CompressedPbr;
        let byte = |v: f32| u8_to_unorm(v.clamp(0.0, 255.0) as u8);

        let normal = if compressed {
            let [u, v] = self.normal_oct;
            decode_octahedral([u.clamp(0.0, 255.0) as u8, v.clamp(0.0, 255.0) as u8])
        } else {
            Vec3::from(self.normal)
        };

        let color = match (self.dc, self.rgb) {
            (Some(dc), _) => dc,
            (None, Some(rgb)) => rgb_to_sh_dc(rgb.map(|c| srgb_to_linear(byte(c)))),
            (None, None) => [0.0; 3],
        };

        let (opacity, metallic, roughness) = match format {
            PlyFormat::CompressedPbr => (
                byte(self.opacity.unwrap_or(255.0)),
                byte(self.metallic),
                byte(self.roughness),
            ),
            PlyFormat::Standard3dgs => (
                sigmoid(self.opacity.unwrap_or(4.0)).clamp(0.0, 1.0),
                0.0,
                1.0,
            ),
            PlyFormat::Pbr => (
                self.opacity.unwrap_or(1.0).clamp(0.0, 1.0),
                self.metallic,
                self.roughness,
            ),
        };

        let rotation = match self.rotation {
            Some(q) if compressed => quat_normalize(q.map(|b| b / 127.5 - 1.0)),
            Some(q) => quat_normalize(q),
            None => [1.0, 0.0, 0.0, 0.0],
        };

        Gaussian {
            position: self.position,
            normal: normal.into(),
            scale: self.scale.unwrap_or([0.05_f32.ln(); 3]),
            rotation,
            color,
            opacity,
            metallic,
            roughness,
        }
    }
}

/// Reads a binary little-endian PLY written in any [`PlyFormat`] layout.
///
/// The layout is inferred from property names. Unknown properties are
/// skipped by size.
pub fn read_ply<R: Read>(mut reader: R) -> Result<(PlyFormat, Vec<Gaussian>)> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;

    let header_end = find_header_end(&data).ok_or_else(|| parse_error("missing end_header"))?;
    let header_text = std::str::from_utf8(&data[..header_end])
        .map_err(|e| parse_error(format!("header is not UTF-8: {e}")))?;
    let header = parse_header(header_text)?;

    let vertex_bytes = header
        .vertex_count
        .checked_mul(header.stride)
        .ok_or_else(|| parse_error("size overflow computing buffer size"))?;
    let body = &data[header_end..];
    if body.len() < vertex_bytes {
        return Err(parse_error(format!(
            "file truncated (need {vertex_bytes} bytes of vertex data, have {})",
            body.len()
        )));
    }

    let mut gaussians = Vec::with_capacity(header.vertex_count);
    for chunk in body[..vertex_bytes].chunks_exact(header.stride.max(1)) {
        let mut raw = RawVertex::default();
        let mut cursor = 0usize;
        for prop in &header.properties {
            let end = cursor + prop.ty.size();
            if prop.field != Field::Skip {
                raw.assign(prop.field, prop.ty.read_as_f32(&chunk[cursor..end]));
            }
            cursor = end;
        }
        gaussians.push(raw.into_gaussian(header.format));
    }

    log::debug!(
        "read {} gaussians ({} layout, {} bytes per vertex)",
        gaussians.len(),
        header.format.name(),
        header.stride
    );
    Ok((header.format, gaussians))
}
