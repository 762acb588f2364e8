use nalgebra::{Vector2, Vector3};

/// Zeroth-order real spherical harmonic, `1 / (2 * sqrt(pi))`.
pub const SH_C0: f32 = 0.282_094_8;

pub type Vec3 = Vector3<f32>;
pub type Vec2 = Vector2<f32>;

pub fn rgb_to_sh_dc(rgb: [f32; 3]) -> [f32; 3] {
    [
        (rgb[0] - 0.5) / SH_C0,
        (rgb[1] - 0.5) / SH_C0,
        (rgb[2] - 0.5) / SH_C0,
    ]
}

pub fn sh_dc_to_rgb(dc: [f32; 3]) -> [f32; 3] {
    [
        dc[0] * SH_C0 + 0.5,
        dc[1] * SH_C0 + 0.5,
        dc[2] * SH_C0 + 0.5,
    ]
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse of [`sigmoid`]; input is clamped away from 0 and 1 so the result stays finite.
pub fn logit(p: f32) -> f32 {
    let p = p.clamp(1e-6, 1.0 - 1e-6);
    (p / (1.0 - p)).ln()
}

pub fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

pub fn unorm_to_u8(v: f32) -> u8 {
    clamp_u8(v * 255.0)
}

pub fn u8_to_unorm(v: u8) -> f32 {
    v as f32 / 255.0
}

pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

pub fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// Normalizes a `[w, x, y, z]` quaternion, falling back to identity for a zero input.
pub fn quat_normalize(q: [f32; 4]) -> [f32; 4] {
    let len = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if len < 1e-12 || !len.is_finite() {
        return [1.0, 0.0, 0.0, 0.0];
    }
    [q[0] / len, q[1] / len, q[2] / len, q[3] / len]
}

/// `hue` in degrees, `s`/`v` in `[0, 1]`.
pub fn hsv_to_rgb(hue: f32, s: f32, v: f32) -> [u8; 3] {
    let h = hue.rem_euclid(360.0) / 60.0;
    let c = v * s;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [unorm_to_u8(r + m), unorm_to_u8(g + m), unorm_to_u8(b + m)]
}

fn sign_not_zero(v: f32) -> f32 {
    if v >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Octahedral encoding of a unit vector into `[-1, 1]^2`.
pub fn oct_encode(n: Vec3) -> Vec2 {
    let l1 = n.x.abs() + n.y.abs() + n.z.abs();
    if l1 < 1e-12 {
        return Vec2::new(0.0, 0.0);
    }
    let p = Vec2::new(n.x / l1, n.y / l1);
    if n.z >= 0.0 {
        p
    } else {
        Vec2::new(
            (1.0 - p.y.abs()) * sign_not_zero(p.x),
            (1.0 - p.x.abs()) * sign_not_zero(p.y),
        )
    }
}

pub fn oct_decode(e: Vec2) -> Vec3 {
    let mut n = Vec3::new(e.x, e.y, 1.0 - e.x.abs() - e.y.abs());
    if n.z < 0.0 {
        let x = (1.0 - n.y.abs()) * sign_not_zero(n.x);
        let y = (1.0 - n.x.abs()) * sign_not_zero(n.y);
        n.x = x;
        n.y = y;
    }
    let len = n.norm();
    if len < 1e-12 {
        Vec3::z()
    } else {
        n / len
    }
}

pub fn snorm_to_u8(v: f32) -> u8 {
    clamp_u8((v.clamp(-1.0, 1.0) * 0.5 + 0.5) * 255.0)
}

pub fn u8_to_snorm(v: u8) -> f32 {
    v as f32 / 255.0 * 2.0 - 1.0
}
