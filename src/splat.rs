use nalgebra::{Matrix3, Quaternion, UnitQuaternion};

use crate::math::{Vec2, Vec3};

/// Screen-space variance (px^2) added to every projected footprint so that
/// sub-pixel splats still cover at least one sample.
pub const LOW_PASS_VARIANCE: f32 = 0.3;
pub const MIN_SPLAT_RADIUS: f32 = 0.3;

/// One splat record as stored after conversion.
///
/// `scale` holds the natural log of the three principal standard deviations
/// (largest in-plane, second in-plane, thin normal axis); `rotation` is a unit
/// quaternion `[w, x, y, z]` whose matrix columns are those principal axes.
/// `color` is the SH DC term of the linear colour.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Gaussian {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub scale: [f32; 3],
    pub rotation: [f32; 4],
    pub color: [f32; 3],
    pub opacity: f32,
    pub metallic: f32,
    pub roughness: f32,
}

const _: [(); 76] = [(); std::mem::size_of::<Gaussian>()];

impl Gaussian {
    pub fn position(&self) -> Vec3 {
        Vec3::from(self.position)
    }

    pub fn linear_scale(&self) -> Vec3 {
        Vec3::new(self.scale[0].exp(), self.scale[1].exp(), self.scale[2].exp())
    }

    pub fn rotation_matrix(&self) -> Matrix3<f32> {
        quat_to_rotation_matrix(self.rotation)
    }

    /// `R * diag((s * std_dev_scale)^2) * R^T` in model space.
    pub fn covariance_3d(&self, std_dev_scale: f32) -> Matrix3<f32> {
        compute_3d_covariance(self.linear_scale() * std_dev_scale, self.rotation)
    }
}

pub fn quat_to_rotation_matrix(rotation: [f32; 4]) -> Matrix3<f32> {
    let q = Quaternion::new(rotation[0], rotation[1], rotation[2], rotation[3]);
    UnitQuaternion::from_quaternion(q)
        .to_rotation_matrix()
        .into_inner()
}

pub fn compute_3d_covariance(scale: Vec3, rotation: [f32; 4]) -> Matrix3<f32> {
    let r = quat_to_rotation_matrix(rotation);
    let s = Matrix3::from_diagonal(&Vec3::new(
        scale.x.max(1e-7).powi(2),
        scale.y.max(1e-7).powi(2),
        scale.z.max(1e-7).powi(2),
    ));
    r * s * r.transpose()
}

/// EWA projection of a camera-frame covariance to pixel space.
///
/// `cam_rot_cov` is expressed in the camera frame (x right, y up, z forward)
/// and `point_cam` is the splat center in that frame, `z > 0`. Returns the
/// symmetric 2x2 covariance as `(xx, xy, yy)`.
pub fn project_covariance_to_2d(
    cam_rot_cov: &Matrix3<f32>,
    point_cam: Vec3,
    fx: f32,
    fy: f32,
) -> (f32, f32, f32) {
    let z = point_cam.z.max(1e-4);
    let inv_z = 1.0 / z;
    let inv_z2 = inv_z * inv_z;

    let jac = [
        [fx * inv_z, 0.0, -fx * point_cam.x * inv_z2],
        [0.0, fy * inv_z, -fy * point_cam.y * inv_z2],
    ];

    let mut j_cov = [[0.0; 3]; 2];
    for row in 0..2 {
        for col in 0..3 {
            j_cov[row][col] = jac[row][0] * cam_rot_cov[(0, col)]
                + jac[row][1] * cam_rot_cov[(1, col)]
                + jac[row][2] * cam_rot_cov[(2, col)];
        }
    }

    let cov_a = j_cov[0][0] * jac[0][0] + j_cov[0][1] * jac[0][1] + j_cov[0][2] * jac[0][2];
    let cov_b = j_cov[0][0] * jac[1][0] + j_cov[0][1] * jac[1][1] + j_cov[0][2] * jac[1][2];
    let cov_c = j_cov[1][0] * jac[1][0] + j_cov[1][1] * jac[1][1] + j_cov[1][2] * jac[1][2];

    (cov_a + LOW_PASS_VARIANCE, cov_b, cov_c + LOW_PASS_VARIANCE)
}

/// Principal axes of a 2x2 covariance, each scaled by its standard deviation.
///
/// Returns `(major, minor)` in the same units as the covariance square root,
/// or `None` when the matrix is not positive definite.
pub fn footprint_axes(cov_a: f32, cov_b: f32, cov_c: f32) -> Option<(Vec2, Vec2)> {
    let trace = cov_a + cov_c;
    let det = cov_a * cov_c - cov_b * cov_b;
    if det.is_nan() || trace.is_nan() || det <= 0.0 || trace <= 0.0 {
        return None;
    }
    let disc = (0.25 * (cov_a - cov_c) * (cov_a - cov_c) + cov_b * cov_b).sqrt();
    let mid = 0.5 * trace;
    let lambda1 = mid + disc;
    let lambda2 = (mid - disc).max(0.0);

    let major_dir = if cov_b.abs() > 1e-12 {
        Vec2::new(cov_b, lambda1 - cov_a).normalize()
    } else if cov_a >= cov_c {
        Vec2::new(1.0, 0.0)
    } else {
        Vec2::new(0.0, 1.0)
    };
    let minor_dir = Vec2::new(-major_dir.y, major_dir.x);

    Some((major_dir * lambda1.sqrt(), minor_dir * lambda2.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_rotation_covariance_is_diagonal() {
        let cov = compute_3d_covariance(Vec3::new(0.1, 0.2, 0.3), [1.0, 0.0, 0.0, 0.0]);
        assert_relative_eq!(cov[(0, 0)], 0.01, epsilon = 1e-6);
        assert_relative_eq!(cov[(1, 1)], 0.04, epsilon = 1e-6);
        assert_relative_eq!(cov[(2, 2)], 0.09, epsilon = 1e-6);
        assert_relative_eq!(cov[(0, 1)], 0.0, epsilon = 1e-7);
    }

    #[test]
    fn covariance_uses_log_scale_and_multiplier() {
        let g = Gaussian {
            scale: [0.5_f32.ln(), 0.5_f32.ln(), 0.5_f32.ln()],
            rotation: [1.0, 0.0, 0.0, 0.0],
            ..Gaussian::default()
        };
        let cov = g.covariance_3d(2.0);
        assert_relative_eq!(cov[(0, 0)], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn centered_isotropic_projection() {
        let cov = Matrix3::from_diagonal(&Vec3::new(0.01, 0.01, 0.01));
        let (a, b, c) = project_covariance_to_2d(&cov, Vec3::new(0.0, 0.0, 2.0), 100.0, 100.0);
        // (fx / z)^2 * sigma^2 = 2500 * 0.01 = 25
        assert_relative_eq!(a, 25.0 + LOW_PASS_VARIANCE, epsilon = 1e-3);
        assert_relative_eq!(c, 25.0 + LOW_PASS_VARIANCE, epsilon = 1e-3);
        assert_relative_eq!(b, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn footprint_axes_follow_eigenvectors() {
        let (major, minor) = footprint_axes(9.0, 0.0, 4.0).unwrap();
        assert_relative_eq!(major.x.abs(), 3.0, epsilon = 1e-5);
        assert_relative_eq!(minor.y.abs(), 2.0, epsilon = 1e-5);

        let (major, minor) = footprint_axes(5.0, 4.0, 5.0).unwrap();
        assert_relative_eq!(major.norm(), 3.0, epsilon = 1e-5);
        assert_relative_eq!(minor.norm(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(major.x, major.y, epsilon = 1e-5);
        assert_relative_eq!(major.dot(&minor), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn footprint_rejects_degenerate() {
        assert!(footprint_axes(1.0, 1.0, 1.0).is_none());
        assert!(footprint_axes(f32::NAN, 0.0, 1.0).is_none());
    }
}
