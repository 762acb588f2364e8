//! Per-triangle covariance solver.
//!
//! A triangle's UV parameterisation defines an affine map `J` from UV
//! displacement to 3D displacement. An isotropic UV footprint `sigma^2 * I`
//! pushed through that map gives `Sigma3 = sigma^2 * J * J^T`, a rank-2 3x3
//! covariance whose two non-zero principal axes lie in the triangle plane.

use nalgebra::{Matrix2, Matrix3, Matrix3x2, Rotation3, SymmetricEigen, UnitQuaternion, Vector3};

use crate::math::{Vec2, Vec3};

/// Floor applied to the thin (normal-facing) standard deviation.
pub const MIN_THIN_SCALE: f32 = 1e-7;

const UV_DET_EPSILON: f64 = 1e-14;
const EIGEN_EPSILON: f64 = 1e-30;
const EIGEN_RELATIVE_EPSILON: f64 = 1e-14;
const AREA_RELATIVE_EPSILON: f64 = 1e-10;

/// How the collapsed third axis is sized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThinAxis {
    /// Fixed standard deviation in model units.
    Epsilon(f32),
    /// Fraction of the smaller in-plane standard deviation.
    FractionOfMinor(f32),
}

impl Default for ThinAxis {
    fn default() -> Self {
        Self::FractionOfMinor(0.01)
    }
}

impl ThinAxis {
    fn resolve(self, minor_in_plane: f32) -> f32 {
        let value = match self {
            Self::Epsilon(eps) => eps,
            Self::FractionOfMinor(fraction) => minor_in_plane * fraction,
        };
        if value.is_finite() {
            value.max(MIN_THIN_SCALE)
        } else {
            MIN_THIN_SCALE
        }
    }
}

/// Shared orientation and extent for every splat of one triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceFrame {
    /// `ln` of (largest in-plane, second in-plane, thin) standard deviations.
    pub scale: [f32; 3],
    /// Unit quaternion `[w, x, y, z]`; matrix columns are the three axes above.
    pub rotation: [f32; 4],
}

impl SurfaceFrame {
    pub fn axes(&self) -> Matrix3<f32> {
        crate::splat::quat_to_rotation_matrix(self.rotation)
    }
}

fn to_f64(v: Vec3) -> Vector3<f64> {
    Vector3::new(v.x as f64, v.y as f64, v.z as f64)
}

/// UV-to-3D Jacobian `[E1 E2] * [e1 e2]^-1`, or `None` for a zero-area UV triangle.
pub fn uv_jacobian(positions: &[Vec3; 3], uvs: &[Vec2; 3]) -> Option<Matrix3x2<f64>> {
    let e1 = uvs[1] - uvs[0];
    let e2 = uvs[2] - uvs[0];
    let uv_edges = Matrix2::new(e1.x as f64, e2.x as f64, e1.y as f64, e2.y as f64);
    let det = uv_edges.determinant();
    if !det.is_finite() || det.abs() < UV_DET_EPSILON {
        return None;
    }
    let uv_inv = uv_edges.try_inverse()?;

    let p0 = to_f64(positions[0]);
    let edges = Matrix3x2::from_columns(&[to_f64(positions[1]) - p0, to_f64(positions[2]) - p0]);
    let jacobian = edges * uv_inv;
    jacobian.iter().all(|v| v.is_finite()).then_some(jacobian)
}

/// Solves the shared scale and rotation for a triangle.
///
/// `sigma_uv` is the isotropic standard deviation in UV units. Returns `None`
/// when the UV or 3D triangle is degenerate.
pub fn solve_triangle_frame(
    sigma_uv: f32,
    positions: &[Vec3; 3],
    uvs: &[Vec2; 3],
    thin_axis: ThinAxis,
) -> Option<SurfaceFrame> {
    let jacobian = uv_jacobian(positions, uvs)?;

    let p0 = to_f64(positions[0]);
    let (edge1, edge2) = (to_f64(positions[1]) - p0, to_f64(positions[2]) - p0);
    let face_normal = edge1.cross(&edge2);
    if face_normal.norm() <= AREA_RELATIVE_EPSILON * edge1.norm() * edge2.norm() {
        return None;
    }

    let sigma2 = (sigma_uv as f64) * (sigma_uv as f64);
    let cov_2d = Matrix2::from_diagonal_element(sigma2);
    let cov_3d: Matrix3<f64> = jacobian * cov_2d * jacobian.transpose();

    let eigen = SymmetricEigen::new(cov_3d);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    let [_, second, largest] = order;

    let lambda_largest = eigen.eigenvalues[largest];
    let lambda_second = eigen.eigenvalues[second];
    if !(lambda_second.is_finite() && lambda_largest.is_finite())
        || lambda_second <= EIGEN_EPSILON
        || lambda_second <= lambda_largest * EIGEN_RELATIVE_EPSILON
    {
        return None;
    }

    let s_major = lambda_largest.sqrt() as f32;
    let s_minor = lambda_second.sqrt() as f32;
    let s_thin = thin_axis.resolve(s_minor);

    let axis_major = eigen.eigenvectors.column(largest).normalize();
    let mut axis_minor = eigen.eigenvectors.column(second).normalize();
    let mut axis_thin = axis_major.cross(&axis_minor);
    if axis_thin.dot(&face_normal) < 0.0 {
        axis_minor = -axis_minor;
        axis_thin = -axis_thin;
    }
    let axis_thin = axis_thin.try_normalize(1e-12)?;
    let axis_minor = axis_thin.cross(&axis_major);

    let frame = Matrix3::from_columns(&[axis_major, axis_minor, axis_thin]);
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(frame));
    let q = q.cast::<f32>();
    let mut rotation = [q.w, q.i, q.j, q.k];
    if rotation[0] < 0.0 {
        rotation = rotation.map(|c| -c);
    }
    let rotation = crate::math::quat_normalize(rotation);

    let scale = [s_major.ln(), s_minor.ln(), s_thin.ln()];
    if scale.iter().chain(rotation.iter()).any(|v| !v.is_finite()) {
        return None;
    }

    Some(SurfaceFrame { scale, rotation })
}
