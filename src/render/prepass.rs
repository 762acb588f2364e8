//! Visibility prepass: project, cull, key and compact every stored Gaussian.

use nalgebra::{Matrix3, Matrix4, Vector4};

use crate::compute::{dispatch_1d, AppendCounter, ScatterSlice, THREADS_PER_GROUP_1D};
use crate::error::{MeshSplatError, Result};
use crate::math::Vec3;
use crate::splat::{footprint_axes, project_covariance_to_2d, Gaussian};

use super::sort::float_to_ordered_key;
use super::{BlendMode, DepthImage, FrameConfig, FrameParams, QuadTransform};

/// Clip-space `w` below this is treated as behind the eye.
const NEAR_W_EPSILON: f32 = 1e-5;

/// Per-frame constants shared by every prepass thread.
#[derive(Debug, Clone, Copy)]
pub struct ViewSetup {
    pub model_view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    /// Rotation into the camera frame used by the EWA Jacobian (x right, y up, z forward).
    pub cam_rotation: Matrix3<f32>,
    pub fx: f32,
    pub fy: f32,
    pub px_to_ndc: [f32; 2],
}

impl ViewSetup {
    pub fn new(params: &FrameParams<'_>) -> Result<Self> {
        let [width, height] = params.viewport;
        if width == 0 || height == 0 {
            return Err(MeshSplatError::InvalidConfig(format!(
                "viewport must be non-empty, got {width}x{height}"
            )));
        }
        if params.view.iter().chain(params.projection.iter()).any(|v| !v.is_finite()) {
            return Err(MeshSplatError::InvalidConfig(
                "view/projection matrices must be finite".to_string(),
            ));
        }

        let flip_z = Matrix3::from_diagonal(&Vec3::new(1.0, 1.0, -1.0));
        let cam_rotation = flip_z * params.view.fixed_view::<3, 3>(0, 0).into_owned();
        let (w, h) = (width as f32, height as f32);
        Ok(Self {
            model_view: params.view,
            projection: params.projection,
            cam_rotation,
            fx: params.projection[(0, 0)] * w * 0.5,
            fy: params.projection[(1, 1)] * h * 0.5,
            px_to_ndc: [2.0 / w, 2.0 / h],
        })
    }
}

/// Depth-to-key encoding for the chosen blend equation.
///
/// `Over` inverts the key so an ascending sort yields farthest first.
pub fn depth_key(view_depth: f32, blend: BlendMode) -> u32 {
    let key = float_to_ordered_key(view_depth);
    match blend {
        BlendMode::Over => !key,
        BlendMode::Under => key,
    }
}

/// Projects one Gaussian. `None` means culled.
pub fn project_gaussian(
    gaussian: &Gaussian,
    source_index: u32,
    setup: &ViewSetup,
    config: &FrameConfig,
    depth: Option<&DepthImage>,
) -> Option<(u32, QuadTransform)> {
    let p = gaussian.position();
    let view_pos = setup.model_view * Vector4::new(p.x, p.y, p.z, 1.0);
    let clip = setup.projection * view_pos;
    if clip.w.is_nan() || clip.w <= NEAR_W_EPSILON {
        return None;
    }
    let ndc = Vec3::new(clip.x / clip.w, clip.y / clip.w, clip.z / clip.w);
    if !(ndc.x.is_finite() && ndc.y.is_finite() && ndc.z.is_finite()) {
        return None;
    }
    if config.frustum_cull && !(-1.0..=1.0).contains(&ndc.z) {
        return None;
    }

    if let Some(depth) = depth {
        let window_z = ndc.z * 0.5 + 0.5;
        if let Some(mesh_z) = depth.sample_ndc(ndc.x, ndc.y) {
            if window_z > mesh_z + config.depth_bias {
                return None;
            }
        }
    }

    let view_depth = -view_pos.z;
    let point_cam = Vec3::new(view_pos.x, view_pos.y, view_depth);
    let cov_model = gaussian.covariance_3d(config.std_dev_scale);
    let cov_cam = setup.cam_rotation * cov_model * setup.cam_rotation.transpose();
    let (cov_a, cov_b, cov_c) = project_covariance_to_2d(&cov_cam, point_cam, setup.fx, setup.fy);
    let (major, minor) = footprint_axes(cov_a, cov_b, cov_c)?;
    if minor.norm() < config.min_radius_px {
        return None;
    }

    let sx = setup.px_to_ndc[0] * config.sigma_extent;
    let sy = setup.px_to_ndc[1] * config.sigma_extent;
    let axes = [major.x * sx, major.y * sy, minor.x * sx, minor.y * sy];
    if axes.iter().any(|v| !v.is_finite()) {
        return None;
    }

    if config.frustum_cull {
        let extent_x = axes[0].abs() + axes[2].abs();
        let extent_y = axes[1].abs() + axes[3].abs();
        if ndc.x + extent_x < -1.0
            || ndc.x - extent_x > 1.0
            || ndc.y + extent_y < -1.0
            || ndc.y - extent_y > 1.0
        {
            return None;
        }
    }

    let transform = QuadTransform {
        center: [ndc.x, ndc.y, ndc.z, gaussian.opacity],
        axes,
        source_index,
    };
    Some((depth_key(view_depth, config.blend), transform))
}

/// Output arrays for one prepass, position-aligned by append slot.
///
/// `values[slot] == slot`; the store index travels in `QuadTransform::source_index`.
pub struct PrepassTargets<'a> {
    pub keys: &'a mut [u32],
    pub values: &'a mut [u32],
    pub transforms: &'a mut [QuadTransform],
}

/// Runs the prepass over `gaussians` and returns the valid count.
///
/// Slot order follows the atomic append, not the store order.
pub fn run_prepass(
    gaussians: &[Gaussian],
    params: &FrameParams<'_>,
    config: &FrameConfig,
    targets: PrepassTargets<'_>,
) -> Result<usize> {
    let capacity = targets
        .keys
        .len()
        .min(targets.values.len())
        .min(targets.transforms.len());
    if gaussians.len() > capacity {
        return Err(MeshSplatError::CapacityExceeded {
            requested: gaussians.len(),
            ceiling: capacity,
        });
    }
    if gaussians.len() > u32::MAX as usize {
        return Err(MeshSplatError::CapacityExceeded {
            requested: gaussians.len(),
            ceiling: u32::MAX as usize,
        });
    }

    let depth = match (config.depth_test, params.depth) {
        (true, Some(image)) => Some(image),
        (true, None) => {
            return Err(MeshSplatError::InvalidConfig(
                "depth test enabled without a depth image".to_string(),
            ))
        }
        (false, _) => None,
    };
    let setup = ViewSetup::new(params)?;

    let counter = AppendCounter::new(capacity);
    let keys = ScatterSlice::new(targets.keys);
    let values = ScatterSlice::new(targets.values);
    let transforms = ScatterSlice::new(targets.transforms);

    dispatch_1d(gaussians.len(), THREADS_PER_GROUP_1D, |_, range| {
        for i in range {
            let index = i as u32;
            let Some((key, transform)) =
                project_gaussian(&gaussians[i], index, &setup, config, depth)
            else {
                continue;
            };
            let Some(slot) = counter.reserve() else {
                continue;
            };
            // SAFETY: `reserve` hands out every slot once.
            unsafe {
                keys.write(slot, key);
                values.write(slot, slot as u32);
                transforms.write(slot, transform);
            }
        }
    });

    let visible = counter.len();
    log::debug!("prepass kept {visible} of {} gaussians", gaussians.len());
    Ok(visible)
}
