use crate::render::{DrawIndexedIndirect, QuadTransform};
use crate::splat::Gaussian;

pub(super) const THREADS_PER_GROUP_1D: u32 = crate::compute::THREADS_PER_GROUP_1D;
pub(super) const RADIX_BUCKETS: u32 = crate::render::sort::RADIX_BUCKETS as u32;
pub(super) const RADIX_BITS: u32 = crate::render::sort::RADIX_BITS;
pub(super) const RADIX_PASSES: u32 = crate::render::sort::RADIX_PASSES;

/// Per-frame constants for `prepass`; matrices are column-major.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GpuViewData {
    pub model_view: [f32; 16],
    pub projection: [f32; 16],
    pub cam_rotation: [f32; 9],
    pub fx: f32,
    pub fy: f32,
    pub px_to_ndc_x: f32,
    pub px_to_ndc_y: f32,
    pub std_dev_scale: f32,
    pub sigma_extent: f32,
    pub min_radius_px: f32,
    pub depth_bias: f32,
    pub count: u32,
    pub invert_key: u32,
    pub frustum_cull: u32,
    pub depth_test: u32,
    pub depth_width: u32,
    pub depth_height: u32,
}

// Shader structs use scalar arrays only, so these sizes are the MSL sizes.
const _: [(); 76] = [(); std::mem::size_of::<Gaussian>()];
const _: [(); 220] = [(); std::mem::size_of::<GpuViewData>()];
const _: [(); 36] = [(); std::mem::size_of::<QuadTransform>()];
const _: [(); 20] = [(); std::mem::size_of::<DrawIndexedIndirect>()];
