//! Metal implementation of the frame passes.
//!
//! Mirrors the CPU pipeline kernel for kernel: the prepass appends through a
//! device atomic, the valid count is read back between two command buffers,
//! and the sort, gather and indirect-command write run in the second one.

mod buffers;
mod pipeline;
mod render;
mod sort;
mod sync;
#[cfg(test)]
mod tests;
mod types;

use metal::{Buffer, CommandQueue, ComputePipelineState, Device};

pub use types::GpuViewData;

pub struct MetalFrameBackend {
    pub(super) device: Device,
    pub(super) command_queue: CommandQueue,

    pub(super) prepass_pipeline: ComputePipelineState,
    pub(super) prefix_scan_blocks_pipeline: ComputePipelineState,
    pub(super) prefix_scan_add_offsets_pipeline: ComputePipelineState,
    pub(super) radix_sort_histogram_pipeline: ComputePipelineState,
    pub(super) radix_sort_scatter_pipeline: ComputePipelineState,
    pub(super) gather_pipeline: ComputePipelineState,
    pub(super) indirect_pipeline: ComputePipelineState,

    pub(super) gaussian_buffer: Buffer,
    pub(super) view_buffer: Buffer,
    pub(super) depth_buffer: Buffer,
    pub(super) valid_count_buffer: Buffer,
    pub(super) indirect_buffer: Buffer,

    pub(super) transforms: Buffer,
    pub(super) sorted_transforms: Buffer,
    pub(super) sort_keys_a: Buffer,
    pub(super) sort_keys_b: Buffer,
    pub(super) sort_values_a: Buffer,
    pub(super) sort_values_b: Buffer,
    pub(super) radix_histograms: Buffer,
    pub(super) block_sums: Buffer,

    pub(super) max_gaussians: usize,
    pub(super) uploaded_count: usize,
    pub(super) sort_capacity: usize,
    pub(super) histogram_capacity: usize,
    pub(super) block_sums_capacity: usize,
    pub(super) depth_capacity_pixels: usize,

    pub(super) store_uploaded: bool,
    pub(super) last_visible: usize,
    pub(super) gpu_disabled: bool,
}

impl std::fmt::Debug for MetalFrameBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalFrameBackend")
            .field("max_gaussians", &self.max_gaussians)
            .field("uploaded_count", &self.uploaded_count)
            .field("sort_capacity", &self.sort_capacity)
            .field("store_uploaded", &self.store_uploaded)
            .field("last_visible", &self.last_visible)
            .field("gpu_disabled", &self.gpu_disabled)
            .finish()
    }
}
