use std::{ffi::c_void, mem, ptr};

use metal::{Buffer, CompileOptions, ComputePipelineState, Device, Library, MTLResourceOptions};

use crate::convert::GaussianStore;
use crate::error::{MeshSplatError, Result};
use crate::render::{DrawIndexedIndirect, QuadTransform};
use crate::splat::Gaussian;

use super::types::GpuViewData;
use super::MetalFrameBackend;

impl MetalFrameBackend {
    pub fn new(max_gaussians: usize) -> Result<Self> {
        let device = Device::system_default()
            .ok_or_else(|| MeshSplatError::Other("No Metal device found".to_string()))?;
        let command_queue = device.new_command_queue();

        let prepass_library = compile_library(
            &device,
            "prepass",
            include_str!("../../../shaders/prepass.metal"),
        )?;
        let prefix_scan_library = compile_library(
            &device,
            "prefix_scan",
            include_str!("../../../shaders/prefix_scan.metal"),
        )?;
        let radix_sort_library = compile_library(
            &device,
            "radix_sort",
            include_str!("../../../shaders/radix_sort.metal"),
        )?;
        let gather_library = compile_library(
            &device,
            "gather",
            include_str!("../../../shaders/gather.metal"),
        )?;

        let prepass_pipeline = create_pipeline(&device, &prepass_library, "prepass")?;
        let prefix_scan_blocks_pipeline =
            create_pipeline(&device, &prefix_scan_library, "prefix_scan_blocks")?;
        let prefix_scan_add_offsets_pipeline =
            create_pipeline(&device, &prefix_scan_library, "prefix_scan_add_offsets")?;
        let radix_sort_histogram_pipeline =
            create_pipeline(&device, &radix_sort_library, "radix_sort_histogram")?;
        let radix_sort_scatter_pipeline =
            create_pipeline(&device, &radix_sort_library, "radix_sort_scatter")?;
        let gather_pipeline = create_pipeline(&device, &gather_library, "gather_transforms")?;
        let indirect_pipeline =
            create_pipeline(&device, &gather_library, "write_indirect_command")?;

        let gaussian_buffer = new_shared_buffer(
            &device,
            max_gaussians
                .checked_mul(mem::size_of::<Gaussian>())
                .ok_or_else(|| MeshSplatError::Other("gaussian buffer size overflow".to_string()))?,
        );
        let transform_bytes = max_gaussians
            .checked_mul(mem::size_of::<QuadTransform>())
            .ok_or_else(|| MeshSplatError::Other("transform buffer size overflow".to_string()))?;
        let transforms = new_private_buffer(&device, transform_bytes);
        let sorted_transforms = new_shared_buffer(&device, transform_bytes);

        let view_buffer = new_shared_buffer(&device, mem::size_of::<GpuViewData>());
        let depth_buffer = new_shared_buffer(&device, mem::size_of::<f32>());
        let valid_count_buffer = new_shared_buffer(&device, mem::size_of::<u32>());
        let indirect_buffer = new_shared_buffer(&device, mem::size_of::<DrawIndexedIndirect>());
        let sort_keys_a = new_shared_buffer(&device, mem::size_of::<u32>());
        let sort_keys_b = new_private_buffer(&device, mem::size_of::<u32>());
        let sort_values_a = new_shared_buffer(&device, mem::size_of::<u32>());
        let sort_values_b = new_private_buffer(&device, mem::size_of::<u32>());
        let radix_histograms = new_private_buffer(&device, mem::size_of::<u32>());
        let block_sums = new_private_buffer(&device, mem::size_of::<u32>());

        let mut backend = Self {
            device,
            command_queue,
            prepass_pipeline,
            prefix_scan_blocks_pipeline,
            prefix_scan_add_offsets_pipeline,
            radix_sort_histogram_pipeline,
            radix_sort_scatter_pipeline,
            gather_pipeline,
            indirect_pipeline,
            gaussian_buffer,
            view_buffer,
            depth_buffer,
            valid_count_buffer,
            indirect_buffer,
            transforms,
            sorted_transforms,
            sort_keys_a,
            sort_keys_b,
            sort_values_a,
            sort_values_b,
            radix_histograms,
            block_sums,
            max_gaussians,
            uploaded_count: 0,
            sort_capacity: 1,
            histogram_capacity: 1,
            block_sums_capacity: 1,
            depth_capacity_pixels: 1,
            store_uploaded: false,
            last_visible: 0,
            gpu_disabled: false,
        };
        backend.ensure_sort_capacity(max_gaussians)?;
        write_shared_struct(&backend.indirect_buffer, &DrawIndexedIndirect::quads(0));
        log::debug!("metal backend ready for {max_gaussians} gaussians");
        Ok(backend)
    }

    /// Copies a sealed store into the device-visible Gaussian buffer.
    pub fn upload_store(&mut self, store: &GaussianStore) -> Result<()> {
        if store.len() > self.max_gaussians {
            return Err(MeshSplatError::CapacityExceeded {
                requested: store.len(),
                ceiling: self.max_gaussians,
            });
        }

        let gaussians = store.gaussians();
        // SAFETY: the buffer holds `max_gaussians` records and `Gaussian` is `repr(C)`.
        unsafe {
            ptr::copy_nonoverlapping(
                gaussians.as_ptr(),
                self.gaussian_buffer.contents() as *mut Gaussian,
                gaussians.len(),
            );
        }

        self.uploaded_count = gaussians.len();
        self.store_uploaded = true;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.store_uploaded
    }

    pub fn is_disabled(&self) -> bool {
        self.gpu_disabled
    }
}

pub(super) fn compile_library(device: &Device, stage: &'static str, source: &str) -> Result<Library> {
    device
        .new_library_with_source(source, &CompileOptions::new())
        .map_err(|message| MeshSplatError::ShaderCompile { stage, message })
}

pub(super) fn create_pipeline(
    device: &Device,
    library: &Library,
    function_name: &'static str,
) -> Result<ComputePipelineState> {
    let function = library
        .get_function(function_name, None)
        .map_err(|message| MeshSplatError::ShaderCompile {
            stage: function_name,
            message,
        })?;

    device
        .new_compute_pipeline_state_with_function(&function)
        .map_err(|message| MeshSplatError::ShaderCompile {
            stage: function_name,
            message,
        })
}

pub(super) fn new_shared_buffer(device: &Device, size_bytes: usize) -> Buffer {
    device.new_buffer(
        size_bytes.max(mem::size_of::<u32>()) as u64,
        MTLResourceOptions::StorageModeShared,
    )
}

pub(super) fn new_private_buffer(device: &Device, size_bytes: usize) -> Buffer {
    device.new_buffer(
        size_bytes.max(mem::size_of::<u32>()) as u64,
        MTLResourceOptions::StorageModePrivate,
    )
}

pub(super) fn write_shared_struct<T: Copy>(buffer: &Buffer, value: &T) {
    unsafe {
        *(buffer.contents() as *mut T) = *value;
    }
}

pub(super) fn read_shared_u32(buffer: &Buffer) -> u32 {
    unsafe { *(buffer.contents() as *const u32) }
}

/// Views the first `count` elements of a shared buffer.
///
/// # Safety
/// The buffer must be shared-storage, hold at least `count` `T`s, and not be
/// written by the GPU while the slice lives.
pub(super) unsafe fn shared_slice<T>(buffer: &Buffer, count: usize) -> &[T] {
    if count == 0 {
        return &[];
    }
    std::slice::from_raw_parts(buffer.contents() as *const T, count)
}

pub(super) fn set_bytes_u32(encoder: &metal::ComputeCommandEncoderRef, index: u64, value: u32) {
    encoder.set_bytes(
        index,
        mem::size_of::<u32>() as u64,
        &value as *const _ as *const c_void,
    );
}
