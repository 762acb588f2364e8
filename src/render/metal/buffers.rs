use std::mem;

use crate::error::Result;
use crate::render::buffers::bytes_for_u32_elems;
use crate::render::sort::{required_block_sum_elements, required_histogram_elements};
use crate::render::DepthImage;

use super::pipeline::{new_private_buffer, new_shared_buffer};
use super::MetalFrameBackend;

impl MetalFrameBackend {
    pub(super) fn ensure_sort_capacity(&mut self, count: usize) -> Result<()> {
        if count > self.sort_capacity {
            self.reallocate_sort_buffers(count.next_power_of_two())?;
        }
        let histogram_count = required_histogram_elements(count);
        self.ensure_histogram_capacity(histogram_count)?;
        self.ensure_block_sums_capacity_for_count(histogram_count)
    }

    pub(super) fn reallocate_sort_buffers(&mut self, new_capacity: usize) -> Result<()> {
        let bytes = bytes_for_u32_elems(new_capacity)?;
        self.sort_keys_a = new_shared_buffer(&self.device, bytes);
        self.sort_keys_b = new_private_buffer(&self.device, bytes);
        self.sort_values_a = new_shared_buffer(&self.device, bytes);
        self.sort_values_b = new_private_buffer(&self.device, bytes);
        self.sort_capacity = new_capacity;
        Ok(())
    }

    pub(super) fn ensure_histogram_capacity(&mut self, histogram_count: usize) -> Result<()> {
        if histogram_count <= self.histogram_capacity {
            return Ok(());
        }

        self.radix_histograms =
            new_private_buffer(&self.device, bytes_for_u32_elems(histogram_count)?);
        self.histogram_capacity = histogram_count;
        Ok(())
    }

    pub(super) fn ensure_block_sums_capacity_for_count(&mut self, count: usize) -> Result<()> {
        let required = required_block_sum_elements(count);
        if required <= self.block_sums_capacity {
            return Ok(());
        }

        self.block_sums = new_private_buffer(&self.device, bytes_for_u32_elems(required)?);
        self.block_sums_capacity = required;
        Ok(())
    }

    /// Uploads the optional depth image; returns its `(width, height)`.
    pub(super) fn upload_depth(&mut self, depth: Option<&DepthImage>) -> Result<(u32, u32)> {
        let Some(image) = depth else {
            return Ok((0, 0));
        };
        let samples = image.as_slice();
        if samples.len() > self.depth_capacity_pixels {
            self.depth_buffer = new_shared_buffer(
                &self.device,
                samples.len().checked_mul(mem::size_of::<f32>()).ok_or_else(|| {
                    crate::error::MeshSplatError::Other("depth buffer size overflow".to_string())
                })?,
            );
            self.depth_capacity_pixels = samples.len();
        }
        // SAFETY: the buffer was sized for at least `samples.len()` floats above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                samples.as_ptr(),
                self.depth_buffer.contents() as *mut f32,
                samples.len(),
            );
        }
        Ok((image.width(), image.height()))
    }
}
