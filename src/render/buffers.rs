use std::mem;

use crate::error::{MeshSplatError, Result};

use super::sort::{required_block_sum_elements, required_histogram_elements, SortScratch};
use super::{DrawIndexedIndirect, QuadTransform};

/// Transient per-frame arrays, sized to the bound store.
///
/// Everything here is rebuilt every frame; only the allocations persist.
/// Binding a store of a different size reallocates the whole set.
#[derive(Debug, Default)]
pub struct FrameBuffers {
    pub(super) sort_keys_a: Vec<u32>,
    pub(super) sort_keys_b: Vec<u32>,
    pub(super) sort_values_a: Vec<u32>,
    pub(super) sort_values_b: Vec<u32>,
    pub(super) transforms: Vec<QuadTransform>,
    pub(super) sorted_transforms: Vec<QuadTransform>,
    pub(super) radix_histograms: Vec<u32>,
    pub(super) block_sums: Vec<u32>,

    pub(super) sort_capacity: usize,
    pub(super) histogram_capacity: usize,
    pub(super) block_sums_capacity: usize,

    pub(super) valid_count: usize,
    pub(super) indirect: DrawIndexedIndirect,
}

impl FrameBuffers {
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut buffers = Self::default();
        buffers.bind_capacity(capacity)?;
        Ok(buffers)
    }

    /// Reallocates every array for a store of `capacity` Gaussians.
    pub fn bind_capacity(&mut self, capacity: usize) -> Result<()> {
        if capacity == self.sort_capacity && !self.transforms.is_empty() {
            return Ok(());
        }
        bytes_for_elems::<QuadTransform>(capacity)?;
        log::debug!("frame buffers bound to capacity {capacity}");
        self.reallocate_sort_buffers(capacity)?;
        self.histogram_capacity = 0;
        self.block_sums_capacity = 0;
        self.ensure_histogram_capacity(required_histogram_elements(capacity))?;
        self.ensure_block_sums_capacity_for_count(self.histogram_capacity)?;
        self.reset_frame();
        Ok(())
    }

    pub(super) fn reallocate_sort_buffers(&mut self, new_capacity: usize) -> Result<()> {
        bytes_for_u32_elems(new_capacity)?;
        self.sort_keys_a = vec![0; new_capacity];
        self.sort_keys_b = vec![0; new_capacity];
        self.sort_values_a = vec![0; new_capacity];
        self.sort_values_b = vec![0; new_capacity];
        self.transforms = vec![QuadTransform::default(); new_capacity.max(1)];
        self.sorted_transforms = vec![QuadTransform::default(); new_capacity.max(1)];
        self.sort_capacity = new_capacity;
        Ok(())
    }

    pub(super) fn ensure_histogram_capacity(&mut self, histogram_count: usize) -> Result<()> {
        if histogram_count <= self.histogram_capacity {
            return Ok(());
        }
        bytes_for_u32_elems(histogram_count)?;
        self.radix_histograms = vec![0; histogram_count];
        self.histogram_capacity = histogram_count;
        Ok(())
    }

    pub(super) fn ensure_block_sums_capacity_for_count(&mut self, count: usize) -> Result<()> {
        let required = required_block_sum_elements(count);
        if required <= self.block_sums_capacity {
            return Ok(());
        }
        self.block_sums = vec![0; required];
        self.block_sums_capacity = required;
        Ok(())
    }

    pub(super) fn reset_frame(&mut self) {
        self.valid_count = 0;
        self.indirect = DrawIndexedIndirect::quads(0);
    }

    /// Keys and values to sort in place, plus the scratch the sort needs.
    pub(super) fn sort_views(&mut self) -> (&mut [u32], &mut [u32], SortScratch<'_>) {
        (
            &mut self.sort_keys_a,
            &mut self.sort_values_a,
            SortScratch {
                keys: &mut self.sort_keys_b,
                values: &mut self.sort_values_b,
                histograms: &mut self.radix_histograms,
                block_sums: &mut self.block_sums,
            },
        )
    }

    pub fn capacity(&self) -> usize {
        self.sort_capacity
    }

    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    pub fn keys(&self) -> &[u32] {
        &self.sort_keys_a[..self.valid_count]
    }

    pub fn values(&self) -> &[u32] {
        &self.sort_values_a[..self.valid_count]
    }

    /// Prepass output in append order.
    pub fn transforms(&self) -> &[QuadTransform] {
        &self.transforms[..self.valid_count]
    }

    /// Gather output in draw order.
    pub fn sorted_transforms(&self) -> &[QuadTransform] {
        &self.sorted_transforms[..self.valid_count]
    }

    pub fn indirect(&self) -> DrawIndexedIndirect {
        self.indirect
    }
}

pub(super) fn bytes_for_u32_elems(count: usize) -> Result<usize> {
    bytes_for_elems::<u32>(count)
}

fn bytes_for_elems<T>(count: usize) -> Result<usize> {
    count
        .checked_mul(mem::size_of::<T>())
        .ok_or_else(|| MeshSplatError::Other("buffer size overflow".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_sizes_sort_scratch() {
        let buffers = FrameBuffers::with_capacity(1000).unwrap();
        assert_eq!(buffers.capacity(), 1000);
        assert_eq!(buffers.sort_keys_b.len(), 1000);
        assert_eq!(buffers.radix_histograms.len(), 4 * 256);
        assert!(buffers.block_sums.len() >= required_block_sum_elements(4 * 256));
        assert_eq!(buffers.valid_count(), 0);
        assert!(buffers.sorted_transforms().is_empty());
    }

    #[test]
    fn rebinding_changes_allocation() {
        let mut buffers = FrameBuffers::with_capacity(10).unwrap();
        buffers.bind_capacity(300).unwrap();
        assert_eq!(buffers.capacity(), 300);
        assert_eq!(buffers.radix_histograms.len(), 2 * 256);
        buffers.bind_capacity(5).unwrap();
        assert_eq!(buffers.sort_values_a.len(), 5);
        assert_eq!(buffers.radix_histograms.len(), 256);
    }

    #[test]
    fn empty_capacity_still_binds() {
        let buffers = FrameBuffers::with_capacity(0).unwrap();
        assert_eq!(buffers.capacity(), 0);
        assert_eq!(buffers.indirect().instance_count, 0);
    }

    #[test]
    fn overflowing_sizes_are_errors() {
        assert!(bytes_for_u32_elems(usize::MAX).is_err());
    }
}
