use std::mem;

use metal::{Buffer, CommandBufferRef, ComputeCommandEncoderRef, MTLSize, NSRange};

use crate::compute::div_ceil_u32;
use crate::error::{MeshSplatError, Result};

use super::pipeline::set_bytes_u32;
use super::types::{RADIX_BITS, RADIX_BUCKETS, RADIX_PASSES, THREADS_PER_GROUP_1D};
use super::MetalFrameBackend;

pub fn dispatch_1d(encoder: &ComputeCommandEncoderRef, count: u32, threads_per_group: u32) {
    if count == 0 {
        return;
    }

    let groups = u64::from(div_ceil_u32(count, threads_per_group));
    encoder.dispatch_thread_groups(
        MTLSize::new(groups, 1, 1),
        MTLSize::new(u64::from(threads_per_group), 1, 1),
    );
}

/// One level of the block scan: `count` elements of `buffer` starting at
/// `offset_bytes`, whose block totals go to `block_sums` at `sums_offset_bytes`.
#[derive(Debug, Clone, Copy)]
struct ScanLevel {
    offset_bytes: u64,
    count: u32,
    sums_offset_bytes: u64,
}

/// Key/value ping-pong pair for one radix pass.
struct PassBuffers<'a> {
    keys_in: &'a Buffer,
    values_in: &'a Buffer,
    keys_out: &'a Buffer,
    values_out: &'a Buffer,
}

fn elems_to_bytes(elems: u64) -> Result<u64> {
    elems
        .checked_mul(mem::size_of::<u32>() as u64)
        .ok_or_else(|| MeshSplatError::Other("scan offset overflow".to_string()))
}

impl MetalFrameBackend {
    /// Exclusive scan of `count` u32s in `data`, in place.
    ///
    /// Levels are walked down until one block remains, then the scanned
    /// block sums are added back on the way up.
    pub(super) fn encode_prefix_scan_in_place(
        &self,
        command_buffer: &CommandBufferRef,
        data: &Buffer,
        count: u32,
    ) -> Result<()> {
        let mut levels = Vec::new();
        let mut level = ScanLevel {
            offset_bytes: 0,
            count,
            sums_offset_bytes: 0,
        };
        let mut sums_elems = 0u64;
        while level.count > 0 {
            let blocks = div_ceil_u32(level.count, THREADS_PER_GROUP_1D);
            level.sums_offset_bytes = elems_to_bytes(sums_elems)?;
            levels.push(level);
            if blocks <= 1 {
                break;
            }
            level = ScanLevel {
                offset_bytes: level.sums_offset_bytes,
                count: blocks,
                sums_offset_bytes: 0,
            };
            sums_elems += u64::from(blocks);
        }

        for (depth, level) in levels.iter().enumerate() {
            let source = if depth == 0 { data } else { &self.block_sums };
            self.encode_scan_step(
                command_buffer,
                &self.prefix_scan_blocks_pipeline,
                source,
                *level,
            );
        }
        for (depth, level) in levels.iter().enumerate().rev().skip(1) {
            let target = if depth == 0 { data } else { &self.block_sums };
            self.encode_scan_step(
                command_buffer,
                &self.prefix_scan_add_offsets_pipeline,
                target,
                *level,
            );
        }
        Ok(())
    }

    fn encode_scan_step(
        &self,
        command_buffer: &CommandBufferRef,
        pipeline: &metal::ComputePipelineState,
        data: &Buffer,
        level: ScanLevel,
    ) {
        let encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(pipeline);
        encoder.set_buffer(0, Some(data), level.offset_bytes);
        encoder.set_buffer(1, Some(&self.block_sums), level.sums_offset_bytes);
        set_bytes_u32(encoder, 2, level.count);
        dispatch_1d(encoder, level.count, THREADS_PER_GROUP_1D);
        encoder.end_encoding();
    }

    fn pass_buffers(&self, pass: u32) -> PassBuffers<'_> {
        if pass % 2 == 0 {
            PassBuffers {
                keys_in: &self.sort_keys_a,
                values_in: &self.sort_values_a,
                keys_out: &self.sort_keys_b,
                values_out: &self.sort_values_b,
            }
        } else {
            PassBuffers {
                keys_in: &self.sort_keys_b,
                values_in: &self.sort_values_b,
                keys_out: &self.sort_keys_a,
                values_out: &self.sort_values_a,
            }
        }
    }

    /// Encodes every radix pass over `count` keys. Sorted data ends in the `_a` buffers.
    pub(super) fn run_radix_sort_passes(
        &self,
        command_buffer: &CommandBufferRef,
        count: u32,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let histogram_count = div_ceil_u32(count, THREADS_PER_GROUP_1D)
            .checked_mul(RADIX_BUCKETS)
            .ok_or_else(|| MeshSplatError::Other("histogram count overflow".to_string()))?;
        let histogram_bytes = elems_to_bytes(u64::from(histogram_count))?;

        for pass in 0..RADIX_PASSES {
            let shift = pass * RADIX_BITS;
            let io = self.pass_buffers(pass);

            let blit = command_buffer.new_blit_command_encoder();
            blit.fill_buffer(&self.radix_histograms, NSRange::new(0, histogram_bytes), 0);
            blit.end_encoding();

            self.encode_histogram(command_buffer, io.keys_in, count, shift);
            self.encode_prefix_scan_in_place(
                command_buffer,
                &self.radix_histograms,
                histogram_count,
            )?;
            self.encode_scatter(command_buffer, &io, count, shift);
        }
        Ok(())
    }

    fn encode_histogram(
        &self,
        command_buffer: &CommandBufferRef,
        keys: &Buffer,
        count: u32,
        shift: u32,
    ) {
        let encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(&self.radix_sort_histogram_pipeline);
        encoder.set_buffer(0, Some(keys), 0);
        encoder.set_buffer(1, Some(&self.radix_histograms), 0);
        set_bytes_u32(encoder, 2, count);
        set_bytes_u32(encoder, 3, shift);
        dispatch_1d(encoder, count, THREADS_PER_GROUP_1D);
        encoder.end_encoding();
    }

    fn encode_scatter(
        &self,
        command_buffer: &CommandBufferRef,
        io: &PassBuffers<'_>,
        count: u32,
        shift: u32,
    ) {
        let encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(&self.radix_sort_scatter_pipeline);
        encoder.set_buffer(0, Some(io.keys_in), 0);
        encoder.set_buffer(1, Some(io.values_in), 0);
        encoder.set_buffer(2, Some(io.keys_out), 0);
        encoder.set_buffer(3, Some(io.values_out), 0);
        encoder.set_buffer(4, Some(&self.radix_histograms), 0);
        set_bytes_u32(encoder, 5, count);
        set_bytes_u32(encoder, 6, shift);
        dispatch_1d(encoder, count, THREADS_PER_GROUP_1D);
        encoder.end_encoding();
    }
}
