use std::{mem, time::Duration};

use metal::NSRange;
use objc::rc::autoreleasepool;

use crate::error::{MeshSplatError, Result};
use crate::render::prepass::ViewSetup;
use crate::render::{
    BlendMode, DrawIndexedIndirect, FrameConfig, FrameParams, FrameStats, QuadTransform,
};

use super::pipeline::{read_shared_u32, set_bytes_u32, shared_slice, write_shared_struct};
use super::sort::dispatch_1d;
use super::sync::commit_and_wait_or_disable_gpu;
use super::types::{GpuViewData, THREADS_PER_GROUP_1D};
use super::MetalFrameBackend;

const GPU_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

fn view_data(
    setup: &ViewSetup,
    config: &FrameConfig,
    count: u32,
    depth_size: (u32, u32),
) -> GpuViewData {
    let mut model_view = [0.0; 16];
    model_view.copy_from_slice(setup.model_view.as_slice());
    let mut projection = [0.0; 16];
    projection.copy_from_slice(setup.projection.as_slice());
    let mut cam_rotation = [0.0; 9];
    cam_rotation.copy_from_slice(setup.cam_rotation.as_slice());

    GpuViewData {
        model_view,
        projection,
        cam_rotation,
        fx: setup.fx,
        fy: setup.fy,
        px_to_ndc_x: setup.px_to_ndc[0],
        px_to_ndc_y: setup.px_to_ndc[1],
        std_dev_scale: config.std_dev_scale,
        sigma_extent: config.sigma_extent,
        min_radius_px: config.min_radius_px,
        depth_bias: config.depth_bias,
        count,
        invert_key: u32::from(config.blend == BlendMode::Over),
        frustum_cull: u32::from(config.frustum_cull),
        depth_test: u32::from(config.depth_test),
        depth_width: depth_size.0,
        depth_height: depth_size.1,
    }
}

impl MetalFrameBackend {
    /// Runs prepass, sort and gather for the uploaded store.
    ///
    /// Two command buffers: the first runs the prepass, whose valid count is
    /// read back to size the sort; the second sorts, gathers and writes the
    /// indirect command.
    pub fn run_frame(&mut self, params: &FrameParams<'_>, config: &FrameConfig) -> Result<FrameStats> {
        autoreleasepool(|| {
            if self.gpu_disabled {
                return Err(MeshSplatError::GpuDisabled);
            }
            if !self.store_uploaded {
                return Err("No store uploaded to Metal backend".into());
            }
            config.validate()?;
            let depth = match (config.depth_test, params.depth) {
                (true, None) => {
                    return Err(MeshSplatError::InvalidConfig(
                        "depth test enabled without a depth image".to_string(),
                    ))
                }
                (true, image) => image,
                (false, _) => None,
            };

            let setup = ViewSetup::new(params)?;
            let count = u32::try_from(self.uploaded_count)?;
            let depth_size = self.upload_depth(depth)?;
            write_shared_struct(&self.view_buffer, &view_data(&setup, config, count, depth_size));
            self.last_visible = 0;

            if count == 0 {
                write_shared_struct(&self.indirect_buffer, &DrawIndexedIndirect::quads(0));
                return Ok(FrameStats {
                    submitted: 0,
                    visible: 0,
                    indirect: DrawIndexedIndirect::quads(0),
                });
            }

            let stage_a = self.command_queue.new_command_buffer();
            let blit = stage_a.new_blit_command_encoder();
            blit.fill_buffer(
                &self.valid_count_buffer,
                NSRange::new(0, mem::size_of::<u32>() as u64),
                0,
            );
            blit.end_encoding();

            let encoder = stage_a.new_compute_command_encoder();
            encoder.set_compute_pipeline_state(&self.prepass_pipeline);
            encoder.set_buffer(0, Some(&self.gaussian_buffer), 0);
            encoder.set_buffer(1, Some(&self.view_buffer), 0);
            encoder.set_buffer(2, Some(&self.depth_buffer), 0);
            encoder.set_buffer(3, Some(&self.valid_count_buffer), 0);
            encoder.set_buffer(4, Some(&self.sort_keys_a), 0);
            encoder.set_buffer(5, Some(&self.sort_values_a), 0);
            encoder.set_buffer(6, Some(&self.transforms), 0);
            dispatch_1d(encoder, count, THREADS_PER_GROUP_1D);
            encoder.end_encoding();

            commit_and_wait_or_disable_gpu(
                stage_a,
                "prepass",
                GPU_WAIT_TIMEOUT,
                &mut self.gpu_disabled,
            )?;

            // Appends past capacity are dropped by the kernel but still counted.
            let visible = read_shared_u32(&self.valid_count_buffer).min(count);

            let stage_b = self.command_queue.new_command_buffer();
            self.run_radix_sort_passes(stage_b, visible)?;

            let encoder = stage_b.new_compute_command_encoder();
            encoder.set_compute_pipeline_state(&self.gather_pipeline);
            encoder.set_buffer(0, Some(&self.sort_values_a), 0);
            encoder.set_buffer(1, Some(&self.transforms), 0);
            encoder.set_buffer(2, Some(&self.sorted_transforms), 0);
            set_bytes_u32(encoder, 3, visible);
            dispatch_1d(encoder, visible, THREADS_PER_GROUP_1D);
            encoder.end_encoding();

            let encoder = stage_b.new_compute_command_encoder();
            encoder.set_compute_pipeline_state(&self.indirect_pipeline);
            encoder.set_buffer(0, Some(&self.indirect_buffer), 0);
            set_bytes_u32(encoder, 1, visible);
            dispatch_1d(encoder, 1, 1);
            encoder.end_encoding();

            commit_and_wait_or_disable_gpu(
                stage_b,
                "sort_gather",
                GPU_WAIT_TIMEOUT,
                &mut self.gpu_disabled,
            )?;

            self.last_visible = visible as usize;
            let stats = FrameStats {
                submitted: count as usize,
                visible: self.last_visible,
                indirect: self.indirect_command(),
            };
            log::debug!(
                "metal frame: {} of {} gaussians visible",
                stats.visible,
                stats.submitted
            );
            Ok(stats)
        })
    }

    pub fn indirect_command(&self) -> DrawIndexedIndirect {
        // SAFETY: shared buffer sized for one command; no frame is in flight.
        unsafe { *(self.indirect_buffer.contents() as *const DrawIndexedIndirect) }
    }

    /// Gather output of the last frame, in draw order.
    pub fn sorted_transforms(&self) -> &[QuadTransform] {
        // SAFETY: `sorted_transforms` is shared and holds `max_gaussians` entries.
        unsafe { shared_slice(&self.sorted_transforms, self.last_visible) }
    }

    pub fn sorted_keys(&self) -> &[u32] {
        // SAFETY: sorted keys end in the shared `_a` buffer after an even pass count.
        unsafe { shared_slice(&self.sort_keys_a, self.last_visible) }
    }
}
