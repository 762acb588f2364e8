//! Ordered frame passes over a sealed store.

use crate::compute::ComputeContext;
use crate::convert::GaussianStore;
use crate::error::Result;

use super::buffers::FrameBuffers;
use super::gather::gather_transforms;
use super::prepass::{run_prepass, PrepassTargets};
use super::sort::radix_sort;
use super::{DrawIndexedIndirect, FrameConfig, FrameParams, FrameStats, QuadTransform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePass {
    Prepass,
    Sort,
    Gather,
}

/// Execution order. Each pass completes before the next one reads its output.
pub const FRAME_PASSES: [FramePass; 3] = [FramePass::Prepass, FramePass::Sort, FramePass::Gather];

/// Everything a pass may read or write for one frame.
pub struct FrameContext<'a> {
    pub store: &'a GaussianStore,
    pub params: &'a FrameParams<'a>,
    pub config: &'a FrameConfig,
    pub buffers: &'a mut FrameBuffers,
}

impl FramePass {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Prepass => "prepass",
            Self::Sort => "sort",
            Self::Gather => "gather",
        }
    }

    pub fn execute(self, frame: &mut FrameContext<'_>) -> Result<()> {
        let buffers = &mut *frame.buffers;
        match self {
            Self::Prepass => {
                buffers.reset_frame();
                buffers.valid_count = run_prepass(
                    frame.store.gaussians(),
                    frame.params,
                    frame.config,
                    PrepassTargets {
                        keys: &mut buffers.sort_keys_a,
                        values: &mut buffers.sort_values_a,
                        transforms: &mut buffers.transforms,
                    },
                )?;
            }
            Self::Sort => {
                let count = buffers.valid_count;
                let (keys, values, scratch) = buffers.sort_views();
                radix_sort(keys, values, count, scratch)?;
            }
            Self::Gather => {
                buffers.indirect = gather_transforms(
                    &buffers.sort_values_a,
                    &buffers.transforms,
                    &mut buffers.sorted_transforms,
                    buffers.valid_count,
                )?;
            }
        }
        Ok(())
    }
}

/// Owns the transient frame buffers and runs [`FRAME_PASSES`] in order.
#[derive(Debug)]
pub struct FramePipeline {
    config: FrameConfig,
    buffers: FrameBuffers,
}

impl FramePipeline {
    pub fn new(config: FrameConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            buffers: FrameBuffers::default(),
        })
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FrameConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Runs one frame. Buffers are rebound when the store size differs from
    /// the previous frame's.
    pub fn run(
        &mut self,
        ctx: &ComputeContext,
        store: &GaussianStore,
        params: &FrameParams<'_>,
    ) -> Result<FrameStats> {
        self.buffers.bind_capacity(store.len())?;

        let mut frame = FrameContext {
            store,
            params,
            config: &self.config,
            buffers: &mut self.buffers,
        };
        ctx.install(|| {
            for pass in FRAME_PASSES {
                pass.execute(&mut frame)?;
                log::trace!("{} done", pass.name());
            }
            Ok::<(), crate::error::MeshSplatError>(())
        })?;

        let stats = FrameStats {
            submitted: store.len(),
            visible: self.buffers.valid_count,
            indirect: self.buffers.indirect,
        };
        log::debug!(
            "frame: {} of {} gaussians visible",
            stats.visible,
            stats.submitted
        );
        Ok(stats)
    }

    pub fn sorted_transforms(&self) -> &[QuadTransform] {
        self.buffers.sorted_transforms()
    }

    pub fn sorted_keys(&self) -> &[u32] {
        self.buffers.keys()
    }

    pub fn sorted_values(&self) -> &[u32] {
        self.buffers.values()
    }

    /// Prepass output in append order; `sorted_values` index into it.
    pub fn unsorted_transforms(&self) -> &[QuadTransform] {
        self.buffers.transforms()
    }

    pub fn indirect_command(&self) -> DrawIndexedIndirect {
        self.buffers.indirect()
    }

    pub fn buffers(&self) -> &FrameBuffers {
        &self.buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{look_at_target, Camera};
    use crate::math::Vec3;
    use crate::render::BlendMode;
    use crate::splat::Gaussian;
    use rand::{Rng, SeedableRng};

    fn cloud(n: usize) -> GaussianStore {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let s = 0.02_f32.ln();
        let gaussians = (0..n)
            .map(|_| Gaussian {
                position: [
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                ],
                scale: [s, s, s - 4.0],
                rotation: [1.0, 0.0, 0.0, 0.0],
                opacity: 1.0,
                ..Gaussian::default()
            })
            .collect();
        GaussianStore::from_gaussians(gaussians)
    }

    fn frame_params(camera: &Camera) -> FrameParams<'static> {
        FrameParams {
            view: camera.view_matrix(),
            projection: camera.projection_matrix(640, 480),
            viewport: [640, 480],
            depth: None,
        }
    }

    fn camera() -> Camera {
        let mut camera = Camera::new(Vec3::new(0.5, 1.0, 5.0), 0.0, 0.0);
        look_at_target(&mut camera, Vec3::zeros());
        camera
    }

    fn view_depths(store: &GaussianStore, camera: &Camera, out: &[QuadTransform]) -> Vec<f32> {
        out.iter()
            .map(|t| {
                let g = &store.gaussians()[t.source_index as usize];
                camera.world_to_view(g.position()).z
            })
            .collect()
    }

    #[test]
    fn passes_run_in_declared_order() {
        let names: Vec<&str> = FRAME_PASSES.iter().map(|p| p.name()).collect();
        assert_eq!(names, ["prepass", "sort", "gather"]);
    }

    #[test]
    fn over_blend_draws_back_to_front() {
        let ctx = ComputeContext::new(Some(4)).unwrap();
        let store = cloud(4000);
        let camera = camera();
        let mut pipeline = FramePipeline::new(FrameConfig::default()).unwrap();
        let stats = pipeline.run(&ctx, &store, &frame_params(&camera)).unwrap();

        assert_eq!(stats.submitted, 4000);
        assert!(stats.visible > 0);
        assert_eq!(stats.indirect.instance_count as usize, stats.visible);

        let depths = view_depths(&store, &camera, pipeline.sorted_transforms());
        assert!(depths.windows(2).all(|w| w[0] >= w[1] - 1e-4));
        assert!(pipeline.sorted_keys().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn under_blend_draws_front_to_back() {
        let ctx = ComputeContext::new(Some(2)).unwrap();
        let store = cloud(2000);
        let camera = camera();
        let config = FrameConfig {
            blend: BlendMode::Under,
            ..FrameConfig::default()
        };
        let mut pipeline = FramePipeline::new(config).unwrap();
        pipeline.run(&ctx, &store, &frame_params(&camera)).unwrap();
        let depths = view_depths(&store, &camera, pipeline.sorted_transforms());
        assert!(depths.windows(2).all(|w| w[0] <= w[1] + 1e-4));
    }

    #[test]
    fn gather_matches_sorted_values() {
        let ctx = ComputeContext::new(Some(4)).unwrap();
        let store = cloud(3000);
        let camera = camera();
        let mut pipeline = FramePipeline::new(FrameConfig::default()).unwrap();
        pipeline.run(&ctx, &store, &frame_params(&camera)).unwrap();

        let unsorted = pipeline.unsorted_transforms();
        let values = pipeline.sorted_values();
        let mut seen = vec![false; values.len()];
        for (i, &v) in values.iter().enumerate() {
            assert_eq!(pipeline.sorted_transforms()[i], unsorted[v as usize]);
            assert!(!seen[v as usize]);
            seen[v as usize] = true;
        }
    }

    #[test]
    fn empty_store_is_a_no_op_frame() {
        let ctx = ComputeContext::new(Some(1)).unwrap();
        let store = GaussianStore::default();
        let mut pipeline = FramePipeline::new(FrameConfig::default()).unwrap();
        let stats = pipeline.run(&ctx, &store, &frame_params(&camera())).unwrap();
        assert_eq!(stats.visible, 0);
        assert_eq!(stats.indirect, DrawIndexedIndirect::quads(0));
        assert!(pipeline.sorted_transforms().is_empty());
    }

    #[test]
    fn rebinding_a_smaller_store_resets_counts() {
        let ctx = ComputeContext::new(Some(2)).unwrap();
        let camera = camera();
        let mut pipeline = FramePipeline::new(FrameConfig::default()).unwrap();
        pipeline.run(&ctx, &cloud(1000), &frame_params(&camera)).unwrap();
        let stats = pipeline.run(&ctx, &cloud(10), &frame_params(&camera)).unwrap();
        assert!(stats.visible <= 10);
        assert_eq!(pipeline.buffers().capacity(), 10);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = FrameConfig {
            sigma_extent: f32::NAN,
            ..FrameConfig::default()
        };
        assert!(FramePipeline::new(config).is_err());
    }
}
