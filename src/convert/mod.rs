//! Mesh to Gaussian conversion.

pub mod sampler;
pub mod solver;
pub mod store;

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::compute::{dispatch_1d, ComputeContext, THREADS_PER_GROUP_1D};
use crate::error::{MeshSplatError, Result};
use crate::mesh::{Material, Mesh, Triangle};

pub use sampler::{rasterize_triangle, SampleParams, TriangleOutcome};
pub use solver::{solve_triangle_frame, SurfaceFrame, ThinAxis, MIN_THIN_SCALE};
pub use store::{ArenaWriter, GaussianArena, GaussianStore};

pub const MAX_RESOLUTION: u32 = 16_384;
/// Hard ceiling on primitives; sort values are `u32` indices.
pub const MAX_GAUSSIANS_CEILING: usize = u32::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionConfig {
    /// Side of the square UV raster. One Gaussian per covered pixel.
    pub resolution: u32,
    /// Isotropic footprint in texels.
    pub sigma_texels: f32,
    pub thin_axis: ThinAxis,
    pub max_gaussians: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            resolution: 512,
            sigma_texels: 1.0,
            thin_axis: ThinAxis::default(),
            max_gaussians: 1 << 24,
        }
    }
}

impl ConversionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.resolution == 0 || self.resolution > MAX_RESOLUTION {
            return Err(MeshSplatError::InvalidConfig(format!(
                "resolution must be in 1..={MAX_RESOLUTION}, got {}",
                self.resolution
            )));
        }
        if !self.sigma_texels.is_finite() || self.sigma_texels <= 0.0 {
            return Err(MeshSplatError::InvalidConfig(format!(
                "sigma must be a positive number of texels, got {}",
                self.sigma_texels
            )));
        }
        let thin = match self.thin_axis {
            ThinAxis::Epsilon(v) | ThinAxis::FractionOfMinor(v) => v,
        };
        if !thin.is_finite() || thin <= 0.0 {
            return Err(MeshSplatError::InvalidConfig(format!(
                "thin axis must be positive, got {thin}"
            )));
        }
        if self.max_gaussians == 0 {
            return Err(MeshSplatError::InvalidConfig(
                "max_gaussians must be at least 1".to_string(),
            ));
        }
        if self.max_gaussians > MAX_GAUSSIANS_CEILING {
            return Err(MeshSplatError::CapacityExceeded {
                requested: self.max_gaussians,
                ceiling: MAX_GAUSSIANS_CEILING,
            });
        }
        Ok(())
    }

    pub fn sigma_uv(&self) -> f32 {
        self.sigma_texels / self.resolution as f32
    }

    pub fn sample_params(&self) -> SampleParams {
        SampleParams {
            resolution: self.resolution,
            sigma_uv: self.sigma_uv(),
            thin_axis: self.thin_axis,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub triangles: usize,
    pub skipped_degenerate: usize,
    pub emitted: usize,
    pub dropped_over_capacity: usize,
    pub capacity: usize,
}

/// Worst-case Gaussian count: every pixel of every clamped UV bounding box.
pub fn worst_case_capacity(meshes: &[Mesh], resolution: u32) -> usize {
    meshes
        .iter()
        .flat_map(|m| m.triangles.iter())
        .filter_map(|t| sampler::uv_pixel_bounds(&t.uvs, resolution))
        .map(|r| r.pixel_count())
        .fold(0usize, usize::saturating_add)
}

/// Converts every mesh into one shared store.
///
/// Triangles are processed in parallel; append order in the store is
/// unspecified. Returns once every sample is written (the store is sealed).
pub fn convert_meshes(
    ctx: &ComputeContext,
    meshes: &[Mesh],
    config: &ConversionConfig,
) -> Result<(GaussianStore, ConversionReport)> {
    config.validate()?;

    let worst_case = worst_case_capacity(meshes, config.resolution);
    let capacity = worst_case.min(config.max_gaussians);
    if worst_case > capacity {
        log::warn!(
            "worst-case {worst_case} gaussians exceeds max_gaussians {}; output will be clipped",
            config.max_gaussians
        );
    }

    let work: Vec<(&Triangle, &Material)> = meshes
        .iter()
        .flat_map(|m| m.triangles.iter().map(move |t| (t, &m.material)))
        .collect();
    log::debug!(
        "converting {} triangles from {} meshes into capacity {capacity}",
        work.len(),
        meshes.len()
    );

    let params = config.sample_params();
    let skipped = AtomicUsize::new(0);
    let mut arena = GaussianArena::with_capacity(capacity);
    {
        let writer = arena.writer();
        ctx.install(|| {
            dispatch_1d(work.len(), THREADS_PER_GROUP_1D, |_, range| {
                for &(tri, material) in &work[range] {
                    let outcome = rasterize_triangle(tri, material, &params, |g| {
                        writer.append(g);
                    });
                    if outcome == TriangleOutcome::Degenerate {
                        skipped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        });
    }
    let store = arena.seal();

    let report = ConversionReport {
        triangles: work.len(),
        skipped_degenerate: skipped.into_inner(),
        emitted: store.len(),
        dropped_over_capacity: store.dropped(),
        capacity,
    };
    if report.skipped_degenerate > 0 {
        log::warn!(
            "skipped {} degenerate triangles",
            report.skipped_degenerate
        );
    }
    log::info!(
        "converted {} triangles into {} gaussians (capacity {}, dropped {})",
        report.triangles,
        report.emitted,
        report.capacity,
        report.dropped_over_capacity
    );
    Ok((store, report))
}
