//! Per-frame visibility pipeline: prepass, depth sort, gather.

pub mod buffers;
pub mod gather;
#[cfg(feature = "metal")]
pub mod metal;
pub mod pipeline;
pub mod prepass;
pub mod sort;

use nalgebra::Matrix4;

use crate::error::{MeshSplatError, Result};
use crate::splat::MIN_SPLAT_RADIUS;

pub use buffers::FrameBuffers;
pub use pipeline::{FrameContext, FramePass, FramePipeline, FRAME_PASSES};

/// Compositing equation used by the downstream rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Premultiplied "over", drawn back to front.
    #[default]
    Over,
    /// Front-to-back "under" accumulation.
    Under,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOrder {
    BackToFront,
    FrontToBack,
}

impl BlendMode {
    pub fn draw_order(self) -> DrawOrder {
        match self {
            Self::Over => DrawOrder::BackToFront,
            Self::Under => DrawOrder::FrontToBack,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Over => "over",
            Self::Under => "under",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameConfig {
    /// Multiplier on every Gaussian's standard deviations ("render scale").
    pub std_dev_scale: f32,
    /// Quad half-extent in standard deviations.
    pub sigma_extent: f32,
    pub blend: BlendMode,
    pub frustum_cull: bool,
    pub depth_test: bool,
    /// Added to the mesh depth before comparing, in window depth units.
    pub depth_bias: f32,
    /// Footprints whose minor standard deviation is below this (pixels) are culled.
    pub min_radius_px: f32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            std_dev_scale: 1.0,
            sigma_extent: 3.0,
            blend: BlendMode::Over,
            frustum_cull: true,
            depth_test: false,
            depth_bias: 1e-4,
            min_radius_px: MIN_SPLAT_RADIUS,
        }
    }
}

impl FrameConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f32| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(MeshSplatError::InvalidConfig(format!(
                    "{name} must be positive, got {v}"
                )))
            }
        };
        positive("render scale", self.std_dev_scale)?;
        positive("sigma extent", self.sigma_extent)?;
        if !self.depth_bias.is_finite() {
            return Err(MeshSplatError::InvalidConfig(
                "depth bias must be finite".to_string(),
            ));
        }
        if !self.min_radius_px.is_finite() || self.min_radius_px < 0.0 {
            return Err(MeshSplatError::InvalidConfig(format!(
                "min radius must be non-negative, got {}",
                self.min_radius_px
            )));
        }
        Ok(())
    }
}

/// Opaque-mesh depth in window coordinates (`0` near, `1` far), row 0 at the top.
#[derive(Debug, Clone)]
pub struct DepthImage {
    width: u32,
    height: u32,
    depth: Vec<f32>,
}

impl DepthImage {
    pub fn new(width: u32, height: u32, depth: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 || depth.len() != width as usize * height as usize {
            return Err(MeshSplatError::InvalidConfig(format!(
                "depth image {width}x{height} does not match {} samples",
                depth.len()
            )));
        }
        Ok(Self {
            width,
            height,
            depth,
        })
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Result<Self> {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.depth
    }

    /// Depth under an NDC position, or `None` when it falls outside the image.
    pub fn sample_ndc(&self, ndc_x: f32, ndc_y: f32) -> Option<f32> {
        let x = (ndc_x * 0.5 + 0.5) * self.width as f32;
        let y = (0.5 - ndc_y * 0.5) * self.height as f32;
        if !(x >= 0.0 && y >= 0.0 && x < self.width as f32 && y < self.height as f32) {
            return None;
        }
        Some(self.depth[y as usize * self.width as usize + x as usize])
    }
}

/// Camera inputs for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameParams<'a> {
    /// Model-view matrix (OpenGL convention, camera looks down `-z`).
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    /// Viewport size in pixels.
    pub viewport: [u32; 2],
    pub depth: Option<&'a DepthImage>,
}

/// Billboard placement for one visible Gaussian.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuadTransform {
    /// NDC center `xyz` and opacity in `w`.
    pub center: [f32; 4],
    /// Major axis `xy`, minor axis `zw`, in NDC and already scaled to the quad extent.
    pub axes: [f32; 4],
    pub source_index: u32,
}

const _: [(); 36] = [(); std::mem::size_of::<QuadTransform>()];

/// Indexed indirect-draw arguments, laid out as the GPU reads them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

pub const QUAD_INDEX_COUNT: u32 = 6;

impl DrawIndexedIndirect {
    pub fn quads(instance_count: u32) -> Self {
        Self {
            index_count: QUAD_INDEX_COUNT,
            instance_count,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        }
    }
}

impl Default for DrawIndexedIndirect {
    fn default() -> Self {
        Self::quads(0)
    }
}

const _: [(); 20] = [(); std::mem::size_of::<DrawIndexedIndirect>()];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub submitted: usize,
    pub visible: usize,
    pub indirect: DrawIndexedIndirect,
}
