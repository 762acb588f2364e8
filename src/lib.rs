//! Textured triangle meshes to depth-sorted 3D Gaussian splats.
//!
//! [`convert`] turns meshes into an immutable [`GaussianStore`]; the
//! [`render`] pipeline then culls, depth-sorts and compacts that store into
//! billboard transforms plus an indirect draw command every frame.

pub mod camera;
pub mod compute;
pub mod convert;
pub mod demo;
pub mod error;
pub mod math;
pub mod mesh;
pub mod ply;
pub mod render;
pub mod splat;

pub use compute::ComputeContext;
pub use convert::{convert_meshes, ConversionConfig, ConversionReport, GaussianStore};
pub use error::{MeshSplatError, Result};
pub use mesh::{Material, Mesh, Texture, Triangle};
pub use ply::{read_ply, write_ply, PlyFormat};
pub use render::{BlendMode, FrameConfig, FrameParams, FramePipeline, FrameStats, QuadTransform};
pub use splat::Gaussian;
