//! Texture generation on wgpu.
//!
//! Realises the immediate-mode backend on a real GPU: staging uploads through
//! the queue and storage-texture compute kernels for the GPU path.

pub mod context;
pub mod immediate;
pub mod layouts;
pub mod pipelines;
pub mod textures;

pub use context::{GpuContext, GpuError};
pub use immediate::WgpuImmediateDevice;
pub use pipelines::GeneratePipeline;
pub use textures::{create_input_texture, ReadbackBuffer};
