//! Texture formats and procedural pattern generation.

pub mod format;
pub mod kernel;
pub mod pattern;

pub use format::{gl, DxgiFormat, FormatInfo, GlFormat, PixelFormat, SampleType, TextureSpec};
pub use kernel::{GenerateKernel, NoiseSeed};
pub use pattern::{
    generate, generate_gradient, generate_with_rng, random_seed, GeneratedPattern, PatternType, Sample,
};
