//! Passthrough FX Core
//!
//! Procedural input textures and effect orchestration for video see-through
//! post-processing.
//!
//! # Features
//!
//! - Noise and gradient pattern generation on the CPU and as compute kernels
//! - Texture adapters for immediate, unified and fenced graphics backends
//! - Effect shader orchestration with animated constant blocks
//! - An application state machine that reconciles desired state with the runtime
//! - A wgpu realisation of the immediate backend (Vulkan, Metal, DX12)
//! - A headless runtime with software devices for tests and demos

pub mod app;
pub mod backend;
pub mod gpu;
pub mod headless;
pub mod postprocess;
pub mod texture;

// Re-export commonly used types
pub use app::{AppError, AppLogic, AppState, GeneralState, Preset, PresetBook, Reconciled, Session};
pub use backend::{
    AdapterError, Backend, BackendDevice, DeviceError, GenerationPath, NativeTexture, PathStatus,
    Readiness, TextureAdapter, UpdateOutcome,
};
pub use gpu::{GpuContext, GpuError, WgpuImmediateDevice};
pub use postprocess::{
    BackendDevices, EffectConfig, PipelineKey, PostProcess, PostProcessApi, PostProcessConstants,
    PostProcessError, PostProcessState, RuntimeError, ShaderLibrary, ShaderSource,
};
pub use texture::{generate, GeneratedPattern, PatternType, PixelFormat, SampleType, TextureSpec};
