//! Post-process interface of the mixed-reality runtime.

use super::shaders::{ShaderBlob, ShaderParams};
use crate::backend::{Backend, NativeTexture};
use crate::texture::PixelFormat;

/// Errors reported by runtime calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("{call} failed with code {code}: {message}")]
    Call {
        call: &'static str,
        code: i64,
        message: String,
    },
    #[error("No effect shader loaded")]
    NotLoaded,
    #[error("Input texture slot {0} out of range")]
    InvalidSlot(u32),
    #[error("Input texture slot {0} already locked")]
    AlreadyLocked(u32),
    #[error("Input texture slot {0} is not locked")]
    NotLocked(u32),
}

/// Video post-processing calls offered by the runtime.
///
/// Every call reports failure through its result; a failure aborts the
/// current operation but leaves the runtime usable.
pub trait PostProcessApi {
    /// Load the effect shader for `backend`, allocating its input textures.
    fn load_shader(
        &mut self,
        backend: Backend,
        shader: &ShaderBlob,
        params: &ShaderParams,
    ) -> Result<(), RuntimeError>;

    fn unload_shader(&mut self) -> Result<(), RuntimeError>;

    /// Whether the effect is composited into the video feed.
    fn set_enabled(&mut self, enabled: bool) -> Result<(), RuntimeError>;

    fn supports_texture_format(&self, backend: Backend, format: PixelFormat) -> bool;

    /// Lock an input slot for writing and return its native texture.
    fn lock_texture(&mut self, slot: u32) -> Result<NativeTexture, RuntimeError>;

    fn unlock_texture(&mut self, slot: u32) -> Result<(), RuntimeError>;

    /// Submit the constant block and the slots written since the last call.
    fn apply_input_buffers(
        &mut self,
        constants: &[u8],
        updated_slots: &[u32],
    ) -> Result<(), RuntimeError>;
}
