//! Post-process orchestration.
//!
//! [`PostProcess`] loads the effect shader into the runtime, owns the texture
//! adapter that feeds the shader's input slot, and submits per-frame
//! constants. Its state is one of:
//!
//! - `Inactive`: no shader loaded
//! - `LoadedDisabled`: shader loaded, not composited
//! - `LoadedEnabled`: shader loaded and composited into the feed

pub mod config;
pub mod constants;
pub mod runtime;
pub mod shaders;

pub use config::{AnimationParams, BlurParams, ColorGrade, EffectConfig, NoiseParams, PipelineKey};
pub use constants::PostProcessConstants;
pub use runtime::{PostProcessApi, RuntimeError};
pub use shaders::{ShaderBlob, ShaderError, ShaderLibrary, ShaderParams, ShaderSource};

use crate::backend::{
    AdapterError, Backend, BackendDevice, FencedDevice, ImmediateDevice, NativeTexture, Readiness,
    TextureAdapter, UnifiedDevice, UpdateOutcome,
};
use crate::texture::{PixelFormat, TextureSpec};
use std::sync::Arc;

/// Input slot fed by the generated texture.
pub const INPUT_SLOT: u32 = 0;

/// Errors from loading and driving the effect.
#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error("Shader error: {0}")]
    Shader(#[from] ShaderError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Texture adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("No {0} device available")]
    BackendUnavailable(Backend),
    #[error("{format:?} input textures are not supported on the {backend} backend")]
    UnsupportedFormat { backend: Backend, format: PixelFormat },
}

/// Lifecycle state of the effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcessState {
    Inactive,
    LoadedDisabled,
    LoadedEnabled,
}

/// Devices the effect can generate input textures on.
#[derive(Clone, Default)]
pub struct BackendDevices {
    pub immediate: Option<Arc<dyn ImmediateDevice>>,
    pub unified: Option<Arc<dyn UnifiedDevice>>,
    pub fenced: Option<Arc<dyn FencedDevice>>,
}

impl BackendDevices {
    pub fn device(&self, backend: Backend) -> Option<BackendDevice> {
        match backend {
            Backend::Immediate => self.immediate.clone().map(BackendDevice::Immediate),
            Backend::Unified => self.unified.clone().map(BackendDevice::Unified),
            Backend::Fenced => self.fenced.clone().map(BackendDevice::Fenced),
        }
    }
}

/// A locked input slot, unlocked when dropped.
pub struct SlotLock<'a> {
    api: &'a mut dyn PostProcessApi,
    slot: u32,
    texture: NativeTexture,
}

impl<'a> SlotLock<'a> {
    pub fn acquire(api: &'a mut dyn PostProcessApi, slot: u32) -> Result<Self, RuntimeError> {
        let texture = api.lock_texture(slot)?;
        Ok(Self { api, slot, texture })
    }

    pub fn texture(&self) -> NativeTexture {
        self.texture
    }
}

impl Drop for SlotLock<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.api.unlock_texture(self.slot) {
            log::error!("Unlocking input slot {} failed: {}", self.slot, err);
        }
    }
}

struct LoadedEffect {
    key: PipelineKey,
    params: ShaderParams,
}

/// Orchestrates the effect shader and its generated input texture.
pub struct PostProcess {
    api: Box<dyn PostProcessApi>,
    devices: BackendDevices,
    shaders: ShaderLibrary,
    loaded: Option<LoadedEffect>,
    enabled: bool,
    adapter: Option<TextureAdapter>,
}

impl PostProcess {
    pub fn new(api: Box<dyn PostProcessApi>, devices: BackendDevices, shaders: ShaderLibrary) -> Self {
        Self {
            api,
            devices,
            shaders,
            loaded: None,
            enabled: false,
            adapter: None,
        }
    }

    pub fn state(&self) -> PostProcessState {
        match (&self.loaded, self.enabled) {
            (None, _) => PostProcessState::Inactive,
            (Some(_), false) => PostProcessState::LoadedDisabled,
            (Some(_), true) => PostProcessState::LoadedEnabled,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Key of the loaded effect, if any.
    pub fn loaded_key(&self) -> Option<PipelineKey> {
        self.loaded.as_ref().map(|loaded| loaded.key)
    }

    pub fn shader_params(&self) -> Option<&ShaderParams> {
        self.loaded.as_ref().map(|loaded| &loaded.params)
    }

    /// Readiness of the texture adapter, if one is active.
    pub fn adapter_readiness(&self) -> Option<Readiness> {
        self.adapter.as_ref().map(TextureAdapter::readiness)
    }

    /// Load the effect described by `key`, replacing any loaded effect.
    ///
    /// `ShaderSource::None` leaves the effect inactive. On failure everything
    /// loaded so far is torn down. A pending enable request survives the reload.
    pub fn load(&mut self, key: PipelineKey) -> Result<(), PostProcessError> {
        self.teardown();
        if key.shader_source == ShaderSource::None {
            log::info!("No effect shader selected");
            return Ok(());
        }

        let result = self.try_load(key);
        if let Err(err) = &result {
            log::error!("Loading effect failed: {}", err);
            self.teardown();
        }
        result
    }

    fn try_load(&mut self, key: PipelineKey) -> Result<(), PostProcessError> {
        let device = self
            .devices
            .device(key.backend)
            .ok_or(PostProcessError::BackendUnavailable(key.backend))?;
        let blob = self
            .shaders
            .load(key.shader_source)?
            .ok_or(ShaderError::NotFound(key.shader_source))?;
        let params = ShaderParams::with_input_format(key.texture_format);

        self.api.load_shader(key.backend, &blob, &params)?;
        let input = params.textures.first().copied();
        self.loaded = Some(LoadedEffect { key, params });
        log::info!(
            "Effect shader {} loaded on {} backend",
            key.shader_source.file_name(),
            key.backend
        );

        if let Some(spec) = input {
            self.activate_generation(key, spec, device)?;
        }
        if self.enabled {
            self.api.set_enabled(true)?;
        }
        Ok(())
    }

    fn activate_generation(
        &mut self,
        key: PipelineKey,
        spec: TextureSpec,
        device: BackendDevice,
    ) -> Result<(), PostProcessError> {
        if !self.api.supports_texture_format(key.backend, spec.format) {
            return Err(PostProcessError::UnsupportedFormat {
                backend: key.backend,
                format: spec.format,
            });
        }

        let lock = SlotLock::acquire(self.api.as_mut(), INPUT_SLOT)?;
        let mut adapter = TextureAdapter::new(key.pattern, spec, device)?;
        // Exercise both paths once so broken ones degrade before the first frame.
        for use_gpu in [false, true] {
            if let Err(err) = adapter.update(lock.texture(), use_gpu) {
                log::warn!("Initial texture update (use_gpu={}) failed: {}", use_gpu, err);
            }
        }
        drop(lock);

        self.adapter = Some(adapter);
        self.api.apply_input_buffers(&[], &[INPUT_SLOT])?;
        Ok(())
    }

    /// Toggle compositing of the effect. Forwarded to the runtime once loaded.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), PostProcessError> {
        self.enabled = enabled;
        if self.loaded.is_some() {
            self.api.set_enabled(enabled)?;
        }
        log::info!("Effect {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Regenerate the input texture.
    ///
    /// Returns `None` when no adapter is active. The slot is always unlocked
    /// again, including when generation fails.
    pub fn update_texture(&mut self, use_gpu: bool) -> Result<Option<UpdateOutcome>, PostProcessError> {
        let Some(adapter) = self.adapter.as_mut() else {
            return Ok(None);
        };
        let lock = SlotLock::acquire(self.api.as_mut(), INPUT_SLOT)?;
        let outcome = adapter.update(lock.texture(), use_gpu);
        drop(lock);
        Ok(Some(outcome?))
    }

    /// Submit this frame's constants and the updated input slots.
    pub fn apply_inputs(
        &mut self,
        constants: &[u8],
        updated_slots: &[u32],
    ) -> Result<(), PostProcessError> {
        if self.loaded.is_none() {
            return Err(RuntimeError::NotLoaded.into());
        }
        self.api.apply_input_buffers(constants, updated_slots)?;
        Ok(())
    }

    /// Tear down everything and return to `Inactive`. Safe to call in any state.
    pub fn reset(&mut self) {
        if self.enabled && self.loaded.is_some() {
            if let Err(err) = self.api.set_enabled(false) {
                log::error!("Disabling effect failed: {}", err);
            }
        }
        self.enabled = false;
        if self.loaded.is_some() || self.adapter.is_some() {
            log::info!("Resetting effect");
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.adapter = None;
        if self.loaded.take().is_some() {
            if let Err(err) = self.api.unload_shader() {
                log::error!("Unloading effect shader failed: {}", err);
            }
        }
    }
}

impl Drop for PostProcess {
    fn drop(&mut self) {
        self.reset();
    }
}
