//! Adapter for immediate-mode devices.
//!
//! The CPU path writes into a mapped staging texture and copies it into the
//! target on the same context. The GPU path binds the target as an unordered
//! access view and dispatches the generation kernel.

use super::{
    prepared, AdapterError, Backend, DeviceError, GenerationPath, NativeTexture, PathGate,
    Readiness, UpdateOutcome,
};
use crate::texture::kernel::NoiseSeed;
use crate::texture::{generate, random_seed, DxgiFormat, GenerateKernel, PatternType, TextureSpec};
use std::sync::Arc;

/// CPU-writable staging texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StagingTexture(pub u64);

/// Compiled compute shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputeShader(pub u64);

/// Writable view of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnorderedAccessView(pub u64);

/// Small uniform buffer bound to a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantBuffer(pub u64);

/// Any resource created through an [`ImmediateDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImmediateResource {
    Staging(StagingTexture),
    Shader(ComputeShader),
    View(UnorderedAccessView),
    Constants(ConstantBuffer),
}

/// Device operations used by [`ImmediateAdapter`].
///
/// Every call executes in program order on a single context.
pub trait ImmediateDevice: Send + Sync {
    fn create_staging_texture(
        &self,
        format: DxgiFormat,
        width: u32,
        height: u32,
    ) -> Result<StagingTexture, DeviceError>;

    /// Map `staging` for writing, call `write(data, row_pitch)`, then unmap.
    ///
    /// `row_pitch` is chosen by the device and may exceed the packed row size.
    fn write_staging(
        &self,
        staging: StagingTexture,
        write: &mut dyn FnMut(&mut [u8], usize),
    ) -> Result<(), DeviceError>;

    /// Copy the whole staging texture into `dst`.
    fn copy_resource(&self, dst: NativeTexture, src: StagingTexture) -> Result<(), DeviceError>;

    /// Compile the generation kernel for a view of `uav_format`.
    fn create_compute_shader(
        &self,
        kernel: &GenerateKernel,
        uav_format: DxgiFormat,
    ) -> Result<ComputeShader, DeviceError>;

    fn create_unordered_access_view(
        &self,
        texture: NativeTexture,
        format: DxgiFormat,
    ) -> Result<UnorderedAccessView, DeviceError>;

    fn create_constant_buffer(&self, data: &[u8]) -> Result<ConstantBuffer, DeviceError>;

    fn dispatch(
        &self,
        shader: ComputeShader,
        target: UnorderedAccessView,
        constants: Option<ConstantBuffer>,
        groups: [u32; 3],
    ) -> Result<(), DeviceError>;

    fn release(&self, resource: ImmediateResource);
}

/// Texture adapter for an immediate-mode device.
pub struct ImmediateAdapter {
    device: Arc<dyn ImmediateDevice>,
    kernel: GenerateKernel,
    spec: TextureSpec,
    native: DxgiFormat,
    staging: Option<StagingTexture>,
    shader: Option<ComputeShader>,
    gate: PathGate,
}

impl ImmediateAdapter {
    pub fn new(
        pattern: PatternType,
        spec: TextureSpec,
        device: Arc<dyn ImmediateDevice>,
    ) -> Result<Self, AdapterError> {
        let native = spec.format.dxgi();
        let kernel = GenerateKernel::new(pattern);

        let (staging, cpu) = prepared(
            Backend::Immediate,
            GenerationPath::Cpu,
            device.create_staging_texture(native, spec.width, spec.height),
        );
        let (shader, gpu) = prepared(
            Backend::Immediate,
            GenerationPath::Gpu,
            device.create_compute_shader(&kernel, native.uav_compatible()),
        );
        let gate = PathGate::new(Backend::Immediate, cpu, gpu)?;

        Ok(Self {
            device,
            kernel,
            spec,
            native,
            staging,
            shader,
            gate,
        })
    }

    pub fn update(
        &mut self,
        texture: NativeTexture,
        use_gpu: bool,
    ) -> Result<UpdateOutcome, AdapterError> {
        let Some(path) = self.gate.select(texture, use_gpu)? else {
            return Ok(UpdateOutcome::Skipped);
        };
        let result = match path {
            GenerationPath::Gpu => self.generate_on_gpu(texture),
            GenerationPath::Cpu => self.generate_on_cpu(texture),
        };
        self.gate.settle(path, result)
    }

    pub fn readiness(&self) -> Readiness {
        self.gate.readiness()
    }

    fn generate_on_cpu(&mut self, texture: NativeTexture) -> Result<(), DeviceError> {
        let staging = self
            .staging
            .ok_or_else(|| DeviceError::Unsupported("staging texture not created".into()))?;
        let pattern = self.kernel.pattern;
        let spec = self.spec;
        let sample = spec.format.upload_sample_type();

        self.device.write_staging(staging, &mut |data, row_pitch| {
            generate(pattern, &spec, row_pitch, data, sample)
        })?;
        self.device.copy_resource(texture, staging)
    }

    fn generate_on_gpu(&mut self, texture: NativeTexture) -> Result<(), DeviceError> {
        let shader = self
            .shader
            .ok_or_else(|| DeviceError::Unsupported("compute shader not created".into()))?;
        let view = self
            .device
            .create_unordered_access_view(texture, self.native.uav_compatible())?;

        let constants = if self.kernel.uses_seed() {
            let seed = NoiseSeed::new(random_seed());
            match self.device.create_constant_buffer(bytemuck::bytes_of(&seed)) {
                Ok(buffer) => Some(buffer),
                Err(err) => {
                    self.device.release(ImmediateResource::View(view));
                    return Err(err);
                }
            }
        } else {
            None
        };

        let groups = GenerateKernel::workgroups(self.spec.width, self.spec.height);
        let result = self.device.dispatch(shader, view, constants, groups);

        self.device.release(ImmediateResource::View(view));
        if let Some(buffer) = constants {
            self.device.release(ImmediateResource::Constants(buffer));
        }
        result
    }
}

impl Drop for ImmediateAdapter {
    fn drop(&mut self) {
        if let Some(staging) = self.staging.take() {
            self.device.release(ImmediateResource::Staging(staging));
        }
        if let Some(shader) = self.shader.take() {
            self.device.release(ImmediateResource::Shader(shader));
        }
    }
}
