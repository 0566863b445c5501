//! Adapter for unified shader devices.
//!
//! The CPU path uploads a packed buffer with a sub-image update. The GPU path
//! binds the target as a write-only image and dispatches one invocation per
//! texel, followed by a full memory barrier.

use super::{
    prepared, AdapterError, Backend, DeviceError, GenerationPath, NativeTexture, PathGate,
    Readiness, UpdateOutcome,
};
use crate::texture::{generate, gl, random_seed, GenerateKernel, PatternType, TextureSpec};
use std::sync::Arc;

/// Linked compute program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputeProgram(pub u64);

/// Uniform location of the noise seed.
pub const SEED_UNIFORM_LOCATION: i32 = 0;

/// Image unit the target texture is bound to.
pub const TARGET_IMAGE_UNIT: u32 = 0;

/// Device operations used by [`UnifiedAdapter`].
pub trait UnifiedDevice: Send + Sync {
    /// Compile and link the generation kernel writing an image of `image_format`.
    fn create_compute_program(
        &self,
        kernel: &GenerateKernel,
        image_format: u32,
    ) -> Result<ComputeProgram, DeviceError>;

    fn delete_program(&self, program: ComputeProgram);

    /// Replace the whole level-0 image with tightly packed `data`.
    fn tex_sub_image_2d(
        &self,
        texture: NativeTexture,
        width: u32,
        height: u32,
        format: u32,
        data_type: u32,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    fn bind_image_texture(
        &self,
        unit: u32,
        texture: NativeTexture,
        access: u32,
        format: u32,
    ) -> Result<(), DeviceError>;

    fn use_program(&self, program: Option<ComputeProgram>) -> Result<(), DeviceError>;

    fn set_uniform_vec4(&self, location: i32, value: [f32; 4]) -> Result<(), DeviceError>;

    fn dispatch_compute(&self, groups: [u32; 3]) -> Result<(), DeviceError>;

    fn memory_barrier(&self, barriers: u32) -> Result<(), DeviceError>;
}

struct GpuResources {
    program: ComputeProgram,
    image_format: u32,
}

/// Texture adapter for a unified shader device.
pub struct UnifiedAdapter {
    device: Arc<dyn UnifiedDevice>,
    kernel: GenerateKernel,
    spec: TextureSpec,
    upload: Option<Vec<u8>>,
    gpu: Option<GpuResources>,
    gate: PathGate,
}

impl UnifiedAdapter {
    pub fn new(
        pattern: PatternType,
        spec: TextureSpec,
        device: Arc<dyn UnifiedDevice>,
    ) -> Result<Self, AdapterError> {
        let kernel = GenerateKernel::new(pattern);

        let sample = spec.format.upload_sample_type();
        let upload_len = spec.packed_row_bytes(sample) * spec.height as usize;
        let (upload, cpu) = prepared(
            Backend::Unified,
            GenerationPath::Cpu,
            Ok::<_, DeviceError>(vec![0u8; upload_len]),
        );
        let (gpu, gpu_status) = prepared(
            Backend::Unified,
            GenerationPath::Gpu,
            Self::prepare_gpu(device.as_ref(), &kernel, &spec),
        );
        let gate = PathGate::new(Backend::Unified, cpu, gpu_status)?;

        Ok(Self {
            device,
            kernel,
            spec,
            upload,
            gpu,
            gate,
        })
    }

    fn prepare_gpu(
        device: &dyn UnifiedDevice,
        kernel: &GenerateKernel,
        spec: &TextureSpec,
    ) -> Result<GpuResources, DeviceError> {
        let image_format = spec.format.gl_image_binding().ok_or_else(|| {
            DeviceError::Unsupported(format!("{:?} cannot be bound as a writable image", spec.format))
        })?;
        let program = device.create_compute_program(kernel, image_format)?;
        Ok(GpuResources {
            program,
            image_format,
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
        let upload = self
            .upload
            .as_mut()
            .ok_or_else(|| DeviceError::Unsupported("upload buffer not allocated".into()))?;
        let sample = self.spec.format.upload_sample_type();
        let stride = self.spec.packed_row_bytes(sample);
        generate(self.kernel.pattern, &self.spec, stride, upload, sample);

        let native = self.spec.format.gl();
        self.device.tex_sub_image_2d(
            texture,
            self.spec.width,
            self.spec.height,
            native.base,
            native.data_type,
            upload,
        )
    }

    fn generate_on_gpu(&mut self, texture: NativeTexture) -> Result<(), DeviceError> {
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| DeviceError::Unsupported("compute program not linked".into()))?;

        let device = self.device.as_ref();
        device.use_program(Some(gpu.program))?;
        let result = Self::run_program(device, &self.kernel, &self.spec, gpu, texture);
        // Unbind on every path; the first error wins.
        let unbound = device.use_program(None);
        result.and(unbound)
    }

    fn run_program(
        device: &dyn UnifiedDevice,
        kernel: &GenerateKernel,
        spec: &TextureSpec,
        gpu: &GpuResources,
        texture: NativeTexture,
    ) -> Result<(), DeviceError> {
        if kernel.uses_seed() {
            device.set_uniform_vec4(SEED_UNIFORM_LOCATION, random_seed())?;
        }
        device.bind_image_texture(TARGET_IMAGE_UNIT, texture, gl::WRITE_ONLY, gpu.image_format)?;
        device.dispatch_compute([spec.width, spec.height, 1])?;
        device.memory_barrier(gl::ALL_BARRIER_BITS)
    }
}

impl Drop for UnifiedAdapter {
    fn drop(&mut self) {
        if let Some(gpu) = self.gpu.take() {
            self.device.delete_program(gpu.program);
        }
    }
}
