//! Immediate-mode generation device on wgpu.
//!
//! Resources are tracked by handle in a registry so the adapter layer stays
//! backend-neutral. Staging textures live in host memory with rows padded to
//! the copy alignment and reach the GPU through `Queue::write_texture`.

use super::pipelines::GeneratePipeline;
use super::textures::supports_storage;
use crate::backend::immediate::{
    ComputeShader, ConstantBuffer, ImmediateDevice, ImmediateResource, StagingTexture,
    UnorderedAccessView,
};
use crate::backend::{DeviceError, NativeTexture};
use crate::texture::{DxgiFormat, GenerateKernel};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use wgpu::{Device, Queue, Texture, TextureUsages};

struct Staging {
    format: DxgiFormat,
    width: u32,
    height: u32,
    row_pitch: u32,
    data: Vec<u8>,
}

struct View {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    textures: HashMap<u64, Arc<Texture>>,
    staging: HashMap<u64, Staging>,
    shaders: HashMap<u64, Arc<GeneratePipeline>>,
    views: HashMap<u64, View>,
    constants: HashMap<u64, wgpu::Buffer>,
}

impl Registry {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// [`ImmediateDevice`] backed by a wgpu device and queue.
pub struct WgpuImmediateDevice {
    device: Arc<Device>,
    queue: Arc<Queue>,
    registry: Mutex<Registry>,
}

impl WgpuImmediateDevice {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        Self {
            device,
            queue,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Make `texture` addressable through a [`NativeTexture`] handle.
    pub fn register_texture(&self, texture: Arc<Texture>) -> NativeTexture {
        let mut registry = self.registry();
        let id = registry.next();
        registry.textures.insert(id, texture);
        NativeTexture(id)
    }

    pub fn texture(&self, handle: NativeTexture) -> Option<Arc<Texture>> {
        self.registry().textures.get(&handle.0).cloned()
    }

    pub fn unregister_texture(&self, handle: NativeTexture) {
        self.registry().textures.remove(&handle.0);
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup_texture(&self, handle: NativeTexture) -> Result<Arc<Texture>, DeviceError> {
        self.texture(handle).ok_or(DeviceError::InvalidHandle {
            kind: "texture",
            id: handle.0,
        })
    }
}

impl ImmediateDevice for WgpuImmediateDevice {
    fn create_staging_texture(
        &self,
        format: DxgiFormat,
        width: u32,
        height: u32,
    ) -> Result<StagingTexture, DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::call("CreateTexture2D", "empty staging texture"));
        }
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let row_pitch = (width * format.bytes_per_pixel() as u32).div_ceil(align) * align;
        let staging = Staging {
            format,
            width,
            height,
            row_pitch,
            data: vec![0u8; (row_pitch * height) as usize],
        };
        let mut registry = self.registry();
        let id = registry.next();
        registry.staging.insert(id, staging);
        Ok(StagingTexture(id))
    }

    fn write_staging(
        &self,
        staging: StagingTexture,
        write: &mut dyn FnMut(&mut [u8], usize),
    ) -> Result<(), DeviceError> {
        let mut registry = self.registry();
        let entry = registry
            .staging
            .get_mut(&staging.0)
            .ok_or(DeviceError::InvalidHandle {
                kind: "staging texture",
                id: staging.0,
            })?;
        let row_pitch = entry.row_pitch as usize;
        write(&mut entry.data, row_pitch);
        Ok(())
    }

    fn copy_resource(&self, dst: NativeTexture, src: StagingTexture) -> Result<(), DeviceError> {
        let texture = self.lookup_texture(dst)?;
        let registry = self.registry();
        let staging = registry.staging.get(&src.0).ok_or(DeviceError::InvalidHandle {
            kind: "staging texture",
            id: src.0,
        })?;

        if !texture.usage().contains(TextureUsages::COPY_DST) {
            return Err(DeviceError::call("CopyResource", "destination lacks COPY_DST"));
        }
        if texture.format() != staging.format.wgpu()
            || texture.width() != staging.width
            || texture.height() != staging.height
        {
            return Err(DeviceError::call(
                "CopyResource",
                format!(
                    "staging {:?} {}x{} does not match destination {:?} {}x{}",
                    staging.format,
                    staging.width,
                    staging.height,
                    texture.format(),
                    texture.width(),
                    texture.height()
                ),
            ));
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &staging.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(staging.row_pitch),
                rows_per_image: Some(staging.height),
            },
            wgpu::Extent3d {
                width: staging.width,
                height: staging.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn create_compute_shader(
        &self,
        kernel: &GenerateKernel,
        uav_format: DxgiFormat,
    ) -> Result<ComputeShader, DeviceError> {
        let format = uav_format.wgpu();
        if !supports_storage(&self.device, format) {
            return Err(DeviceError::Unsupported(format!(
                "{:?} is not a storage format on this device",
                format
            )));
        }
        let pipeline = GeneratePipeline::new(&self.device, kernel, format).ok_or_else(|| {
            DeviceError::Unsupported(format!("no generation kernel for {:?}", format))
        })?;

        let mut registry = self.registry();
        let id = registry.next();
        registry.shaders.insert(id, Arc::new(pipeline));
        Ok(ComputeShader(id))
    }

    fn create_unordered_access_view(
        &self,
        texture: NativeTexture,
        format: DxgiFormat,
    ) -> Result<UnorderedAccessView, DeviceError> {
        let texture = self.lookup_texture(texture)?;
        let format = format.wgpu();
        if !texture.usage().contains(TextureUsages::STORAGE_BINDING) {
            return Err(DeviceError::call(
                "CreateUnorderedAccessView",
                "texture lacks STORAGE_BINDING",
            ));
        }
        if texture.format() != format {
            return Err(DeviceError::Unsupported(format!(
                "{:?} texture cannot be viewed as {:?}",
                texture.format(),
                format
            )));
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("generate_target_view"),
            format: Some(format),
            ..Default::default()
        });

        let mut registry = self.registry();
        let id = registry.next();
        registry.views.insert(id, View { view, format });
        Ok(UnorderedAccessView(id))
    }

    fn create_constant_buffer(&self, data: &[u8]) -> Result<ConstantBuffer, DeviceError> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("generate_seed_buffer"),
            size: data.len() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, data);

        let mut registry = self.registry();
        let id = registry.next();
        registry.constants.insert(id, buffer);
        Ok(ConstantBuffer(id))
    }

    fn dispatch(
        &self,
        shader: ComputeShader,
        target: UnorderedAccessView,
        constants: Option<ConstantBuffer>,
        groups: [u32; 3],
    ) -> Result<(), DeviceError> {
        let registry = self.registry();
        let pipeline = registry.shaders.get(&shader.0).ok_or(DeviceError::InvalidHandle {
            kind: "compute shader",
            id: shader.0,
        })?;
        let view = registry.views.get(&target.0).ok_or(DeviceError::InvalidHandle {
            kind: "unordered access view",
            id: target.0,
        })?;
        if view.format != pipeline.format {
            return Err(DeviceError::call(
                "Dispatch",
                format!("view {:?} does not match kernel {:?}", view.format, pipeline.format),
            ));
        }

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::TextureView(&view.view),
        }];
        match (pipeline.uses_seed, constants) {
            (true, Some(constants)) => {
                let buffer = registry.constants.get(&constants.0).ok_or(
                    DeviceError::InvalidHandle {
                        kind: "constant buffer",
                        id: constants.0,
                    },
                )?;
                entries.push(wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffer.as_entire_binding(),
                });
            }
            (false, None) => {}
            (true, None) => return Err(DeviceError::call("Dispatch", "noise kernel needs a seed")),
            (false, Some(_)) => {
                return Err(DeviceError::call("Dispatch", "kernel takes no constants"))
            }
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("generate_bind_group"),
            layout: &pipeline.layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("generate_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("generate_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn release(&self, resource: ImmediateResource) {
        let mut registry = self.registry();
        match resource {
            ImmediateResource::Staging(h) => {
                registry.staging.remove(&h.0);
            }
            ImmediateResource::Shader(h) => {
                registry.shaders.remove(&h.0);
            }
            ImmediateResource::View(h) => {
                registry.views.remove(&h.0);
            }
            ImmediateResource::Constants(h) => {
                registry.constants.remove(&h.0);
            }
        }
    }
}
