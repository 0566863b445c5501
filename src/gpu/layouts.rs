//! Bind group layout builders for generation pipelines.

use wgpu::{BindGroupLayout, BindGroupLayoutEntry, Device, ShaderStages, TextureFormat};

/// Builder for creating bind group layouts with common patterns.
pub struct BindGroupLayoutBuilder {
    label: Option<&'static str>,
    entries: Vec<BindGroupLayoutEntry>,
}

impl BindGroupLayoutBuilder {
    /// Create a new bind group layout builder.
    pub fn new(label: &'static str) -> Self {
        Self {
            label: Some(label),
            entries: Vec::new(),
        }
    }

    /// Add a uniform buffer entry.
    pub fn uniform(mut self, binding: u32, visibility: ShaderStages) -> Self {
        self.entries.push(BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        self
    }

    /// Add a write-only 2D storage texture entry.
    pub fn storage_texture_2d(
        mut self,
        binding: u32,
        visibility: ShaderStages,
        format: TextureFormat,
    ) -> Self {
        self.entries.push(BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        });
        self
    }

    /// Build the bind group layout.
    pub fn build(self, device: &Device) -> BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: self.label,
            entries: &self.entries,
        })
    }
}

/// Create the generation layout: target storage texture, plus the seed uniform for noise.
pub fn create_generate_layout(device: &Device, format: TextureFormat, with_seed: bool) -> BindGroupLayout {
    let builder = BindGroupLayoutBuilder::new("generate_bind_group_layout").storage_texture_2d(
        0,
        ShaderStages::COMPUTE,
        format,
    );
    let builder = if with_seed {
        builder.uniform(1, ShaderStages::COMPUTE)
    } else {
        builder
    };
    builder.build(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuContext;

    #[tokio::test]
    async fn test_bind_group_layout_builder() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return, // Skip if no GPU
        };

        let layout = BindGroupLayoutBuilder::new("test_layout")
            .storage_texture_2d(0, ShaderStages::COMPUTE, TextureFormat::Rgba8Unorm)
            .uniform(1, ShaderStages::COMPUTE)
            .build(&ctx.device);

        drop(layout);
    }

    #[tokio::test]
    async fn test_generate_layout_creation() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let _noise = create_generate_layout(&ctx.device, TextureFormat::R32Float, true);
        let _gradient = create_generate_layout(&ctx.device, TextureFormat::Rgba8Unorm, false);
    }
}
