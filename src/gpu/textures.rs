//! Runtime-side textures and readback.

use crate::texture::TextureSpec;
use wgpu::{Device, Texture, TextureUsages};

/// Create a texture that generated content can be written into.
///
/// Storage usage is only requested when the format guarantees it.
pub fn create_input_texture(device: &Device, label: &str, spec: &TextureSpec) -> Texture {
    let format = spec.format.wgpu();
    let mut usage = TextureUsages::COPY_DST | TextureUsages::COPY_SRC | TextureUsages::TEXTURE_BINDING;
    if supports_storage(device, format) {
        usage |= TextureUsages::STORAGE_BINDING;
    }
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: spec.width,
            height: spec.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    })
}

/// Whether `format` can be written as a storage texture on `device`.
pub fn supports_storage(device: &Device, format: wgpu::TextureFormat) -> bool {
    format
        .guaranteed_format_features(device.features())
        .allowed_usages
        .contains(TextureUsages::STORAGE_BINDING)
}

/// Readback buffer for copying GPU texture data to CPU.
pub struct ReadbackBuffer {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_row_bytes: u32,
    unpadded_row_bytes: u32,
}

impl ReadbackBuffer {
    /// Create a readback buffer for a texture of the given size and texel size.
    pub fn new(device: &Device, width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        let unpadded_row_bytes = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = unpadded_row_bytes.div_ceil(align) * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_buffer"),
            size: (padded_row_bytes * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            buffer,
            width,
            height,
            padded_row_bytes,
            unpadded_row_bytes,
        }
    }

    /// Get the padded bytes per row (for texture copy).
    pub fn padded_row_bytes(&self) -> u32 {
        self.padded_row_bytes
    }

    /// Record a copy of `texture` into this buffer.
    pub fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, texture: &Texture) {
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row_bytes),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Read pixels from the mapped buffer, removing row padding.
    pub fn read_pixels(&self, device: &wgpu::Device) -> Result<Vec<u8>, super::GpuError> {
        let buffer_slice = self.buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| super::GpuError::Poll(e.to_string()))?;
        receiver
            .recv()
            .map_err(|e| super::GpuError::Map(e.to_string()))?
            .map_err(|e| super::GpuError::Map(e.to_string()))?;

        let mut pixels = Vec::with_capacity((self.unpadded_row_bytes * self.height) as usize);
        {
            let data = buffer_slice.get_mapped_range();
            for row in 0..self.height {
                let start = (row * self.padded_row_bytes) as usize;
                let end = start + self.unpadded_row_bytes as usize;
                pixels.extend_from_slice(&data[start..end]);
            }
        }
        self.buffer.unmap();
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuContext;
    use crate::texture::PixelFormat;

    #[tokio::test]
    async fn test_input_texture_creation() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let spec = TextureSpec::new(PixelFormat::Rgba8Unorm, 256, 256);
        let texture = create_input_texture(&ctx.device, "test", &spec);
        assert!(texture.usage().contains(TextureUsages::COPY_DST));
        assert!(texture.usage().contains(TextureUsages::STORAGE_BINDING));
    }

    #[tokio::test]
    async fn test_srgb_input_texture_has_no_storage() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let spec = TextureSpec::new(PixelFormat::Rgba8Srgb, 64, 64);
        let texture = create_input_texture(&ctx.device, "test", &spec);
        assert!(!texture.usage().contains(TextureUsages::STORAGE_BINDING));
    }

    #[tokio::test]
    async fn test_readback_buffer_creation() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let buffer = ReadbackBuffer::new(&ctx.device, 100, 10, 1);
        assert_eq!(buffer.padded_row_bytes(), 256);
    }
}
