//! Compute pipelines for pattern generation.

use super::layouts::create_generate_layout;
use crate::texture::{GenerateKernel, PatternType};
use wgpu::{BindGroupLayout, ComputePipeline, Device, TextureFormat};

const NOISE_SHADER: &str = include_str!("shaders/generate_noise.wgsl");
const GRADIENT_SHADER: &str = include_str!("shaders/generate_gradient.wgsl");

/// WGSL storage format name and store expression for `format`.
///
/// Unsigned targets receive the float bits of the red channel.
fn storage_target(format: TextureFormat) -> Option<(&'static str, &'static str)> {
    match format {
        TextureFormat::Rgba8Unorm => Some(("rgba8unorm", "value")),
        TextureFormat::R8Unorm => Some(("r8unorm", "value")),
        TextureFormat::R32Float => Some(("r32float", "value")),
        TextureFormat::R32Uint => Some((
            "r32uint",
            "vec4<u32>(bitcast<u32>(value.x), 0u, 0u, 0u)",
        )),
        _ => None,
    }
}

/// WGSL source of `kernel` for a storage texture of `format`.
pub fn kernel_source(kernel: &GenerateKernel, format: TextureFormat) -> Option<String> {
    let (name, store) = storage_target(format)?;
    let template = match kernel.pattern {
        PatternType::Noise => NOISE_SHADER,
        PatternType::Gradient => GRADIENT_SHADER,
    };
    Some(
        template
            .replace("{{STORAGE_FORMAT}}", name)
            .replace("{{STORE_VALUE}}", store),
    )
}

/// A compiled generation kernel and its bind group layout.
pub struct GeneratePipeline {
    pub pipeline: ComputePipeline,
    pub layout: BindGroupLayout,
    pub format: TextureFormat,
    pub uses_seed: bool,
}

impl GeneratePipeline {
    /// Returns `None` when `format` has no storage representation.
    pub fn new(device: &Device, kernel: &GenerateKernel, format: TextureFormat) -> Option<Self> {
        let source = kernel_source(kernel, format)?;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("generate_shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let uses_seed = kernel.uses_seed();
        let layout = create_generate_layout(device, format, uses_seed);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("generate_pipeline_layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("generate_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Some(Self {
            pipeline,
            layout,
            format,
            uses_seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuContext;

    #[test]
    fn test_kernel_source_substitution() {
        let kernel = GenerateKernel::new(PatternType::Noise);
        let source = kernel_source(&kernel, TextureFormat::R32Uint).unwrap();
        assert!(source.contains("texture_storage_2d<r32uint, write>"));
        assert!(source.contains("bitcast<u32>(value.x)"));
        assert!(!source.contains("{{"));
    }

    #[test]
    fn test_srgb_has_no_storage_source() {
        let kernel = GenerateKernel::new(PatternType::Gradient);
        assert!(kernel_source(&kernel, TextureFormat::Rgba8UnormSrgb).is_none());
    }

    #[tokio::test]
    async fn test_pipeline_creation() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        for pattern in [PatternType::Noise, PatternType::Gradient] {
            let kernel = GenerateKernel::new(pattern);
            let pipeline = GeneratePipeline::new(&ctx.device, &kernel, TextureFormat::Rgba8Unorm)
                .expect("rgba8unorm is a storage format");
            assert_eq!(pipeline.uses_seed, pattern == PatternType::Noise);
        }
    }
}
