//! Integration tests for the wgpu immediate device.
//!
//! Every test returns early when no GPU adapter is available.

use passthrough_fx::backend::{GenerationPath, ImmediateAdapter, UpdateOutcome};
use passthrough_fx::gpu::{create_input_texture, GpuContext, ReadbackBuffer, WgpuImmediateDevice};
use passthrough_fx::texture::{
    GenerateKernel, GeneratedPattern, PatternType, PixelFormat, SampleType, TextureSpec,
};
use std::sync::Arc;

async fn create_gpu_context() -> Option<GpuContext> {
    GpuContext::new().await.ok()
}

fn read_texture(ctx: &GpuContext, texture: &wgpu::Texture, spec: &TextureSpec) -> Vec<u8> {
    let bytes_per_pixel = spec.format.dxgi().bytes_per_pixel() as u32;
    let readback = ReadbackBuffer::new(&ctx.device, spec.width, spec.height, bytes_per_pixel);
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Test Readback"),
        });
    readback.copy_from(&mut encoder, texture);
    ctx.queue.submit(Some(encoder.finish()));
    readback.read_pixels(&ctx.device).unwrap()
}

struct Target {
    device: Arc<WgpuImmediateDevice>,
    texture: Arc<wgpu::Texture>,
    handle: passthrough_fx::NativeTexture,
}

fn target(ctx: &GpuContext, spec: &TextureSpec) -> Target {
    let device = ctx.immediate_device();
    let texture = Arc::new(create_input_texture(&ctx.device, "test input", spec));
    let handle = device.register_texture(texture.clone());
    Target {
        device,
        texture,
        handle,
    }
}

#[tokio::test]
async fn test_cpu_upload_matches_generated_pattern() {
    let Some(ctx) = create_gpu_context().await else {
        return;
    };
    let spec = TextureSpec::new(PixelFormat::Rgba8Unorm, 72, 40);
    let t = target(&ctx, &spec);
    let mut adapter = ImmediateAdapter::new(PatternType::Gradient, spec, t.device.clone()).unwrap();

    let outcome = adapter.update(t.handle, false).unwrap();
    assert_eq!(outcome, UpdateOutcome::Generated(GenerationPath::Cpu));

    let expected = GeneratedPattern::new(PatternType::Gradient, spec, SampleType::Unorm8);
    assert_eq!(read_texture(&ctx, &t.texture, &spec), expected.data);
}

#[tokio::test]
async fn test_gpu_gradient_matches_kernel() {
    let Some(ctx) = create_gpu_context().await else {
        return;
    };
    let spec = TextureSpec::new(PixelFormat::Rgba8Unorm, 72, 40);
    let t = target(&ctx, &spec);
    let mut adapter = ImmediateAdapter::new(PatternType::Gradient, spec, t.device.clone()).unwrap();
    if !adapter.readiness().gpu.is_ready() {
        return;
    }

    let outcome = adapter.update(t.handle, true).unwrap();
    assert_eq!(outcome, UpdateOutcome::Generated(GenerationPath::Gpu));

    let pixels = read_texture(&ctx, &t.texture, &spec);
    let kernel = GenerateKernel::new(PatternType::Gradient);
    for (x, y) in [(0u32, 0u32), (8, 8), (33, 17), (71, 39)] {
        let value = kernel.evaluate(x, y, spec.width, spec.height, [0.0; 4]);
        let offset = ((y * spec.width + x) * 4) as usize;
        for c in 0..4 {
            let expected = (value[c] * 255.0).round() as i32;
            let actual = pixels[offset + c] as i32;
            assert!(
                (expected - actual).abs() <= 1,
                "({}, {}) channel {}: expected {}, got {}",
                x,
                y,
                c,
                expected,
                actual
            );
        }
    }
}

#[tokio::test]
async fn test_gpu_noise_changes_every_update() {
    let Some(ctx) = create_gpu_context().await else {
        return;
    };
    let spec = TextureSpec::new(PixelFormat::Rgba8Unorm, 64, 64);
    let t = target(&ctx, &spec);
    let mut adapter = ImmediateAdapter::new(PatternType::Noise, spec, t.device.clone()).unwrap();
    if !adapter.readiness().gpu.is_ready() {
        return;
    }

    adapter.update(t.handle, true).unwrap();
    let first = read_texture(&ctx, &t.texture, &spec);
    adapter.update(t.handle, true).unwrap();
    let second = read_texture(&ctx, &t.texture, &spec);
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_float_texture_upload() {
    let Some(ctx) = create_gpu_context().await else {
        return;
    };
    let spec = TextureSpec::new(PixelFormat::R32Float, 50, 20);
    let t = target(&ctx, &spec);
    let mut adapter = ImmediateAdapter::new(PatternType::Gradient, spec, t.device.clone()).unwrap();

    adapter.update(t.handle, false).unwrap();
    let expected = GeneratedPattern::new(PatternType::Gradient, spec, SampleType::Float32);
    assert_eq!(read_texture(&ctx, &t.texture, &spec), expected.data);
}

#[tokio::test]
async fn test_srgb_texture_degrades_gpu_path() {
    let Some(ctx) = create_gpu_context().await else {
        return;
    };
    let spec = TextureSpec::new(PixelFormat::Rgba8Srgb, 32, 32);
    let t = target(&ctx, &spec);
    let mut adapter = ImmediateAdapter::new(PatternType::Gradient, spec, t.device.clone()).unwrap();
    if !adapter.readiness().gpu.is_ready() {
        return;
    }

    assert!(adapter.update(t.handle, true).is_err());
    assert_eq!(
        adapter.update(t.handle, true).unwrap(),
        UpdateOutcome::Generated(GenerationPath::Cpu)
    );
}
