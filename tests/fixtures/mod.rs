//! Shared fixtures for integration tests.

#![allow(dead_code)]

use passthrough_fx::app::{AppState, PresetBook};
use passthrough_fx::headless::store::encode_texel;
use passthrough_fx::headless::{HeadlessConfig, HeadlessRig, SoftTexture};
use passthrough_fx::texture::{GenerateKernel, PatternType, PixelFormat, TextureSpec};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A small texture with a partial last workgroup.
pub fn small_spec(format: PixelFormat) -> TextureSpec {
    TextureSpec::new(format, 40, 24)
}

pub fn rig() -> HeadlessRig {
    init_logging();
    HeadlessRig::new(&HeadlessConfig::default())
}

pub fn rig_with_latency(fenced_latency: usize) -> HeadlessRig {
    init_logging();
    HeadlessRig::new(&HeadlessConfig {
        fenced_latency,
        ..HeadlessConfig::default()
    })
}

/// Application state applying the named preset.
pub fn preset_state(book: &PresetBook, name: &str) -> AppState {
    let preset = book
        .find(name)
        .unwrap_or_else(|| panic!("missing preset {}", name));
    AppState {
        post_process: preset.effect.clone(),
        ..AppState::default()
    }
}

/// Bytes the gradient kernel stores at `(x, y)`.
pub fn kernel_texel(spec: &TextureSpec, x: u32, y: u32) -> Vec<u8> {
    let kernel = GenerateKernel::new(PatternType::Gradient);
    let value = kernel.evaluate(x, y, spec.width, spec.height, [0.0; 4]);
    let mut out = vec![0u8; spec.format.dxgi().bytes_per_pixel()];
    encode_texel(spec.format, value, &mut out);
    out
}

/// Assert every texel matches the gradient kernel.
pub fn assert_kernel_gradient(texture: &SoftTexture) {
    let spec = texture.spec;
    for y in 0..spec.height {
        for x in 0..spec.width {
            assert_eq!(
                texture.texel(x, y),
                kernel_texel(&spec, x, y).as_slice(),
                "texel ({}, {}) of {:?}",
                x,
                y,
                spec.format
            );
        }
    }
}
