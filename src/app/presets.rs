//! Named effect presets.

use crate::backend::Backend;
use crate::postprocess::{
    AnimationParams, BlurParams, ColorGrade, EffectConfig, NoiseParams, ShaderSource,
};
use crate::texture::{PatternType, PixelFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Index of the preset applied at startup.
pub const DEFAULT_PRESET_INDEX: usize = 1;

/// A named effect configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub effect: EffectConfig,
}

/// Errors loading or saving presets.
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("Preset file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid preset JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// An ordered list of presets, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetBook {
    pub presets: Vec<Preset>,
}

impl PresetBook {
    pub fn new(presets: Vec<Preset>) -> Self {
        Self { presets }
    }

    pub fn from_json(json: &str) -> Result<Self, PresetError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, PresetError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PresetError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PresetError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&Preset> {
        self.presets.get(index)
    }

    pub fn find(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|preset| preset.name == name)
    }
}

fn rgba8(r: f32, g: f32, b: f32, a: f32) -> [f32; 4] {
    [r / 255.0, g / 255.0, b / 255.0, a / 255.0]
}

fn color(
    enabled: bool,
    preserve_saturated: f32,
    value: [f32; 4],
    exponent: [f32; 4],
    scale: f32,
    exponent_scale: f32,
) -> ColorGrade {
    ColorGrade {
        enabled,
        factor: if enabled { 1.0 } else { 0.0 },
        preserve_saturated,
        value,
        exponent,
        scale,
        exponent_scale,
    }
}

fn noise(enabled: bool, generate_on_gpu: bool, amount: f32, scale: f32) -> NoiseParams {
    NoiseParams {
        enabled,
        generate_on_gpu,
        amount,
        scale,
    }
}

fn blur(enabled: bool, scale: f32, kernel_size: i32, high_pass_cutoff: f32) -> BlurParams {
    BlurParams {
        enabled,
        scale,
        kernel_size,
        high_pass_cutoff,
    }
}

fn animation(animate: bool, frequency: f32, amplitude: f32, offset: f32) -> AnimationParams {
    AnimationParams {
        animate,
        frequency,
        amplitude,
        offset,
        time: 0.0,
    }
}

#[allow(clippy::too_many_arguments)]
fn preset(
    name: &str,
    enabled: bool,
    shader_source: ShaderSource,
    backend: Backend,
    pattern: PatternType,
    color: ColorGrade,
    noise: NoiseParams,
    blur: BlurParams,
    animation: AnimationParams,
) -> Preset {
    Preset {
        name: name.to_string(),
        effect: EffectConfig {
            enabled,
            shader_source,
            backend,
            pattern,
            texture_format: PixelFormat::Rgba8Unorm,
            color,
            noise,
            blur,
            animation,
        },
    }
}

/// Presets offered to users.
pub fn gui_presets() -> PresetBook {
    use Backend::Immediate;
    use PatternType::{Gradient, Noise};
    use ShaderSource::{None, Precompiled};

    let off_color = color(false, 0.0, [0.0; 4], [0.0; 4], 0.0, 0.0);
    PresetBook::new(vec![
        preset(
            "Off",
            false,
            None,
            Immediate,
            Noise,
            off_color,
            noise(false, true, 0.0, 0.0),
            blur(false, 0.0, 0, 0.5),
            animation(false, 0.0, 0.0, 0.0),
        ),
        preset(
            "Default",
            true,
            Precompiled,
            Immediate,
            Noise,
            color(
                true,
                0.0,
                rgba8(210.0, 220.0, 130.0, 255.0),
                rgba8(20.0, 80.0, 140.0, 255.0),
                1.0,
                2.0,
            ),
            noise(true, true, 0.1, 1.0),
            blur(true, 5.0, 7, 0.5),
            animation(true, 3.0, 0.5, 0.75),
        ),
        preset(
            "Night Light",
            true,
            Precompiled,
            Immediate,
            Noise,
            color(
                true,
                1.0,
                rgba8(28.0, 97.0, 225.0, 255.0),
                rgba8(150.0, 178.0, 230.0, 255.0),
                0.4,
                4.0,
            ),
            noise(false, true, 0.0, 0.0),
            blur(false, 0.0, 0, 0.5),
            animation(true, 1.5, 0.2, 0.9),
        ),
        preset(
            "IR Goggles",
            true,
            Precompiled,
            Immediate,
            Noise,
            color(true, 0.0, [0.0, 1.0, 0.0, 1.0], [1.0; 4], 1.2, 1.0),
            noise(true, true, 0.1, 1.0),
            blur(true, 1.5, 3, 0.5),
            animation(true, 6.0, 0.15, 1.0),
        ),
        preset(
            "Purple Haze",
            true,
            Precompiled,
            Immediate,
            Noise,
            color(
                true,
                0.0,
                rgba8(120.0, 50.0, 165.0, 255.0),
                rgba8(190.0, 50.0, 225.0, 255.0),
                1.5,
                0.8,
            ),
            noise(true, true, 0.1, 0.06),
            blur(true, 2.0, 5, 0.5),
            animation(true, 4.0, 0.4, 1.0),
        ),
        preset(
            "Sunshine",
            true,
            Precompiled,
            Immediate,
            Noise,
            color(
                true,
                0.0,
                rgba8(224.0, 220.0, 155.0, 255.0),
                rgba8(224.0, 177.0, 124.0, 255.0),
                2.0,
                1.0,
            ),
            noise(true, true, 0.03, 0.07),
            blur(false, 0.0, 0, 0.5),
            animation(true, 3.0, 0.2, 0.8),
        ),
        preset(
            "Blurry",
            true,
            Precompiled,
            Immediate,
            Gradient,
            off_color,
            noise(false, true, 0.0, 0.0),
            blur(true, 3.0, 9, 0.5),
            animation(true, 3.0, 0.2, 1.0),
        ),
    ])
}

/// Presets covering each backend and generation path.
pub fn test_presets() -> PresetBook {
    use Backend::{Fenced, Immediate, Unified};
    use ShaderSource::{Precompiled, SourceText};

    let test_color = color(
        true,
        0.0,
        rgba8(255.0, 192.0, 128.0, 255.0),
        rgba8(32.0, 64.0, 128.0, 255.0),
        1.0,
        2.0,
    );
    let test_blur = blur(true, 5.0, 6, 5.0);
    let still = animation(false, 0.0, 1.0, 1.0);
    let test = |name: &str, source: ShaderSource, backend: Backend, on_gpu: bool| {
        preset(
            name,
            true,
            source,
            backend,
            PatternType::Gradient,
            test_color,
            noise(true, on_gpu, 1.0, 2.0),
            test_blur,
            still,
        )
    };

    PresetBook::new(vec![
        preset(
            "Off",
            false,
            ShaderSource::None,
            Immediate,
            PatternType::Gradient,
            color(false, 0.0, [0.0; 4], [0.0; 4], 0.0, 0.0),
            noise(false, false, 0.0, 0.0),
            blur(false, 0.0, 0, 5.0),
            animation(false, 0.0, 0.0, 0.0),
        ),
        test("Binary Blob", Precompiled, Immediate, true),
        test("Source Text", SourceText, Immediate, true),
        test("Immediate-CPU", Precompiled, Immediate, false),
        test("Immediate-GPU", Precompiled, Immediate, true),
        test("Unified-CPU", Precompiled, Unified, false),
        test("Unified-GPU", Precompiled, Unified, true),
        test("Fenced-CPU", Precompiled, Fenced, false),
    ])
}
