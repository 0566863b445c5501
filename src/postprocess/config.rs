//! Effect configuration.

use super::shaders::ShaderSource;
use crate::backend::Backend;
use crate::texture::{PatternType, PixelFormat};
use serde::{Deserialize, Serialize};

/// Color grading parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorGrade {
    pub enabled: bool,
    pub factor: f32,
    pub preserve_saturated: f32,
    pub value: [f32; 4],
    pub exponent: [f32; 4],
    pub scale: f32,
    pub exponent_scale: f32,
}

impl Default for ColorGrade {
    fn default() -> Self {
        Self {
            enabled: true,
            factor: 1.0,
            preserve_saturated: 1.0,
            value: [0.4, 0.5, 0.7, 1.0],
            exponent: [0.5, 0.75, 1.0, 1.0],
            scale: 1.0,
            exponent_scale: 2.0,
        }
    }
}

/// Generated noise texture parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    pub enabled: bool,
    /// Prefer the GPU generation path.
    pub generate_on_gpu: bool,
    pub amount: f32,
    pub scale: f32,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            enabled: true,
            generate_on_gpu: true,
            amount: 0.1,
            scale: 1.0,
        }
    }
}

/// Blur and filter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurParams {
    pub enabled: bool,
    pub scale: f32,
    pub kernel_size: i32,
    pub high_pass_cutoff: f32,
}

impl Default for BlurParams {
    fn default() -> Self {
        Self {
            enabled: true,
            scale: 5.0,
            kernel_size: 3,
            high_pass_cutoff: 5.0,
        }
    }
}

/// Parameter animation and its clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationParams {
    pub animate: bool,
    pub frequency: f32,
    pub amplitude: f32,
    pub offset: f32,
    /// Animation clock in seconds, advanced by `frequency * dt` per frame.
    pub time: f64,
}

impl AnimationParams {
    /// Whether the settings (not the clock) differ.
    pub fn settings_differ(&self, other: &AnimationParams) -> bool {
        self.animate != other.animate
            || self.frequency != other.frequency
            || self.amplitude != other.amplitude
            || self.offset != other.offset
    }

    /// Advance the clock by one frame.
    pub fn advance(&mut self, delta_time: f64) {
        if self.animate {
            self.time += self.frequency as f64 * delta_time;
        }
    }
}

impl Default for AnimationParams {
    fn default() -> Self {
        Self {
            animate: true,
            frequency: 3.0,
            amplitude: 0.5,
            offset: 0.75,
            time: 0.0,
        }
    }
}

/// Full configuration of the passthrough effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    pub enabled: bool,
    pub shader_source: ShaderSource,
    pub backend: Backend,
    pub pattern: PatternType,
    pub texture_format: PixelFormat,
    pub color: ColorGrade,
    pub noise: NoiseParams,
    pub blur: BlurParams,
    pub animation: AnimationParams,
}

impl EffectConfig {
    /// Settings that require reloading the shader and generation resources.
    pub fn pipeline_key(&self) -> PipelineKey {
        PipelineKey {
            shader_source: self.shader_source,
            backend: self.backend,
            pattern: self.pattern,
            texture_format: self.texture_format,
        }
    }
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            shader_source: ShaderSource::None,
            backend: Backend::Immediate,
            pattern: PatternType::Noise,
            texture_format: PixelFormat::Rgba8Unorm,
            color: ColorGrade::default(),
            noise: NoiseParams::default(),
            blur: BlurParams::default(),
            animation: AnimationParams::default(),
        }
    }
}

/// Identity of a loaded effect pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub shader_source: ShaderSource,
    pub backend: Backend,
    pub pattern: PatternType,
    pub texture_format: PixelFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_animation_clock_only_advances_when_animating() {
        let mut animation = AnimationParams::default();
        animation.advance(0.5);
        assert!((animation.time - 1.5).abs() < 1e-9);

        animation.animate = false;
        animation.advance(0.5);
        assert!((animation.time - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_clock_is_not_a_setting() {
        let a = AnimationParams::default();
        let b = AnimationParams {
            time: 42.0,
            ..a
        };
        assert!(!a.settings_differ(&b));
        assert!(a.settings_differ(&AnimationParams { offset: 0.1, ..a }));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EffectConfig =
            serde_json::from_str(r#"{"enabled": true, "pattern": "Gradient"}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.pattern, PatternType::Gradient);
        assert_eq!(config.blur, BlurParams::default());
    }
}
