//! Constant parameter block passed to the effect shader.
//!
//! The layout must match the shader's constant buffer exactly, including
//! padding. A mismatch corrupts the image without raising an error.

use super::config::EffectConfig;

/// Per-frame shader constants (80 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PostProcessConstants {
    /// Color grading amount: 0 = off, 1 = full.
    pub color_factor: f32,
    pub color_preserve_saturated: f32,
    pub _padding0: [f32; 2],
    pub color_value: [f32; 4],
    pub color_exponent: [f32; 4],
    /// Noise amount: 0 = off, 1 = full.
    pub noise_amount: f32,
    pub noise_scale: f32,
    /// Blur scale: 0 = off, 1 = full.
    pub blur_scale: f32,
    pub blur_kernel_size: i32,
    pub high_pass_cutoff_freq: f32,
    pub _padding1: [f32; 3],
}

impl Default for PostProcessConstants {
    fn default() -> Self {
        Self {
            color_factor: 1.0,
            color_preserve_saturated: 1.0,
            _padding0: [0.0; 2],
            color_value: [0.4, 0.5, 0.7, 1.0],
            color_exponent: [2.0, 1.5, 1.0, 1.0],
            noise_amount: 1.0,
            noise_scale: 1.0,
            blur_scale: 1.0,
            blur_kernel_size: 1,
            high_pass_cutoff_freq: 0.5,
            _padding1: [0.0; 3],
        }
    }
}

const COLOR_FREQUENCIES: (f64, f64) = (1.071657, 1.32674);
const NOISE_FREQUENCIES: (f64, f64) = (1.158693, 1.51397);
const BLUR_FREQUENCIES: (f64, f64) = (1.013575, 1.26575);

/// Animated modulation factor around `offset`.
fn modulation(config: &EffectConfig, frequencies: (f64, f64)) -> f32 {
    let animation = &config.animation;
    let t = animation.time;
    let wave = 0.25 * ((t * frequencies.0).sin() + (t * frequencies.1).sin());
    (animation.offset as f64 + animation.amplitude as f64 * (wave - 0.5)) as f32
}

impl PostProcessConstants {
    /// Derive this frame's constants from the effect configuration and its clock.
    pub fn from_config(config: &EffectConfig) -> Self {
        let color = &config.color;
        let noise = &config.noise;
        let blur = &config.blur;

        let color_factor = if color.enabled {
            color.factor * modulation(config, COLOR_FREQUENCIES)
        } else {
            0.0
        };
        let noise_amount = if noise.enabled {
            noise.amount * modulation(config, NOISE_FREQUENCIES)
        } else {
            0.0
        };
        let blur_scale = if blur.enabled {
            blur.scale * modulation(config, BLUR_FREQUENCIES)
        } else {
            0.0
        };

        Self {
            color_factor,
            color_preserve_saturated: color.preserve_saturated,
            _padding0: [0.0; 2],
            color_value: color.value.map(|v| (v * color.scale).max(0.0)),
            color_exponent: color
                .exponent
                .map(|e| 1.0 / (e / color.exponent_scale).max(0.01)),
            noise_amount,
            noise_scale: noise.scale,
            blur_scale,
            blur_kernel_size: blur.kernel_size,
            high_pass_cutoff_freq: blur.high_pass_cutoff,
            _padding1: [0.0; 3],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_layout_matches_shader() {
        assert_eq!(size_of::<PostProcessConstants>(), 80);
        assert_eq!(offset_of!(PostProcessConstants, color_value), 16);
        assert_eq!(offset_of!(PostProcessConstants, color_exponent), 32);
        assert_eq!(offset_of!(PostProcessConstants, noise_amount), 48);
        assert_eq!(offset_of!(PostProcessConstants, blur_kernel_size), 60);
        assert_eq!(offset_of!(PostProcessConstants, high_pass_cutoff_freq), 64);
    }

    #[test]
    fn test_disabled_groups_are_zero() {
        let mut config = EffectConfig::default();
        config.color.enabled = false;
        config.noise.enabled = false;
        config.blur.enabled = false;
        let constants = PostProcessConstants::from_config(&config);
        assert_eq!(constants.color_factor, 0.0);
        assert_eq!(constants.noise_amount, 0.0);
        assert_eq!(constants.blur_scale, 0.0);
    }

    #[test]
    fn test_modulation_at_time_zero() {
        let config = EffectConfig::default();
        let constants = PostProcessConstants::from_config(&config);
        // offset + ampl * (0 - 0.5) = 0.75 - 0.25
        assert!((constants.color_factor - 0.5).abs() < 1e-6);
        assert!((constants.noise_amount - 0.05).abs() < 1e-6);
        assert!((constants.blur_scale - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_exponent_and_value_mapping() {
        let mut config = EffectConfig::default();
        config.color.exponent = [0.5, 0.0, 2.0, 1.0];
        config.color.exponent_scale = 2.0;
        config.color.value = [0.5, -1.0, 1.0, 1.0];
        config.color.scale = 2.0;
        let constants = PostProcessConstants::from_config(&config);
        for (got, want) in constants.color_exponent.iter().zip([4.0, 100.0, 1.0, 2.0]) {
            assert!((got - want).abs() < 1e-3, "{} != {}", got, want);
        }
        assert_eq!(constants.color_value, [1.0, 0.0, 2.0, 2.0]);
    }
}
