//! Procedural pattern generation on the CPU.
//!
//! Fills caller-owned buffers with noise or gradient samples. Rows are
//! addressed through the caller-supplied stride, so padding between rows is
//! never written.

use super::format::{SampleType, TextureSpec};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{LazyLock, Mutex};

/// Pattern written into generated input textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PatternType {
    #[default]
    Noise,
    Gradient,
}

/// Pixels on this lattice are zeroed in every channel (debug grid).
pub const GRID_SPACING: usize = 16;
const GRID_LINE: usize = 8;

/// Process-wide engine shared by every noise generation and GPU seed draw.
///
/// Never re-seeded, so consecutive noise frames differ.
static SHARED_RNG: LazyLock<Mutex<StdRng>> = LazyLock::new(|| Mutex::new(StdRng::from_entropy()));

/// Run `f` with exclusive access to the shared random engine.
pub fn with_shared_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    let mut rng = SHARED_RNG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut rng)
}

/// Draw a 4-component seed for GPU noise kernels.
pub fn random_seed() -> [f32; 4] {
    with_shared_rng(|rng| std::array::from_fn(|_| rng.gen_range(0..=32767u32) as f32))
}

/// A sample representation that can be written into a byte buffer.
pub trait Sample: Copy {
    /// Value corresponding to full intensity.
    const MAX: f64;

    /// Truncating conversion from the double-precision working value.
    fn from_f64(value: f64) -> Self;

    /// Write native-endian bytes into `out`, which is exactly `size_of::<Self>()` long.
    fn write(self, out: &mut [u8]);
}

impl Sample for u8 {
    const MAX: f64 = 255.0;

    fn from_f64(value: f64) -> Self {
        value as u8
    }

    fn write(self, out: &mut [u8]) {
        out[0] = self;
    }
}

impl Sample for f32 {
    const MAX: f64 = 1.0;

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn write(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }
}

impl Sample for u32 {
    const MAX: f64 = u32::MAX as f64;

    fn from_f64(value: f64) -> Self {
        value as u32
    }

    fn write(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }
}

/// Generate `pattern` into `target` using the shared random engine.
///
/// `target` must hold at least `spec.height * row_stride` bytes and
/// `row_stride` must be at least the packed row size for `sample`. These are
/// caller obligations; the function indexes the slice and panics if violated.
pub fn generate(
    pattern: PatternType,
    spec: &TextureSpec,
    row_stride: usize,
    target: &mut [u8],
    sample: SampleType,
) {
    match pattern {
        PatternType::Noise => with_shared_rng(|rng| {
            generate_with_rng(pattern, spec, row_stride, target, sample, rng)
        }),
        PatternType::Gradient => generate_gradient(spec, row_stride, target, sample),
    }
}

/// Generate with an injected random engine. Only noise draws from it.
pub fn generate_with_rng<R: Rng + ?Sized>(
    pattern: PatternType,
    spec: &TextureSpec,
    row_stride: usize,
    target: &mut [u8],
    sample: SampleType,
    rng: &mut R,
) {
    match (pattern, sample) {
        (PatternType::Gradient, _) => generate_gradient(spec, row_stride, target, sample),
        (PatternType::Noise, SampleType::Unorm8) => fill_noise::<u8, R>(spec, row_stride, target, rng),
        (PatternType::Noise, SampleType::Float32) => fill_noise::<f32, R>(spec, row_stride, target, rng),
        (PatternType::Noise, SampleType::Uint32) => fill_noise::<u32, R>(spec, row_stride, target, rng),
    }
}

/// Generate the deterministic gradient.
pub fn generate_gradient(spec: &TextureSpec, row_stride: usize, target: &mut [u8], sample: SampleType) {
    match sample {
        SampleType::Unorm8 => fill_gradient::<u8>(spec, row_stride, target),
        SampleType::Float32 => fill_gradient::<f32>(spec, row_stride, target),
        SampleType::Uint32 => fill_gradient::<u32>(spec, row_stride, target),
    }
}

/// Whether the pixel lies on the debug grid.
pub fn on_grid(x: usize, y: usize) -> bool {
    (x & (GRID_SPACING - 1)) == GRID_LINE || (y & (GRID_SPACING - 1)) == GRID_LINE
}

/// Gradient channel values at a pixel, scaled to `max`.
pub fn gradient_values(x: usize, y: usize, width: usize, height: usize, max: f64) -> [f64; 4] {
    let (x, y, w, h) = (x as f64, y as f64, width as f64, height as f64);
    [
        x * max / w,
        y * max / h,
        ((w - x) + (h - y)) * max / (w + h),
        (x + (h - y)) * max / (w + h),
    ]
}

fn fill_noise<T: Sample, R: Rng + ?Sized>(
    spec: &TextureSpec,
    row_stride: usize,
    target: &mut [u8],
    rng: &mut R,
) {
    fill::<T>(spec, row_stride, target, |_, _, values| {
        for value in values {
            *value = rng.gen::<f64>() * T::MAX;
        }
    });
}

fn fill_gradient<T: Sample>(spec: &TextureSpec, row_stride: usize, target: &mut [u8]) {
    let (width, height) = (spec.width as usize, spec.height as usize);
    fill::<T>(spec, row_stride, target, |x, y, values| {
        let gradient = gradient_values(x, y, width, height, T::MAX);
        values.copy_from_slice(&gradient[..values.len()]);
    });
}

/// Write every off-grid pixel from `pixel_values`, which fills one value per channel.
fn fill<T: Sample>(
    spec: &TextureSpec,
    row_stride: usize,
    target: &mut [u8],
    mut pixel_values: impl FnMut(usize, usize, &mut [f64]),
) {
    let channels = spec.channels();
    let size = std::mem::size_of::<T>();
    let width = spec.width as usize;
    let height = spec.height as usize;
    let row_bytes = width * channels * size;
    debug_assert!(row_stride >= row_bytes, "row stride smaller than packed row");

    let mut scratch = [0.0f64; 4];
    let values = &mut scratch[..channels];
    for y in 0..height {
        let row = &mut target[y * row_stride..y * row_stride + row_bytes];
        for x in 0..width {
            let pixel = &mut row[x * channels * size..(x + 1) * channels * size];
            if on_grid(x, y) {
                pixel.fill(0);
                continue;
            }
            pixel_values(x, y, &mut *values);
            for (out, &value) in pixel.chunks_exact_mut(size).zip(values.iter()) {
                T::from_f64(value).write(out);
            }
        }
    }
}

/// An owned, tightly packed pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPattern {
    pub spec: TextureSpec,
    pub sample: SampleType,
    pub row_stride: usize,
    pub data: Vec<u8>,
}

impl GeneratedPattern {
    /// Generate a fresh pattern with the shared engine.
    pub fn new(pattern: PatternType, spec: TextureSpec, sample: SampleType) -> Self {
        let row_stride = spec.packed_row_bytes(sample);
        let mut data = vec![0u8; row_stride * spec.height as usize];
        generate(pattern, &spec, row_stride, &mut data, sample);
        Self {
            spec,
            sample,
            row_stride,
            data,
        }
    }

    /// Sample value at a pixel and channel, widened to f64.
    pub fn sample_at(&self, x: usize, y: usize, channel: usize) -> f64 {
        let size = self.sample.size();
        let offset = y * self.row_stride + (x * self.spec.channels() + channel) * size;
        let bytes = &self.data[offset..offset + size];
        match self.sample {
            SampleType::Unorm8 => bytes[0] as f64,
            SampleType::Float32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            SampleType::Uint32 => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::PixelFormat;

    #[test]
    fn test_gradient_corners() {
        let [r, g, b, a] = gradient_values(0, 0, 64, 64, 1.0);
        assert_eq!(r, 0.0);
        assert_eq!(g, 0.0);
        assert_eq!(b, 1.0);
        assert_eq!(a, 0.5);
    }

    #[test]
    fn test_grid_lattice() {
        assert!(on_grid(8, 0));
        assert!(on_grid(0, 24));
        assert!(!on_grid(7, 9));
        assert!(!on_grid(16, 16));
    }

    #[test]
    fn test_gradient_truncates_to_bytes() {
        let spec = TextureSpec::new(PixelFormat::Rgba8Unorm, 4, 4);
        let pattern = GeneratedPattern::new(PatternType::Gradient, spec, SampleType::Unorm8);
        // x = 3 of 4: 3 * 255 / 4 = 191.25
        assert_eq!(pattern.sample_at(3, 1, 0), 191.0);
        assert_eq!(pattern.sample_at(1, 2, 1), 127.0);
    }

    #[test]
    fn test_single_channel_uses_first_ramp() {
        let spec = TextureSpec::new(PixelFormat::R32Float, 4, 2);
        let pattern = GeneratedPattern::new(PatternType::Gradient, spec, SampleType::Float32);
        assert_eq!(pattern.data.len(), 4 * 2 * 4);
        assert!((pattern.sample_at(2, 0, 0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let spec = TextureSpec::new(PixelFormat::Rgba8Unorm, 20, 20);
        let stride = spec.packed_row_bytes(SampleType::Unorm8);
        let mut a = vec![0u8; stride * 20];
        let mut b = vec![0u8; stride * 20];
        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        generate_with_rng(PatternType::Noise, &spec, stride, &mut a, SampleType::Unorm8, &mut rng_a);
        generate_with_rng(PatternType::Noise, &spec, stride, &mut b, SampleType::Unorm8, &mut rng_b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_gradient_never_draws_from_engine() {
        let spec = TextureSpec::new(PixelFormat::A8Unorm, 12, 10);
        let stride = spec.packed_row_bytes(SampleType::Unorm8);
        let mut injected = vec![0u8; stride * 10];
        let mut direct = vec![0u8; stride * 10];
        let mut rng = StdRng::seed_from_u64(3);
        let mut untouched = StdRng::seed_from_u64(3);

        generate_with_rng(PatternType::Gradient, &spec, stride, &mut injected, SampleType::Unorm8, &mut rng);
        generate_gradient(&spec, stride, &mut direct, SampleType::Unorm8);

        assert_eq!(injected, direct);
        assert_eq!(rng.gen::<u64>(), untouched.gen::<u64>());
    }

    #[test]
    fn test_random_seed_range() {
        let seed = random_seed();
        assert!(seed.iter().all(|s| (0.0..=32767.0).contains(s) && s.fract() == 0.0));
    }
}
