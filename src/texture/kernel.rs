//! Compute-kernel description for GPU-side pattern generation.
//!
//! The GPU kernels use cheaper formulas than the CPU generator and draw no
//! debug grid. [`GenerateKernel::evaluate`] is the reference used by the
//! software devices.

use super::pattern::PatternType;

const PHI: f32 = 1.618_034;

/// A compute kernel writing one pattern into a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerateKernel {
    pub pattern: PatternType,
}

impl GenerateKernel {
    /// Threads per workgroup along each axis for workgroup-tiled dispatches.
    pub const WORKGROUP_SIZE: u32 = 16;

    pub fn new(pattern: PatternType) -> Self {
        Self { pattern }
    }

    /// Whether the kernel reads a random seed vector.
    pub fn uses_seed(&self) -> bool {
        self.pattern == PatternType::Noise
    }

    /// Workgroup counts covering a `width` x `height` texture.
    pub fn workgroups(width: u32, height: u32) -> [u32; 3] {
        [
            width.div_ceil(Self::WORKGROUP_SIZE),
            height.div_ceil(Self::WORKGROUP_SIZE),
            1,
        ]
    }

    /// Value the kernel stores at pixel `(x, y)`, as normalized RGBA.
    pub fn evaluate(&self, x: u32, y: u32, width: u32, height: u32, seed: [f32; 4]) -> [f32; 4] {
        match self.pattern {
            PatternType::Noise => {
                let xy = [x as f32 + 1.0, y as f32 + 1.0];
                let len = (xy[0] * xy[0] + xy[1] * xy[1]).sqrt();
                let distance = (PHI - 1.0) * len;
                seed.map(|s| fract((s * distance).tan() * xy[0]))
            }
            PatternType::Gradient => {
                let (x, y, w, h) = (x as f32, y as f32, width as f32, height as f32);
                [
                    x / w,
                    y / h,
                    ((w - x) + (h - y)) / (w + h),
                    (x + (h - y)) / (w + h),
                ]
            }
        }
    }
}

/// Seed vector uploaded for noise kernels.
///
/// Must match the kernel's uniform block: one `vec4<f32>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct NoiseSeed {
    pub seed: [f32; 4],
}

impl NoiseSeed {
    pub fn new(seed: [f32; 4]) -> Self {
        Self { seed }
    }
}

fn fract(v: f32) -> f32 {
    v - v.floor()
}
