//! Pixel format capability table.
//!
//! Every abstract [`PixelFormat`] has exactly one entry describing its channel
//! count and the native format used by each backend family.

use serde::{Deserialize, Serialize};

/// Abstract pixel formats a generated input texture may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4-channel 8-bit normalized.
    Rgba8Unorm,
    /// 4-channel 8-bit gamma encoded.
    Rgba8Srgb,
    /// 1-channel 8-bit mask.
    A8Unorm,
    /// 1-channel 32-bit unsigned integer.
    R32Uint,
    /// 1-channel 32-bit float.
    R32Float,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 5] = [
        PixelFormat::Rgba8Unorm,
        PixelFormat::Rgba8Srgb,
        PixelFormat::A8Unorm,
        PixelFormat::R32Uint,
        PixelFormat::R32Float,
    ];

    /// Table entry for this format.
    ///
    /// # Panics
    ///
    /// Panics if the format has no table entry, which is a static configuration bug.
    pub fn info(self) -> &'static FormatInfo {
        FORMAT_TABLE
            .iter()
            .find(|info| info.format == self)
            .unwrap_or_else(|| panic!("pixel format {:?} missing from capability table", self))
    }

    /// Number of channels (1 or 4).
    pub fn channels(self) -> usize {
        self.info().channels
    }

    /// Sample representation used when generating data for upload.
    ///
    /// Both 32-bit formats are generated as floats, including `R32Uint`, since
    /// the effect shader reads that slot as float data.
    pub fn upload_sample_type(self) -> SampleType {
        match self {
            PixelFormat::R32Float | PixelFormat::R32Uint => SampleType::Float32,
            _ => SampleType::Unorm8,
        }
    }

    /// Bytes of one uploaded pixel.
    pub fn upload_bytes_per_pixel(self) -> usize {
        self.channels() * self.upload_sample_type().size()
    }

    pub fn dxgi(self) -> DxgiFormat {
        self.info().dxgi
    }

    pub fn gl(self) -> GlFormat {
        self.info().gl
    }

    /// Format for binding as a writable image on the unified device, if legal.
    pub fn gl_image_binding(self) -> Option<u32> {
        self.info().gl_image_binding
    }

    /// wgpu texture format backing this pixel format.
    pub fn wgpu(self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            PixelFormat::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            PixelFormat::A8Unorm => wgpu::TextureFormat::R8Unorm,
            PixelFormat::R32Uint => wgpu::TextureFormat::R32Uint,
            PixelFormat::R32Float => wgpu::TextureFormat::R32Float,
        }
    }
}

/// Numeric representation of generated samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    /// Normalized 8-bit, max 255.
    Unorm8,
    /// Normalized 32-bit float, max 1.0.
    Float32,
    /// Raw 32-bit unsigned, max `u32::MAX`.
    Uint32,
}

impl SampleType {
    pub fn size(self) -> usize {
        match self {
            SampleType::Unorm8 => 1,
            SampleType::Float32 | SampleType::Uint32 => 4,
        }
    }
}

/// Native format enum of the immediate-mode and fenced devices.
///
/// Discriminants follow the DXGI numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DxgiFormat {
    R8G8B8A8Unorm = 28,
    R8G8B8A8UnormSrgb = 29,
    R32Float = 41,
    R32Uint = 42,
    A8Unorm = 65,
}

impl DxgiFormat {
    /// Linear equivalent for unordered-access binding.
    pub fn uav_compatible(self) -> DxgiFormat {
        match self {
            DxgiFormat::R8G8B8A8UnormSrgb => DxgiFormat::R8G8B8A8Unorm,
            other => other,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            DxgiFormat::A8Unorm => 1,
            _ => 4,
        }
    }

    pub fn wgpu(self) -> wgpu::TextureFormat {
        match self {
            DxgiFormat::R8G8B8A8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            DxgiFormat::R8G8B8A8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            DxgiFormat::R32Float => wgpu::TextureFormat::R32Float,
            DxgiFormat::R32Uint => wgpu::TextureFormat::R32Uint,
            DxgiFormat::A8Unorm => wgpu::TextureFormat::R8Unorm,
        }
    }
}

/// GL enum values used by the unified device.
pub mod gl {
    pub const UNSIGNED_BYTE: u32 = 0x1401;
    pub const UNSIGNED_INT: u32 = 0x1405;
    pub const FLOAT: u32 = 0x1406;
    pub const RED: u32 = 0x1903;
    pub const RGBA: u32 = 0x1908;
    pub const RGBA8: u32 = 0x8058;
    pub const R8: u32 = 0x8229;
    pub const R32F: u32 = 0x822E;
    pub const R32UI: u32 = 0x8236;
    pub const SRGB8_ALPHA8: u32 = 0x8C43;
    pub const RED_INTEGER: u32 = 0x8D94;
    pub const WRITE_ONLY: u32 = 0x88B9;
    pub const ALL_BARRIER_BITS: u32 = 0xFFFF_FFFF;
}

/// Native format triple of the unified device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlFormat {
    pub internal: u32,
    pub base: u32,
    /// Data type of tightly packed uploads.
    pub data_type: u32,
}

/// One row of the capability table.
#[derive(Debug, Clone, Copy)]
pub struct FormatInfo {
    pub format: PixelFormat,
    pub channels: usize,
    pub dxgi: DxgiFormat,
    pub gl: GlFormat,
    pub gl_image_binding: Option<u32>,
}

// sRGB image writes, R32F and R8 image bindings fail on the unified device.
static FORMAT_TABLE: [FormatInfo; 5] = [
    FormatInfo {
        format: PixelFormat::Rgba8Unorm,
        channels: 4,
        dxgi: DxgiFormat::R8G8B8A8Unorm,
        gl: GlFormat {
            internal: gl::RGBA8,
            base: gl::RGBA,
            data_type: gl::UNSIGNED_BYTE,
        },
        gl_image_binding: Some(gl::RGBA8),
    },
    FormatInfo {
        format: PixelFormat::Rgba8Srgb,
        channels: 4,
        dxgi: DxgiFormat::R8G8B8A8UnormSrgb,
        gl: GlFormat {
            internal: gl::SRGB8_ALPHA8,
            base: gl::RGBA,
            data_type: gl::UNSIGNED_BYTE,
        },
        gl_image_binding: None,
    },
    FormatInfo {
        format: PixelFormat::A8Unorm,
        channels: 1,
        dxgi: DxgiFormat::A8Unorm,
        gl: GlFormat {
            internal: gl::R8,
            base: gl::RED,
            data_type: gl::UNSIGNED_BYTE,
        },
        gl_image_binding: None,
    },
    FormatInfo {
        format: PixelFormat::R32Uint,
        channels: 1,
        dxgi: DxgiFormat::R32Uint,
        gl: GlFormat {
            internal: gl::R32UI,
            base: gl::RED_INTEGER,
            data_type: gl::UNSIGNED_INT,
        },
        gl_image_binding: Some(gl::R32UI),
    },
    FormatInfo {
        format: PixelFormat::R32Float,
        channels: 1,
        dxgi: DxgiFormat::R32Float,
        gl: GlFormat {
            internal: gl::R32F,
            base: gl::RED,
            data_type: gl::FLOAT,
        },
        gl_image_binding: None,
    },
];

/// Immutable description of a generated texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureSpec {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl TextureSpec {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    /// Tightly packed row size for the given representation.
    pub fn packed_row_bytes(&self, sample: SampleType) -> usize {
        self.width as usize * self.channels() * sample.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_lookup_is_total() {
        for format in PixelFormat::ALL {
            let channels = format.channels();
            assert!(channels == 1 || channels == 4, "{:?} -> {}", format, channels);
        }
    }

    #[test]
    fn test_dxgi_numbering() {
        assert_eq!(PixelFormat::Rgba8Unorm.dxgi() as u32, 28);
        assert_eq!(PixelFormat::Rgba8Srgb.dxgi() as u32, 29);
        assert_eq!(PixelFormat::R32Float.dxgi() as u32, 41);
        assert_eq!(PixelFormat::R32Uint.dxgi() as u32, 42);
        assert_eq!(PixelFormat::A8Unorm.dxgi() as u32, 65);
    }

    #[test]
    fn test_uav_format_drops_srgb() {
        assert_eq!(
            DxgiFormat::R8G8B8A8UnormSrgb.uav_compatible(),
            DxgiFormat::R8G8B8A8Unorm
        );
        assert_eq!(DxgiFormat::R32Uint.uav_compatible(), DxgiFormat::R32Uint);
    }

    #[test]
    fn test_gl_image_bindings() {
        assert_eq!(PixelFormat::Rgba8Unorm.gl_image_binding(), Some(gl::RGBA8));
        assert_eq!(PixelFormat::R32Uint.gl_image_binding(), Some(gl::R32UI));
        assert_eq!(PixelFormat::Rgba8Srgb.gl_image_binding(), None);
        assert_eq!(PixelFormat::R32Float.gl_image_binding(), None);
        assert_eq!(PixelFormat::A8Unorm.gl_image_binding(), None);
    }

    #[test]
    fn test_uint_format_uploads_floats() {
        assert_eq!(PixelFormat::R32Uint.upload_sample_type(), SampleType::Float32);
        assert_eq!(PixelFormat::R32Uint.gl().data_type, gl::UNSIGNED_INT);
        assert_eq!(PixelFormat::Rgba8Srgb.upload_bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::A8Unorm.upload_bytes_per_pixel(), 1);
    }

    #[test]
    fn test_packed_row_bytes() {
        let spec = TextureSpec::new(PixelFormat::Rgba8Unorm, 100, 10);
        assert_eq!(spec.packed_row_bytes(SampleType::Unorm8), 400);
        assert_eq!(spec.packed_row_bytes(SampleType::Float32), 1600);
    }
}
