//! Effect shader sources and parameters.
//!
//! Shader blobs are opaque to this crate; they are loaded by file name and
//! handed to the runtime unchanged.

use super::constants::PostProcessConstants;
use crate::texture::{PixelFormat, TextureSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where the effect shader comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShaderSource {
    #[default]
    None,
    /// Precompiled bytecode.
    Precompiled,
    /// Source text compiled by the runtime.
    SourceText,
}

impl ShaderSource {
    pub fn file_name(self) -> &'static str {
        match self {
            ShaderSource::None => "",
            ShaderSource::Precompiled => "vstPostProcess.cso",
            ShaderSource::SourceText => "vstPostProcess.hlsl",
        }
    }
}

/// A loaded shader blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBlob {
    pub source: ShaderSource,
    pub bytes: Vec<u8>,
}

/// Errors loading shader blobs.
#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("Failed to read shader {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Shader {0:?} not found")]
    NotFound(ShaderSource),
    #[error("Shader {0:?} is empty")]
    Empty(ShaderSource),
}

/// Source of shader blobs.
#[derive(Debug, Clone)]
pub enum ShaderLibrary {
    /// Blobs read from files in a directory.
    Directory(PathBuf),
    InMemory(HashMap<ShaderSource, Vec<u8>>),
}

impl ShaderLibrary {
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        ShaderLibrary::Directory(dir.as_ref().to_path_buf())
    }

    pub fn in_memory(blobs: impl IntoIterator<Item = (ShaderSource, Vec<u8>)>) -> Self {
        ShaderLibrary::InMemory(blobs.into_iter().collect())
    }

    /// Load the blob for `source`; `ShaderSource::None` yields `None`.
    pub fn load(&self, source: ShaderSource) -> Result<Option<ShaderBlob>, ShaderError> {
        if source == ShaderSource::None {
            return Ok(None);
        }
        let bytes = match self {
            ShaderLibrary::Directory(dir) => {
                let path = dir.join(source.file_name());
                std::fs::read(&path).map_err(|source| ShaderError::Io { path, source })?
            }
            ShaderLibrary::InMemory(blobs) => blobs
                .get(&source)
                .cloned()
                .ok_or(ShaderError::NotFound(source))?,
        };
        if bytes.is_empty() {
            return Err(ShaderError::Empty(source));
        }
        log::info!("Loaded shader {} ({} bytes)", source.file_name(), bytes.len());
        Ok(Some(ShaderBlob { source, bytes }))
    }
}

/// Parameters the runtime needs to run the effect shader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderParams {
    pub block_size: u32,
    pub sampling_margin: u32,
    pub constant_buffer_size: usize,
    /// Input texture slots the shader samples.
    pub textures: Vec<TextureSpec>,
}

impl ShaderParams {
    /// Parameters with a single 256x256 input texture of `format`.
    pub fn with_input_format(format: PixelFormat) -> Self {
        Self {
            textures: vec![TextureSpec::new(format, 256, 256)],
            ..Self::default()
        }
    }
}

impl Default for ShaderParams {
    fn default() -> Self {
        Self {
            block_size: 8,
            sampling_margin: 3,
            constant_buffer_size: std::mem::size_of::<PostProcessConstants>(),
            textures: vec![TextureSpec::new(PixelFormat::Rgba8Unorm, 256, 256)],
        }
    }
}
