//! Backend texture adapters.
//!
//! An adapter owns the backend resources needed to write a generated pattern
//! into an externally supplied texture, either by uploading CPU-generated data
//! or by dispatching a compute kernel. All three backend families share one
//! contract:
//!
//! - construction prepares the CPU and GPU paths independently; a failed
//!   preparation leaves that path unavailable instead of failing the adapter
//! - [`TextureAdapter::update`] runs the GPU path when requested and ready,
//!   otherwise the CPU path when ready, otherwise skips
//! - a runtime failure makes that path unavailable for the rest of the
//!   adapter's life; there is no retry and no same-call fallback

pub mod fenced;
pub mod immediate;
pub mod unified;

pub use fenced::{align_up, FencedAdapter, FencedDevice, FrameRing, FrameRingConfig};
pub use immediate::{ImmediateAdapter, ImmediateDevice};
pub use unified::{UnifiedAdapter, UnifiedDevice};

use crate::texture::{PatternType, TextureSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Graphics backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Backend {
    /// Immediate-mode device with a single context.
    #[default]
    Immediate,
    /// Unified shader device with image load/store.
    Unified,
    /// Deferred device with command lists and fences.
    Fenced,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Immediate => "immediate",
            Backend::Unified => "unified",
            Backend::Fenced => "fenced",
        };
        f.write_str(name)
    }
}

/// Opaque handle to a backend-native texture owned by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NativeTexture(pub u64);

impl NativeTexture {
    pub const NULL: NativeTexture = NativeTexture(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// The two ways an adapter can produce texture content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationPath {
    Cpu,
    Gpu,
}

/// Whether a generation path may still be attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStatus {
    Ready,
    Unavailable(String),
}

impl PathStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, PathStatus::Ready)
    }
}

/// Readiness of both paths of an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub cpu: PathStatus,
    pub gpu: PathStatus,
}

impl Readiness {
    pub fn path(&self, path: GenerationPath) -> &PathStatus {
        match path {
            GenerationPath::Cpu => &self.cpu,
            GenerationPath::Gpu => &self.gpu,
        }
    }
}

/// Result of a successful [`TextureAdapter::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Generated(GenerationPath),
    /// Neither usable path was available.
    Skipped,
}

/// Failure reported by a backend device call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("{call} failed: {reason}")]
    Call { call: &'static str, reason: String },
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Unknown {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
}

impl DeviceError {
    pub fn call(call: &'static str, reason: impl Into<String>) -> Self {
        DeviceError::Call {
            call,
            reason: reason.into(),
        }
    }
}

/// Errors from adapter construction and updates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("No usable generation path (cpu: {cpu}, gpu: {gpu})")]
    NoUsablePath { cpu: String, gpu: String },
    #[error("{path:?} generation failed: {source}")]
    PathFailed {
        path: GenerationPath,
        #[source]
        source: DeviceError,
    },
    #[error("Texture handle is null")]
    NullTexture,
}

/// Device handle an adapter is constructed on.
#[derive(Clone)]
pub enum BackendDevice {
    Immediate(Arc<dyn ImmediateDevice>),
    Unified(Arc<dyn UnifiedDevice>),
    Fenced(Arc<dyn FencedDevice>),
}

impl BackendDevice {
    pub fn backend(&self) -> Backend {
        match self {
            BackendDevice::Immediate(_) => Backend::Immediate,
            BackendDevice::Unified(_) => Backend::Unified,
            BackendDevice::Fenced(_) => Backend::Fenced,
        }
    }
}

impl fmt::Debug for BackendDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackendDevice({})", self.backend())
    }
}

/// A texture adapter for one of the backend families.
pub enum TextureAdapter {
    Immediate(ImmediateAdapter),
    Unified(UnifiedAdapter),
    Fenced(Box<FencedAdapter>),
}

impl TextureAdapter {
    /// Construct the adapter matching `device`.
    pub fn new(
        pattern: PatternType,
        spec: TextureSpec,
        device: BackendDevice,
    ) -> Result<Self, AdapterError> {
        let adapter = match device {
            BackendDevice::Immediate(device) => {
                TextureAdapter::Immediate(ImmediateAdapter::new(pattern, spec, device)?)
            }
            BackendDevice::Unified(device) => {
                TextureAdapter::Unified(UnifiedAdapter::new(pattern, spec, device)?)
            }
            BackendDevice::Fenced(device) => TextureAdapter::Fenced(Box::new(FencedAdapter::new(
                pattern,
                spec,
                device,
                FrameRingConfig::default(),
            )?)),
        };
        log::info!(
            "Created {} texture adapter: {:?} {}x{} {:?}",
            adapter.backend(),
            spec.format,
            spec.width,
            spec.height,
            pattern
        );
        Ok(adapter)
    }

    /// Write fresh content into `texture`.
    pub fn update(
        &mut self,
        texture: NativeTexture,
        use_gpu: bool,
    ) -> Result<UpdateOutcome, AdapterError> {
        match self {
            TextureAdapter::Immediate(a) => a.update(texture, use_gpu),
            TextureAdapter::Unified(a) => a.update(texture, use_gpu),
            TextureAdapter::Fenced(a) => a.update(texture, use_gpu),
        }
    }

    pub fn readiness(&self) -> Readiness {
        match self {
            TextureAdapter::Immediate(a) => a.readiness(),
            TextureAdapter::Unified(a) => a.readiness(),
            TextureAdapter::Fenced(a) => a.readiness(),
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            TextureAdapter::Immediate(_) => Backend::Immediate,
            TextureAdapter::Unified(_) => Backend::Unified,
            TextureAdapter::Fenced(_) => Backend::Fenced,
        }
    }
}

/// Log the outcome of preparing a path and convert it to a status.
pub(crate) fn prepared<T>(
    backend: Backend,
    path: GenerationPath,
    result: Result<T, DeviceError>,
) -> (Option<T>, PathStatus) {
    match result {
        Ok(resources) => (Some(resources), PathStatus::Ready),
        Err(err) => {
            log::warn!("{} adapter: {:?} path unavailable: {}", backend, path, err);
            (None, PathStatus::Unavailable(err.to_string()))
        }
    }
}

/// Per-adapter readiness flags and the path selection policy.
#[derive(Debug)]
pub(crate) struct PathGate {
    backend: Backend,
    cpu: PathStatus,
    gpu: PathStatus,
}

impl PathGate {
    /// Fails when neither path is usable.
    pub(crate) fn new(
        backend: Backend,
        cpu: PathStatus,
        gpu: PathStatus,
    ) -> Result<Self, AdapterError> {
        match (&cpu, &gpu) {
            (PathStatus::Unavailable(c), PathStatus::Unavailable(g)) => {
                Err(AdapterError::NoUsablePath {
                    cpu: c.clone(),
                    gpu: g.clone(),
                })
            }
            _ => Ok(Self { backend, cpu, gpu }),
        }
    }

    pub(crate) fn readiness(&self) -> Readiness {
        Readiness {
            cpu: self.cpu.clone(),
            gpu: self.gpu.clone(),
        }
    }

    /// Pick the path for this update, or `None` to skip.
    pub(crate) fn select(
        &self,
        texture: NativeTexture,
        use_gpu: bool,
    ) -> Result<Option<GenerationPath>, AdapterError> {
        if texture.is_null() {
            log::error!("{} adapter: texture handle is null", self.backend);
            return Err(AdapterError::NullTexture);
        }
        if use_gpu && self.gpu.is_ready() {
            Ok(Some(GenerationPath::Gpu))
        } else if self.cpu.is_ready() {
            Ok(Some(GenerationPath::Cpu))
        } else {
            log::debug!("{} adapter: skip generate", self.backend);
            Ok(None)
        }
    }

    /// Record the result of running `path`, degrading it on failure.
    pub(crate) fn settle(
        &mut self,
        path: GenerationPath,
        result: Result<(), DeviceError>,
    ) -> Result<UpdateOutcome, AdapterError> {
        match result {
            Ok(()) => Ok(UpdateOutcome::Generated(path)),
            Err(source) => {
                log::error!(
                    "{} adapter: {:?} generation failed, disabling path: {}",
                    self.backend,
                    path,
                    source
                );
                let status = PathStatus::Unavailable(source.to_string());
                match path {
                    GenerationPath::Cpu => self.cpu = status,
                    GenerationPath::Gpu => self.gpu = status,
                }
                Err(AdapterError::PathFailed { path, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(cpu: bool, gpu: bool) -> PathGate {
        let status = |ok: bool| {
            if ok {
                PathStatus::Ready
            } else {
                PathStatus::Unavailable("test".into())
            }
        };
        PathGate::new(Backend::Immediate, status(cpu), status(gpu)).unwrap()
    }

    #[test]
    fn test_gate_requires_one_path() {
        let result = PathGate::new(
            Backend::Unified,
            PathStatus::Unavailable("a".into()),
            PathStatus::Unavailable("b".into()),
        );
        assert!(matches!(result, Err(AdapterError::NoUsablePath { .. })));
    }

    #[test]
    fn test_gate_selection() {
        let tex = NativeTexture(1);
        assert_eq!(gate(true, true).select(tex, true).unwrap(), Some(GenerationPath::Gpu));
        assert_eq!(gate(true, true).select(tex, false).unwrap(), Some(GenerationPath::Cpu));
        assert_eq!(gate(true, false).select(tex, true).unwrap(), Some(GenerationPath::Cpu));
        assert_eq!(gate(false, true).select(tex, false).unwrap(), None);
    }

    #[test]
    fn test_gate_rejects_null_texture() {
        assert_eq!(
            gate(true, true).select(NativeTexture::NULL, true),
            Err(AdapterError::NullTexture)
        );
    }

    #[test]
    fn test_settle_degrades_only_failed_path() {
        let mut gate = gate(true, true);
        let err = gate.settle(GenerationPath::Gpu, Err(DeviceError::call("Dispatch", "lost")));
        assert!(matches!(err, Err(AdapterError::PathFailed { path: GenerationPath::Gpu, .. })));
        let readiness = gate.readiness();
        assert!(readiness.cpu.is_ready());
        assert!(!readiness.gpu.is_ready());
    }
}
