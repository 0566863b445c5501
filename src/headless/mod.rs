//! Headless runtime for tests, benches and demos.
//!
//! Software devices for all three backend families plus in-process stand-ins
//! for the runtime interfaces, wired together by [`HeadlessRig`].

pub mod devices;
pub mod runtime;
pub mod store;

pub use devices::{FencedStats, SoftFencedDevice, SoftImmediateDevice, SoftUnifiedDevice};
pub use runtime::{HeadlessPostProcess, HeadlessSession, LoadedShader, PostProcessCounters, SnapshotError};
pub use store::{FaultInjector, SoftOp, SoftTexture, TextureStore};

use crate::app::{AppError, AppLogic};
use crate::postprocess::{BackendDevices, PostProcess, ShaderLibrary, ShaderSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Headless runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    /// Seconds reported per frame.
    pub frame_delta: f64,
    /// Executed batches the fenced device keeps in flight.
    pub fenced_latency: usize,
    /// Initial mixed-reality availability.
    pub available: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            frame_delta: 1.0 / 90.0,
            fenced_latency: 1,
            available: true,
        }
    }
}

/// Placeholder blobs for every shader source.
pub fn builtin_shaders() -> ShaderLibrary {
    ShaderLibrary::in_memory([
        (ShaderSource::Precompiled, b"DXBC headless".to_vec()),
        (ShaderSource::SourceText, b"// headless effect".to_vec()),
    ])
}

/// Software devices and runtime probes sharing one texture store.
#[derive(Clone)]
pub struct HeadlessRig {
    pub store: TextureStore,
    pub immediate: Arc<SoftImmediateDevice>,
    pub unified: Arc<SoftUnifiedDevice>,
    pub fenced: Arc<SoftFencedDevice>,
    pub runtime: HeadlessPostProcess,
    pub session: HeadlessSession,
}

impl HeadlessRig {
    pub fn new(config: &HeadlessConfig) -> Self {
        let store = TextureStore::new();
        Self {
            immediate: Arc::new(SoftImmediateDevice::new(store.clone())),
            unified: Arc::new(SoftUnifiedDevice::new(store.clone())),
            fenced: Arc::new(SoftFencedDevice::new(store.clone(), config.fenced_latency)),
            runtime: HeadlessPostProcess::new(store.clone()),
            session: HeadlessSession::new(config.available, config.frame_delta),
            store,
        }
    }

    pub fn devices(&self) -> BackendDevices {
        BackendDevices {
            immediate: Some(self.immediate.clone()),
            unified: Some(self.unified.clone()),
            fenced: Some(self.fenced.clone()),
        }
    }

    /// Orchestrator driving this rig's runtime.
    pub fn post_process(&self) -> PostProcess {
        PostProcess::new(
            Box::new(self.runtime.clone()),
            self.devices(),
            builtin_shaders(),
        )
    }

    /// Application wired to this rig's session and runtime.
    pub fn app(&self) -> Result<AppLogic, AppError> {
        AppLogic::new(Box::new(self.session.clone()), self.post_process())
    }
}
