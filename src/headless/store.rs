//! Host-memory textures and fault injection shared by the software devices.

use crate::backend::{DeviceError, NativeTexture};
use crate::texture::{GenerateKernel, PixelFormat, TextureSpec};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A texture held in host memory, rows tightly packed.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftTexture {
    pub spec: TextureSpec,
    pub data: Vec<u8>,
}

impl SoftTexture {
    fn new(spec: TextureSpec) -> Self {
        let len = spec.width as usize * spec.height as usize * bytes_per_texel(spec.format);
        Self {
            spec,
            data: vec![0; len],
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.spec.width as usize * bytes_per_texel(self.spec.format)
    }

    pub fn texel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = bytes_per_texel(self.spec.format);
        let offset = y as usize * self.row_bytes() + x as usize * bpp;
        &self.data[offset..offset + bpp]
    }

    /// Store a normalized kernel value at `(x, y)`.
    pub fn store(&mut self, x: u32, y: u32, value: [f32; 4]) {
        let bpp = bytes_per_texel(self.spec.format);
        let offset = y as usize * self.row_bytes() + x as usize * bpp;
        encode_texel(self.spec.format, value, &mut self.data[offset..offset + bpp]);
    }

    /// Run `kernel` over every texel.
    pub fn run_kernel(&mut self, kernel: &GenerateKernel, seed: [f32; 4]) {
        let (width, height) = (self.spec.width, self.spec.height);
        for y in 0..height {
            for x in 0..width {
                self.store(x, y, kernel.evaluate(x, y, width, height, seed));
            }
        }
    }
}

/// Native texel size; generated uploads use the same sizes.
pub fn bytes_per_texel(format: PixelFormat) -> usize {
    format.dxgi().bytes_per_pixel()
}

/// Encode a normalized value the way a typed store of `format` would.
///
/// Single-channel formats keep the first component. `R32Uint` keeps the float
/// bits, matching what the generation kernels write.
pub fn encode_texel(format: PixelFormat, value: [f32; 4], out: &mut [u8]) {
    let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    match format {
        PixelFormat::Rgba8Unorm | PixelFormat::Rgba8Srgb => {
            for (byte, v) in out.iter_mut().zip(value) {
                *byte = unorm(v);
            }
        }
        PixelFormat::A8Unorm => out[0] = unorm(value[0]),
        PixelFormat::R32Float => out.copy_from_slice(&value[0].to_ne_bytes()),
        PixelFormat::R32Uint => out.copy_from_slice(&value[0].to_bits().to_ne_bytes()),
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: u64,
    textures: HashMap<u64, SoftTexture>,
}

/// Shared pool of host-memory textures addressed by [`NativeTexture`] handles.
#[derive(Debug, Clone, Default)]
pub struct TextureStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl TextureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, spec: TextureSpec) -> NativeTexture {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.textures.insert(id, SoftTexture::new(spec));
        NativeTexture(id)
    }

    pub fn remove(&self, texture: NativeTexture) -> Option<SoftTexture> {
        self.lock().textures.remove(&texture.0)
    }

    /// Copy of the texture's current content.
    pub fn read(&self, texture: NativeTexture) -> Option<SoftTexture> {
        self.lock().textures.get(&texture.0).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` on the texture, or fail with an invalid-handle error.
    pub fn with_texture<T>(
        &self,
        texture: NativeTexture,
        f: impl FnOnce(&mut SoftTexture) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut inner = self.lock();
        let entry = inner
            .textures
            .get_mut(&texture.0)
            .ok_or(DeviceError::InvalidHandle {
                kind: "texture",
                id: texture.0,
            })?;
        f(entry)
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Device calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftOp {
    // immediate
    CreateStaging,
    WriteStaging,
    CopyResource,
    CreateShader,
    CreateView,
    CreateConstants,
    Dispatch,
    // unified
    CreateProgram,
    TexSubImage,
    BindImage,
    UseProgram,
    SetUniform,
    DispatchCompute,
    MemoryBarrier,
    // fenced
    CreateAllocator,
    ResetAllocator,
    CreateList,
    ResetList,
    CopyBufferToTexture,
    CloseList,
    Execute,
    CreateFence,
    Signal,
    Wait,
    CreateUpload,
    MapUpload,
    WriteMapped,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Once,
    Always,
    /// Fail every call after this many successful ones.
    After(u64),
}

/// Programmable failures keyed by [`SoftOp`].
#[derive(Debug, Default)]
pub struct FaultInjector {
    inner: Mutex<FaultState>,
}

#[derive(Debug, Default)]
struct FaultState {
    faults: HashMap<SoftOp, Fault>,
    calls: HashMap<SoftOp, u64>,
}

impl FaultInjector {
    /// Fail the next call of `op` only.
    pub fn fail_once(&self, op: SoftOp) {
        self.lock().faults.insert(op, Fault::Once);
    }

    pub fn fail_always(&self, op: SoftOp) {
        self.lock().faults.insert(op, Fault::Always);
    }

    /// Let `successes` more calls of `op` through, then fail every call.
    pub fn fail_after(&self, op: SoftOp, successes: u64) {
        let mut state = self.lock();
        let made = state.calls.get(&op).copied().unwrap_or(0);
        state.faults.insert(op, Fault::After(made + successes));
    }

    pub fn clear(&self, op: SoftOp) {
        self.lock().faults.remove(&op);
    }

    /// Number of calls of `op` made so far, failed or not.
    pub fn calls(&self, op: SoftOp) -> u64 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Count a call of `op` and fail it if a fault is armed.
    pub fn check(&self, op: SoftOp, call: &'static str) -> Result<(), DeviceError> {
        let mut state = self.lock();
        let made = {
            let count = state.calls.entry(op).or_insert(0);
            *count += 1;
            *count - 1
        };
        let fail = match state.faults.get(&op).copied() {
            None => false,
            Some(Fault::Once) => {
                state.faults.remove(&op);
                true
            }
            Some(Fault::Always) => true,
            Some(Fault::After(limit)) => made >= limit,
        };
        if fail {
            log::debug!("Injected failure in {:?}", op);
            Err(DeviceError::call(call, "injected failure"))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> MutexGuard<'_, FaultState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
