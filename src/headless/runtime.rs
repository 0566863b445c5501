//! In-process stand-ins for the runtime's post-process and session interfaces.
//!
//! Both are cheap handles over shared state, so a clone can be kept as a probe
//! after another handle is boxed into [`PostProcess`](crate::postprocess::PostProcess)
//! or [`AppLogic`](crate::app::AppLogic).

use super::store::{SoftTexture, TextureStore};
use crate::app::{DeviceStatus, FrameTiming, Session, SessionEvent};
use crate::backend::{Backend, NativeTexture};
use crate::postprocess::{PostProcessApi, RuntimeError, ShaderBlob, ShaderParams, ShaderSource};
use crate::texture::PixelFormat;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn call_failed(call: &'static str, message: impl Into<String>) -> RuntimeError {
    RuntimeError::Call {
        call,
        code: -1,
        message: message.into(),
    }
}

/// Errors writing a slot snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Input slot {0} has no texture")]
    NoTexture(u32),
    #[error("Failed to write snapshot: {0}")]
    Image(#[from] image::ImageError),
}

/// Counters of post-process calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostProcessCounters {
    pub loads: u64,
    pub unloads: u64,
    pub locks: u64,
    pub unlocks: u64,
    pub applies: u64,
    pub enable_calls: u64,
    /// Slots reported by the last `apply_input_buffers`.
    pub last_updated_slots: Vec<u32>,
    /// Last non-empty constant block.
    pub last_constants: Vec<u8>,
}

#[derive(Debug)]
struct Slot {
    texture: NativeTexture,
    locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedShader {
    pub backend: Backend,
    pub source: ShaderSource,
}

#[derive(Debug, Default)]
struct PostProcessState {
    loaded: Option<(LoadedShader, ShaderParams)>,
    enabled: bool,
    slots: Vec<Slot>,
    unsupported: HashSet<(Backend, PixelFormat)>,
    fail_load: bool,
    counters: PostProcessCounters,
}

/// Post-process runtime keeping input slots in a [`TextureStore`].
#[derive(Debug, Clone)]
pub struct HeadlessPostProcess {
    store: TextureStore,
    state: Arc<Mutex<PostProcessState>>,
}

impl HeadlessPostProcess {
    pub fn new(store: TextureStore) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(PostProcessState::default())),
        }
    }

    /// Report `format` as unsupported on `backend`.
    pub fn reject_format(&self, backend: Backend, format: PixelFormat) {
        lock(&self.state).unsupported.insert((backend, format));
    }

    /// Make every following `load_shader` fail.
    pub fn fail_loads(&self, fail: bool) {
        lock(&self.state).fail_load = fail;
    }

    pub fn loaded(&self) -> Option<LoadedShader> {
        lock(&self.state).loaded.as_ref().map(|(shader, _)| *shader)
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    pub fn counters(&self) -> PostProcessCounters {
        lock(&self.state).counters.clone()
    }

    /// Whether any input slot is currently locked.
    pub fn any_locked(&self) -> bool {
        lock(&self.state).slots.iter().any(|slot| slot.locked)
    }

    pub fn slot_texture(&self, slot: u32) -> Option<NativeTexture> {
        lock(&self.state)
            .slots
            .get(slot as usize)
            .map(|slot| slot.texture)
    }

    /// Current content of an input slot.
    pub fn read_slot(&self, slot: u32) -> Option<SoftTexture> {
        self.slot_texture(slot)
            .and_then(|texture| self.store.read(texture))
    }

    /// Write an input slot as a PNG image.
    pub fn save_slot_png(&self, slot: u32, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let texture = self.read_slot(slot).ok_or(SnapshotError::NoTexture(slot))?;
        let image = to_rgba_image(&texture);
        image.save(path.as_ref())?;
        log::info!("Saved input slot {} to {}", slot, path.as_ref().display());
        Ok(())
    }

    fn release_slots(&self, state: &mut PostProcessState) {
        for slot in state.slots.drain(..) {
            self.store.remove(slot.texture);
        }
    }
}

/// Convert a slot texture to 8-bit RGBA for viewing.
fn to_rgba_image(texture: &SoftTexture) -> image::RgbaImage {
    let spec = texture.spec;
    image::RgbaImage::from_fn(spec.width, spec.height, |x, y| {
        let texel = texture.texel(x, y);
        let word = || [texel[0], texel[1], texel[2], texel[3]];
        let gray = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let value = match spec.format {
            PixelFormat::Rgba8Unorm | PixelFormat::Rgba8Srgb => word(),
            PixelFormat::A8Unorm => [texel[0], texel[0], texel[0], 255],
            PixelFormat::R32Float => {
                let v = gray(f32::from_ne_bytes(word()));
                [v, v, v, 255]
            }
            PixelFormat::R32Uint => {
                let v = gray(f32::from_bits(u32::from_ne_bytes(word())));
                [v, v, v, 255]
            }
        };
        image::Rgba(value)
    })
}

impl PostProcessApi for HeadlessPostProcess {
    fn load_shader(
        &mut self,
        backend: Backend,
        shader: &ShaderBlob,
        params: &ShaderParams,
    ) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        if state.fail_load {
            return Err(call_failed("load_shader", "shader rejected"));
        }
        if state.loaded.is_some() {
            return Err(call_failed("load_shader", "a shader is already loaded"));
        }
        if shader.bytes.is_empty() {
            return Err(call_failed("load_shader", "empty shader"));
        }
        state.slots = params
            .textures
            .iter()
            .map(|spec| Slot {
                texture: self.store.create(*spec),
                locked: false,
            })
            .collect();
        state.loaded = Some((
            LoadedShader {
                backend,
                source: shader.source,
            },
            params.clone(),
        ));
        state.counters.loads += 1;
        Ok(())
    }

    fn unload_shader(&mut self) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        if state.loaded.take().is_none() {
            return Err(RuntimeError::NotLoaded);
        }
        state.enabled = false;
        self.release_slots(&mut state);
        state.counters.unloads += 1;
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        if state.loaded.is_none() {
            return Err(RuntimeError::NotLoaded);
        }
        state.enabled = enabled;
        state.counters.enable_calls += 1;
        Ok(())
    }

    fn supports_texture_format(&self, backend: Backend, format: PixelFormat) -> bool {
        !lock(&self.state).unsupported.contains(&(backend, format))
    }

    fn lock_texture(&mut self, slot: u32) -> Result<NativeTexture, RuntimeError> {
        let mut state = lock(&self.state);
        if state.loaded.is_none() {
            return Err(RuntimeError::NotLoaded);
        }
        let entry = state
            .slots
            .get_mut(slot as usize)
            .ok_or(RuntimeError::InvalidSlot(slot))?;
        if entry.locked {
            return Err(RuntimeError::AlreadyLocked(slot));
        }
        entry.locked = true;
        let texture = entry.texture;
        state.counters.locks += 1;
        Ok(texture)
    }

    fn unlock_texture(&mut self, slot: u32) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        let entry = state
            .slots
            .get_mut(slot as usize)
            .ok_or(RuntimeError::InvalidSlot(slot))?;
        if !entry.locked {
            return Err(RuntimeError::NotLocked(slot));
        }
        entry.locked = false;
        state.counters.unlocks += 1;
        Ok(())
    }

    fn apply_input_buffers(
        &mut self,
        constants: &[u8],
        updated_slots: &[u32],
    ) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        let Some((_, params)) = state.loaded.as_ref() else {
            return Err(RuntimeError::NotLoaded);
        };
        if !constants.is_empty() && constants.len() != params.constant_buffer_size {
            return Err(call_failed(
                "apply_input_buffers",
                format!("constant block of {} bytes", constants.len()),
            ));
        }
        for &slot in updated_slots {
            match state.slots.get(slot as usize) {
                None => return Err(RuntimeError::InvalidSlot(slot)),
                Some(entry) if entry.locked => return Err(RuntimeError::AlreadyLocked(slot)),
                Some(_) => {}
            }
        }
        if !constants.is_empty() {
            state.counters.last_constants = constants.to_vec();
        }
        state.counters.last_updated_slots = updated_slots.to_vec();
        state.counters.applies += 1;
        Ok(())
    }
}

#[derive(Debug)]
struct SessionState {
    events: VecDeque<SessionEvent>,
    available: Option<bool>,
    video_render: Option<bool>,
    video_render_calls: u64,
    property_syncs: u64,
    frame_number: i64,
    frame_delta: f64,
}

/// Session with a scripted event queue and a fixed frame rate.
#[derive(Debug, Clone)]
pub struct HeadlessSession {
    state: Arc<Mutex<SessionState>>,
}

impl HeadlessSession {
    pub fn new(available: bool, frame_delta: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                events: VecDeque::new(),
                available: Some(available),
                video_render: None,
                video_render_calls: 0,
                property_syncs: 0,
                frame_number: 0,
                frame_delta,
            })),
        }
    }

    /// Change availability and queue the matching device event.
    pub fn set_available(&self, available: bool) {
        let mut state = lock(&self.state);
        state.available = Some(available);
        let status = if available {
            DeviceStatus::Connected
        } else {
            DeviceStatus::Disconnected
        };
        state
            .events
            .push_back(SessionEvent::MixedRealityDevice(status));
    }

    pub fn push_event(&self, event: SessionEvent) {
        lock(&self.state).events.push_back(event);
    }

    /// Last value passed to `set_video_render`.
    pub fn video_render(&self) -> Option<bool> {
        lock(&self.state).video_render
    }

    pub fn video_render_calls(&self) -> u64 {
        lock(&self.state).video_render_calls
    }

    pub fn property_syncs(&self) -> u64 {
        lock(&self.state).property_syncs
    }

    pub fn frame_number(&self) -> i64 {
        lock(&self.state).frame_number
    }
}

impl Session for HeadlessSession {
    fn poll_event(&mut self) -> Result<Option<SessionEvent>, RuntimeError> {
        Ok(lock(&self.state).events.pop_front())
    }

    fn sync_properties(&mut self) -> Result<(), RuntimeError> {
        lock(&self.state).property_syncs += 1;
        Ok(())
    }

    fn mixed_reality_available(&self) -> Option<bool> {
        lock(&self.state).available
    }

    fn set_video_render(&mut self, enabled: bool) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        state.video_render = Some(enabled);
        state.video_render_calls += 1;
        Ok(())
    }

    fn sync_frame(&mut self) -> Result<FrameTiming, RuntimeError> {
        let mut state = lock(&self.state);
        state.frame_number += 1;
        Ok(FrameTiming {
            delta_time: state.frame_delta,
            frame_number: state.frame_number,
        })
    }
}
