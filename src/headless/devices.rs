//! Software implementations of the three device families.
//!
//! Each device keeps its resources in host memory behind a mutex, writes into
//! a shared [`TextureStore`], and checks a [`FaultInjector`] before every
//! fallible call.

use super::store::{bytes_per_texel, FaultInjector, SoftOp, TextureStore};
use crate::backend::fenced::{
    CommandAllocator, CommandList, Fence, FencedResource, PlacedFootprint, UploadBuffer,
};
use crate::backend::immediate::{
    ComputeShader, ConstantBuffer, ImmediateResource, StagingTexture, UnorderedAccessView,
};
use crate::backend::unified::{ComputeProgram, SEED_UNIFORM_LOCATION};
use crate::backend::{
    align_up, DeviceError, FencedDevice, ImmediateDevice, NativeTexture, UnifiedDevice,
};
use crate::texture::{gl, DxgiFormat, GenerateKernel, NoiseSeed};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Row alignment of mapped staging textures.
pub const STAGING_ROW_ALIGNMENT: u64 = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn invalid(kind: &'static str, id: u64) -> DeviceError {
    DeviceError::InvalidHandle { kind, id }
}

// ---------------------------------------------------------------------------
// Immediate
// ---------------------------------------------------------------------------

struct Staging {
    format: DxgiFormat,
    width: u32,
    height: u32,
    row_pitch: usize,
    data: Vec<u8>,
}

#[derive(Default)]
struct ImmediateState {
    next_id: u64,
    staging: HashMap<u64, Staging>,
    shaders: HashMap<u64, (GenerateKernel, DxgiFormat)>,
    views: HashMap<u64, (NativeTexture, DxgiFormat)>,
    constants: HashMap<u64, Vec<u8>>,
    dispatches: u64,
    copies: u64,
}

impl ImmediateState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn live(&self) -> usize {
        self.staging.len() + self.shaders.len() + self.views.len() + self.constants.len()
    }
}

/// Immediate-mode device executing every call synchronously on the host.
pub struct SoftImmediateDevice {
    textures: TextureStore,
    faults: FaultInjector,
    state: Mutex<ImmediateState>,
}

impl SoftImmediateDevice {
    pub fn new(textures: TextureStore) -> Self {
        Self {
            textures,
            faults: FaultInjector::default(),
            state: Mutex::new(ImmediateState::default()),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn dispatches(&self) -> u64 {
        lock(&self.state).dispatches
    }

    pub fn copies(&self) -> u64 {
        lock(&self.state).copies
    }

    /// Resources created and not yet released.
    pub fn live_resources(&self) -> usize {
        lock(&self.state).live()
    }
}

impl ImmediateDevice for SoftImmediateDevice {
    fn create_staging_texture(
        &self,
        format: DxgiFormat,
        width: u32,
        height: u32,
    ) -> Result<StagingTexture, DeviceError> {
        self.faults.check(SoftOp::CreateStaging, "CreateTexture2D")?;
        let row_pitch = align_up(
            width as u64 * format.bytes_per_pixel() as u64,
            STAGING_ROW_ALIGNMENT,
        ) as usize;
        let mut state = lock(&self.state);
        let id = state.next();
        state.staging.insert(
            id,
            Staging {
                format,
                width,
                height,
                row_pitch,
                data: vec![0; row_pitch * height as usize],
            },
        );
        Ok(StagingTexture(id))
    }

    fn write_staging(
        &self,
        staging: StagingTexture,
        write: &mut dyn FnMut(&mut [u8], usize),
    ) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::WriteStaging, "Map")?;
        let mut state = lock(&self.state);
        let entry = state
            .staging
            .get_mut(&staging.0)
            .ok_or_else(|| invalid("staging texture", staging.0))?;
        write(&mut entry.data, entry.row_pitch);
        Ok(())
    }

    fn copy_resource(&self, dst: NativeTexture, src: StagingTexture) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::CopyResource, "CopyResource")?;
        let mut state = lock(&self.state);
        let staging = state
            .staging
            .get(&src.0)
            .ok_or_else(|| invalid("staging texture", src.0))?;
        self.textures.with_texture(dst, |texture| {
            let spec = texture.spec;
            if spec.format.dxgi() != staging.format
                || spec.width != staging.width
                || spec.height != staging.height
            {
                return Err(DeviceError::call("CopyResource", "resource mismatch"));
            }
            let row = texture.row_bytes();
            for y in 0..spec.height as usize {
                let src_row = &staging.data[y * staging.row_pitch..y * staging.row_pitch + row];
                texture.data[y * row..(y + 1) * row].copy_from_slice(src_row);
            }
            Ok(())
        })?;
        state.copies += 1;
        Ok(())
    }

    fn create_compute_shader(
        &self,
        kernel: &GenerateKernel,
        uav_format: DxgiFormat,
    ) -> Result<ComputeShader, DeviceError> {
        self.faults.check(SoftOp::CreateShader, "CreateComputeShader")?;
        let mut state = lock(&self.state);
        let id = state.next();
        state.shaders.insert(id, (*kernel, uav_format));
        Ok(ComputeShader(id))
    }

    fn create_unordered_access_view(
        &self,
        texture: NativeTexture,
        format: DxgiFormat,
    ) -> Result<UnorderedAccessView, DeviceError> {
        self.faults.check(SoftOp::CreateView, "CreateUnorderedAccessView")?;
        let native = self.textures.with_texture(texture, |t| Ok(t.spec.format.dxgi()))?;
        // Views may drop the gamma encoding but not change the layout.
        if native.uav_compatible() != format.uav_compatible() {
            return Err(DeviceError::call(
                "CreateUnorderedAccessView",
                format!("{:?} view of a {:?} texture", format, native),
            ));
        }
        let mut state = lock(&self.state);
        let id = state.next();
        state.views.insert(id, (texture, format));
        Ok(UnorderedAccessView(id))
    }

    fn create_constant_buffer(&self, data: &[u8]) -> Result<ConstantBuffer, DeviceError> {
        self.faults.check(SoftOp::CreateConstants, "CreateBuffer")?;
        let mut state = lock(&self.state);
        let id = state.next();
        state.constants.insert(id, data.to_vec());
        Ok(ConstantBuffer(id))
    }

    fn dispatch(
        &self,
        shader: ComputeShader,
        target: UnorderedAccessView,
        constants: Option<ConstantBuffer>,
        groups: [u32; 3],
    ) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::Dispatch, "Dispatch")?;
        let mut state = lock(&self.state);
        let (kernel, shader_format) = *state
            .shaders
            .get(&shader.0)
            .ok_or_else(|| invalid("compute shader", shader.0))?;
        let (texture, view_format) = *state
            .views
            .get(&target.0)
            .ok_or_else(|| invalid("unordered access view", target.0))?;
        if shader_format != view_format {
            return Err(DeviceError::call("Dispatch", "view format differs from shader"));
        }
        let seed = match constants {
            Some(buffer) => {
                let bytes = state
                    .constants
                    .get(&buffer.0)
                    .ok_or_else(|| invalid("constant buffer", buffer.0))?;
                bytemuck::try_pod_read_unaligned::<NoiseSeed>(bytes)
                    .map_err(|err| DeviceError::call("Dispatch", err.to_string()))?
                    .seed
            }
            None if kernel.uses_seed() => {
                return Err(DeviceError::call("Dispatch", "seed constants not bound"));
            }
            None => [0.0; 4],
        };

        let size = GenerateKernel::WORKGROUP_SIZE;
        self.textures.with_texture(texture, |t| {
            let (width, height) = (t.spec.width, t.spec.height);
            for y in 0..(groups[1] * size).min(height) {
                for x in 0..(groups[0] * size).min(width) {
                    t.store(x, y, kernel.evaluate(x, y, width, height, seed));
                }
            }
            Ok(())
        })?;
        state.dispatches += 1;
        Ok(())
    }

    fn release(&self, resource: ImmediateResource) {
        let mut state = lock(&self.state);
        let removed = match resource {
            ImmediateResource::Staging(h) => state.staging.remove(&h.0).is_some(),
            ImmediateResource::Shader(h) => state.shaders.remove(&h.0).is_some(),
            ImmediateResource::View(h) => state.views.remove(&h.0).is_some(),
            ImmediateResource::Constants(h) => state.constants.remove(&h.0).is_some(),
        };
        if !removed {
            log::warn!("Release of unknown resource {:?}", resource);
        }
    }
}

// ---------------------------------------------------------------------------
// Unified
// ---------------------------------------------------------------------------

#[derive(Default)]
struct UnifiedState {
    next_id: u64,
    programs: HashMap<u64, (GenerateKernel, u32)>,
    current: Option<u64>,
    image: Option<(NativeTexture, u32)>,
    uniforms: HashMap<i32, [f32; 4]>,
    uploads: u64,
    dispatches: u64,
    barriers: u64,
}

/// Unified shader device with image load/store, executed on the host.
pub struct SoftUnifiedDevice {
    textures: TextureStore,
    faults: FaultInjector,
    state: Mutex<UnifiedState>,
}

impl SoftUnifiedDevice {
    pub fn new(textures: TextureStore) -> Self {
        Self {
            textures,
            faults: FaultInjector::default(),
            state: Mutex::new(UnifiedState::default()),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn uploads(&self) -> u64 {
        lock(&self.state).uploads
    }

    pub fn dispatches(&self) -> u64 {
        lock(&self.state).dispatches
    }

    pub fn barriers(&self) -> u64 {
        lock(&self.state).barriers
    }

    pub fn live_programs(&self) -> usize {
        lock(&self.state).programs.len()
    }

    /// Whether a program is left bound.
    pub fn program_bound(&self) -> bool {
        lock(&self.state).current.is_some()
    }
}

impl UnifiedDevice for SoftUnifiedDevice {
    fn create_compute_program(
        &self,
        kernel: &GenerateKernel,
        image_format: u32,
    ) -> Result<ComputeProgram, DeviceError> {
        self.faults.check(SoftOp::CreateProgram, "glLinkProgram")?;
        if image_format != gl::RGBA8 && image_format != gl::R32UI {
            return Err(DeviceError::call(
                "glLinkProgram",
                format!("image format {:#x} is not writable", image_format),
            ));
        }
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;
        state.programs.insert(id, (*kernel, image_format));
        Ok(ComputeProgram(id))
    }

    fn delete_program(&self, program: ComputeProgram) {
        let mut state = lock(&self.state);
        state.programs.remove(&program.0);
        if state.current == Some(program.0) {
            state.current = None;
        }
    }

    fn tex_sub_image_2d(
        &self,
        texture: NativeTexture,
        width: u32,
        height: u32,
        format: u32,
        data_type: u32,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::TexSubImage, "glTexSubImage2D")?;
        self.textures.with_texture(texture, |t| {
            let native = t.spec.format.gl();
            if (width, height) != (t.spec.width, t.spec.height)
                || format != native.base
                || data_type != native.data_type
            {
                return Err(DeviceError::call("glTexSubImage2D", "GL_INVALID_OPERATION"));
            }
            if data.len() < t.data.len() {
                return Err(DeviceError::call("glTexSubImage2D", "upload too small"));
            }
            let len = t.data.len();
            t.data.copy_from_slice(&data[..len]);
            Ok(())
        })?;
        lock(&self.state).uploads += 1;
        Ok(())
    }

    fn bind_image_texture(
        &self,
        unit: u32,
        texture: NativeTexture,
        access: u32,
        format: u32,
    ) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::BindImage, "glBindImageTexture")?;
        if unit != 0 || access != gl::WRITE_ONLY {
            return Err(DeviceError::call("glBindImageTexture", "GL_INVALID_VALUE"));
        }
        let binding = self
            .textures
            .with_texture(texture, |t| Ok(t.spec.format.gl_image_binding()))?;
        if binding != Some(format) {
            return Err(DeviceError::call("glBindImageTexture", "GL_INVALID_OPERATION"));
        }
        lock(&self.state).image = Some((texture, format));
        Ok(())
    }

    fn use_program(&self, program: Option<ComputeProgram>) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::UseProgram, "glUseProgram")?;
        let mut state = lock(&self.state);
        if let Some(program) = program {
            if !state.programs.contains_key(&program.0) {
                return Err(invalid("program", program.0));
            }
        }
        state.current = program.map(|p| p.0);
        Ok(())
    }

    fn set_uniform_vec4(&self, location: i32, value: [f32; 4]) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::SetUniform, "glUniform4fv")?;
        let mut state = lock(&self.state);
        if state.current.is_none() {
            return Err(DeviceError::call("glUniform4fv", "no program in use"));
        }
        state.uniforms.insert(location, value);
        Ok(())
    }

    fn dispatch_compute(&self, groups: [u32; 3]) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::DispatchCompute, "glDispatchCompute")?;
        let mut state = lock(&self.state);
        let program = state
            .current
            .ok_or_else(|| DeviceError::call("glDispatchCompute", "no program in use"))?;
        let (kernel, image_format) = state.programs[&program];
        let (texture, bound_format) = state
            .image
            .ok_or_else(|| DeviceError::call("glDispatchCompute", "no image bound"))?;
        if bound_format != image_format {
            return Err(DeviceError::call("glDispatchCompute", "image format mismatch"));
        }
        let seed = match state.uniforms.get(&SEED_UNIFORM_LOCATION) {
            Some(seed) => *seed,
            None if kernel.uses_seed() => {
                return Err(DeviceError::call("glDispatchCompute", "seed uniform unset"));
            }
            None => [0.0; 4],
        };

        // One invocation per group.
        self.textures.with_texture(texture, |t| {
            let (width, height) = (t.spec.width, t.spec.height);
            for y in 0..groups[1].min(height) {
                for x in 0..groups[0].min(width) {
                    t.store(x, y, kernel.evaluate(x, y, width, height, seed));
                }
            }
            Ok(())
        })?;
        state.dispatches += 1;
        Ok(())
    }

    fn memory_barrier(&self, _barriers: u32) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::MemoryBarrier, "glMemoryBarrier")?;
        lock(&self.state).barriers += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fenced
// ---------------------------------------------------------------------------

/// Counters observed by fenced-device tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FencedStats {
    pub executions: u64,
    pub retired: u64,
    pub signals: u64,
    /// Calls to `wait_for_value` that had to block.
    pub blocking_waits: u64,
    /// Allocator resets or upload writes racing with unretired GPU work.
    pub hazards: u64,
}

#[derive(Debug, Clone, Copy)]
struct PendingCopy {
    allocator: u64,
    dst: NativeTexture,
    src: u64,
    footprint: PlacedFootprint,
}

impl PendingCopy {
    fn len(&self) -> u64 {
        self.footprint.row_pitch as u64 * self.footprint.height as u64
    }

    fn overlaps(&self, buffer: u64, offset: u64, len: u64) -> bool {
        let start = self.footprint.offset;
        self.src == buffer && offset < start + self.len() && start < offset + len
    }
}

enum GpuWork {
    Batch(Vec<PendingCopy>),
    Signal { fence: u64, value: u64 },
}

struct ListState {
    allocator: u64,
    open: bool,
    recorded: Vec<PendingCopy>,
}

struct UploadState {
    data: Vec<u8>,
    mapped: bool,
}

struct FencedState {
    next_id: u64,
    latency: usize,
    allocators: HashSet<u64>,
    lists: HashMap<u64, ListState>,
    fences: HashMap<u64, u64>,
    uploads: HashMap<u64, UploadState>,
    queue: VecDeque<GpuWork>,
    stats: FencedStats,
}

impl FencedState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn queued_batches(&self) -> usize {
        self.queue
            .iter()
            .filter(|work| matches!(work, GpuWork::Batch(_)))
            .count()
    }

    fn pending_copies(&self) -> impl Iterator<Item = &PendingCopy> {
        self.queue.iter().flat_map(|work| match work {
            GpuWork::Batch(copies) => copies.as_slice(),
            GpuWork::Signal { .. } => &[],
        })
    }
}

/// Fenced device whose GPU timeline is simulated with a work queue.
///
/// Executed batches stay queued until more than `latency` batches are in
/// flight or a wait needs them; copies read upload memory when they retire,
/// so writes racing ahead of the GPU corrupt the result as they would on
/// hardware.
pub struct SoftFencedDevice {
    textures: TextureStore,
    faults: FaultInjector,
    state: Mutex<FencedState>,
}

impl SoftFencedDevice {
    pub fn new(textures: TextureStore, latency: usize) -> Self {
        Self {
            textures,
            faults: FaultInjector::default(),
            state: Mutex::new(FencedState {
                next_id: 0,
                latency,
                allocators: HashSet::new(),
                lists: HashMap::new(),
                fences: HashMap::new(),
                uploads: HashMap::new(),
                queue: VecDeque::new(),
                stats: FencedStats::default(),
            }),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn stats(&self) -> FencedStats {
        lock(&self.state).stats
    }

    /// Batches executed but not yet retired.
    pub fn in_flight(&self) -> usize {
        lock(&self.state).queued_batches()
    }

    pub fn mapped_buffers(&self) -> usize {
        lock(&self.state).uploads.values().filter(|u| u.mapped).count()
    }

    pub fn live_resources(&self) -> usize {
        let state = lock(&self.state);
        state.allocators.len() + state.lists.len() + state.fences.len() + state.uploads.len()
    }

    /// Retire everything queued.
    pub fn flush(&self) {
        let mut state = lock(&self.state);
        while self.retire_one(&mut state) {}
    }

    fn retire_one(&self, state: &mut FencedState) -> bool {
        let Some(work) = state.queue.pop_front() else {
            return false;
        };
        match work {
            GpuWork::Batch(copies) => {
                for copy in copies {
                    if let Err(err) = self.run_copy(state, &copy) {
                        log::error!("Simulated copy failed: {}", err);
                    }
                }
                state.stats.retired += 1;
            }
            GpuWork::Signal { fence, value } => {
                if let Some(completed) = state.fences.get_mut(&fence) {
                    *completed = (*completed).max(value);
                }
            }
        }
        true
    }

    /// Retire signals at the front and batches beyond the latency.
    fn settle(&self, state: &mut FencedState) {
        loop {
            let retire = match state.queue.front() {
                Some(GpuWork::Signal { .. }) => true,
                Some(GpuWork::Batch(_)) => state.queued_batches() > state.latency,
                None => false,
            };
            if !retire {
                break;
            }
            self.retire_one(state);
        }
    }

    fn run_copy(&self, state: &FencedState, copy: &PendingCopy) -> Result<(), DeviceError> {
        let upload = state
            .uploads
            .get(&copy.src)
            .ok_or_else(|| invalid("upload buffer", copy.src))?;
        let footprint = copy.footprint;
        self.textures.with_texture(copy.dst, |t| {
            let row = t.row_bytes();
            for y in 0..footprint.height as usize {
                let start = footprint.offset as usize + y * footprint.row_pitch as usize;
                t.data[y * row..(y + 1) * row].copy_from_slice(&upload.data[start..start + row]);
            }
            Ok(())
        })
    }
}

impl FencedDevice for SoftFencedDevice {
    fn create_command_allocator(&self) -> Result<CommandAllocator, DeviceError> {
        self.faults.check(SoftOp::CreateAllocator, "CreateCommandAllocator")?;
        let mut state = lock(&self.state);
        let id = state.next();
        state.allocators.insert(id);
        Ok(CommandAllocator(id))
    }

    fn reset_command_allocator(&self, allocator: CommandAllocator) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::ResetAllocator, "CommandAllocator::Reset")?;
        let mut state = lock(&self.state);
        if !state.allocators.contains(&allocator.0) {
            return Err(invalid("command allocator", allocator.0));
        }
        if state.pending_copies().any(|copy| copy.allocator == allocator.0) {
            log::warn!("Command allocator {} reset while in flight", allocator.0);
            state.stats.hazards += 1;
        }
        Ok(())
    }

    fn create_command_list(&self, allocator: CommandAllocator) -> Result<CommandList, DeviceError> {
        self.faults.check(SoftOp::CreateList, "CreateCommandList")?;
        let mut state = lock(&self.state);
        if !state.allocators.contains(&allocator.0) {
            return Err(invalid("command allocator", allocator.0));
        }
        let id = state.next();
        state.lists.insert(
            id,
            ListState {
                allocator: allocator.0,
                open: true,
                recorded: Vec::new(),
            },
        );
        Ok(CommandList(id))
    }

    fn reset_command_list(
        &self,
        list: CommandList,
        allocator: CommandAllocator,
    ) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::ResetList, "CommandList::Reset")?;
        let mut state = lock(&self.state);
        let entry = state
            .lists
            .get_mut(&list.0)
            .ok_or_else(|| invalid("command list", list.0))?;
        if entry.open {
            return Err(DeviceError::call("CommandList::Reset", "list is still open"));
        }
        entry.allocator = allocator.0;
        entry.open = true;
        entry.recorded.clear();
        Ok(())
    }

    fn copy_buffer_to_texture(
        &self,
        list: CommandList,
        dst: NativeTexture,
        src: UploadBuffer,
        footprint: PlacedFootprint,
    ) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::CopyBufferToTexture, "CopyTextureRegion")?;
        let spec = self
            .textures
            .with_texture(dst, |t| Ok(t.spec))?;
        let bpp = bytes_per_texel(spec.format);
        if spec.format.dxgi() != footprint.format
            || (spec.width, spec.height) != (footprint.width, footprint.height)
            || (footprint.row_pitch as usize) < spec.width as usize * bpp
        {
            return Err(DeviceError::call("CopyTextureRegion", "footprint mismatch"));
        }
        let mut state = lock(&self.state);
        let buffer_len = state
            .uploads
            .get(&src.0)
            .ok_or_else(|| invalid("upload buffer", src.0))?
            .data
            .len() as u64;
        let entry = state
            .lists
            .get_mut(&list.0)
            .ok_or_else(|| invalid("command list", list.0))?;
        if !entry.open {
            return Err(DeviceError::call("CopyTextureRegion", "list is closed"));
        }
        let copy = PendingCopy {
            allocator: entry.allocator,
            dst,
            src: src.0,
            footprint,
        };
        if footprint.offset + copy.len() > buffer_len {
            return Err(DeviceError::call("CopyTextureRegion", "footprint exceeds buffer"));
        }
        entry.recorded.push(copy);
        Ok(())
    }

    fn close_command_list(&self, list: CommandList) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::CloseList, "CommandList::Close")?;
        let mut state = lock(&self.state);
        let entry = state
            .lists
            .get_mut(&list.0)
            .ok_or_else(|| invalid("command list", list.0))?;
        if !entry.open {
            return Err(DeviceError::call("CommandList::Close", "list already closed"));
        }
        entry.open = false;
        Ok(())
    }

    fn execute_command_list(&self, list: CommandList) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::Execute, "ExecuteCommandLists")?;
        let mut state = lock(&self.state);
        let entry = state
            .lists
            .get(&list.0)
            .ok_or_else(|| invalid("command list", list.0))?;
        if entry.open {
            return Err(DeviceError::call("ExecuteCommandLists", "list is open"));
        }
        let batch = entry.recorded.clone();
        state.queue.push_back(GpuWork::Batch(batch));
        state.stats.executions += 1;
        self.settle(&mut state);
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<Fence, DeviceError> {
        self.faults.check(SoftOp::CreateFence, "CreateFence")?;
        let mut state = lock(&self.state);
        let id = state.next();
        state.fences.insert(id, initial_value);
        Ok(Fence(id))
    }

    fn signal(&self, fence: Fence, value: u64) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::Signal, "Signal")?;
        let mut state = lock(&self.state);
        if !state.fences.contains_key(&fence.0) {
            return Err(invalid("fence", fence.0));
        }
        state.queue.push_back(GpuWork::Signal {
            fence: fence.0,
            value,
        });
        state.stats.signals += 1;
        self.settle(&mut state);
        Ok(())
    }

    fn completed_value(&self, fence: Fence) -> u64 {
        lock(&self.state).fences.get(&fence.0).copied().unwrap_or(0)
    }

    fn wait_for_value(&self, fence: Fence, value: u64) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::Wait, "WaitForSingleObject")?;
        let mut state = lock(&self.state);
        let completed = |state: &FencedState| state.fences.get(&fence.0).copied();
        match completed(&*state) {
            None => return Err(invalid("fence", fence.0)),
            Some(done) if done >= value => return Ok(()),
            Some(_) => state.stats.blocking_waits += 1,
        }
        while completed(&*state).unwrap_or(0) < value {
            if !self.retire_one(&mut state) {
                return Err(DeviceError::call(
                    "WaitForSingleObject",
                    format!("fence value {} is never signaled", value),
                ));
            }
        }
        Ok(())
    }

    fn create_upload_buffer(&self, size: u64) -> Result<UploadBuffer, DeviceError> {
        self.faults.check(SoftOp::CreateUpload, "CreateCommittedResource")?;
        let mut state = lock(&self.state);
        let id = state.next();
        state.uploads.insert(
            id,
            UploadState {
                data: vec![0; size as usize],
                mapped: false,
            },
        );
        Ok(UploadBuffer(id))
    }

    fn map_upload_buffer(&self, buffer: UploadBuffer) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::MapUpload, "Map")?;
        let mut state = lock(&self.state);
        let entry = state
            .uploads
            .get_mut(&buffer.0)
            .ok_or_else(|| invalid("upload buffer", buffer.0))?;
        entry.mapped = true;
        Ok(())
    }

    fn write_mapped(
        &self,
        buffer: UploadBuffer,
        offset: u64,
        len: usize,
        write: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), DeviceError> {
        self.faults.check(SoftOp::WriteMapped, "memcpy")?;
        let mut state = lock(&self.state);
        if state
            .pending_copies()
            .any(|copy| copy.overlaps(buffer.0, offset, len as u64))
        {
            log::warn!("Upload region at {} written while in flight", offset);
            state.stats.hazards += 1;
        }
        let entry = state
            .uploads
            .get_mut(&buffer.0)
            .ok_or_else(|| invalid("upload buffer", buffer.0))?;
        if !entry.mapped {
            return Err(DeviceError::call("memcpy", "upload buffer is not mapped"));
        }
        let start = offset as usize;
        let region = entry
            .data
            .get_mut(start..start + len)
            .ok_or_else(|| DeviceError::call("memcpy", "write past end of buffer"))?;
        write(region);
        Ok(())
    }

    fn unmap_upload_buffer(&self, buffer: UploadBuffer) {
        if let Some(entry) = lock(&self.state).uploads.get_mut(&buffer.0) {
            entry.mapped = false;
        }
    }

    fn release(&self, resource: FencedResource) {
        let mut state = lock(&self.state);
        match resource {
            FencedResource::Allocator(h) => {
                state.allocators.remove(&h.0);
            }
            FencedResource::List(h) => {
                state.lists.remove(&h.0);
            }
            FencedResource::Fence(h) => {
                state.fences.remove(&h.0);
            }
            FencedResource::Upload(h) => {
                if state.uploads.get(&h.0).is_some_and(|u| u.mapped) {
                    log::warn!("Upload buffer {} released while mapped", h.0);
                }
                state.uploads.remove(&h.0);
            }
        }
    }
}
