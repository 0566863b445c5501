//! Adapter for deferred devices with explicit fences.
//!
//! Uploads are recorded into command lists and execute asynchronously. A
//! [`FrameRing`] of command allocators bounds the number of frames in flight;
//! each ring slot owns its own region of one persistently mapped upload
//! buffer. Acquiring a slot is the only blocking point: it waits for the fence
//! value of that slot's previous submission, and only if the GPU has not
//! reached it yet.

use super::{
    prepared, AdapterError, Backend, DeviceError, GenerationPath, NativeTexture, PathGate,
    Readiness, UpdateOutcome,
};
use crate::texture::{generate, DxgiFormat, PatternType, TextureSpec};
use std::sync::Arc;

/// Required row pitch alignment of texture data in buffers.
pub const TEXTURE_DATA_PITCH_ALIGNMENT: u64 = 256;

/// Required offset alignment of texture data in buffers.
pub const TEXTURE_DATA_PLACEMENT_ALIGNMENT: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandAllocator(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandList(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fence(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadBuffer(pub u64);

/// Any resource created through a [`FencedDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FencedResource {
    Allocator(CommandAllocator),
    List(CommandList),
    Fence(Fence),
    Upload(UploadBuffer),
}

/// Placement of one texture subresource inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedFootprint {
    pub offset: u64,
    pub format: DxgiFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub row_pitch: u32,
}

/// Device operations used by [`FencedAdapter`].
///
/// Recorded work runs on the GPU timeline after `execute_command_list`;
/// `signal` enqueues a fence update behind it.
pub trait FencedDevice: Send + Sync {
    fn create_command_allocator(&self) -> Result<CommandAllocator, DeviceError>;

    /// Only legal once the allocator's previous work has retired.
    fn reset_command_allocator(&self, allocator: CommandAllocator) -> Result<(), DeviceError>;

    /// The new list is open for recording.
    fn create_command_list(&self, allocator: CommandAllocator) -> Result<CommandList, DeviceError>;

    fn reset_command_list(
        &self,
        list: CommandList,
        allocator: CommandAllocator,
    ) -> Result<(), DeviceError>;

    fn copy_buffer_to_texture(
        &self,
        list: CommandList,
        dst: NativeTexture,
        src: UploadBuffer,
        footprint: PlacedFootprint,
    ) -> Result<(), DeviceError>;

    fn close_command_list(&self, list: CommandList) -> Result<(), DeviceError>;

    fn execute_command_list(&self, list: CommandList) -> Result<(), DeviceError>;

    fn create_fence(&self, initial_value: u64) -> Result<Fence, DeviceError>;

    /// Enqueue a signal of `value` after all previously executed work.
    fn signal(&self, fence: Fence, value: u64) -> Result<(), DeviceError>;

    fn completed_value(&self, fence: Fence) -> u64;

    /// Block until the fence has reached `value`.
    fn wait_for_value(&self, fence: Fence, value: u64) -> Result<(), DeviceError>;

    fn create_upload_buffer(&self, size: u64) -> Result<UploadBuffer, DeviceError>;

    fn map_upload_buffer(&self, buffer: UploadBuffer) -> Result<(), DeviceError>;

    /// Write `len` bytes at `offset` of a mapped upload buffer.
    fn write_mapped(
        &self,
        buffer: UploadBuffer,
        offset: u64,
        len: usize,
        write: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), DeviceError>;

    fn unmap_upload_buffer(&self, buffer: UploadBuffer);

    fn release(&self, resource: FencedResource);
}

/// Round `value` up to a multiple of `alignment`.
///
/// # Panics
///
/// Panics if `alignment` is not a power of two.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    assert!(
        alignment.is_power_of_two(),
        "alignment {} is not a power of two",
        alignment
    );
    (value + alignment - 1) & !(alignment - 1)
}

/// Linear suballocator over a fixed-size buffer.
#[derive(Debug)]
struct Suballocator {
    capacity: u64,
    cursor: u64,
}

impl Suballocator {
    fn new(capacity: u64) -> Self {
        Self {
            capacity,
            cursor: 0,
        }
    }

    fn allocate(&mut self, size: u64, alignment: u64) -> u64 {
        let offset = align_up(self.cursor, alignment);
        assert!(
            offset + size <= self.capacity,
            "upload buffer exhausted: {} bytes at offset {} exceed capacity {}",
            size,
            offset,
            self.capacity
        );
        self.cursor = offset + size;
        offset
    }
}

/// Ring sizing for a [`FencedAdapter`].
#[derive(Debug, Clone, Copy)]
pub struct FrameRingConfig {
    /// Number of allocator slots, at least 2.
    pub frames_in_flight: usize,
}

impl Default for FrameRingConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
        }
    }
}

/// One ring slot: an allocator and the fence value of its last submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    pub allocator: CommandAllocator,
    /// Zero until the slot is first submitted.
    pub fence_value: u64,
    pub upload_offset: u64,
}

/// Ring of command allocator slots paired with fence values.
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    next: usize,
}

impl FrameRing {
    /// # Panics
    ///
    /// Panics with fewer than two slots.
    pub fn new(slots: Vec<FrameSlot>) -> Self {
        assert!(slots.len() >= 2, "frame ring needs at least two slots");
        Self { slots, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> FrameSlot {
        self.slots[index]
    }

    /// Index of the next slot, once its previous submission has retired.
    pub fn acquire(&mut self, device: &dyn FencedDevice, fence: Fence) -> Result<usize, DeviceError> {
        let index = self.next;
        wait_for_slot(device, fence, &self.slots[index])?;
        Ok(index)
    }

    /// Record the submission of `index` at `fence_value` and advance.
    pub fn submit(&mut self, index: usize, fence_value: u64) {
        self.slots[index].fence_value = fence_value;
        self.next = (index + 1) % self.slots.len();
    }

    /// Wait for every slot's last submission.
    pub fn drain(&self, device: &dyn FencedDevice, fence: Fence) -> Result<(), DeviceError> {
        self.slots
            .iter()
            .try_for_each(|slot| wait_for_slot(device, fence, slot))
    }
}

fn wait_for_slot(device: &dyn FencedDevice, fence: Fence, slot: &FrameSlot) -> Result<(), DeviceError> {
    if slot.fence_value > 0 && device.completed_value(fence) < slot.fence_value {
        device.wait_for_value(fence, slot.fence_value)?;
    }
    Ok(())
}

/// Signal a fresh `value` behind all executed work and wait for it.
fn wait_for_idle(device: &dyn FencedDevice, fence: Fence, value: u64) -> Result<(), DeviceError> {
    device.signal(fence, value)?;
    device.wait_for_value(fence, value)
}

struct CpuResources {
    ring: FrameRing,
    command_list: CommandList,
    fence: Fence,
    next_fence_value: u64,
    upload: UploadBuffer,
    row_pitch: u32,
    /// Executed work that no fence value covers.
    unfenced_work: bool,
}

/// Texture adapter for a fenced device.
///
/// Only the CPU path exists; the GPU path is reported unavailable.
pub struct FencedAdapter {
    device: Arc<dyn FencedDevice>,
    pattern: PatternType,
    spec: TextureSpec,
    native: DxgiFormat,
    cpu: Option<CpuResources>,
    gate: PathGate,
}

impl FencedAdapter {
    pub fn new(
        pattern: PatternType,
        spec: TextureSpec,
        device: Arc<dyn FencedDevice>,
        config: FrameRingConfig,
    ) -> Result<Self, AdapterError> {
        let native = spec.format.dxgi();
        let (cpu, cpu_status) = prepared(
            Backend::Fenced,
            GenerationPath::Cpu,
            Self::prepare_cpu(device.as_ref(), &spec, config),
        );
        let (_, gpu_status) = prepared::<()>(
            Backend::Fenced,
            GenerationPath::Gpu,
            Err(DeviceError::Unsupported(
                "GPU generation is not implemented for the fenced backend".into(),
            )),
        );
        let gate = PathGate::new(Backend::Fenced, cpu_status, gpu_status)?;

        Ok(Self {
            device,
            pattern,
            spec,
            native,
            cpu,
            gate,
        })
    }

    fn prepare_cpu(
        device: &dyn FencedDevice,
        spec: &TextureSpec,
        config: FrameRingConfig,
    ) -> Result<CpuResources, DeviceError> {
        let mut created = Vec::new();
        let mut mapped = None;
        let result = Self::create_cpu_resources(device, spec, config, &mut created, &mut mapped);
        if result.is_err() {
            if let Some(upload) = mapped {
                device.unmap_upload_buffer(upload);
            }
            for resource in created.into_iter().rev() {
                device.release(resource);
            }
        }
        result
    }

    fn create_cpu_resources(
        device: &dyn FencedDevice,
        spec: &TextureSpec,
        config: FrameRingConfig,
        created: &mut Vec<FencedResource>,
        mapped: &mut Option<UploadBuffer>,
    ) -> Result<CpuResources, DeviceError> {
        let sample = spec.format.upload_sample_type();
        let row_pitch = align_up(spec.packed_row_bytes(sample) as u64, TEXTURE_DATA_PITCH_ALIGNMENT);
        let region = row_pitch * spec.height as u64;
        let capacity =
            align_up(region, TEXTURE_DATA_PLACEMENT_ALIGNMENT) * config.frames_in_flight as u64;

        let upload = device.create_upload_buffer(capacity)?;
        created.push(FencedResource::Upload(upload));
        device.map_upload_buffer(upload)?;
        *mapped = Some(upload);

        let mut suballocator = Suballocator::new(capacity);
        let mut slots = Vec::with_capacity(config.frames_in_flight);
        for _ in 0..config.frames_in_flight {
            let allocator = device.create_command_allocator()?;
            created.push(FencedResource::Allocator(allocator));
            slots.push(FrameSlot {
                allocator,
                fence_value: 0,
                upload_offset: suballocator.allocate(region, TEXTURE_DATA_PLACEMENT_ALIGNMENT),
            });
        }
        let ring = FrameRing::new(slots);

        let command_list = device.create_command_list(ring.slot(0).allocator)?;
        created.push(FencedResource::List(command_list));
        device.close_command_list(command_list)?;

        let fence = device.create_fence(0)?;
        created.push(FencedResource::Fence(fence));

        Ok(CpuResources {
            ring,
            command_list,
            fence,
            next_fence_value: 1,
            upload,
            row_pitch: row_pitch as u32,
            unfenced_work: false,
        })
    }

    pub fn update(
        &mut self,
        texture: NativeTexture,
        use_gpu: bool,
    ) -> Result<UpdateOutcome, AdapterError> {
        let Some(path) = self.gate.select(texture, use_gpu)? else {
            return Ok(UpdateOutcome::Skipped);
        };
        let result = match path {
            GenerationPath::Gpu => self.generate_on_gpu(texture),
            GenerationPath::Cpu => self.generate_on_cpu(texture),
        };
        self.gate.settle(path, result)
    }

    pub fn readiness(&self) -> Readiness {
        self.gate.readiness()
    }

    /// Number of ring slots, or 0 without a CPU path.
    pub fn frames_in_flight(&self) -> usize {
        self.cpu.as_ref().map_or(0, |cpu| cpu.ring.len())
    }

    /// Row pitch of the upload footprint in bytes.
    pub fn row_pitch(&self) -> Option<u32> {
        self.cpu.as_ref().map(|cpu| cpu.row_pitch)
    }

    fn generate_on_cpu(&mut self, texture: NativeTexture) -> Result<(), DeviceError> {
        let cpu = self
            .cpu
            .as_mut()
            .ok_or_else(|| DeviceError::Unsupported("upload resources not created".into()))?;
        let device = self.device.as_ref();

        let index = cpu.ring.acquire(device, cpu.fence)?;
        let slot = cpu.ring.slot(index);

        let pattern = self.pattern;
        let spec = self.spec;
        let sample = spec.format.upload_sample_type();
        let row_pitch = cpu.row_pitch as usize;
        device.write_mapped(
            cpu.upload,
            slot.upload_offset,
            row_pitch * spec.height as usize,
            &mut |data| generate(pattern, &spec, row_pitch, data, sample),
        )?;

        device.reset_command_allocator(slot.allocator)?;
        device.reset_command_list(cpu.command_list, slot.allocator)?;
        let footprint = PlacedFootprint {
            offset: slot.upload_offset,
            format: self.native,
            width: spec.width,
            height: spec.height,
            depth: 1,
            row_pitch: cpu.row_pitch,
        };
        device.copy_buffer_to_texture(cpu.command_list, texture, cpu.upload, footprint)?;
        device.close_command_list(cpu.command_list)?;
        device.execute_command_list(cpu.command_list)?;

        // The copy is queued from here on, even if the signal below fails.
        let value = cpu.next_fence_value;
        cpu.next_fence_value += 1;
        if let Err(err) = device.signal(cpu.fence, value) {
            cpu.unfenced_work = true;
            return Err(err);
        }
        cpu.ring.submit(index, value);
        Ok(())
    }

    fn generate_on_gpu(&mut self, _texture: NativeTexture) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported(
            "GPU generation is not implemented for the fenced backend".into(),
        ))
    }
}

impl Drop for FencedAdapter {
    fn drop(&mut self) {
        let Some(cpu) = self.cpu.take() else {
            return;
        };
        let device = self.device.as_ref();
        if cpu.unfenced_work {
            if let Err(err) = wait_for_idle(device, cpu.fence, cpu.next_fence_value) {
                log::error!("Fenced adapter: waiting for unfenced work failed: {}", err);
            }
        }
        if let Err(err) = cpu.ring.drain(device, cpu.fence) {
            log::error!("Fenced adapter: waiting for in-flight frames failed: {}", err);
        }
        device.unmap_upload_buffer(cpu.upload);
        device.release(FencedResource::List(cpu.command_list));
        for index in 0..cpu.ring.len() {
            device.release(FencedResource::Allocator(cpu.ring.slot(index).allocator));
        }
        device.release(FencedResource::Fence(cpu.fence));
        device.release(FencedResource::Upload(cpu.upload));
    }
}
