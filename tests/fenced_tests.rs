//! Integration tests for the fenced adapter and its frame ring.

mod fixtures;

use fixtures::{rig, rig_with_latency, small_spec};
use passthrough_fx::backend::fenced::{PlacedFootprint, TEXTURE_DATA_PITCH_ALIGNMENT};
use passthrough_fx::backend::{
    AdapterError, FencedAdapter, FencedDevice, FrameRingConfig, GenerationPath, UpdateOutcome,
};
use passthrough_fx::headless::SoftOp;
use passthrough_fx::texture::{GeneratedPattern, PatternType, PixelFormat, SampleType};

fn ring(frames_in_flight: usize) -> FrameRingConfig {
    FrameRingConfig { frames_in_flight }
}

#[test]
fn test_updates_beyond_ring_size_never_race_the_gpu() {
    let rig = rig_with_latency(1);
    let spec = small_spec(PixelFormat::Rgba8Unorm);
    let texture = rig.store.create(spec);
    let mut adapter =
        FencedAdapter::new(PatternType::Gradient, spec, rig.fenced.clone(), ring(2)).unwrap();

    for _ in 0..7 {
        assert_eq!(
            adapter.update(texture, false).unwrap(),
            UpdateOutcome::Generated(GenerationPath::Cpu)
        );
    }

    let stats = rig.fenced.stats();
    assert_eq!(stats.executions, 7);
    assert_eq!(stats.signals, 7);
    assert_eq!(stats.hazards, 0);
    assert_eq!(stats.blocking_waits, 0);
}

#[test]
fn test_slot_reuse_blocks_only_while_gpu_is_behind() {
    let rig = rig_with_latency(2);
    let spec = small_spec(PixelFormat::Rgba8Unorm);
    let texture = rig.store.create(spec);
    let mut adapter =
        FencedAdapter::new(PatternType::Gradient, spec, rig.fenced.clone(), ring(2)).unwrap();

    adapter.update(texture, false).unwrap();
    adapter.update(texture, false).unwrap();
    assert_eq!(rig.fenced.stats().blocking_waits, 0);

    // The third frame reuses slot 0 while both earlier frames are in flight.
    adapter.update(texture, false).unwrap();
    let stats = rig.fenced.stats();
    assert_eq!(stats.blocking_waits, 1);
    assert_eq!(stats.hazards, 0);
}

#[test]
fn test_deeper_ring_absorbs_latency() {
    let rig = rig_with_latency(2);
    let spec = small_spec(PixelFormat::Rgba8Unorm);
    let texture = rig.store.create(spec);
    let mut adapter =
        FencedAdapter::new(PatternType::Gradient, spec, rig.fenced.clone(), ring(3)).unwrap();
    assert_eq!(adapter.frames_in_flight(), 3);

    for _ in 0..9 {
        adapter.update(texture, false).unwrap();
    }
    let stats = rig.fenced.stats();
    assert_eq!(stats.blocking_waits, 0);
    assert_eq!(stats.hazards, 0);
}

#[test]
fn test_content_lands_once_copies_retire() {
    let rig = rig_with_latency(1);
    let spec = small_spec(PixelFormat::R32Float);
    let texture = rig.store.create(spec);
    let mut adapter =
        FencedAdapter::new(PatternType::Gradient, spec, rig.fenced.clone(), ring(2)).unwrap();

    adapter.update(texture, false).unwrap();
    assert_eq!(rig.fenced.in_flight(), 1);
    assert!(rig.store.read(texture).unwrap().data.iter().all(|&b| b == 0));

    rig.fenced.flush();
    let expected = GeneratedPattern::new(PatternType::Gradient, spec, SampleType::Float32);
    assert_eq!(rig.store.read(texture).unwrap().data, expected.data);
}

#[test]
fn test_drop_drains_and_releases_everything() {
    let rig = rig_with_latency(1);
    let spec = small_spec(PixelFormat::Rgba8Unorm);
    let texture = rig.store.create(spec);
    let mut adapter =
        FencedAdapter::new(PatternType::Noise, spec, rig.fenced.clone(), ring(2)).unwrap();
    for _ in 0..4 {
        adapter.update(texture, false).unwrap();
    }
    assert!(rig.fenced.in_flight() > 0);
    assert_eq!(rig.fenced.mapped_buffers(), 1);

    drop(adapter);
    assert_eq!(rig.fenced.in_flight(), 0);
    assert_eq!(rig.fenced.mapped_buffers(), 0);
    assert_eq!(rig.fenced.live_resources(), 0);
}

#[test]
fn test_row_pitch_is_aligned() {
    let rig = rig();
    let spec = small_spec(PixelFormat::A8Unorm);
    let adapter =
        FencedAdapter::new(PatternType::Gradient, spec, rig.fenced.clone(), ring(2)).unwrap();
    assert_eq!(adapter.row_pitch(), Some(TEXTURE_DATA_PITCH_ALIGNMENT as u32));
}

#[test]
fn test_gpu_requests_use_cpu_path() {
    let rig = rig();
    let spec = small_spec(PixelFormat::Rgba8Unorm);
    let texture = rig.store.create(spec);
    let mut adapter =
        FencedAdapter::new(PatternType::Noise, spec, rig.fenced.clone(), ring(2)).unwrap();

    assert!(!adapter.readiness().gpu.is_ready());
    assert_eq!(
        adapter.update(texture, true).unwrap(),
        UpdateOutcome::Generated(GenerationPath::Cpu)
    );
}

#[test]
fn test_failed_preparation_cleans_up() {
    let rig = rig();
    let spec = small_spec(PixelFormat::Rgba8Unorm);
    rig.fenced.faults().fail_always(SoftOp::CreateFence);

    let result = FencedAdapter::new(PatternType::Noise, spec, rig.fenced.clone(), ring(2));
    assert!(matches!(result, Err(AdapterError::NoUsablePath { .. })));
    assert_eq!(rig.fenced.live_resources(), 0);
    assert_eq!(rig.fenced.mapped_buffers(), 0);
}

#[test]
fn test_execute_failure_disables_generation() {
    let rig = rig();
    let spec = small_spec(PixelFormat::Rgba8Unorm);
    let texture = rig.store.create(spec);
    let mut adapter =
        FencedAdapter::new(PatternType::Gradient, spec, rig.fenced.clone(), ring(2)).unwrap();
    rig.fenced.faults().fail_once(SoftOp::Execute);

    assert!(matches!(
        adapter.update(texture, false),
        Err(AdapterError::PathFailed {
            path: GenerationPath::Cpu,
            ..
        })
    ));
    assert_eq!(adapter.update(texture, false).unwrap(), UpdateOutcome::Skipped);
}

#[test]
fn test_signal_failure_still_waits_for_executed_copy() {
    let rig = rig_with_latency(1);
    let spec = small_spec(PixelFormat::Rgba8Unorm);
    let texture = rig.store.create(spec);
    let mut adapter =
        FencedAdapter::new(PatternType::Gradient, spec, rig.fenced.clone(), ring(2)).unwrap();
    rig.fenced.faults().fail_once(SoftOp::Signal);

    assert!(adapter.update(texture, false).is_err());
    assert!(!adapter.readiness().cpu.is_ready());
    assert_eq!(rig.fenced.in_flight(), 1);

    drop(adapter);
    assert_eq!(rig.fenced.in_flight(), 0);
    assert_eq!(rig.fenced.live_resources(), 0);
    let expected = GeneratedPattern::new(PatternType::Gradient, spec, SampleType::Unorm8);
    assert_eq!(rig.store.read(texture).unwrap().data, expected.data);
}

#[test]
#[should_panic(expected = "at least two slots")]
fn test_single_slot_ring_is_rejected() {
    let rig = rig();
    let spec = small_spec(PixelFormat::Rgba8Unorm);
    let _ = FencedAdapter::new(PatternType::Noise, spec, rig.fenced.clone(), ring(1));
}

// ==================== Simulated device ====================

#[test]
fn test_device_reports_writes_into_inflight_regions() {
    let rig = rig_with_latency(1);
    let spec = small_spec(PixelFormat::Rgba8Unorm);
    let texture = rig.store.create(spec);
    let device = rig.fenced.as_ref();

    let row_pitch = TEXTURE_DATA_PITCH_ALIGNMENT as u32;
    let len = row_pitch as u64 * spec.height as u64;
    let upload = device.create_upload_buffer(len).unwrap();
    device.map_upload_buffer(upload).unwrap();
    let allocator = device.create_command_allocator().unwrap();
    let list = device.create_command_list(allocator).unwrap();
    let footprint = PlacedFootprint {
        offset: 0,
        format: spec.format.dxgi(),
        width: spec.width,
        height: spec.height,
        depth: 1,
        row_pitch,
    };
    device.copy_buffer_to_texture(list, texture, upload, footprint).unwrap();
    device.close_command_list(list).unwrap();
    device.execute_command_list(list).unwrap();

    device.write_mapped(upload, 0, 16, &mut |data| data.fill(1)).unwrap();
    device.reset_command_allocator(allocator).unwrap();
    assert_eq!(rig.fenced.stats().hazards, 2);
}
