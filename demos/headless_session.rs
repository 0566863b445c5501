//! Example: Drive the effect state machine against the headless runtime.
//!
//! Applies the default preset, runs a few hundred frames, drops and restores
//! mixed-reality availability, then writes the generated input texture to a
//! PNG. When a GPU is present the gradient kernel is also run through wgpu.
//!
//! Run with:
//!     cargo run --example headless_session --features tokio [presets.json]

use anyhow::Context;
use passthrough_fx::app::{gui_presets, AppState, PresetBook, DEFAULT_PRESET_INDEX};
use passthrough_fx::backend::{ImmediateAdapter, UpdateOutcome};
use passthrough_fx::gpu::{create_input_texture, GpuContext, ReadbackBuffer};
use passthrough_fx::headless::{HeadlessConfig, HeadlessRig};
use passthrough_fx::postprocess::INPUT_SLOT;
use passthrough_fx::{PatternType, PixelFormat, TextureSpec};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Passthrough FX - Headless Session Example");
    println!("=========================================\n");

    let book = match std::env::args().nth(1) {
        Some(path) => PresetBook::load(&path).with_context(|| format!("loading {}", path))?,
        None => gui_presets(),
    };
    let preset = book
        .get(DEFAULT_PRESET_INDEX)
        .or_else(|| book.get(0))
        .context("preset book is empty")?;
    println!("Preset: {}", preset.name);

    let rig = HeadlessRig::new(&HeadlessConfig::default());
    let mut app = rig.app()?;

    let desired = AppState {
        post_process: preset.effect.clone(),
        ..AppState::default()
    };
    let applied = app.set_state(desired, true);
    println!("  Applied: {:?}", applied);
    println!("  Effect state: {:?}\n", app.post_process().state());

    let frames = 270;
    println!("Running {} frames...", frames);
    for frame in 0..frames {
        match frame {
            90 => rig.session.set_available(false),
            180 => rig.session.set_available(true),
            _ => {}
        }
        app.update()?;
        if frame % 90 == 89 {
            println!(
                "  frame {:3}: t={:.2}s available={} state={:?}",
                app.state().general.frame_count,
                app.state().general.frame_time,
                app.is_available(),
                app.post_process().state()
            );
        }
    }

    let counters = rig.runtime.counters();
    println!("\nRuntime calls:");
    println!("  loads: {}  unloads: {}", counters.loads, counters.unloads);
    println!("  locks: {}  unlocks: {}", counters.locks, counters.unlocks);
    println!("  input applies: {}", counters.applies);

    let snapshot = Path::new("headless_input.png");
    rig.runtime.save_slot_png(INPUT_SLOT, snapshot)?;
    println!("  input slot written to {}\n", snapshot.display());

    run_on_gpu().await?;
    Ok(())
}

/// Generate the gradient through the wgpu immediate device and read it back.
async fn run_on_gpu() -> anyhow::Result<()> {
    let ctx = match GpuContext::new().await {
        Ok(ctx) => ctx,
        Err(err) => {
            println!("Skipping GPU generation: {}", err);
            return Ok(());
        }
    };
    println!("GPU: {}", ctx.adapter_info().name);

    let spec = TextureSpec::new(PixelFormat::Rgba8Unorm, 256, 256);
    let texture = Arc::new(create_input_texture(&ctx.device, "demo input", &spec));
    let device = ctx.immediate_device();
    let handle = device.register_texture(texture.clone());

    let mut adapter = ImmediateAdapter::new(PatternType::Gradient, spec, device.clone())?;
    let outcome = adapter.update(handle, true)?;
    println!("  update: {:?}", outcome);

    if let UpdateOutcome::Generated(_) = outcome {
        let readback = ReadbackBuffer::new(&ctx.device, spec.width, spec.height, 4);
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Demo Readback"),
            });
        readback.copy_from(&mut encoder, &texture);
        ctx.queue.submit(Some(encoder.finish()));
        let pixels = readback.read_pixels(&ctx.device)?;
        let last = pixels.len() - 4;
        println!("  first texel: {:?}", &pixels[..4]);
        println!("  last texel:  {:?}", &pixels[last..]);
    }

    drop(adapter);
    device.unregister_texture(handle);
    Ok(())
}
