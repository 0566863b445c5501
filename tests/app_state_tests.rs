//! Integration tests for the application state machine.

mod fixtures;

use fixtures::{preset_state, rig};
use passthrough_fx::app::{gui_presets, test_presets, AppState, SessionEvent};
use passthrough_fx::backend::Backend;
use passthrough_fx::headless::LoadedShader;
use passthrough_fx::postprocess::{PostProcessState, ShaderSource, INPUT_SLOT};
use passthrough_fx::texture::PixelFormat;

// ==================== Startup ====================

#[test]
fn test_startup_applies_initial_state() {
    let rig = rig();
    let app = rig.app().unwrap();

    assert!(app.is_available());
    assert_eq!(rig.session.property_syncs(), 1);
    assert_eq!(rig.session.video_render(), Some(true));
    assert_eq!(app.post_process().state(), PostProcessState::Inactive);
    assert_eq!(rig.runtime.counters().loads, 0);
}

#[test]
fn test_startup_without_mixed_reality_keeps_feed_off() {
    let rig = rig();
    rig.session.set_available(false);
    let mut app = rig.app().unwrap();
    assert!(!app.is_available());

    let done = app.set_state(preset_state(&gui_presets(), "Default"), true);
    assert!(done.forced_off);
    assert_eq!(rig.session.video_render(), Some(false));
    assert_eq!(rig.runtime.loaded(), None);
}

// ==================== Reconcile ====================

#[test]
fn test_default_preset_loads_and_enables() {
    let rig = rig();
    let mut app = rig.app().unwrap();

    let done = app.set_state(preset_state(&gui_presets(), "Default"), false);
    assert!(done.pipeline);
    assert!(done.effect_enabled);
    assert!(!done.video_render);
    assert!(!done.forced_off);

    assert_eq!(app.post_process().state(), PostProcessState::LoadedEnabled);
    assert_eq!(
        rig.runtime.loaded(),
        Some(LoadedShader {
            backend: Backend::Immediate,
            source: ShaderSource::Precompiled,
        })
    );
    assert!(rig.runtime.is_enabled());
    assert!(!rig.runtime.any_locked());
}

#[test]
fn test_reapplying_same_state_is_a_no_op() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    let state = preset_state(&gui_presets(), "Default");

    app.set_state(state.clone(), false);
    let counters = rig.runtime.counters();
    let done = app.set_state(state, false);

    assert!(done.is_empty());
    assert_eq!(rig.runtime.counters(), counters);
}

#[test]
fn test_forced_reconcile_reapplies_everything() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    let state = preset_state(&gui_presets(), "Default");

    app.set_state(state.clone(), false);
    let feed_calls = rig.session.video_render_calls();
    let done = app.set_state(state, true);

    assert!(done.pipeline && done.effect_enabled && done.video_render && done.animation);
    let counters = rig.runtime.counters();
    assert_eq!(counters.loads, 2);
    assert_eq!(counters.unloads, 1);
    assert_eq!(rig.session.video_render_calls(), feed_calls + 1);
}

#[test]
fn test_animation_change_does_not_reload() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    let mut state = preset_state(&gui_presets(), "Default");
    app.set_state(state.clone(), false);

    state.post_process.animation.frequency = 9.0;
    let done = app.set_state(state, false);

    assert!(done.animation);
    assert!(!done.pipeline && !done.effect_enabled && !done.video_render);
    assert_eq!(rig.runtime.counters().loads, 1);
}

#[test]
fn test_texture_format_is_part_of_the_pipeline() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    let mut state = preset_state(&gui_presets(), "Default");
    app.set_state(state.clone(), false);

    state.post_process.texture_format = PixelFormat::R32Float;
    let done = app.set_state(state, false);

    assert!(done.pipeline);
    assert_eq!(rig.runtime.counters().loads, 2);
    assert_eq!(
        rig.runtime.read_slot(INPUT_SLOT).unwrap().spec.format,
        PixelFormat::R32Float
    );
}

#[test]
fn test_disabling_keeps_effect_loaded() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    let mut state = preset_state(&gui_presets(), "Default");
    app.set_state(state.clone(), false);

    state.post_process.enabled = false;
    let done = app.set_state(state, false);

    assert!(done.effect_enabled && !done.pipeline);
    assert_eq!(app.post_process().state(), PostProcessState::LoadedDisabled);
    assert!(!rig.runtime.is_enabled());
}

#[test]
fn test_off_preset_unloads() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    app.set_state(preset_state(&gui_presets(), "Default"), false);
    app.set_state(preset_state(&gui_presets(), "Off"), false);

    assert_eq!(app.post_process().state(), PostProcessState::Inactive);
    assert_eq!(rig.runtime.loaded(), None);
    assert_eq!(rig.runtime.counters().unloads, 1);
}

#[test]
fn test_failed_load_is_not_retried_until_key_changes() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    let state = preset_state(&gui_presets(), "Default");
    rig.runtime.fail_loads(true);

    app.set_state(state.clone(), false);
    assert!(!app.post_process().is_loaded());

    let done = app.set_state(state.clone(), false);
    assert!(!done.pipeline);

    rig.runtime.fail_loads(false);
    app.set_state(state, true);
    assert_eq!(app.post_process().state(), PostProcessState::LoadedEnabled);
}

#[test]
fn test_unsupported_format_leaves_effect_inactive() {
    let rig = rig();
    rig.runtime.reject_format(Backend::Immediate, PixelFormat::A8Unorm);
    let mut app = rig.app().unwrap();
    let mut state = preset_state(&gui_presets(), "Default");
    state.post_process.texture_format = PixelFormat::A8Unorm;

    app.set_state(state, false);

    assert!(!app.post_process().is_loaded());
    let counters = rig.runtime.counters();
    assert_eq!(counters.loads, 1);
    assert_eq!(counters.unloads, 1);
    assert_eq!(counters.locks, 0);
}

// ==================== Frame loop ====================

#[test]
fn test_update_regenerates_and_applies_inputs() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    app.set_state(preset_state(&gui_presets(), "Default"), false);
    let before = rig.runtime.counters();

    for _ in 0..3 {
        app.update().unwrap();
    }

    let counters = rig.runtime.counters();
    assert_eq!(counters.applies, before.applies + 3);
    assert_eq!(counters.locks, counters.unlocks);
    assert_eq!(counters.last_updated_slots, vec![INPUT_SLOT]);
    assert_eq!(counters.last_constants.len(), 80);

    let general = &app.state().general;
    assert_eq!(general.frame_count, 3);
    assert!((general.frame_time - 3.0 / 90.0).abs() < 1e-9);
    assert!(app.state().post_process.animation.time > 0.0);
}

#[test]
fn test_update_without_noise_applies_constants_only() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    app.set_state(preset_state(&gui_presets(), "Night Light"), false);
    let locks = rig.runtime.counters().locks;

    app.update().unwrap();

    let counters = rig.runtime.counters();
    assert_eq!(counters.locks, locks);
    assert!(counters.last_updated_slots.is_empty());
    assert_eq!(counters.last_constants.len(), 80);
}

#[test]
fn test_unrelated_events_are_ignored() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    rig.session.push_event(SessionEvent::Other(42));
    app.update().unwrap();
    assert!(app.is_available());
}

// ==================== Availability ====================

#[test]
fn test_availability_loss_forces_everything_off() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    let desired = preset_state(&gui_presets(), "Default");
    app.set_state(desired.clone(), false);

    rig.session.set_available(false);
    app.update().unwrap();

    assert!(!app.is_available());
    assert_eq!(app.post_process().state(), PostProcessState::Inactive);
    assert_eq!(rig.runtime.loaded(), None);
    assert_eq!(rig.session.video_render(), Some(false));
    // The desired state survives.
    assert_eq!(app.state().post_process.shader_source, desired.post_process.shader_source);
    assert!(app.state().post_process.enabled);
}

#[test]
fn test_availability_return_restores_desired_state() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    app.set_state(preset_state(&gui_presets(), "Default"), false);

    rig.session.set_available(false);
    app.update().unwrap();
    rig.session.set_available(true);
    app.update().unwrap();

    assert!(app.is_available());
    assert_eq!(app.post_process().state(), PostProcessState::LoadedEnabled);
    assert_eq!(rig.session.video_render(), Some(true));
    assert_eq!(rig.runtime.counters().loads, 2);
}

#[test]
fn test_state_changes_while_unavailable_apply_on_return() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    app.set_state(preset_state(&gui_presets(), "Default"), false);
    rig.session.set_available(false);
    app.update().unwrap();

    let done = app.set_state(preset_state(&gui_presets(), "Blurry"), false);
    assert!(done.forced_off);
    assert_eq!(rig.runtime.counters().loads, 1);

    rig.session.set_available(true);
    app.update().unwrap();
    assert_eq!(app.post_process().state(), PostProcessState::LoadedEnabled);
    assert_eq!(
        app.post_process().loaded_key().map(|key| key.pattern),
        Some(passthrough_fx::PatternType::Gradient)
    );
}

#[test]
fn test_repeated_availability_reports_are_ignored() {
    let rig = rig();
    let mut app = rig.app().unwrap();
    assert!(app.on_availability_changed(true).is_none());
    assert!(app.on_availability_changed(false).is_some());
    assert!(app.on_availability_changed(false).is_none());
}

// ==================== Presets ====================

#[test]
fn test_every_test_preset_runs() {
    for preset in test_presets().presets {
        let rig = rig();
        let mut app = rig.app().unwrap();
        let state = AppState {
            post_process: preset.effect.clone(),
            ..AppState::default()
        };
        app.set_state(state, true);
        assert_eq!(
            app.post_process().is_loaded(),
            preset.effect.shader_source != ShaderSource::None,
            "{}",
            preset.name
        );

        for _ in 0..3 {
            app.update().unwrap();
        }
        assert!(!rig.runtime.any_locked(), "{}", preset.name);
        if app.post_process().is_loaded() {
            let readiness = app.post_process().adapter_readiness().unwrap();
            assert!(readiness.cpu.is_ready(), "{}", preset.name);
        }
    }
}

#[test]
fn test_app_state_json_roundtrip() {
    let state = preset_state(&gui_presets(), "Purple Haze");
    let json = serde_json::to_string(&state).unwrap();
    let parsed: AppState = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, state);
}

#[test]
fn test_partial_json_uses_defaults() {
    let parsed: AppState =
        serde_json::from_str(r#"{"post_process": {"enabled": true, "backend": "Unified"}}"#).unwrap();
    assert!(parsed.post_process.enabled);
    assert_eq!(parsed.post_process.backend, Backend::Unified);
    assert!(parsed.general.vst_enabled);
}
