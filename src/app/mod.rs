//! Application state machine.
//!
//! [`AppLogic`] owns the desired [`AppState`] and reconciles it against the
//! runtime in independent groups. A group is applied only when its part of
//! the state changed since it was last applied, unless a reconcile is forced.
//! While mixed reality is unavailable everything is forced off; the desired
//! state is kept and re-applied with force once availability returns.

pub mod presets;
pub mod session;
pub mod state;

pub use presets::{gui_presets, test_presets, Preset, PresetBook, PresetError, DEFAULT_PRESET_INDEX};
pub use session::{DeviceStatus, FrameTiming, Session, SessionEvent};
pub use state::{AppState, GeneralState};

use crate::backend::UpdateOutcome;
use crate::postprocess::{
    AnimationParams, PipelineKey, PostProcess, PostProcessConstants, RuntimeError, INPUT_SLOT,
};

/// Errors surfaced by the application loop.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Session error: {0}")]
    Session(#[from] RuntimeError),
}

/// State groups touched by one reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub video_render: bool,
    pub effect_enabled: bool,
    pub pipeline: bool,
    pub animation: bool,
    /// Mixed reality was unavailable and everything was forced off.
    pub forced_off: bool,
}

impl Reconciled {
    /// Nothing was applied.
    pub fn is_empty(&self) -> bool {
        *self == Reconciled::default()
    }
}

/// Last values pushed to the runtime, per group.
#[derive(Debug, Default)]
struct Applied {
    video_render: Option<bool>,
    effect_enabled: Option<bool>,
    pipeline: Option<PipelineKey>,
    animation: Option<AnimationParams>,
}

pub struct AppLogic {
    session: Box<dyn Session>,
    post_process: PostProcess,
    state: AppState,
    applied: Applied,
}

impl AppLogic {
    /// Sync session properties and pick up the initial availability.
    pub fn new(session: Box<dyn Session>, post_process: PostProcess) -> Result<Self, AppError> {
        let mut logic = Self {
            session,
            post_process,
            state: AppState::default(),
            applied: Applied::default(),
        };
        logic.session.sync_properties()?;
        let available = logic.session.mixed_reality_available().unwrap_or(false);
        logic.on_availability_changed(available);
        Ok(logic)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn post_process(&self) -> &PostProcess {
        &self.post_process
    }

    pub fn is_available(&self) -> bool {
        self.state.general.mr_available
    }

    /// Adopt `desired` and apply what changed.
    ///
    /// Runtime-owned fields (availability and frame counters) are kept from
    /// the current state.
    pub fn set_state(&mut self, desired: AppState, force: bool) -> Reconciled {
        let current = &self.state.general;
        let mut state = desired;
        state.general.mr_available = current.mr_available;
        state.general.frame_time = current.frame_time;
        state.general.frame_count = current.frame_count;
        self.state = state;
        self.reconcile(force)
    }

    /// Record a new availability value. Reconciles only on a transition.
    pub fn on_availability_changed(&mut self, available: bool) -> Option<Reconciled> {
        if available == self.state.general.mr_available {
            return None;
        }
        self.state.general.mr_available = available;
        log::info!(
            "Mixed reality {}",
            if available { "available" } else { "unavailable" }
        );
        Some(self.reconcile(available))
    }

    /// Run one frame: drain events, sync the frame, then refresh the effect.
    pub fn update(&mut self) -> Result<(), AppError> {
        while let Some(event) = self.session.poll_event()? {
            match event {
                SessionEvent::MixedRealityDevice(status) => {
                    self.on_availability_changed(status == DeviceStatus::Connected);
                }
                SessionEvent::Other(kind) => log::trace!("Ignoring session event {}", kind),
            }
        }

        let timing = self.session.sync_frame()?;
        let general = &mut self.state.general;
        general.frame_time += timing.delta_time;
        general.frame_count = timing.frame_number;
        self.state.post_process.animation.advance(timing.delta_time);

        if self.is_available() && self.post_process.is_loaded() {
            self.update_post_process();
        }
        Ok(())
    }

    fn update_post_process(&mut self) {
        let effect = &self.state.post_process;
        let constants = PostProcessConstants::from_config(effect);
        let mut updated = Vec::new();
        if effect.noise.enabled {
            match self.post_process.update_texture(effect.noise.generate_on_gpu) {
                Ok(Some(UpdateOutcome::Generated(_))) => updated.push(INPUT_SLOT),
                Ok(_) => {}
                Err(err) => log::warn!("Texture update failed: {}", err),
            }
        }
        if let Err(err) = self.post_process.apply_inputs(constants.as_bytes(), &updated) {
            log::error!("Applying effect inputs failed: {}", err);
        }
    }

    fn reconcile(&mut self, force: bool) -> Reconciled {
        if !self.is_available() {
            return self.force_off(force);
        }

        let mut done = Reconciled::default();
        let effect = self.state.post_process.clone();

        if force || self.applied.effect_enabled != Some(effect.enabled) {
            if let Err(err) = self.post_process.set_enabled(effect.enabled) {
                log::error!("Setting effect enabled failed: {}", err);
            }
            self.applied.effect_enabled = Some(effect.enabled);
            done.effect_enabled = true;
        }

        let key = effect.pipeline_key();
        if force || self.applied.pipeline != Some(key) {
            log::info!(
                "Loading effect: {:?} on {} backend, {:?} {:?}",
                key.shader_source,
                key.backend,
                key.pattern,
                key.texture_format
            );
            // Not retried until the key changes.
            if let Err(err) = self.post_process.load(key) {
                log::debug!("Effect stays inactive after failed load: {}", err);
            }
            self.applied.pipeline = Some(key);
            done.pipeline = true;
        }

        let vst = self.state.general.vst_enabled;
        if force || self.applied.video_render != Some(vst) {
            self.apply_video_render(vst);
            done.video_render = true;
        }

        let animation = effect.animation;
        let animation_changed = self
            .applied
            .animation
            .map_or(true, |applied| applied.settings_differ(&animation));
        if force || animation_changed {
            log::info!(
                "Animation {}: frequency {} amplitude {} offset {}",
                if animation.animate { "on" } else { "off" },
                animation.frequency,
                animation.amplitude,
                animation.offset
            );
            self.applied.animation = Some(animation);
            done.animation = true;
        }

        done
    }

    fn force_off(&mut self, force: bool) -> Reconciled {
        let mut done = Reconciled {
            forced_off: true,
            ..Reconciled::default()
        };
        if force || self.post_process.is_loaded() {
            self.post_process.reset();
            done.effect_enabled = true;
            done.pipeline = true;
        }
        if force || self.applied.video_render != Some(false) {
            self.apply_video_render(false);
            done.video_render = true;
        }
        self.applied = Applied {
            video_render: Some(false),
            ..Applied::default()
        };
        done
    }

    fn apply_video_render(&mut self, enabled: bool) {
        if let Err(err) = self.session.set_video_render(enabled) {
            log::error!("Setting video render failed: {}", err);
        }
        self.applied.video_render = Some(enabled);
    }
}
