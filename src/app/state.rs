//! Application state snapshot.

use crate::postprocess::EffectConfig;
use serde::{Deserialize, Serialize};

/// General application state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralState {
    /// Accumulated frame time in seconds.
    pub frame_time: f64,
    pub frame_count: i64,
    /// Reported by the runtime; ignored when supplied by callers.
    pub mr_available: bool,
    /// Render the video see-through feed.
    pub vst_enabled: bool,
}

impl Default for GeneralState {
    fn default() -> Self {
        Self {
            frame_time: 0.0,
            frame_count: 0,
            mr_available: false,
            vst_enabled: true,
        }
    }
}

/// Complete application state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    pub general: GeneralState,
    pub post_process: EffectConfig,
}
