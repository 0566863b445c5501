//! Session interface of the mixed-reality runtime.

use crate::postprocess::RuntimeError;

/// Connection status of the mixed-reality device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Connected,
    Disconnected,
}

/// Discrete events drained from the runtime each frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    MixedRealityDevice(DeviceStatus),
    /// Any event this crate does not react to.
    Other(u64),
}

/// Timing of one synchronized frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    /// Seconds since the previous frame.
    pub delta_time: f64,
    pub frame_number: i64,
}

/// Session calls offered by the runtime.
pub trait Session {
    /// Next pending event, or `None` when the queue is drained.
    fn poll_event(&mut self) -> Result<Option<SessionEvent>, RuntimeError>;

    /// Refresh the property snapshot read by the query methods.
    fn sync_properties(&mut self) -> Result<(), RuntimeError>;

    /// Whether mixed-reality post-processing is available, if the property exists.
    fn mixed_reality_available(&self) -> Option<bool>;

    /// Toggle rendering of the video see-through feed.
    fn set_video_render(&mut self, enabled: bool) -> Result<(), RuntimeError>;

    /// Wait for the next frame.
    fn sync_frame(&mut self) -> Result<FrameTiming, RuntimeError>;
}
