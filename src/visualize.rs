//! Interface consumed by an optional hand renderer.
//!
//! Rendering itself lives outside this crate; the engine only promises to
//! hand an installed visualizer the joints it latched for the frame, from
//! the frame-end hook, before the frame is forwarded downstream.

use crate::hands::JointSet;
use openxr_sys as xr;

/// Joint data for one frame. A `None` side failed to sample this frame and
/// should be skipped.
pub struct FrameHands {
    /// The frame's latched predicted display time.
    pub time: xr::Time,
    pub joints: [Option<JointSet>; 2],
}

pub trait HandVisualizer: Send + Sync {
    fn render(&self, frame: &FrameHands);
}
