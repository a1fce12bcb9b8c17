//! Wire-level commands and events exchanged between the GPU-process client
//! and the compositor-process host.
//!
//! Transport framing and serialization are outside this crate; these enums
//! are the typed payloads an ordered channel carries in each direction.
//! Values arriving in a [`Command`] are untrusted and validated by the host
//! before acceptance; any invalid field terminates the whole channel.

use crate::ids::{BufferId, WidgetId};
use bitflags::bitflags;
use std::os::unix::io::RawFd;
use std::time::Duration;
use vesper_core::{Color, Rect, RectInt, Size};

/// Sentinel z-order carried by the root plane entry of an overlay frame.
/// All other entries in the same frame must use distinct z-orders above it.
pub const ROOT_Z_ORDER: i32 = i32::MIN;

/// A client hint about how a plane should be scheduled by the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPriority {
    Regular,
    PreferOverlay,
    Required,
}

/// One plane of a multi-surface frame: the root plane (sentinel z-order) or
/// an overlay positioned above it.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEntry {
    pub z_order: i32,
    pub buffer_id: BufferId,
    pub bounds: Rect,
    pub corner_clip: Option<Rect>,
    pub priority: Option<OverlayPriority>,
}

/// Requests sent by the client to the host.
///
/// File descriptors are opaque resource handles here; the host forwards
/// them to the display backend without interpreting them.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateDmabufBuffer {
        fd: RawFd,
        size: Size,
        strides: Vec<u32>,
        offsets: Vec<u32>,
        modifiers: Vec<u64>,
        format: u32,
        plane_count: u32,
        buffer_id: BufferId,
    },
    CreateShmBuffer {
        fd: RawFd,
        length: u64,
        size: Size,
        buffer_id: BufferId,
    },
    CreateSolidColorBuffer {
        color: Color,
        size: Size,
        buffer_id: BufferId,
    },
    DestroyBuffer {
        buffer_id: BufferId,
    },
    CommitBuffer {
        widget: WidgetId,
        buffer_id: BufferId,
        commit_id: u64,
        bounds: Rect,
        corner_clip: Option<Rect>,
        scale: f32,
        damage: RectInt,
    },
    CommitOverlays {
        widget: WidgetId,
        frame_seq: u64,
        overlays: Vec<OverlayEntry>,
    },
}

/// The outcome of handing one commit to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionResult {
    /// The display accepted the frame.
    Ack,
    /// The frame was rejected, evicted, or the buffer backing it failed.
    Failed,
}

/// A synchronization fence handed back with a submission ack; the client
/// must wait on it before writing into the released buffer again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseFence(pub RawFd);

bitflags! {
    /// Properties of a successful presentation, mirroring the flags display
    /// protocols report alongside presentation timestamps.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PresentationFlags: u32 {
        const VSYNC         = 0x1;
        const HW_CLOCK      = 0x2;
        const HW_COMPLETION = 0x4;
        const ZERO_COPY     = 0x8;
    }
}

/// The display's report of whether and when a committed buffer reached the
/// screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationFeedback {
    Presented {
        /// Time of the vblank that turned the buffer visible.
        timestamp: Duration,
        /// The output's refresh interval at presentation time.
        refresh: Duration,
        flags: PresentationFlags,
    },
    Failed,
}

impl PresentationFeedback {
    pub fn is_presented(&self) -> bool {
        matches!(self, PresentationFeedback::Presented { .. })
    }
}

/// Callbacks sent by the host to the client.
///
/// For a given surface, `Submission` for commit *k* always precedes
/// `Presentation` for commit *k*, and both streams are delivered in
/// non-decreasing commit order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Submission {
        buffer_id: BufferId,
        result: SubmissionResult,
        release_fence: Option<ReleaseFence>,
    },
    Presentation {
        buffer_id: BufferId,
        feedback: PresentationFeedback,
    },
}
