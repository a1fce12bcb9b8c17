//! Multi-surface frame staging.
//!
//! A frame is atomic: one root plane plus overlays that must appear
//! together. Frames move through two stages per widget. First a FIFO of
//! frames waiting for all referenced buffers to finish importing — strict
//! commit order is kept even when a later frame's buffers become ready
//! first. Then a single pending slot gated on the root surface, where a
//! newer ready frame displaces an older one that never reached the display
//! (latest wins; the displaced frame is reported so its callbacks can be
//! resolved).

use crate::backend::Placement;
use crate::buffer::{BufferRegistry, ImportState};
use crate::ids::{BufferId, SurfaceId, WidgetId};
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// One plane of a frame, already validated and placed.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEntry {
    pub buffer: BufferId,
    pub placement: Placement,
}

/// An atomic multi-surface commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub widget: WidgetId,
    /// Commit sequence on the widget's root surface, assigned at acceptance.
    pub seq: u64,
    pub root: FrameEntry,
    /// Overlay planes in ascending z-order.
    pub overlays: Vec<FrameEntry>,
}

impl Frame {
    /// Every buffer the frame references, root first.
    pub fn buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        std::iter::once(self.root.buffer).chain(self.overlays.iter().map(|e| e.buffer))
    }

    pub fn references(&self, buffer: BufferId) -> bool {
        self.buffers().any(|b| b == buffer)
    }
}

/// Frame staging state for one widget.
#[derive(Debug, Default)]
pub struct WidgetFrameState {
    waiting: VecDeque<Frame>,
    pending: Option<Frame>,
    /// Overlay subsurfaces by slot index (z-ascending position within a
    /// frame), allocated lazily and reused across frames.
    pub overlay_slots: Vec<SurfaceId>,
    /// Slots in use by the frame currently on screen; higher slots are
    /// hidden.
    pub active_overlay_count: usize,
}

/// Stages frames for all widgets.
#[derive(Debug, Default)]
pub struct FrameCompositor {
    widgets: HashMap<WidgetId, WidgetFrameState>,
}

impl FrameCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_mut(&mut self, widget: WidgetId) -> &mut WidgetFrameState {
        self.widgets.entry(widget).or_default()
    }

    pub fn enqueue(&mut self, frame: Frame) {
        trace!(widget = %frame.widget, seq = frame.seq, "frame enqueued");
        self.state_mut(frame.widget).waiting.push_back(frame);
    }

    /// Pops the head frame of `widget` if every buffer it references is
    /// imported and ready. Never pops past a frame that is still waiting,
    /// preserving commit order.
    pub fn pop_ready(&mut self, widget: WidgetId, registry: &BufferRegistry) -> Option<Frame> {
        let state = self.widgets.get_mut(&widget)?;
        let head = state.waiting.front()?;
        let ready = head.buffers().all(|b| {
            registry
                .get(b)
                .map(|buffer| buffer.state == ImportState::Ready)
                .unwrap_or(false)
        });
        if ready {
            state.waiting.pop_front()
        } else {
            None
        }
    }

    /// Parks a ready frame for play, displacing (and returning) a frame
    /// that was parked before it and never shown.
    pub fn park_pending(&mut self, frame: Frame) -> Option<Frame> {
        self.state_mut(frame.widget).pending.replace(frame)
    }

    pub fn take_pending(&mut self, widget: WidgetId) -> Option<Frame> {
        self.widgets.get_mut(&widget)?.pending.take()
    }

    /// Widgets that still have frames waiting on buffer imports.
    pub fn widgets_with_waiting_frames(&self) -> Vec<WidgetId> {
        self.widgets
            .iter()
            .filter(|(_, s)| !s.waiting.is_empty())
            .map(|(w, _)| *w)
            .collect()
    }

    /// Removes and returns every staged frame that references `buffer`
    /// (its import failed; the frames can never become ready).
    pub fn remove_frames_referencing(&mut self, buffer: BufferId) -> Vec<Frame> {
        let mut removed = Vec::new();
        for state in self.widgets.values_mut() {
            let mut kept = VecDeque::with_capacity(state.waiting.len());
            for frame in state.waiting.drain(..) {
                if frame.references(buffer) {
                    removed.push(frame);
                } else {
                    kept.push_back(frame);
                }
            }
            state.waiting = kept;
            if state
                .pending
                .as_ref()
                .map(|f| f.references(buffer))
                .unwrap_or(false)
            {
                removed.extend(state.pending.take());
            }
        }
        removed.sort_by_key(|f| (f.widget, f.seq));
        removed
    }

    /// Drops all staging state for a widget, returning it so the caller can
    /// resolve the outstanding frames and tear down the overlay surfaces.
    pub fn remove_widget(&mut self, widget: WidgetId) -> Option<WidgetFrameState> {
        self.widgets.remove(&widget)
    }

    /// Drops every staged frame and overlay slot (channel generation ended).
    /// Returns the overlay surface ids that existed.
    pub fn reset(&mut self) -> Vec<SurfaceId> {
        let mut slots = Vec::new();
        for state in self.widgets.values_mut() {
            slots.extend(state.overlay_slots.drain(..));
            state.waiting.clear();
            state.pending = None;
            state.active_overlay_count = 0;
        }
        slots
    }
}

impl WidgetFrameState {
    pub fn waiting_frames(&self) -> impl Iterator<Item = &Frame> {
        self.waiting.iter()
    }

    pub fn pending_frame(&self) -> Option<&Frame> {
        self.pending.as_ref()
    }

    /// Drains every staged frame (widget teardown).
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        let mut frames: Vec<Frame> = self.waiting.drain(..).collect();
        frames.extend(self.pending.take());
        frames
    }
}
