//! The boundary between the buffer manager host and the actual display
//! system.
//!
//! The host never talks to a display server directly; it issues requests
//! through [`DisplayBackend`] and receives completions, frame callbacks,
//! buffer releases, and presentation feedback as [`DisplayEvent`]s routed in
//! by the embedding event loop. The backend is handed in at host
//! construction, which keeps the protocol core deterministic and lets tests
//! script the display's behavior, including event reordering.

use crate::buffer::BufferSource;
use crate::ids::{BufferId, SurfaceId};
use crate::wire::{OverlayPriority, PresentationFlags, ReleaseFence};
use std::time::Duration;
use vesper_core::{Rect, RectInt};

/// Where and how a buffer is placed when attached to a surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub bounds: Rect,
    pub corner_clip: Option<Rect>,
    /// Buffer-to-surface scale; only meaningful for root planes.
    pub scale: Option<f32>,
    /// Damaged region of the buffer; `None` means full damage.
    pub damage: Option<RectInt>,
    pub priority: Option<OverlayPriority>,
}

/// Requests the host issues towards the display system.
///
/// All calls are fire-and-forget; results come back as [`DisplayEvent`]s.
pub trait DisplayBackend {
    /// Starts importing a buffer's backing resource. Completion is reported
    /// via [`DisplayEvent::BufferImported`].
    fn import_buffer(&mut self, buffer_id: BufferId, source: &BufferSource);

    /// Makes sure an overlay subsurface exists below `parent`.
    fn ensure_subsurface(&mut self, surface: SurfaceId, parent: SurfaceId);

    /// Attaches a buffer to a surface at the given placement.
    fn attach(&mut self, surface: SurfaceId, buffer_id: BufferId, placement: &Placement);

    /// Issues the display update for a surface. `seq` identifies the commit
    /// in subsequent presentation feedback events.
    fn commit(&mut self, surface: SurfaceId, seq: u64);

    /// Detaches and hides an overlay subsurface.
    fn hide_subsurface(&mut self, surface: SurfaceId);

    /// Tears down an imported buffer.
    fn destroy_buffer(&mut self, buffer_id: BufferId);
}

/// Notifications flowing from the display system into the host.
///
/// The underlying display may deliver these in an order that differs from
/// commit order (releases may be skipped for overtaken buffers, feedback may
/// arrive late); the host reconstructs the client-visible ordering.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    /// An asynchronous buffer import finished.
    BufferImported { buffer_id: BufferId, success: bool },
    /// A surface completed its initial geometry negotiation; commits may now
    /// reach the display.
    SurfaceConfigured { surface: SurfaceId },
    /// The display is ready for the next update on this surface.
    FrameCallback { surface: SurfaceId },
    /// A previously attached buffer is no longer in use by the display.
    BufferReleased {
        surface: SurfaceId,
        buffer_id: BufferId,
        fence: Option<ReleaseFence>,
    },
    /// The commit identified by `seq` became visible on screen.
    FramePresented {
        surface: SurfaceId,
        seq: u64,
        timestamp: Duration,
        refresh: Duration,
        flags: PresentationFlags,
    },
    /// The display reports that no feedback will ever arrive for `seq`.
    FrameDiscarded { surface: SurfaceId, seq: u64 },
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted display for tests: records every request and lets the
    //! test inject [`DisplayEvent`]s in whatever order the scenario needs.

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    pub enum DisplayRequest {
        ImportBuffer(BufferId),
        EnsureSubsurface {
            surface: SurfaceId,
            parent: SurfaceId,
        },
        Attach {
            surface: SurfaceId,
            buffer_id: BufferId,
        },
        Commit {
            surface: SurfaceId,
            seq: u64,
        },
        HideSubsurface(SurfaceId),
        DestroyBuffer(BufferId),
    }

    #[derive(Debug, Default)]
    pub struct FakeDisplay {
        log: Arc<Mutex<Vec<DisplayRequest>>>,
    }

    /// A handle onto the fake display's request log that stays usable after
    /// the display itself is moved into the host.
    #[derive(Debug, Clone)]
    pub struct DisplayLog(Arc<Mutex<Vec<DisplayRequest>>>);

    impl FakeDisplay {
        pub fn new() -> (Self, DisplayLog) {
            let log = Arc::new(Mutex::new(Vec::new()));
            (FakeDisplay { log: log.clone() }, DisplayLog(log))
        }
    }

    impl DisplayLog {
        /// Drains and returns the requests recorded so far.
        pub fn take(&self) -> Vec<DisplayRequest> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }

        pub fn snapshot(&self) -> Vec<DisplayRequest> {
            self.0.lock().unwrap().clone()
        }
    }

    impl DisplayBackend for FakeDisplay {
        fn import_buffer(&mut self, buffer_id: BufferId, _source: &BufferSource) {
            self.log
                .lock()
                .unwrap()
                .push(DisplayRequest::ImportBuffer(buffer_id));
        }

        fn ensure_subsurface(&mut self, surface: SurfaceId, parent: SurfaceId) {
            self.log
                .lock()
                .unwrap()
                .push(DisplayRequest::EnsureSubsurface { surface, parent });
        }

        fn attach(&mut self, surface: SurfaceId, buffer_id: BufferId, _placement: &Placement) {
            self.log
                .lock()
                .unwrap()
                .push(DisplayRequest::Attach { surface, buffer_id });
        }

        fn commit(&mut self, surface: SurfaceId, seq: u64) {
            self.log
                .lock()
                .unwrap()
                .push(DisplayRequest::Commit { surface, seq });
        }

        fn hide_subsurface(&mut self, surface: SurfaceId) {
            self.log
                .lock()
                .unwrap()
                .push(DisplayRequest::HideSubsurface(surface));
        }

        fn destroy_buffer(&mut self, buffer_id: BufferId) {
            self.log
                .lock()
                .unwrap()
                .push(DisplayRequest::DestroyBuffer(buffer_id));
        }
    }
}
