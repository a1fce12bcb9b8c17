//! Per-surface state on the host side.
//!
//! A surface is either a widget's root surface or an overlay subsurface
//! below it. Root surfaces gate the flow of frames twice: nothing reaches
//! the display before the surface is configured, and at most one display
//! update is outstanding at a time (a new frame arriving while one is in
//! flight is held, latest wins, until the frame callback).

use super::presentation::PresentationTracker;
use crate::ids::{BufferId, SurfaceId, WidgetId};
use vesper_core::PresentationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRole {
    Root { widget: WidgetId },
    Overlay { widget: WidgetId, parent: SurfaceId },
}

#[derive(Debug)]
pub struct Surface {
    pub id: SurfaceId,
    pub role: SurfaceRole,
    /// Set once the display acknowledged initial geometry negotiation.
    /// Overlay subsurfaces piggyback on their parent and start configured.
    pub configured: bool,
    /// One display update is in flight; further frames are held.
    pub awaiting_frame_callback: bool,
    /// The buffer most recently attached by the host. Buffers it replaced
    /// stay tracked by the registry until the display releases them.
    pub attached: Option<BufferId>,
    /// Overlay subsurfaces only: whether the plane is currently shown.
    pub visible: bool,
    next_seq: u64,
    /// Submission/presentation bookkeeping; only root surfaces accumulate
    /// records, one per accepted frame.
    pub tracker: PresentationTracker,
}

impl Surface {
    pub fn new_root(id: SurfaceId, widget: WidgetId, config: PresentationConfig) -> Self {
        Surface {
            id,
            role: SurfaceRole::Root { widget },
            configured: false,
            awaiting_frame_callback: false,
            attached: None,
            visible: false,
            next_seq: 0,
            tracker: PresentationTracker::new(config),
        }
    }

    pub fn new_overlay(
        id: SurfaceId,
        widget: WidgetId,
        parent: SurfaceId,
        config: PresentationConfig,
    ) -> Self {
        Surface {
            id,
            role: SurfaceRole::Overlay { widget, parent },
            configured: true,
            awaiting_frame_callback: false,
            attached: None,
            visible: false,
            next_seq: 0,
            tracker: PresentationTracker::new(config),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.role, SurfaceRole::Root { .. })
    }

    pub fn widget(&self) -> WidgetId {
        match self.role {
            SurfaceRole::Root { widget } | SurfaceRole::Overlay { widget, .. } => widget,
        }
    }

    /// Allocates the next per-surface commit sequence number.
    pub fn allocate_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// True when a held frame may be flushed to the display.
    pub fn can_accept_update(&self) -> bool {
        self.configured && !self.awaiting_frame_callback
    }
}
