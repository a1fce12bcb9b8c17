//! The compositor-process side of the buffer submission protocol.
//!
//! [`BufferManagerHost`] owns everything on the host side: it validates and
//! dispatches wire commands, stages frames, talks to the display through
//! the injected [`DisplayBackend`], and converts the display's out-of-order
//! signals into the ordered callback stream the client is promised.
//!
//! Validation is centralized here. A malformed request means client and
//! host state have diverged beyond repair, so every violation terminates
//! the whole channel with a reason string instead of surfacing as a
//! per-request error.

pub mod compositor;
pub mod presentation;
pub mod surface;

use crate::backend::{DisplayBackend, DisplayEvent, Placement};
use crate::buffer::{
    BufferFormat, BufferRegistry, BufferSource, DestroyDisposition, DmabufPlane, ImportState,
};
use crate::channel::HostEndpoint;
use crate::ids::{BufferId, SurfaceId, WidgetId};
use crate::wire::{Command, Event, OverlayEntry, ROOT_Z_ORDER};
use compositor::{Frame, FrameCompositor, FrameEntry};
use std::collections::{HashMap, HashSet};
use std::os::unix::io::RawFd;
use surface::Surface;
use thiserror::Error;
use tracing::{debug, trace, warn};
use vesper_core::{Color, CoreConfig, PresentationConfig, Rect, RectInt, Size};

/// A malformed or inconsistent request. Fatal to the whole channel.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ProtocolViolation(pub String);

fn violation(message: impl Into<String>) -> ProtocolViolation {
    ProtocolViolation(message.into())
}

#[derive(Debug)]
struct WidgetEntry {
    root: SurfaceId,
}

/// Host-side dispatcher for one channel generation.
pub struct BufferManagerHost<B: DisplayBackend> {
    channel: HostEndpoint,
    backend: B,
    registry: BufferRegistry,
    surfaces: HashMap<SurfaceId, Surface>,
    widgets: HashMap<WidgetId, WidgetEntry>,
    frames: FrameCompositor,
    presentation_config: PresentationConfig,
    next_surface_id: u64,
}

impl<B: DisplayBackend> BufferManagerHost<B> {
    pub fn new(channel: HostEndpoint, backend: B, config: &CoreConfig) -> Self {
        BufferManagerHost {
            channel,
            backend,
            registry: BufferRegistry::new(),
            surfaces: HashMap::new(),
            widgets: HashMap::new(),
            frames: FrameCompositor::new(),
            presentation_config: config.presentation,
            next_surface_id: 0,
        }
    }

    pub fn channel(&self) -> &HostEndpoint {
        &self.channel
    }

    fn alloc_surface_id(&mut self) -> SurfaceId {
        self.next_surface_id += 1;
        SurfaceId::new(self.next_surface_id)
    }

    /// Registers a window with the host and creates its root surface.
    /// Called by the embedding compositor when a window comes into
    /// existence; commits referencing an unregistered widget are protocol
    /// violations.
    pub fn register_widget(&mut self, widget: WidgetId) -> SurfaceId {
        if let Some(entry) = self.widgets.get(&widget) {
            return entry.root;
        }
        let sid = self.alloc_surface_id();
        debug!(%widget, %sid, "registering widget root surface");
        self.surfaces
            .insert(sid, Surface::new_root(sid, widget, self.presentation_config));
        self.widgets.insert(widget, WidgetEntry { root: sid });
        sid
    }

    pub fn root_surface(&self, widget: WidgetId) -> Option<SurfaceId> {
        self.widgets.get(&widget).map(|e| e.root)
    }

    /// Convenience for embedders that track configuration per widget rather
    /// than per surface.
    pub fn widget_configured(&mut self, widget: WidgetId) {
        if let Some(root) = self.root_surface(widget) {
            self.handle_display_event(DisplayEvent::SurfaceConfigured { surface: root });
        }
    }

    /// Tears down a widget and its surfaces. Buffers attached to them are
    /// implicitly released, completing any deferred destructions, and
    /// records still in flight resolve as failed.
    pub fn unregister_widget(&mut self, widget: WidgetId) {
        let Some(entry) = self.widgets.remove(&widget) else {
            return;
        };
        debug!(%widget, "unregistering widget");
        let mut events = Vec::new();
        let mut state = self.frames.remove_widget(widget).unwrap_or_default();

        // Frames that never reached the display fail their records now.
        for frame in state.drain_frames() {
            if let Some(root) = self.surfaces.get_mut(&entry.root) {
                root.tracker.resolve_failed(frame.seq, &mut events);
            }
            for buffer in frame.buffers() {
                if self.registry.drop_commit_ref(buffer) {
                    self.backend.destroy_buffer(buffer);
                    self.fail_buffer_records_everywhere(buffer, &mut events);
                }
            }
        }

        let mut sids = vec![entry.root];
        sids.extend(state.overlay_slots.drain(..));
        for sid in sids {
            if let Some(mut surf) = self.surfaces.remove(&sid) {
                surf.tracker.fail_all(&mut events);
            }
            for torn_down in self.registry.detach_surface(sid) {
                self.backend.destroy_buffer(torn_down);
                self.fail_buffer_records_everywhere(torn_down, &mut events);
            }
        }
        self.post_events(events);
    }

    /// Drains and dispatches the commands queued on the channel, in send
    /// order. The first violation terminates the channel and resets all
    /// per-generation state.
    pub fn pump(&mut self) {
        while !self.channel.is_terminated() {
            let Some(command) = self.channel.next_command() else {
                break;
            };
            if let Err(ProtocolViolation(reason)) = self.dispatch(command) {
                warn!(%reason, "protocol violation");
                self.channel.terminate(reason);
                self.reset();
            }
        }
    }

    /// Routes a notification from the display system.
    pub fn handle_display_event(&mut self, event: DisplayEvent) {
        match event {
            DisplayEvent::BufferImported { buffer_id, success } => {
                self.on_buffer_imported(buffer_id, success);
            }
            DisplayEvent::SurfaceConfigured { surface } => {
                let widget = match self.surfaces.get_mut(&surface) {
                    Some(surf) => {
                        surf.configured = true;
                        surf.is_root().then(|| surf.widget())
                    }
                    None => None,
                };
                if let Some(widget) = widget {
                    debug!(%surface, %widget, "surface configured");
                    let mut events = Vec::new();
                    self.pump_widget(widget, &mut events);
                    self.post_events(events);
                }
            }
            DisplayEvent::FrameCallback { surface } => {
                let widget = match self.surfaces.get_mut(&surface) {
                    Some(surf) => {
                        surf.awaiting_frame_callback = false;
                        surf.is_root().then(|| surf.widget())
                    }
                    None => None,
                };
                if let Some(widget) = widget {
                    let mut events = Vec::new();
                    self.pump_widget(widget, &mut events);
                    self.post_events(events);
                }
            }
            DisplayEvent::BufferReleased {
                surface,
                buffer_id,
                fence,
            } => {
                trace!(%surface, %buffer_id, "buffer released");
                let mut events = Vec::new();
                let is_root = self
                    .surfaces
                    .get(&surface)
                    .map(|s| s.is_root())
                    .unwrap_or(false);
                if is_root {
                    if let Some(surf) = self.surfaces.get_mut(&surface) {
                        surf.tracker.on_buffer_released(buffer_id, fence, &mut events);
                    }
                }
                if self.registry.detach(buffer_id, surface) {
                    self.backend.destroy_buffer(buffer_id);
                    self.fail_buffer_records_everywhere(buffer_id, &mut events);
                }
                self.post_events(events);
            }
            DisplayEvent::FramePresented {
                surface,
                seq,
                timestamp,
                refresh,
                flags,
            } => {
                let mut events = Vec::new();
                if let Some(surf) = self.surfaces.get_mut(&surface) {
                    surf.tracker
                        .on_presented(seq, timestamp, refresh, flags, &mut events);
                }
                self.post_events(events);
            }
            DisplayEvent::FrameDiscarded { surface, seq } => {
                let mut events = Vec::new();
                if let Some(surf) = self.surfaces.get_mut(&surface) {
                    surf.tracker.on_discarded(seq, &mut events);
                }
                self.post_events(events);
            }
        }
    }

    fn post_events(&self, events: Vec<Event>) {
        for event in events {
            self.channel.post_event(event);
        }
    }

    fn fail_buffer_records_everywhere(&mut self, buffer: BufferId, events: &mut Vec<Event>) {
        for surf in self.surfaces.values_mut() {
            surf.tracker.fail_records_for_buffer(buffer, events);
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<(), ProtocolViolation> {
        match command {
            Command::CreateDmabufBuffer {
                fd,
                size,
                strides,
                offsets,
                modifiers,
                format,
                plane_count,
                buffer_id,
            } => self.create_dmabuf_buffer(
                fd, size, strides, offsets, modifiers, format, plane_count, buffer_id,
            ),
            Command::CreateShmBuffer {
                fd,
                length,
                size,
                buffer_id,
            } => self.create_shm_buffer(fd, length, size, buffer_id),
            Command::CreateSolidColorBuffer {
                color,
                size,
                buffer_id,
            } => self.create_solid_color_buffer(color, size, buffer_id),
            Command::DestroyBuffer { buffer_id } => self.destroy_buffer(buffer_id),
            Command::CommitBuffer {
                widget,
                buffer_id,
                commit_id,
                bounds,
                corner_clip,
                scale,
                damage,
            } => self.commit_buffer(widget, buffer_id, commit_id, bounds, corner_clip, scale, damage),
            Command::CommitOverlays {
                widget,
                frame_seq,
                overlays,
            } => self.commit_overlays(widget, frame_seq, overlays),
        }
    }

    fn validate_new_buffer_id(&self, buffer_id: BufferId) -> Result<(), ProtocolViolation> {
        if buffer_id.raw() == 0 {
            return Err(violation("buffer id 0 is reserved"));
        }
        if self.registry.contains(buffer_id) {
            return Err(violation(format!("{} already exists", buffer_id)));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_dmabuf_buffer(
        &mut self,
        fd: RawFd,
        size: Size,
        strides: Vec<u32>,
        offsets: Vec<u32>,
        modifiers: Vec<u64>,
        format: u32,
        plane_count: u32,
        buffer_id: BufferId,
    ) -> Result<(), ProtocolViolation> {
        self.validate_new_buffer_id(buffer_id)?;
        if size.is_empty() {
            return Err(violation(format!(
                "CreateDmabufBuffer: empty size for {}",
                buffer_id
            )));
        }
        let planes = plane_count as usize;
        if planes == 0 {
            return Err(violation("CreateDmabufBuffer: plane count must be non-zero"));
        }
        if strides.len() != planes || offsets.len() != planes || modifiers.len() != planes {
            return Err(violation(format!(
                "CreateDmabufBuffer: plane vector lengths ({}, {}, {}) do not match plane count {}",
                strides.len(),
                offsets.len(),
                modifiers.len(),
                plane_count
            )));
        }
        if strides.iter().any(|s| *s == 0) {
            return Err(violation("CreateDmabufBuffer: zero stride"));
        }
        let format = BufferFormat::from_fourcc(format)
            .ok_or_else(|| violation(format!("unrecognized pixel format 0x{:08x}", format)))?;

        let planes = strides
            .iter()
            .zip(offsets.iter())
            .zip(modifiers.iter())
            .map(|((stride, offset), modifier)| DmabufPlane {
                stride: *stride,
                offset: *offset,
                modifier: *modifier,
            })
            .collect();
        self.register_and_import(
            buffer_id,
            BufferSource::Dmabuf {
                fd,
                size,
                format,
                planes,
            },
        )
    }

    fn create_shm_buffer(
        &mut self,
        fd: RawFd,
        length: u64,
        size: Size,
        buffer_id: BufferId,
    ) -> Result<(), ProtocolViolation> {
        self.validate_new_buffer_id(buffer_id)?;
        if size.is_empty() {
            return Err(violation(format!(
                "CreateShmBuffer: empty size for {}",
                buffer_id
            )));
        }
        if length == 0 {
            return Err(violation("CreateShmBuffer: zero length"));
        }
        self.register_and_import(buffer_id, BufferSource::Shm { fd, length, size })
    }

    fn create_solid_color_buffer(
        &mut self,
        color: Color,
        size: Size,
        buffer_id: BufferId,
    ) -> Result<(), ProtocolViolation> {
        self.validate_new_buffer_id(buffer_id)?;
        if size.is_empty() {
            return Err(violation(format!(
                "CreateSolidColorBuffer: empty size for {}",
                buffer_id
            )));
        }
        if !color.is_normalized() {
            return Err(violation(
                "CreateSolidColorBuffer: color channels must be normalized",
            ));
        }
        self.register_and_import(buffer_id, BufferSource::SolidColor { color, size })
    }

    fn register_and_import(
        &mut self,
        buffer_id: BufferId,
        source: BufferSource,
    ) -> Result<(), ProtocolViolation> {
        self.backend.import_buffer(buffer_id, &source);
        self.registry
            .register(buffer_id, source)
            .map_err(|e| violation(e.to_string()))?;
        trace!(%buffer_id, "buffer registered, import in flight");
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer_id: BufferId) -> Result<(), ProtocolViolation> {
        match self.registry.begin_destroy(buffer_id) {
            Ok(DestroyDisposition::Immediate) => {
                self.backend.destroy_buffer(buffer_id);
                Ok(())
            }
            Ok(DestroyDisposition::Deferred) => Ok(()),
            Err(e) => Err(violation(format!("DestroyBuffer: {}", e))),
        }
    }

    fn validate_commit_target(
        &self,
        widget: WidgetId,
        buffer_id: BufferId,
    ) -> Result<(), ProtocolViolation> {
        if !self.widgets.contains_key(&widget) {
            return Err(violation(format!("unknown {}", widget)));
        }
        match self.registry.get(buffer_id) {
            None => Err(violation(format!("unknown {}", buffer_id))),
            Some(buffer) if buffer.pending_destruction() => Err(violation(format!(
                "{} is pending destruction and cannot be committed",
                buffer_id
            ))),
            Some(_) => Ok(()),
        }
    }

    fn validate_rect(label: &str, rect: &Rect) -> Result<(), ProtocolViolation> {
        if !rect.is_finite() {
            return Err(violation(format!("{}: non-finite bounds", label)));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_buffer(
        &mut self,
        widget: WidgetId,
        buffer_id: BufferId,
        commit_id: u64,
        bounds: Rect,
        corner_clip: Option<Rect>,
        scale: f32,
        damage: RectInt,
    ) -> Result<(), ProtocolViolation> {
        self.validate_commit_target(widget, buffer_id)?;
        Self::validate_rect("CommitBuffer", &bounds)?;
        if let Some(clip) = &corner_clip {
            Self::validate_rect("CommitBuffer corner clip", clip)?;
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(violation(format!("CommitBuffer: invalid scale {}", scale)));
        }
        trace!(%widget, %buffer_id, commit_id, "buffer commit");
        self.accept_frame(Frame {
            widget,
            seq: 0,
            root: FrameEntry {
                buffer: buffer_id,
                placement: Placement {
                    bounds,
                    corner_clip,
                    scale: Some(scale),
                    damage: Some(damage),
                    priority: None,
                },
            },
            overlays: Vec::new(),
        })
    }

    fn commit_overlays(
        &mut self,
        widget: WidgetId,
        frame_seq: u64,
        overlays: Vec<OverlayEntry>,
    ) -> Result<(), ProtocolViolation> {
        if !self.widgets.contains_key(&widget) {
            return Err(violation(format!("unknown {}", widget)));
        }
        let mut root = None;
        let mut planes = Vec::new();
        let mut seen_z = HashSet::new();
        for entry in overlays {
            self.validate_commit_target(widget, entry.buffer_id)?;
            Self::validate_rect("CommitOverlays", &entry.bounds)?;
            if let Some(clip) = &entry.corner_clip {
                Self::validate_rect("CommitOverlays corner clip", clip)?;
            }
            if entry.z_order == ROOT_Z_ORDER {
                if root.is_some() {
                    return Err(violation("CommitOverlays: multiple root plane entries"));
                }
                root = Some(entry);
            } else {
                if !seen_z.insert(entry.z_order) {
                    return Err(violation(format!(
                        "CommitOverlays: duplicate z-order {}",
                        entry.z_order
                    )));
                }
                planes.push(entry);
            }
        }
        let root = root.ok_or_else(|| violation("CommitOverlays: no root plane entry"))?;
        planes.sort_by_key(|e| e.z_order);

        let to_frame_entry = |entry: OverlayEntry| FrameEntry {
            buffer: entry.buffer_id,
            placement: Placement {
                bounds: entry.bounds,
                corner_clip: entry.corner_clip,
                scale: None,
                damage: None,
                priority: entry.priority,
            },
        };
        trace!(%widget, frame_seq, planes = planes.len(), "overlay commit");
        self.accept_frame(Frame {
            widget,
            seq: 0,
            root: to_frame_entry(root),
            overlays: planes.into_iter().map(to_frame_entry).collect(),
        })
    }

    fn accept_frame(&mut self, mut frame: Frame) -> Result<(), ProtocolViolation> {
        let root_sid = self
            .widgets
            .get(&frame.widget)
            .map(|e| e.root)
            .expect("widget validated before acceptance");
        let mut events = Vec::new();
        {
            let root = self
                .surfaces
                .get_mut(&root_sid)
                .expect("root surface exists while widget is registered");
            frame.seq = root.allocate_seq();
            root.tracker.push(frame.seq, frame.root.buffer, &mut events);
        }
        let referenced: Vec<BufferId> = frame.buffers().collect();
        for buffer in referenced {
            self.registry.add_commit_ref(buffer);
        }
        let widget = frame.widget;
        self.frames.enqueue(frame);
        self.pump_widget(widget, &mut events);
        self.post_events(events);
        Ok(())
    }

    /// Moves ready frames towards the display for one widget: frames whose
    /// buffers finished importing migrate from the waiting FIFO into the
    /// pending slot (latest wins), and the pending frame plays once the
    /// root surface is configured and idle.
    fn pump_widget(&mut self, widget: WidgetId, events: &mut Vec<Event>) {
        let Some(root_sid) = self.widgets.get(&widget).map(|e| e.root) else {
            return;
        };
        loop {
            // Flush the held frame first: a frame only coalesces away when
            // the surface cannot take it, never when the display is idle.
            let can_play = self
                .surfaces
                .get(&root_sid)
                .map(|s| s.can_accept_update())
                .unwrap_or(false);
            if can_play {
                if let Some(frame) = self.frames.take_pending(widget) {
                    self.play_frame(root_sid, frame, events);
                    continue;
                }
            }
            match self.frames.pop_ready(widget, &self.registry) {
                Some(frame) => {
                    if let Some(displaced) = self.frames.park_pending(frame) {
                        self.resolve_displaced(root_sid, &displaced, events);
                    }
                }
                None => break,
            }
        }
    }

    /// A parked frame was overtaken before reaching the display: it still
    /// resolves its record (acked, never shown) so the exactly-once
    /// callback contract holds.
    fn resolve_displaced(&mut self, root_sid: SurfaceId, displaced: &Frame, events: &mut Vec<Event>) {
        trace!(widget = %displaced.widget, seq = displaced.seq, "coalescing displaced frame");
        if let Some(root) = self.surfaces.get_mut(&root_sid) {
            root.tracker.resolve_skipped(displaced.seq, events);
        }
        for buffer in displaced.buffers() {
            if self.registry.drop_commit_ref(buffer) {
                self.backend.destroy_buffer(buffer);
                self.fail_buffer_records_everywhere(buffer, events);
            }
        }
    }

    /// Issues one atomic frame to the display: overlay subsurfaces first,
    /// stale subsurfaces hidden, the root surface committed last so a
    /// partially attached frame can never become visible.
    fn play_frame(&mut self, root_sid: SurfaceId, frame: Frame, events: &mut Vec<Event>) {
        let widget = frame.widget;
        let seq = frame.seq;
        debug!(%widget, seq, overlays = frame.overlays.len(), "playing frame");

        for (index, entry) in frame.overlays.iter().enumerate() {
            let sid = self.overlay_slot(widget, root_sid, index);
            let previous = {
                let surf = self
                    .surfaces
                    .get_mut(&sid)
                    .expect("overlay surface exists");
                let previous = surf.attached;
                surf.attached = Some(entry.buffer);
                surf.visible = true;
                previous
            };
            if previous != Some(entry.buffer) {
                self.registry.attach(entry.buffer, sid);
            }
            self.backend.attach(sid, entry.buffer, &entry.placement);
            self.backend.commit(sid, seq);
            self.registry.drop_commit_ref(entry.buffer);
        }

        // Overlays present in the previous frame but absent now are hidden,
        // not left showing stale content.
        let stale_slots: Vec<SurfaceId> = {
            let state = self.frames.state_mut(widget);
            let upper = state.active_overlay_count.min(state.overlay_slots.len());
            let stale = state.overlay_slots[frame.overlays.len().min(upper)..upper].to_vec();
            state.active_overlay_count = frame.overlays.len();
            stale
        };
        for sid in stale_slots {
            let detached = match self.surfaces.get_mut(&sid) {
                Some(surf) if surf.visible => {
                    surf.visible = false;
                    surf.attached.take()
                }
                _ => continue,
            };
            self.backend.hide_subsurface(sid);
            if let Some(buffer) = detached {
                if self.registry.detach(buffer, sid) {
                    self.backend.destroy_buffer(buffer);
                    self.fail_buffer_records_everywhere(buffer, events);
                }
            }
        }

        // Root goes last, once every subsurface of this frame is attached.
        let previous = {
            let root = self
                .surfaces
                .get_mut(&root_sid)
                .expect("root surface exists");
            let previous = root.attached;
            root.attached = Some(frame.root.buffer);
            root.awaiting_frame_callback = true;
            previous
        };
        if previous != Some(frame.root.buffer) {
            self.registry.attach(frame.root.buffer, root_sid);
        }
        self.backend
            .attach(root_sid, frame.root.buffer, &frame.root.placement);
        self.backend.commit(root_sid, seq);
        self.registry.drop_commit_ref(frame.root.buffer);
        if let Some(root) = self.surfaces.get_mut(&root_sid) {
            root.tracker.mark_played(seq, previous, events);
        }
    }

    fn overlay_slot(&mut self, widget: WidgetId, root_sid: SurfaceId, index: usize) -> SurfaceId {
        if let Some(sid) = self
            .frames
            .state_mut(widget)
            .overlay_slots
            .get(index)
            .copied()
        {
            return sid;
        }
        let sid = self.alloc_surface_id();
        debug!(%widget, %sid, index, "allocating overlay subsurface");
        self.frames.state_mut(widget).overlay_slots.push(sid);
        self.surfaces.insert(
            sid,
            Surface::new_overlay(sid, widget, root_sid, self.presentation_config),
        );
        self.backend.ensure_subsurface(sid, root_sid);
        sid
    }

    fn on_buffer_imported(&mut self, buffer_id: BufferId, success: bool) {
        if success {
            if !self.registry.set_import_state(buffer_id, ImportState::Ready) {
                return;
            }
            debug!(%buffer_id, "buffer import complete");
            let mut events = Vec::new();
            for widget in self.frames.widgets_with_waiting_frames() {
                self.pump_widget(widget, &mut events);
            }
            self.post_events(events);
        } else {
            self.registry.set_import_state(buffer_id, ImportState::Failed);
            warn!(%buffer_id, "buffer import failed");
            // Frames gated on the failed buffer can never become ready;
            // they fail through the normal callback contract before the
            // channel is severed.
            let mut events = Vec::new();
            for frame in self.frames.remove_frames_referencing(buffer_id) {
                if let Some(root_sid) = self.widgets.get(&frame.widget).map(|e| e.root) {
                    if let Some(root) = self.surfaces.get_mut(&root_sid) {
                        root.tracker.resolve_failed(frame.seq, &mut events);
                    }
                }
                for buffer in frame.buffers() {
                    if self.registry.drop_commit_ref(buffer) {
                        self.backend.destroy_buffer(buffer);
                        self.fail_buffer_records_everywhere(buffer, &mut events);
                    }
                }
            }
            self.post_events(events);
            self.channel.terminate(format!("{} import failed", buffer_id));
            self.reset();
        }
    }

    /// Drops all per-generation state: every buffer, staged frame, and
    /// overlay subsurface. Root surfaces survive (windows outlive GPU
    /// process restarts) but forget their attachments and in-flight
    /// bookkeeping. The client is expected to re-create everything before
    /// committing again.
    fn reset(&mut self) {
        debug!("resetting channel generation state");
        for buffer_id in self.registry.reset() {
            self.backend.destroy_buffer(buffer_id);
        }
        for sid in self.frames.reset() {
            if self.surfaces.remove(&sid).is_some() {
                self.backend.hide_subsurface(sid);
            }
        }
        for surf in self.surfaces.values_mut() {
            surf.attached = None;
            surf.awaiting_frame_callback = false;
            surf.tracker.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{DisplayRequest, FakeDisplay};
    use crate::channel::channel;

    fn host() -> (
        BufferManagerHost<FakeDisplay>,
        crate::channel::ClientEndpoint,
        crate::backend::testing::DisplayLog,
    ) {
        let (host_end, client_end) = channel(1);
        let (display, log) = FakeDisplay::new();
        let host = BufferManagerHost::new(host_end, display, &CoreConfig::default());
        (host, client_end, log)
    }

    fn solid_create(raw: u32) -> Command {
        Command::CreateSolidColorBuffer {
            color: Color::BLACK,
            size: Size::new(1, 1),
            buffer_id: BufferId::new(raw),
        }
    }

    #[test]
    fn test_register_widget_is_idempotent() {
        let (mut host, _client, _log) = host();
        let widget = WidgetId::new(1);
        let root = host.register_widget(widget);
        assert_eq!(host.register_widget(widget), root);
    }

    #[test]
    fn test_zero_buffer_id_terminates_channel() {
        let (mut host, client, _log) = host();
        client.submit(solid_create(0)).unwrap();
        host.pump();
        assert!(host.channel().is_terminated());
        assert_eq!(
            host.channel().termination_reason().as_deref(),
            Some("buffer id 0 is reserved")
        );
    }

    #[test]
    fn test_duplicate_buffer_id_terminates_channel() {
        let (mut host, client, _log) = host();
        client.submit(solid_create(1)).unwrap();
        client.submit(solid_create(1)).unwrap();
        host.pump();
        assert!(host.channel().is_terminated());
        let reason = host.channel().termination_reason().unwrap();
        assert!(reason.contains("buffer#1"), "reason: {}", reason);
    }

    #[test]
    fn test_destroy_unknown_buffer_terminates_channel() {
        let (mut host, client, _log) = host();
        client
            .submit(Command::DestroyBuffer {
                buffer_id: BufferId::new(42),
            })
            .unwrap();
        host.pump();
        assert!(host.channel().is_terminated());
    }

    #[test]
    fn test_commit_to_unknown_widget_terminates_channel() {
        let (mut host, client, _log) = host();
        client.submit(solid_create(1)).unwrap();
        client
            .submit(Command::CommitBuffer {
                widget: WidgetId::new(9),
                buffer_id: BufferId::new(1),
                commit_id: 1,
                bounds: Rect::new(0.0, 0.0, 10.0, 10.0),
                corner_clip: None,
                scale: 1.0,
                damage: RectInt::new(0, 0, 10, 10),
            })
            .unwrap();
        host.pump();
        assert!(host.channel().is_terminated());
        let reason = host.channel().termination_reason().unwrap();
        assert!(reason.contains("widget#9"), "reason: {}", reason);
    }

    #[test]
    fn test_nan_bounds_terminate_channel() {
        let (mut host, client, _log) = host();
        let widget = WidgetId::new(1);
        host.register_widget(widget);
        client.submit(solid_create(1)).unwrap();
        client
            .submit(Command::CommitBuffer {
                widget,
                buffer_id: BufferId::new(1),
                commit_id: 1,
                bounds: Rect::new(f32::NAN, 0.0, 10.0, 10.0),
                corner_clip: None,
                scale: 1.0,
                damage: RectInt::new(0, 0, 10, 10),
            })
            .unwrap();
        host.pump();
        assert!(host.channel().is_terminated());
    }

    #[test]
    fn test_violation_resets_generation_state() {
        let (mut host, client, log) = host();
        client.submit(solid_create(1)).unwrap();
        client.submit(solid_create(0)).unwrap();
        host.pump();

        // Buffer 1 was created then torn down by the reset.
        let requests = log.take();
        assert!(requests.contains(&DisplayRequest::ImportBuffer(BufferId::new(1))));
        assert!(requests.contains(&DisplayRequest::DestroyBuffer(BufferId::new(1))));
    }
}
