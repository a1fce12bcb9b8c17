//! Host-side buffer bookkeeping.
//!
//! The registry is the source of truth for buffer lifetime: it owns the
//! mapping from [`BufferId`] to the buffer's backing description, import
//! state, and attachment bookkeeping. Attachments form a multiset keyed by
//! surface — the same buffer may be attached to several surfaces at once
//! (an overlay reused across planes), and more than once per surface while
//! commits overlap.
//!
//! Destruction is deferred while a buffer is attached anywhere or still
//! referenced by an in-flight commit; a deferred buffer stays valid for
//! feedback bookkeeping but can no longer be the target of new commits.

use crate::ids::{BufferId, SurfaceId};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use thiserror::Error;
use tracing::{debug, trace};
use vesper_core::{Color, Size};

/// Recognized pixel formats, carried on the wire as DRM fourcc codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFormat {
    Argb8888,
    Xrgb8888,
    Abgr8888,
    Xbgr8888,
    Rgb565,
    R8,
    Gr88,
    Nv12,
    Yuv420,
}

const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | (b as u32) << 8 | (c as u32) << 16 | (d as u32) << 24
}

impl BufferFormat {
    /// Maps a wire fourcc code to a recognized format.
    pub fn from_fourcc(code: u32) -> Option<Self> {
        match code {
            c if c == fourcc(b'A', b'R', b'2', b'4') => Some(BufferFormat::Argb8888),
            c if c == fourcc(b'X', b'R', b'2', b'4') => Some(BufferFormat::Xrgb8888),
            c if c == fourcc(b'A', b'B', b'2', b'4') => Some(BufferFormat::Abgr8888),
            c if c == fourcc(b'X', b'B', b'2', b'4') => Some(BufferFormat::Xbgr8888),
            c if c == fourcc(b'R', b'G', b'1', b'6') => Some(BufferFormat::Rgb565),
            c if c == fourcc(b'R', b'8', b' ', b' ') => Some(BufferFormat::R8),
            c if c == fourcc(b'G', b'R', b'8', b'8') => Some(BufferFormat::Gr88),
            c if c == fourcc(b'N', b'V', b'1', b'2') => Some(BufferFormat::Nv12),
            c if c == fourcc(b'Y', b'U', b'1', b'2') => Some(BufferFormat::Yuv420),
            _ => None,
        }
    }

    pub fn to_fourcc(self) -> u32 {
        match self {
            BufferFormat::Argb8888 => fourcc(b'A', b'R', b'2', b'4'),
            BufferFormat::Xrgb8888 => fourcc(b'X', b'R', b'2', b'4'),
            BufferFormat::Abgr8888 => fourcc(b'A', b'B', b'2', b'4'),
            BufferFormat::Xbgr8888 => fourcc(b'X', b'B', b'2', b'4'),
            BufferFormat::Rgb565 => fourcc(b'R', b'G', b'1', b'6'),
            BufferFormat::R8 => fourcc(b'R', b'8', b' ', b' '),
            BufferFormat::Gr88 => fourcc(b'G', b'R', b'8', b'8'),
            BufferFormat::Nv12 => fourcc(b'N', b'V', b'1', b'2'),
            BufferFormat::Yuv420 => fourcc(b'Y', b'U', b'1', b'2'),
        }
    }
}

/// One plane of a dmabuf-backed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmabufPlane {
    pub stride: u32,
    pub offset: u32,
    pub modifier: u64,
}

/// The backing resource of a buffer. File descriptors are opaque handles
/// owned by the display backend once the import is issued.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferSource {
    Dmabuf {
        fd: RawFd,
        size: Size,
        format: BufferFormat,
        planes: Vec<DmabufPlane>,
    },
    Shm {
        fd: RawFd,
        length: u64,
        size: Size,
    },
    SolidColor {
        color: Color,
        size: Size,
    },
}

impl BufferSource {
    pub fn size(&self) -> Size {
        match self {
            BufferSource::Dmabuf { size, .. }
            | BufferSource::Shm { size, .. }
            | BufferSource::SolidColor { size, .. } => *size,
        }
    }
}

/// Progress of the asynchronous import into the display system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Pending,
    Ready,
    Failed,
}

/// One live buffer owned by the registry.
#[derive(Debug)]
pub struct Buffer {
    pub id: BufferId,
    pub source: BufferSource,
    pub state: ImportState,
    /// Attachment multiset: per-surface attachment count.
    attachments: HashMap<SurfaceId, u32>,
    /// Commits referencing this buffer that have not yet materialized into
    /// an attachment or been resolved away.
    commit_refs: u32,
    pending_destruction: bool,
}

impl Buffer {
    fn new(id: BufferId, source: BufferSource) -> Self {
        Buffer {
            id,
            source,
            state: ImportState::Pending,
            attachments: HashMap::new(),
            commit_refs: 0,
            pending_destruction: false,
        }
    }

    pub fn total_attachments(&self) -> u32 {
        self.attachments.values().sum()
    }

    pub fn is_attached_to(&self, surface: SurfaceId) -> bool {
        self.attachments.get(&surface).copied().unwrap_or(0) > 0
    }

    pub fn pending_destruction(&self) -> bool {
        self.pending_destruction
    }

    /// No attachment and no commit in flight references this buffer.
    fn is_idle(&self) -> bool {
        self.attachments.is_empty() && self.commit_refs == 0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0} already exists")]
    DuplicateId(BufferId),
    #[error("{0} is not a known live buffer")]
    UnknownId(BufferId),
}

/// What `begin_destroy` decided about a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyDisposition {
    /// The buffer was idle and has been torn down.
    Immediate,
    /// Teardown waits until the last attachment or commit reference drains.
    Deferred,
}

/// Arena of live buffers, indexed by client-chosen id.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: HashMap<BufferId, Buffer>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.buffers.contains_key(&id)
    }

    pub fn get(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.get(&id)
    }

    pub fn get_mut(&mut self, id: BufferId) -> Option<&mut Buffer> {
        self.buffers.get_mut(&id)
    }

    /// True when `id` may be the target of a new commit: alive and not
    /// marked for destruction.
    pub fn is_commit_target(&self, id: BufferId) -> bool {
        self.buffers
            .get(&id)
            .map(|b| !b.pending_destruction)
            .unwrap_or(false)
    }

    pub fn register(&mut self, id: BufferId, source: BufferSource) -> Result<(), RegistryError> {
        if self.buffers.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        trace!(%id, "registering buffer");
        self.buffers.insert(id, Buffer::new(id, source));
        Ok(())
    }

    /// Records the completion of an asynchronous import. Returns `false`
    /// when the buffer is no longer alive (torn down while importing).
    pub fn set_import_state(&mut self, id: BufferId, state: ImportState) -> bool {
        match self.buffers.get_mut(&id) {
            Some(buffer) => {
                buffer.state = state;
                true
            }
            None => false,
        }
    }

    /// Marks a buffer for destruction. Idle buffers are torn down right
    /// away; busy buffers stay alive for bookkeeping until their last
    /// attachment and commit reference drain.
    pub fn begin_destroy(&mut self, id: BufferId) -> Result<DestroyDisposition, RegistryError> {
        let buffer = self
            .buffers
            .get_mut(&id)
            .ok_or(RegistryError::UnknownId(id))?;
        if buffer.pending_destruction {
            // Destroying twice is indistinguishable from destroying an
            // unknown id from the client's point of view.
            return Err(RegistryError::UnknownId(id));
        }
        if buffer.is_idle() {
            debug!(%id, "destroying idle buffer");
            self.buffers.remove(&id);
            Ok(DestroyDisposition::Immediate)
        } else {
            debug!(%id, "deferring buffer destruction");
            buffer.pending_destruction = true;
            Ok(DestroyDisposition::Deferred)
        }
    }

    /// Counts one accepted commit referencing this buffer.
    pub fn add_commit_ref(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.commit_refs += 1;
        }
    }

    /// Drops one commit reference (the commit materialized into an
    /// attachment, was coalesced away, or failed). Returns `true` when this
    /// completed a deferred teardown.
    pub fn drop_commit_ref(&mut self, id: BufferId) -> bool {
        let Some(buffer) = self.buffers.get_mut(&id) else {
            return false;
        };
        buffer.commit_refs = buffer.commit_refs.saturating_sub(1);
        self.maybe_complete_teardown(id)
    }

    /// Adds one attachment of `id` to `surface`.
    pub fn attach(&mut self, id: BufferId, surface: SurfaceId) {
        if let Some(buffer) = self.buffers.get_mut(&id) {
            *buffer.attachments.entry(surface).or_insert(0) += 1;
            trace!(%id, %surface, "buffer attached");
        }
    }

    /// Removes one attachment of `id` from `surface`. Returns `true` when
    /// this completed a deferred teardown.
    pub fn detach(&mut self, id: BufferId, surface: SurfaceId) -> bool {
        if let Some(buffer) = self.buffers.get_mut(&id) {
            if let Some(count) = buffer.attachments.get_mut(&surface) {
                *count -= 1;
                if *count == 0 {
                    buffer.attachments.remove(&surface);
                }
                trace!(%id, %surface, "buffer detached");
            }
        }
        self.maybe_complete_teardown(id)
    }

    /// Drops every attachment involving `surface` (surface teardown).
    /// Returns the buffers whose deferred destruction completed as a result.
    pub fn detach_surface(&mut self, surface: SurfaceId) -> Vec<BufferId> {
        let affected: Vec<BufferId> = self
            .buffers
            .values_mut()
            .filter_map(|buffer| {
                buffer.attachments.remove(&surface).map(|_| buffer.id)
            })
            .collect();
        affected
            .into_iter()
            .filter(|id| self.maybe_complete_teardown(*id))
            .collect()
    }

    fn maybe_complete_teardown(&mut self, id: BufferId) -> bool {
        let done = self
            .buffers
            .get(&id)
            .map(|b| b.pending_destruction && b.is_idle())
            .unwrap_or(false);
        if done {
            debug!(%id, "completing deferred buffer destruction");
            self.buffers.remove(&id);
        }
        done
    }

    /// Drops every buffer (channel generation ended). Returns the ids that
    /// were still alive so the caller can release their display resources.
    pub fn reset(&mut self) -> Vec<BufferId> {
        let ids: Vec<BufferId> = self.buffers.keys().copied().collect();
        self.buffers.clear();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_source() -> BufferSource {
        BufferSource::SolidColor {
            color: Color::BLACK,
            size: Size::new(1, 1),
        }
    }

    #[test]
    fn test_fourcc_round_trip() {
        for format in [
            BufferFormat::Argb8888,
            BufferFormat::Xrgb8888,
            BufferFormat::R8,
            BufferFormat::Nv12,
        ] {
            assert_eq!(BufferFormat::from_fourcc(format.to_fourcc()), Some(format));
        }
        assert_eq!(BufferFormat::from_fourcc(0xdead_beef), None);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = BufferRegistry::new();
        let id = BufferId::new(1);
        registry.register(id, solid_source()).unwrap();
        assert_eq!(
            registry.register(id, solid_source()),
            Err(RegistryError::DuplicateId(id))
        );
    }

    #[test]
    fn test_destroy_unknown_id() {
        let mut registry = BufferRegistry::new();
        assert_eq!(
            registry.begin_destroy(BufferId::new(9)),
            Err(RegistryError::UnknownId(BufferId::new(9)))
        );
    }

    #[test]
    fn test_idle_buffer_destroys_immediately() {
        let mut registry = BufferRegistry::new();
        let id = BufferId::new(1);
        registry.register(id, solid_source()).unwrap();
        assert_eq!(
            registry.begin_destroy(id),
            Ok(DestroyDisposition::Immediate)
        );
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_attached_buffer_defers_until_last_detach() {
        let mut registry = BufferRegistry::new();
        let id = BufferId::new(1);
        let s1 = SurfaceId::new(10);
        let s2 = SurfaceId::new(11);
        registry.register(id, solid_source()).unwrap();
        registry.attach(id, s1);
        registry.attach(id, s2);

        assert_eq!(registry.begin_destroy(id), Ok(DestroyDisposition::Deferred));
        assert!(registry.contains(id));
        assert!(!registry.is_commit_target(id));

        assert!(!registry.detach(id, s1));
        assert!(registry.detach(id, s2));
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_multiset_attachments_per_surface() {
        let mut registry = BufferRegistry::new();
        let id = BufferId::new(1);
        let s = SurfaceId::new(10);
        registry.register(id, solid_source()).unwrap();
        registry.attach(id, s);
        registry.attach(id, s);
        assert_eq!(registry.get(id).unwrap().total_attachments(), 2);

        registry.begin_destroy(id).unwrap();
        assert!(!registry.detach(id, s));
        assert!(registry.detach(id, s));
    }

    #[test]
    fn test_commit_ref_blocks_teardown() {
        let mut registry = BufferRegistry::new();
        let id = BufferId::new(2);
        registry.register(id, solid_source()).unwrap();
        registry.add_commit_ref(id);

        assert_eq!(registry.begin_destroy(id), Ok(DestroyDisposition::Deferred));
        assert!(registry.contains(id));
        assert!(registry.drop_commit_ref(id));
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_double_destroy_reads_as_unknown() {
        let mut registry = BufferRegistry::new();
        let id = BufferId::new(3);
        registry.register(id, solid_source()).unwrap();
        registry.attach(id, SurfaceId::new(1));
        registry.begin_destroy(id).unwrap();
        assert_eq!(
            registry.begin_destroy(id),
            Err(RegistryError::UnknownId(id))
        );
    }

    #[test]
    fn test_detach_surface_completes_teardowns() {
        let mut registry = BufferRegistry::new();
        let a = BufferId::new(1);
        let b = BufferId::new(2);
        let s = SurfaceId::new(5);
        registry.register(a, solid_source()).unwrap();
        registry.register(b, solid_source()).unwrap();
        registry.attach(a, s);
        registry.attach(b, s);
        registry.begin_destroy(a).unwrap();

        let torn_down = registry.detach_surface(s);
        assert_eq!(torn_down, vec![a]);
        assert!(registry.contains(b));
        assert_eq!(registry.get(b).unwrap().total_attachments(), 0);
    }
}
