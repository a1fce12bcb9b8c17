//! # Vesper Buffer Manager (`vesper-buffer-manager`)
//!
//! Cross-process graphics-buffer submission and presentation feedback for
//! the Vesper compositor. A GPU-process client submits rendered buffers
//! (GPU-imported memory, shared memory, or solid-color placeholders) to the
//! compositor-process host; the host attaches them to on-screen surfaces,
//! tracks their release and reuse, and reports submission and presentation
//! outcomes back to the client in commit order.
//!
//! The two sides are single-threaded actors joined by one ordered,
//! asynchronous, bidirectional channel per generation:
//!
//! - [`client::BufferManagerClient`] — the rendering pipeline's entry
//!   point: buffer creation, frame/overlay commits, inbound callbacks, and
//!   reconnection after the channel is severed.
//! - [`host::BufferManagerHost`] — validates every wire command (protocol
//!   violations terminate the whole channel), stages atomic multi-surface
//!   frames, and reconstructs ordered callbacks from the display's
//!   possibly reordered or skipped release/feedback signals.
//!
//! The display system itself sits behind the [`backend::DisplayBackend`]
//! trait; transport framing and the native buffer allocators are out of
//! scope and appear only as opaque handles.

pub mod backend;
pub mod buffer;
pub mod channel;
pub mod client;
pub mod host;
pub mod ids;
pub mod wire;


pub use backend::{DisplayBackend, DisplayEvent, Placement};
pub use buffer::{BufferFormat, BufferRegistry, BufferSource, DmabufPlane, ImportState};
pub use channel::{channel, ChannelError, ClientEndpoint, HostEndpoint};
pub use client::{BufferManagerClient, FrameEventObserver};
pub use host::{BufferManagerHost, ProtocolViolation};
pub use ids::{BufferId, SurfaceId, WidgetId};
pub use wire::{
    Command, Event, OverlayEntry, OverlayPriority, PresentationFeedback, PresentationFlags,
    ReleaseFence, SubmissionResult, ROOT_Z_ORDER,
};
