//! The GPU-process side of the buffer submission protocol.
//!
//! [`BufferManagerClient`] is the sole entry point the rendering pipeline
//! uses: it creates buffers, commits frames, and routes the host's ordered
//! callbacks into a [`FrameEventObserver`] supplied at construction. It
//! also owns reconnection: when the channel is severed, every id from the
//! old generation is invalid, requests issued while disconnected are
//! queued, and they replay in original order once a fresh channel is
//! connected.

use crate::channel::{ChannelError, ClientEndpoint};
use crate::ids::{BufferId, WidgetId};
use crate::wire::{
    Command, Event, OverlayEntry, PresentationFeedback, ReleaseFence, SubmissionResult,
};
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use tracing::{debug, warn};
use vesper_core::{Color, Rect, RectInt, Size};

/// Receives the host's submission and presentation callbacks.
///
/// Passed in at construction rather than looked up ambiently, so ownership
/// and lifetime of the receiving side stay explicit.
pub trait FrameEventObserver {
    fn on_submission(
        &mut self,
        buffer_id: BufferId,
        result: SubmissionResult,
        release_fence: Option<ReleaseFence>,
    );
    fn on_presentation(&mut self, buffer_id: BufferId, feedback: PresentationFeedback);
}

/// Client-side handle for one channel at a time.
pub struct BufferManagerClient<O: FrameEventObserver> {
    channel: Option<ClientEndpoint>,
    queued: VecDeque<Command>,
    observer: O,
    next_commit_id: u64,
    last_termination: Option<String>,
}

impl<O: FrameEventObserver> BufferManagerClient<O> {
    pub fn new(observer: O) -> Self {
        BufferManagerClient {
            channel: None,
            queued: VecDeque::new(),
            observer,
            next_commit_id: 0,
            last_termination: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    pub fn generation(&self) -> Option<u32> {
        self.channel.as_ref().map(|c| c.generation())
    }

    /// The reason the previous generation ended, if any.
    pub fn last_termination(&self) -> Option<&str> {
        self.last_termination.as_deref()
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Attaches to a fresh channel generation and replays any requests
    /// queued while disconnected, in their original order.
    pub fn connect(&mut self, endpoint: ClientEndpoint) {
        debug!(
            generation = endpoint.generation(),
            queued = self.queued.len(),
            "connecting to channel"
        );
        self.channel = Some(endpoint);
        let queued: Vec<Command> = self.queued.drain(..).collect();
        for command in queued {
            self.send(command);
        }
    }

    pub fn disconnect(&mut self) {
        self.channel = None;
    }

    fn send(&mut self, command: Command) {
        let Some(endpoint) = &self.channel else {
            self.queued.push_back(command);
            return;
        };
        if let Err(ChannelError::Terminated(reason)) = endpoint.submit(command.clone()) {
            warn!(%reason, "channel severed, queueing request for replay");
            self.last_termination = Some(reason);
            self.channel = None;
            self.queued.push_back(command);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_dmabuf_buffer(
        &mut self,
        fd: RawFd,
        size: Size,
        strides: Vec<u32>,
        offsets: Vec<u32>,
        modifiers: Vec<u64>,
        format: u32,
        plane_count: u32,
        buffer_id: BufferId,
    ) {
        self.send(Command::CreateDmabufBuffer {
            fd,
            size,
            strides,
            offsets,
            modifiers,
            format,
            plane_count,
            buffer_id,
        });
    }

    pub fn create_shm_buffer(&mut self, fd: RawFd, length: u64, size: Size, buffer_id: BufferId) {
        self.send(Command::CreateShmBuffer {
            fd,
            length,
            size,
            buffer_id,
        });
    }

    pub fn create_solid_color_buffer(&mut self, color: Color, size: Size, buffer_id: BufferId) {
        self.send(Command::CreateSolidColorBuffer {
            color,
            size,
            buffer_id,
        });
    }

    pub fn destroy_buffer(&mut self, buffer_id: BufferId) {
        self.send(Command::DestroyBuffer { buffer_id });
    }

    pub fn commit_buffer(
        &mut self,
        widget: WidgetId,
        buffer_id: BufferId,
        bounds: Rect,
        corner_clip: Option<Rect>,
        scale: f32,
        damage: RectInt,
    ) {
        self.next_commit_id += 1;
        let commit_id = self.next_commit_id;
        self.send(Command::CommitBuffer {
            widget,
            buffer_id,
            commit_id,
            bounds,
            corner_clip,
            scale,
            damage,
        });
    }

    pub fn commit_overlays(
        &mut self,
        widget: WidgetId,
        frame_seq: u64,
        overlays: Vec<OverlayEntry>,
    ) {
        self.send(Command::CommitOverlays {
            widget,
            frame_seq,
            overlays,
        });
    }

    /// Drains pending callbacks into the observer, in delivery order, and
    /// notices channel termination. Returns the number of callbacks
    /// delivered.
    pub fn pump_events(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let event = match &self.channel {
                Some(endpoint) => endpoint.next_event(),
                None => None,
            };
            match event {
                Some(Event::Submission {
                    buffer_id,
                    result,
                    release_fence,
                }) => {
                    self.observer.on_submission(buffer_id, result, release_fence);
                    delivered += 1;
                }
                Some(Event::Presentation {
                    buffer_id,
                    feedback,
                }) => {
                    self.observer.on_presentation(buffer_id, feedback);
                    delivered += 1;
                }
                None => break,
            }
        }
        let terminated = self.channel.as_ref().and_then(|e| e.termination_reason());
        if let Some(reason) = terminated {
            warn!(%reason, "channel terminated, awaiting reconnection");
            self.last_termination = Some(reason);
            self.channel = None;
        }
        delivered
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Callback, RecordingObserver};
    use super::*;
    use crate::channel::channel;
    use vesper_core::Color;

    #[test]
    fn test_requests_queue_while_disconnected_and_replay_in_order() {
        let (observer, _log) = RecordingObserver::new();
        let mut client = BufferManagerClient::new(observer);

        client.create_solid_color_buffer(Color::BLACK, Size::new(1, 1), BufferId::new(1));
        client.create_solid_color_buffer(Color::WHITE, Size::new(1, 1), BufferId::new(2));
        client.destroy_buffer(BufferId::new(1));
        assert!(!client.is_connected());

        let (host_end, client_end) = channel(1);
        client.connect(client_end);
        assert!(client.is_connected());

        let mut ids = Vec::new();
        while let Some(command) = host_end.next_command() {
            match command {
                Command::CreateSolidColorBuffer { buffer_id, .. } => {
                    ids.push(("create", buffer_id.raw()))
                }
                Command::DestroyBuffer { buffer_id } => ids.push(("destroy", buffer_id.raw())),
                other => panic!("unexpected replayed command: {:?}", other),
            }
        }
        assert_eq!(
            ids,
            vec![("create", 1), ("create", 2), ("destroy", 1)]
        );
    }

    #[test]
    fn test_events_reach_the_observer() {
        let (observer, log) = RecordingObserver::new();
        let mut client = BufferManagerClient::new(observer);
        let (host_end, client_end) = channel(1);
        client.connect(client_end);

        host_end.post_event(Event::Submission {
            buffer_id: BufferId::new(1),
            result: SubmissionResult::Ack,
            release_fence: None,
        });
        host_end.post_event(Event::Presentation {
            buffer_id: BufferId::new(1),
            feedback: PresentationFeedback::Failed,
        });

        assert_eq!(client.pump_events(), 2);
        assert_eq!(
            log.take(),
            vec![
                Callback::Submission(BufferId::new(1), SubmissionResult::Ack, None),
                Callback::Presentation(BufferId::new(1), PresentationFeedback::Failed),
            ]
        );
    }

    #[test]
    fn test_termination_flips_client_into_queueing_mode() {
        let (observer, _log) = RecordingObserver::new();
        let mut client = BufferManagerClient::new(observer);
        let (host_end, client_end) = channel(7);
        client.connect(client_end);
        assert_eq!(client.generation(), Some(7));

        host_end.terminate("unknown buffer#3");
        client.pump_events();
        assert!(!client.is_connected());
        assert_eq!(client.last_termination(), Some("unknown buffer#3"));

        // Requests after the cut queue for the next generation.
        client.create_solid_color_buffer(Color::BLACK, Size::new(1, 1), BufferId::new(1));
        let (host_end2, client_end2) = channel(8);
        client.connect(client_end2);
        assert!(host_end2.next_command().is_some());
        drop(host_end);
    }
}
