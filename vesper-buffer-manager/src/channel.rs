//! The in-process rendition of the client/host channel.
//!
//! One channel generation is a pair of ordered queues (commands one way,
//! events the other) plus a shared termination slot. The real transport's
//! framing is out of scope; what matters to the protocol core is preserved
//! here: per-direction FIFO ordering, asynchronous delivery, and the fact
//! that termination is one-way and final for a generation.

use crate::wire::{Command, Event};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel was severed; carries the termination reason.
    #[error("channel terminated: {0}")]
    Terminated(String),
}

#[derive(Debug, Default)]
struct Shared {
    commands: Mutex<VecDeque<Command>>,
    events: Mutex<VecDeque<Event>>,
    termination: Mutex<Option<String>>,
}

impl Shared {
    fn termination_reason(&self) -> Option<String> {
        self.termination
            .lock()
            .expect("termination mutex poisoned")
            .clone()
    }
}

/// Creates one channel generation and returns its two endpoints.
pub fn channel(generation: u32) -> (HostEndpoint, ClientEndpoint) {
    let shared = Arc::new(Shared::default());
    (
        HostEndpoint {
            shared: Arc::clone(&shared),
            generation,
        },
        ClientEndpoint { shared, generation },
    )
}

/// The host's end: drains commands, posts events, and is the only side
/// allowed to terminate the generation.
#[derive(Debug)]
pub struct HostEndpoint {
    shared: Arc<Shared>,
    generation: u32,
}

impl HostEndpoint {
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Takes the next command in send order, if any.
    pub fn next_command(&self) -> Option<Command> {
        self.shared
            .commands
            .lock()
            .expect("command queue mutex poisoned")
            .pop_front()
    }

    /// Queues an event for the client. Events posted before termination stay
    /// deliverable; the client drains them before observing the severed
    /// channel.
    pub fn post_event(&self, event: Event) {
        self.shared
            .events
            .lock()
            .expect("event queue mutex poisoned")
            .push_back(event);
    }

    /// Severs the generation with a reason. Subsequent client submissions
    /// fail; already queued commands are discarded unprocessed.
    pub fn terminate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(generation = self.generation, %reason, "terminating channel");
        let mut slot = self
            .shared
            .termination
            .lock()
            .expect("termination mutex poisoned");
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.shared
            .commands
            .lock()
            .expect("command queue mutex poisoned")
            .clear();
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.termination_reason().is_some()
    }

    pub fn termination_reason(&self) -> Option<String> {
        self.shared.termination_reason()
    }
}

/// The client's end: submits commands and drains events.
#[derive(Debug)]
pub struct ClientEndpoint {
    shared: Arc<Shared>,
    generation: u32,
}

impl ClientEndpoint {
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Sends a command, preserving submission order.
    pub fn submit(&self, command: Command) -> Result<(), ChannelError> {
        if let Some(reason) = self.shared.termination_reason() {
            return Err(ChannelError::Terminated(reason));
        }
        self.shared
            .commands
            .lock()
            .expect("command queue mutex poisoned")
            .push_back(command);
        Ok(())
    }

    /// Takes the next event in post order, if any.
    pub fn next_event(&self) -> Option<Event> {
        self.shared
            .events
            .lock()
            .expect("event queue mutex poisoned")
            .pop_front()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.termination_reason().is_some()
    }

    pub fn termination_reason(&self) -> Option<String> {
        self.shared.termination_reason()
    }
}
