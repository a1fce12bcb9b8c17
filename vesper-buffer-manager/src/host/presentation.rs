//! Per-surface submission/presentation bookkeeping.
//!
//! The display delivers its signals in whatever order suits it: releases
//! may be skipped for buffers overtaken by newer commits, and presentation
//! feedback can arrive out of order or never. The tracker reconstructs the
//! stream the client is promised: per surface, the submission for commit
//! *k* precedes the presentation for commit *k*, and both streams are
//! delivered in commit order.
//!
//! The queue is bounded. A client committing faster than the display drains
//! would otherwise grow it without limit, so on overflow the oldest records
//! are force-failed and evicted in batches, preserving delivery order.

use crate::ids::BufferId;
use crate::wire::{Event, PresentationFeedback, PresentationFlags, ReleaseFence, SubmissionResult};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{trace, warn};
use vesper_core::PresentationConfig;

#[derive(Debug)]
struct Record {
    seq: u64,
    buffer: BufferId,
    /// The buffer this commit replaced on the surface; set when the commit
    /// actually reaches the display. `None` means nothing was attached
    /// before, which resolves the submission immediately.
    replaces: Option<BufferId>,
    played: bool,
    submission: Option<(SubmissionResult, Option<ReleaseFence>)>,
    submission_sent: bool,
    presentation: Option<PresentationFeedback>,
    presentation_sent: bool,
}

impl Record {
    fn new(seq: u64, buffer: BufferId) -> Self {
        Record {
            seq,
            buffer,
            replaces: None,
            played: false,
            submission: None,
            submission_sent: false,
            presentation: None,
            presentation_sent: false,
        }
    }

    fn force_fail(&mut self) {
        if self.submission.is_none() {
            self.submission = Some((SubmissionResult::Failed, None));
        }
        if self.presentation.is_none() {
            self.presentation = Some(PresentationFeedback::Failed);
        }
    }
}

/// Ordered queue of in-flight records for one surface.
#[derive(Debug)]
pub struct PresentationTracker {
    records: VecDeque<Record>,
    config: PresentationConfig,
}

impl PresentationTracker {
    pub fn new(config: PresentationConfig) -> Self {
        PresentationTracker {
            records: VecDeque::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Admits the record for an accepted commit. If the queue is full, the
    /// oldest records are force-failed and evicted first.
    pub fn push(&mut self, seq: u64, buffer: BufferId, events: &mut Vec<Event>) {
        if self.records.len() >= self.config.max_in_flight {
            let batch = self.config.eviction_batch.min(self.records.len());
            warn!(
                in_flight = self.records.len(),
                batch, "presentation queue overflow, evicting oldest records"
            );
            for record in self.records.iter_mut().take(batch) {
                record.force_fail();
            }
            self.drain(events);
        }
        trace!(seq, %buffer, "recording commit");
        self.records.push_back(Record::new(seq, buffer));
    }

    /// The commit reached the display, replacing `replaces` on the surface.
    /// A commit that replaced nothing has no release to wait for and acks
    /// immediately.
    pub fn mark_played(&mut self, seq: u64, replaces: Option<BufferId>, events: &mut Vec<Event>) {
        if let Some(record) = self.records.iter_mut().find(|r| r.seq == seq) {
            record.played = true;
            record.replaces = replaces;
            if replaces.is_none() && record.submission.is_none() {
                record.submission = Some((SubmissionResult::Ack, None));
            }
        }
        self.drain(events);
    }

    /// The commit was coalesced away before reaching the display: it is
    /// acked (the display accepted the stream) but never shown.
    pub fn resolve_skipped(&mut self, seq: u64, events: &mut Vec<Event>) {
        if let Some(record) = self.records.iter_mut().find(|r| r.seq == seq) {
            trace!(seq, buffer = %record.buffer, "resolving coalesced commit");
            if record.submission.is_none() {
                record.submission = Some((SubmissionResult::Ack, None));
            }
            if record.presentation.is_none() {
                record.presentation = Some(PresentationFeedback::Failed);
            }
        }
        self.drain(events);
    }

    /// The commit failed outright (buffer import failure, surface teardown).
    pub fn resolve_failed(&mut self, seq: u64, events: &mut Vec<Event>) {
        if let Some(record) = self.records.iter_mut().find(|r| r.seq == seq) {
            record.force_fail();
        }
        self.drain(events);
    }

    /// Force-fails the unresolved halves of every record referencing
    /// `buffer`. Used when a deferred buffer destruction completes while
    /// records are still in flight.
    pub fn fail_records_for_buffer(&mut self, buffer: BufferId, events: &mut Vec<Event>) {
        for record in self.records.iter_mut().filter(|r| r.buffer == buffer) {
            record.force_fail();
        }
        self.drain(events);
    }

    /// Force-fails every unresolved record (surface teardown).
    pub fn fail_all(&mut self, events: &mut Vec<Event>) {
        for record in self.records.iter_mut() {
            record.force_fail();
        }
        self.drain(events);
    }

    /// A release of `buffer` arrived from the display. The newest commit
    /// that replaced `buffer` is now unambiguously in use, which also
    /// proves every older commit out of use — displays skip release
    /// signals for buffers overtaken by newer commits, so the older
    /// records would otherwise wait forever.
    pub fn on_buffer_released(
        &mut self,
        buffer: BufferId,
        fence: Option<ReleaseFence>,
        events: &mut Vec<Event>,
    ) {
        let newest = self
            .records
            .iter()
            .rposition(|r| r.played && r.replaces == Some(buffer) && r.submission.is_none());
        if let Some(newest) = newest {
            for (index, record) in self.records.iter_mut().enumerate().take(newest + 1) {
                if record.submission.is_none() {
                    let fence = if index == newest { fence } else { None };
                    record.submission = Some((SubmissionResult::Ack, fence));
                }
            }
        }
        self.drain(events);
    }

    /// Presentation feedback for the commit identified by `seq`.
    pub fn on_presented(
        &mut self,
        seq: u64,
        timestamp: Duration,
        refresh: Duration,
        flags: PresentationFlags,
        events: &mut Vec<Event>,
    ) {
        if let Some(record) = self.records.iter_mut().find(|r| r.seq == seq) {
            if record.presentation.is_none() {
                record.presentation = Some(PresentationFeedback::Presented {
                    timestamp,
                    refresh,
                    flags,
                });
            }
        }
        self.drain(events);
    }

    /// The display explicitly reports no feedback for `seq`. This fails
    /// only the named record; earlier already-resolved records are not
    /// revisited.
    pub fn on_discarded(&mut self, seq: u64, events: &mut Vec<Event>) {
        if let Some(record) = self.records.iter_mut().find(|r| r.seq == seq) {
            if record.presentation.is_none() {
                record.presentation = Some(PresentationFeedback::Failed);
            }
        }
        self.drain(events);
    }

    /// Drops every record without emitting callbacks. Only valid when the
    /// channel generation itself is gone.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Delivers everything currently deliverable, in order, and pops fully
    /// delivered records off the front.
    fn drain(&mut self, events: &mut Vec<Event>) {
        for record in self.records.iter_mut() {
            if record.submission_sent {
                continue;
            }
            match record.submission {
                Some((result, fence)) => {
                    record.submission_sent = true;
                    events.push(Event::Submission {
                        buffer_id: record.buffer,
                        result,
                        release_fence: fence,
                    });
                }
                None => break,
            }
        }
        for record in self.records.iter_mut() {
            if record.presentation_sent {
                continue;
            }
            match record.presentation {
                Some(feedback) if record.submission_sent => {
                    record.presentation_sent = true;
                    events.push(Event::Presentation {
                        buffer_id: record.buffer,
                        feedback,
                    });
                }
                _ => break,
            }
        }
        while matches!(
            self.records.front(),
            Some(r) if r.submission_sent && r.presentation_sent
        ) {
            self.records.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tracker() -> PresentationTracker {
        PresentationTracker::new(PresentationConfig {
            max_in_flight: 4,
            eviction_batch: 2,
        })
    }

    fn buf(raw: u32) -> BufferId {
        BufferId::new(raw)
    }

    fn presented(seq_ms: u64) -> (Duration, Duration, PresentationFlags) {
        (
            Duration::from_millis(seq_ms),
            Duration::from_micros(16_667),
            PresentationFlags::VSYNC,
        )
    }

    fn submission_events(events: &[Event]) -> Vec<(BufferId, SubmissionResult)> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Submission {
                    buffer_id, result, ..
                } => Some((*buffer_id, *result)),
                _ => None,
            })
            .collect()
    }

    fn presentation_events(events: &[Event]) -> Vec<(BufferId, bool)> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Presentation {
                    buffer_id,
                    feedback,
                } => Some((*buffer_id, feedback.is_presented())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_commit_acks_immediately() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.push(1, buf(1), &mut events);
        assert!(events.is_empty());

        t.mark_played(1, None, &mut events);
        assert_eq!(
            submission_events(&events),
            vec![(buf(1), SubmissionResult::Ack)]
        );
    }

    #[test]
    fn test_second_commit_waits_for_release() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.push(1, buf(1), &mut events);
        t.mark_played(1, None, &mut events);
        events.clear();

        t.push(2, buf(2), &mut events);
        t.mark_played(2, Some(buf(1)), &mut events);
        assert!(submission_events(&events).is_empty());

        t.on_buffer_released(buf(1), None, &mut events);
        assert_eq!(
            submission_events(&events),
            vec![(buf(2), SubmissionResult::Ack)]
        );
    }

    #[test]
    fn test_presentation_gated_on_submission_order() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.push(1, buf(1), &mut events);
        t.mark_played(1, None, &mut events);
        t.push(2, buf(2), &mut events);
        t.mark_played(2, Some(buf(1)), &mut events);
        events.clear();

        // Feedback for the second commit arrives before its submission is
        // resolvable; nothing may be delivered yet.
        let (ts, refresh, flags) = presented(32);
        t.on_presented(2, ts, refresh, flags, &mut events);
        assert!(events.is_empty());

        // Feedback for the first commit arrives: only the first commit's
        // presentation is deliverable (the second still lacks submission).
        let (ts, refresh, flags) = presented(16);
        t.on_presented(1, ts, refresh, flags, &mut events);
        assert_eq!(presentation_events(&events), vec![(buf(1), true)]);
        events.clear();

        t.on_buffer_released(buf(1), None, &mut events);
        assert_eq!(
            submission_events(&events),
            vec![(buf(2), SubmissionResult::Ack)]
        );
        assert_eq!(presentation_events(&events), vec![(buf(2), true)]);
    }

    #[test]
    fn test_skipped_release_resolves_older_commits() {
        let mut t = tracker();
        let mut events = Vec::new();
        // Commits: A(1), B(2), C(3). The display never releases A (it was
        // overtaken); the release of B must prove both 2 and 3 submitted.
        t.push(1, buf(1), &mut events);
        t.mark_played(1, None, &mut events);
        t.push(2, buf(2), &mut events);
        t.mark_played(2, Some(buf(1)), &mut events);
        t.push(3, buf(3), &mut events);
        t.mark_played(3, Some(buf(2)), &mut events);
        events.clear();

        t.on_buffer_released(buf(2), Some(ReleaseFence(7)), &mut events);
        let subs = submission_events(&events);
        assert_eq!(
            subs,
            vec![
                (buf(2), SubmissionResult::Ack),
                (buf(3), SubmissionResult::Ack),
            ]
        );
        // The fence travels with the newest record that replaced the
        // released buffer.
        let fences: Vec<Option<ReleaseFence>> = events
            .iter()
            .filter_map(|e| match e {
                Event::Submission { release_fence, .. } => Some(*release_fence),
                _ => None,
            })
            .collect();
        assert_eq!(fences, vec![None, Some(ReleaseFence(7))]);
    }

    #[test]
    fn test_same_buffer_recommit_resolves_on_release() {
        let mut t = tracker();
        let mut events = Vec::new();
        // Commit A, then A again, then B. The second A commit must not ack
        // prematurely; the release of A (once B is attached) resolves it.
        t.push(1, buf(1), &mut events);
        t.mark_played(1, None, &mut events);
        events.clear();

        t.push(2, buf(1), &mut events);
        t.mark_played(2, Some(buf(1)), &mut events);
        assert!(submission_events(&events).is_empty());

        t.push(3, buf(2), &mut events);
        t.mark_played(3, Some(buf(1)), &mut events);
        assert!(submission_events(&events).is_empty());

        t.on_buffer_released(buf(1), None, &mut events);
        assert_eq!(
            submission_events(&events),
            vec![
                (buf(1), SubmissionResult::Ack),
                (buf(2), SubmissionResult::Ack),
            ]
        );
    }

    #[test]
    fn test_discard_fails_only_its_own_record() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.push(1, buf(1), &mut events);
        t.mark_played(1, None, &mut events);
        let (ts, refresh, flags) = presented(16);
        t.on_presented(1, ts, refresh, flags, &mut events);
        events.clear();

        t.push(2, buf(2), &mut events);
        t.mark_played(2, Some(buf(1)), &mut events);
        t.on_buffer_released(buf(1), None, &mut events);
        events.clear();

        t.on_discarded(2, &mut events);
        assert_eq!(presentation_events(&events), vec![(buf(2), false)]);
    }

    #[test]
    fn test_overflow_evicts_oldest_as_failed() {
        let mut t = tracker();
        let mut events = Vec::new();
        for seq in 1..=4 {
            t.push(seq, buf(seq as u32), &mut events);
        }
        assert!(events.is_empty());
        assert_eq!(t.len(), 4);

        // Queue is at capacity; the fifth push evicts the two oldest.
        t.push(5, buf(5), &mut events);
        assert_eq!(t.len(), 3);
        assert_eq!(
            submission_events(&events),
            vec![
                (buf(1), SubmissionResult::Failed),
                (buf(2), SubmissionResult::Failed),
            ]
        );
        assert_eq!(
            presentation_events(&events),
            vec![(buf(1), false), (buf(2), false)]
        );
    }

    #[test]
    fn test_fail_records_for_buffer() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.push(1, buf(1), &mut events);
        t.mark_played(1, None, &mut events);
        let (ts, refresh, flags) = presented(16);
        t.on_presented(1, ts, refresh, flags, &mut events);
        t.push(2, buf(2), &mut events);
        t.mark_played(2, Some(buf(1)), &mut events);
        events.clear();

        t.fail_records_for_buffer(buf(2), &mut events);
        assert_eq!(
            submission_events(&events),
            vec![(buf(2), SubmissionResult::Failed)]
        );
        assert_eq!(presentation_events(&events), vec![(buf(2), false)]);
    }

    #[test]
    fn test_fully_delivered_records_are_dropped() {
        let mut t = tracker();
        let mut events = Vec::new();
        t.push(1, buf(1), &mut events);
        t.mark_played(1, None, &mut events);
        let (ts, refresh, flags) = presented(16);
        t.on_presented(1, ts, refresh, flags, &mut events);
        assert!(t.is_empty());
    }
}
