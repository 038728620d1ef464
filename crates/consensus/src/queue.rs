//! Buffering and filtering of consensus events.
//!
//! Events can arrive before the node reaches their `(round, step)`. The
//! filter compares each event's header against the shared clock: stale
//! events are dropped, relevant ones forwarded to the phase collector, and
//! early ones parked in a two-level queue that is flushed when the clock
//! catches up.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::trace;

use umbra_wire::{AgreementMessage, BinaryMessage, ConsensusHeader, ReductionMessage, ScoreMessage};

use crate::state::State;

/// Anything carrying the uniform consensus header.
pub trait ConsensusEvent: Clone + Send + 'static {
    /// The event's header.
    fn header(&self) -> &ConsensusHeader;
}

impl ConsensusEvent for ScoreMessage {
    fn header(&self) -> &ConsensusHeader {
        &self.header
    }
}

impl ConsensusEvent for ReductionMessage {
    fn header(&self) -> &ConsensusHeader {
        &self.header
    }
}

impl ConsensusEvent for AgreementMessage {
    fn header(&self) -> &ConsensusHeader {
        &self.header
    }
}

impl ConsensusEvent for BinaryMessage {
    fn header(&self) -> &ConsensusHeader {
        &self.header
    }
}

/// Two-level buffer of early events: round, then step.
#[derive(Debug)]
pub struct EventQueue<E> {
    entries: BTreeMap<u64, BTreeMap<u8, Vec<E>>>,
}

impl<E> EventQueue<E> {
    /// An empty queue.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Park an event at `(round, step)`.
    pub fn put(&mut self, round: u64, step: u8, event: E) {
        self.entries
            .entry(round)
            .or_default()
            .entry(step)
            .or_default()
            .push(event);
    }

    /// Take everything parked at exactly `(round, step)`.
    pub fn drain(&mut self, round: u64, step: u8) -> Vec<E> {
        self.entries
            .get_mut(&round)
            .and_then(|steps| steps.remove(&step))
            .unwrap_or_default()
    }

    /// Take everything parked for `round`, any step.
    pub fn drain_round(&mut self, round: u64) -> Vec<E> {
        self.entries
            .remove(&round)
            .map(|steps| steps.into_values().flatten().collect())
            .unwrap_or_default()
    }

    /// Drop everything parked for rounds below `round`.
    pub fn clear_below(&mut self, round: u64) {
        self.entries = self.entries.split_off(&round);
    }

    /// Number of parked events.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .flat_map(|steps| steps.values())
            .map(|events| events.len())
            .sum()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes decoded events by comparing their headers to the clock.
///
/// `check_step` is on for Score and Reduction; Agreement checks the round
/// only, because late aggregation across steps is desirable.
pub struct EventFilter<E: ConsensusEvent> {
    state: State,
    check_step: bool,
    queue: Mutex<EventQueue<E>>,
    output: mpsc::UnboundedSender<E>,
}

impl<E: ConsensusEvent> EventFilter<E> {
    /// A filter over the shared clock, forwarding relevant events to
    /// `output`.
    pub fn new(state: State, check_step: bool, output: mpsc::UnboundedSender<E>) -> Self {
        Self {
            state,
            check_step,
            queue: Mutex::new(EventQueue::new()),
            output,
        }
    }

    /// Inspect one event: drop stale, forward relevant, park early.
    pub fn collect(&self, event: E) {
        let header = *event.header();
        let (round_cmp, step_cmp) = self.state.cmp(header.round, header.step);

        if self.is_early(round_cmp, step_cmp) {
            trace!(round = header.round, step = header.step, "parking early event");
            self.queue.lock().put(header.round, header.step, event);
            return;
        }

        if self.is_relevant(round_cmp, step_cmp) {
            let _ = self.output.send(event);
        }
        // Stale events fall through and are dropped.
    }

    fn is_early(&self, round_cmp: Ordering, step_cmp: Ordering) -> bool {
        if round_cmp == Ordering::Greater {
            return true;
        }
        self.check_step && round_cmp == Ordering::Equal && step_cmp == Ordering::Greater
    }

    fn is_relevant(&self, round_cmp: Ordering, step_cmp: Ordering) -> bool {
        if round_cmp != Ordering::Equal {
            return false;
        }
        !self.check_step || step_cmp == Ordering::Equal
    }

    /// Re-deliver events parked at the clock's current position.
    pub fn flush(&self) {
        let (round, step) = self.state.position();
        let events = {
            let mut queue = self.queue.lock();
            if self.check_step {
                queue.drain(round, step)
            } else {
                queue.drain_round(round)
            }
        };
        for event in events {
            let _ = self.output.send(event);
        }
    }

    /// Drop parked events for rounds below the clock.
    pub fn clear_stale(&self) {
        self.queue.lock().clear_below(self.state.round());
    }

    /// Number of parked events.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }
}
