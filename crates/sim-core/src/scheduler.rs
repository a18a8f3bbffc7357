//! Discrete-event queue keyed by `(time, insertion sequence)`. Events at
//! the same timestamp come out in insertion order, so a run over the same
//! queue contents is fully deterministic.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::actions::ActionCommand;

/// A side effect applied when its event fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Deliver a message to the named person's log.
    Notify { target: String, message: String },
}

/// A world-affecting command waiting for the judge pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub actor: String,
    pub command: ActionCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Give the named person a model-driven turn.
    AgentTurn { person: String },
    /// Validate and commit (or reject) a world-affecting action.
    Judge(PendingAction),
    DelayedEffect(Effect),
    /// Re-enqueues itself every `interval_secs` until `remaining` runs out.
    /// `None` means no count bound; the stop condition is checked when the
    /// event fires.
    Recurring {
        interval_secs: i64,
        remaining: Option<u32>,
        effect: Effect,
    },
}

/// An immutable scheduled occurrence, consumed exactly once at dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    time: DateTime<Utc>,
    seq: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<QueuedEvent>>,
    next_seq: u64,
    pending_turns: usize,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, event: Event) {
        if matches!(event.kind, EventKind::AgentTurn { .. }) {
            self.pending_turns += 1;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(QueuedEvent {
            time: event.time,
            seq,
            event,
        }));
    }

    pub fn pop_next(&mut self) -> Option<Event> {
        let Reverse(queued) = self.heap.pop()?;
        if matches!(queued.event.kind, EventKind::AgentTurn { .. }) {
            self.pending_turns -= 1;
        }
        Some(queued.event)
    }

    /// Timestamp of the next event without consuming it.
    pub fn peek_time(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(q)| q.time)
    }

    /// Agent-turn events still waiting in the queue.
    pub fn pending_turns(&self) -> usize {
        self.pending_turns
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
