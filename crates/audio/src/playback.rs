//! In-order scheduling of assistant audio fragments.
//!
//! Fragments are numbered on arrival and may finish decoding in any order.
//! Commit to the output timeline strictly follows arrival numbering: a
//! decoded fragment waits until every earlier fragment has been committed
//! or skipped. Each committed fragment starts at `max(cursor, now)` so
//! consecutive fragments play back to back with no gap and no overlap.

use crate::codec::DecodedAudio;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Output device seen by the sequencer.
pub trait AudioSink: Send {
    /// Current position of the output clock in seconds.
    fn now(&self) -> f64;

    /// Play `audio` starting at clock time `start_at`.
    fn schedule(&mut self, audio: &DecodedAudio, start_at: f64);

    /// Stop everything scheduled so far.
    fn cancel_all(&mut self);
}

/// Arrival slot handed out by [`PlaybackSequencer::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentTicket {
    pub generation: u64,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSignal {
    /// Everything enqueued in `generation` has finished playing.
    Drained { generation: u64 },
}

pub struct PlaybackSequencer {
    sink: Box<dyn AudioSink>,
    generation: u64,
    next_seq: u64,
    next_commit: u64,
    ready: BTreeMap<u64, Option<DecodedAudio>>,
    cursor: f64,
    busy: bool,
}

impl PlaybackSequencer {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            generation: 0,
            next_seq: 0,
            next_commit: 0,
            ready: BTreeMap::new(),
            cursor: 0.0,
            busy: false,
        }
    }

    /// Reserve the next arrival slot.
    pub fn enqueue(&mut self) -> FragmentTicket {
        let ticket = FragmentTicket {
            generation: self.generation,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.busy = true;
        ticket
    }

    /// Record a finished decode and commit whatever is now in order.
    ///
    /// Returns `false` when the ticket belongs to a cleared generation.
    pub fn complete(
        &mut self,
        ticket: FragmentTicket,
        decoded: crate::Result<DecodedAudio>,
    ) -> bool {
        if ticket.generation != self.generation {
            tracing::debug!(?ticket, current = self.generation, "dropping stale fragment");
            return false;
        }
        if ticket.seq < self.next_commit || ticket.seq >= self.next_seq {
            tracing::warn!(?ticket, "fragment completed outside the pending window");
            return false;
        }

        let audio = match decoded {
            Ok(audio) => Some(audio),
            Err(e) => {
                tracing::warn!(seq = ticket.seq, error = %e, "skipping undecodable fragment");
                None
            }
        };
        self.ready.insert(ticket.seq, audio);
        self.commit_ready();
        true
    }

    fn commit_ready(&mut self) {
        while let Some(slot) = self.ready.remove(&self.next_commit) {
            if let Some(audio) = slot {
                let start = self.cursor.max(self.sink.now());
                self.sink.schedule(&audio, start);
                self.cursor = start + audio.duration_secs();
                tracing::trace!(seq = self.next_commit, start, end = self.cursor, "fragment scheduled");
            }
            self.next_commit += 1;
        }
    }

    /// Check for drain. Fires once per drain, only after the output clock
    /// has passed the end of the last committed fragment.
    pub fn poll(&mut self) -> Option<PlaybackSignal> {
        if !self.busy || self.next_commit < self.next_seq {
            return None;
        }
        if self.sink.now() < self.cursor {
            return None;
        }
        self.busy = false;
        Some(PlaybackSignal::Drained {
            generation: self.generation,
        })
    }

    /// Discard everything queued or playing. Outstanding tickets go stale.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.ready.clear();
        self.next_commit = self.next_seq;
        self.cursor = 0.0;
        self.busy = false;
        self.sink.cancel_all();
        tracing::debug!(generation = self.generation, "playback cleared");
    }

    /// Nothing pending, nothing playing, and no undelivered drain.
    pub fn is_idle(&self) -> bool {
        !self.busy
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fragments enqueued but not yet committed.
    pub fn pending(&self) -> u64 {
        self.next_seq - self.next_commit
    }

    /// Clock time at which the committed audio ends.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }
}

#[derive(Debug, Default)]
struct ManualClock {
    now: f64,
    scheduled: Vec<(f64, f64)>,
    cancels: usize,
}

/// Sink with a hand-driven clock that records what it was asked to play.
/// Cloned handles share state.
#[derive(Debug, Clone, Default)]
pub struct ManualSink(Arc<Mutex<ManualClock>>);

impl ManualSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_to(&self, t: f64) {
        self.lock().now = t;
    }

    /// `(start, duration)` of every scheduled fragment, in order.
    pub fn scheduled(&self) -> Vec<(f64, f64)> {
        self.lock().scheduled.clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.lock().cancels
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualClock> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AudioSink for ManualSink {
    fn now(&self) -> f64 {
        self.lock().now
    }

    fn schedule(&mut self, audio: &DecodedAudio, start_at: f64) {
        self.lock()
            .scheduled
            .push((start_at, audio.duration_secs()));
    }

    fn cancel_all(&mut self) {
        self.lock().cancels += 1;
    }
}

/// Sink that plays nothing but keeps wall-clock time, so drains still
/// arrive when no output device is available.
#[derive(Debug, Clone)]
pub struct SilentSink {
    origin: Instant,
}

impl SilentSink {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SilentSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for SilentSink {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, audio: &DecodedAudio, start_at: f64) {
        tracing::trace!(start_at, secs = audio.duration_secs(), "silent playback");
    }

    fn cancel_all(&mut self) {}
}
