//! # Retry Buffer
//!
//! A fixed-capacity circular store of transmitted, not-yet-acknowledged
//! frames. Three cursors walk the ring:
//!
//! ```text
//! ack_cursor <= read_cursor <= write_cursor   (mod capacity)
//! ```
//!
//! `write_cursor` advances on store, `ack_cursor` on cumulative ACK, and
//! `read_cursor` rewinds to `ack_cursor` on NAK then walks forward during
//! replay. One slot is the ring sentinel, so a buffer of capacity N holds
//! N-1 frames; a full buffer is a backpressure signal, never silent loss.
//!
//! Sequence numbers strictly increase through the ring (mod 4096), which is
//! what makes cumulative acknowledgment a simple forward walk.

#![forbid(unsafe_code)]

use crate::types::{SequenceNumber, Tick};
use bytes::Bytes;
use tracing::trace;

/// One stored frame awaiting acknowledgment
#[derive(Debug, Clone)]
struct RetryEntry {
    seq: SequenceNumber,
    frame: Bytes,
    sent_at: Tick,
}

/// Circular store of unacknowledged frames
#[derive(Debug)]
pub struct RetryBuffer {
    slots: Vec<Option<RetryEntry>>,
    write_cursor: usize,
    ack_cursor: usize,
    read_cursor: usize,
}

impl RetryBuffer {
    /// Create a buffer with `capacity` ring slots (holds `capacity - 1`
    /// frames). Capacity bounds are enforced by
    /// [`crate::config::DllConfig::validate`].
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            write_cursor: 0,
            ack_cursor: 0,
            read_cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.write_cursor == self.ack_cursor
    }

    pub fn is_full(&self) -> bool {
        (self.write_cursor + 1) % self.capacity() == self.ack_cursor
    }

    /// Frames currently stored.
    pub fn len(&self) -> usize {
        (self.write_cursor + self.capacity() - self.ack_cursor) % self.capacity()
    }

    /// Store a transmitted frame. Returns `false` (and stores nothing) when
    /// the buffer is full; the caller surfaces that as backpressure.
    #[must_use]
    pub fn store(&mut self, seq: SequenceNumber, frame: Bytes, now: Tick) -> bool {
        if self.is_full() {
            return false;
        }
        self.slots[self.write_cursor] = Some(RetryEntry {
            seq,
            frame,
            sent_at: now,
        });
        self.write_cursor = (self.write_cursor + 1) % self.capacity();
        true
    }

    /// Cumulatively release every entry with sequence `<= seq` in mod-4096
    /// window order. An ACK for a sequence outside the in-flight window
    /// releases nothing.
    pub fn ack(&mut self, seq: SequenceNumber) {
        let mut released = 0usize;
        while self.ack_cursor != self.write_cursor {
            let entry_seq = match &self.slots[self.ack_cursor] {
                Some(entry) => entry.seq,
                None => break,
            };
            if !entry_seq.precedes_or_equals(seq) {
                break;
            }
            self.slots[self.ack_cursor] = None;
            self.advance_ack();
            released += 1;
        }
        if released > 0 {
            trace!(seq = %seq, released, "retry buffer released");
        }
    }

    /// Process a NAK: release everything `<= last_good`, then rewind the
    /// read cursor so replay restarts from the oldest unacknowledged frame.
    pub fn nak(&mut self, last_good: SequenceNumber) {
        self.ack(last_good);
        self.read_cursor = self.ack_cursor;
    }

    /// Rewind the read cursor without releasing anything. Used by the
    /// replay timer, which replays locally with no partner NAK to ack from.
    pub fn rewind(&mut self) {
        self.read_cursor = self.ack_cursor;
    }

    /// Walk one step of the replay, from the read cursor toward the write
    /// cursor. Bytes are re-emitted unchanged; neither CRC nor sequence is
    /// recomputed.
    pub fn next_replay(&mut self) -> Option<(SequenceNumber, Bytes)> {
        if self.read_cursor == self.write_cursor {
            return None;
        }
        let entry = self.slots[self.read_cursor]
            .as_ref()
            .map(|e| (e.seq, e.frame.clone()));
        self.read_cursor = (self.read_cursor + 1) % self.capacity();
        entry
    }

    /// Transmission time of the oldest unacknowledged frame, for the
    /// replay timer.
    pub fn oldest_sent_at(&self) -> Option<Tick> {
        self.slots[self.ack_cursor].as_ref().map(|e| e.sent_at)
    }

    fn advance_ack(&mut self) {
        self.ack_cursor = (self.ack_cursor + 1) % self.capacity();
        // read_cursor never lags ack_cursor
        if self.read_cursor == (self.ack_cursor + self.capacity() - 1) % self.capacity() {
            self.read_cursor = self.ack_cursor;
        }
    }
}
