//! # Transmit Engine
//!
//! Orchestrates the transmit pipeline: allocate sequence number, frame,
//! compute LCRC, store in the retry buffer, queue for emission. Reacts to
//! incoming ACK/NAK by releasing or replaying, and runs the replay timer
//! that turns a lost ACK into a local replay.
//!
//! The COMPUTE_CRC/STORE/EMIT steps are straight-line inside [`submit`]:
//! in the run-to-completion model they can never be observed mid-flight.
//! The externally observable states are `Idle` and `Replaying`; while
//! replaying, new submissions are refused so replayed frames keep their
//! original order ahead of fresh traffic.
//!
//! [`submit`]: TransmitEngine::submit

#![forbid(unsafe_code)]

use crate::config::DllConfig;
use crate::crc::lcrc_compute;
use crate::error::{DllError, Result};
use crate::retry::RetryBuffer;
use crate::seq::SequenceNumberManager;
use crate::types::{SequenceNumber, Tick};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// TLP frame header length (12-bit sequence in two bytes)
pub const TLP_HEADER_LEN: usize = 2;

/// Externally observable transmit engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting new packets
    Idle,
    /// Draining a replay; submissions are backpressured
    Replaying,
}

/// The transmit half of the data link
#[derive(Debug)]
pub struct TransmitEngine {
    state: TxState,
    retry: RetryBuffer,
    outbox: VecDeque<Bytes>,
    /// Frames still in the outbox that belong to the current replay
    replay_pending: usize,
    replay_timeout: Tick,
    /// Tick of the last ACK progress (or first pending frame); the replay
    /// timer measures from here
    timer_base: Option<Tick>,
}

impl TransmitEngine {
    pub fn new(config: &DllConfig) -> Self {
        Self {
            state: TxState::Idle,
            retry: RetryBuffer::new(config.retry_capacity),
            outbox: VecDeque::new(),
            replay_pending: 0,
            replay_timeout: config.replay_timeout,
            timer_base: None,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Frames stored and not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.retry.len()
    }

    /// Accept a Transaction Layer packet for transmission.
    ///
    /// # Errors
    /// [`DllError::Backpressure`] while a replay is draining or the retry
    /// buffer is full.
    pub fn submit(
        &mut self,
        seq_mgr: &mut SequenceNumberManager,
        payload: &[u8],
        now: Tick,
    ) -> Result<()> {
        if self.state == TxState::Replaying {
            return Err(DllError::Backpressure);
        }
        if self.retry.is_full() {
            return Err(DllError::Backpressure);
        }

        let seq = seq_mgr.allocate_tx();
        let frame = frame_tlp(seq, payload);
        // cannot fail: fullness was checked above and nothing ran in between
        let stored = self.retry.store(seq, frame.clone(), now);
        debug_assert!(stored);
        if self.timer_base.is_none() {
            self.timer_base = Some(now);
        }
        trace!(seq = %seq, len = frame.len(), "tlp queued");
        self.outbox.push_back(frame);
        Ok(())
    }

    /// Process a received ACK DLLP. Pure bookkeeping; no state change.
    ///
    /// The replay timer rearms only when the ACK actually released
    /// something; a repeated or out-of-window ACK cannot defer a replay.
    pub fn handle_ack(&mut self, seq: SequenceNumber, now: Tick) {
        let before = self.retry.len();
        self.retry.ack(seq);
        if self.retry.is_empty() {
            self.timer_base = None;
        } else if self.retry.len() < before {
            self.timer_base = Some(now);
        }
    }

    /// Process a received NAK DLLP: release up to `last_good`, then queue a
    /// replay of everything after it, in original order with unchanged
    /// bytes. Returns the number of frames queued for replay.
    ///
    /// A NAK that arrives while a replay is already draining only performs
    /// the release; the replay is not queued twice.
    pub fn handle_nak(&mut self, last_good: SequenceNumber, now: Tick) -> usize {
        self.retry.nak(last_good);
        if self.state == TxState::Replaying {
            return 0;
        }
        debug!(last_good = %last_good, "nak received, replaying");
        self.begin_replay(now)
    }

    /// Advance the replay timer one tick. When `replay_timeout` ticks pass
    /// without ACK progress, the oldest unacknowledged frames are replayed
    /// locally, exactly as if a NAK at the ack point had arrived.
    pub fn on_tick(&mut self, now: Tick) -> usize {
        let Some(base) = self.timer_base else {
            return 0;
        };
        if self.state == TxState::Replaying || now.saturating_sub(base) < self.replay_timeout {
            return 0;
        }
        warn!(
            in_flight = self.retry.len(),
            "replay timer expired, replaying unacknowledged frames"
        );
        self.retry.rewind();
        self.begin_replay(now)
    }

    /// Pull the next frame for the physical layer.
    pub fn poll_emit(&mut self) -> Option<Bytes> {
        let frame = self.outbox.pop_front()?;
        if self.state == TxState::Replaying {
            self.replay_pending -= 1;
            if self.replay_pending == 0 {
                self.state = TxState::Idle;
            }
        }
        Some(frame)
    }

    fn begin_replay(&mut self, now: Tick) -> usize {
        // Anything still queued is an unacknowledged stored frame and will
        // reappear in the replay walk; drop the stale copies so each frame
        // goes out exactly once, in order.
        self.outbox.clear();
        let mut queued = 0;
        while let Some((seq, frame)) = self.retry.next_replay() {
            trace!(seq = %seq, "replay");
            self.outbox.push_back(frame);
            queued += 1;
        }
        if queued > 0 {
            self.state = TxState::Replaying;
            self.replay_pending = queued;
            self.timer_base = Some(now);
        } else {
            self.timer_base = if self.retry.is_empty() {
                None
            } else {
                Some(now)
            };
        }
        queued
    }
}

/// Build the wire frame: `[seq_hi, seq_lo] ++ payload ++ lcrc32`.
///
/// The LCRC covers header and payload and is appended big-endian so the
/// receiver's whole-stream residue check works.
pub fn frame_tlp(seq: SequenceNumber, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(TLP_HEADER_LEN + payload.len() + 4);
    buf.put_u8((seq.raw() >> 8) as u8 & 0x0F);
    buf.put_u8(seq.raw() as u8);
    buf.put_slice(payload);
    let crc = lcrc_compute(&buf);
    buf.put_u32(crc);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::lcrc_validate;

    fn engine(capacity: usize, timeout: Tick) -> TransmitEngine {
        TransmitEngine::new(&DllConfig {
            retry_capacity: capacity,
            replay_timeout: timeout,
            ..DllConfig::default()
        })
    }

    #[test]
    fn framed_tlp_passes_residue_check() {
        let frame = frame_tlp(SequenceNumber::new(0x123), b"payload");
        assert!(lcrc_validate(&frame));
        assert_eq!(frame[0], 0x01);
        assert_eq!(frame[1], 0x23);
    }

    #[test]
    fn submit_emits_and_stores() {
        let mut seq = SequenceNumberManager::new();
        let mut tx = engine(8, 64);
        tx.submit(&mut seq, b"a", 0).unwrap();
        tx.submit(&mut seq, b"b", 0).unwrap();
        assert_eq!(tx.in_flight(), 2);
        let first = tx.poll_emit().unwrap();
        assert_eq!(first[1], 0); // seq 0
        assert!(tx.poll_emit().is_some());
        assert!(tx.poll_emit().is_none());
    }

    #[test]
    fn backpressure_when_buffer_full() {
        let mut seq = SequenceNumberManager::new();
        let mut tx = engine(3, 64);
        tx.submit(&mut seq, b"a", 0).unwrap();
        tx.submit(&mut seq, b"b", 0).unwrap();
        assert_eq!(tx.submit(&mut seq, b"c", 0), Err(DllError::Backpressure));
        // an ACK frees a slot
        tx.handle_ack(SequenceNumber::ZERO, 1);
        tx.submit(&mut seq, b"c", 1).unwrap();
    }

    #[test]
    fn nak_replays_unchanged_bytes_in_order() {
        let mut seq = SequenceNumberManager::new();
        let mut tx = engine(8, 64);
        let mut originals = Vec::new();
        for payload in [&b"one"[..], b"two", b"three"] {
            tx.submit(&mut seq, payload, 0).unwrap();
            originals.push(tx.poll_emit().unwrap());
        }
        let queued = tx.handle_nak(SequenceNumber::ZERO, 1);
        assert_eq!(queued, 2);
        assert_eq!(tx.state(), TxState::Replaying);
        assert_eq!(tx.poll_emit().unwrap(), originals[1]);
        assert_eq!(tx.poll_emit().unwrap(), originals[2]);
        assert_eq!(tx.state(), TxState::Idle);
    }

    #[test]
    fn submissions_refused_while_replaying() {
        let mut seq = SequenceNumberManager::new();
        let mut tx = engine(8, 64);
        tx.submit(&mut seq, b"a", 0).unwrap();
        tx.poll_emit().unwrap();
        tx.handle_nak(SequenceNumber::new(4095), 1);
        assert_eq!(tx.state(), TxState::Replaying);
        assert_eq!(tx.submit(&mut seq, b"b", 1), Err(DllError::Backpressure));
        tx.poll_emit().unwrap();
        tx.submit(&mut seq, b"b", 1).unwrap();
    }

    #[test]
    fn duplicate_nak_does_not_requeue() {
        let mut seq = SequenceNumberManager::new();
        let mut tx = engine(8, 64);
        tx.submit(&mut seq, b"a", 0).unwrap();
        tx.poll_emit().unwrap();
        assert_eq!(tx.handle_nak(SequenceNumber::new(4095), 1), 1);
        assert_eq!(tx.handle_nak(SequenceNumber::new(4095), 1), 0);
        assert!(tx.poll_emit().is_some());
        assert!(tx.poll_emit().is_none());
    }

    #[test]
    fn replay_timer_triggers_local_replay() {
        let mut seq = SequenceNumberManager::new();
        let mut tx = engine(8, 10);
        tx.submit(&mut seq, b"a", 0).unwrap();
        let original = tx.poll_emit().unwrap();
        for now in 1..10 {
            assert_eq!(tx.on_tick(now), 0);
        }
        assert_eq!(tx.on_tick(10), 1);
        assert_eq!(tx.poll_emit().unwrap(), original);
    }

    #[test]
    fn stale_ack_does_not_defer_the_replay_timer() {
        let mut seq = SequenceNumberManager::new();
        let mut tx = engine(8, 10);
        tx.submit(&mut seq, b"a", 0).unwrap();
        tx.poll_emit().unwrap();
        // a repeated out-of-window ACK releases nothing and must not keep
        // pushing the timer out
        for now in 1..10 {
            tx.handle_ack(SequenceNumber::new(4095), now);
            assert_eq!(tx.on_tick(now), 0);
        }
        assert_eq!(tx.on_tick(10), 1);
    }

    #[test]
    fn ack_progress_rearms_the_timer() {
        let mut seq = SequenceNumberManager::new();
        let mut tx = engine(8, 10);
        tx.submit(&mut seq, b"a", 0).unwrap();
        tx.submit(&mut seq, b"b", 0).unwrap();
        tx.handle_ack(SequenceNumber::ZERO, 8);
        assert_eq!(tx.on_tick(10), 0);
        assert_eq!(tx.on_tick(18), 1);
    }

    #[test]
    fn stale_outbox_copies_are_not_duplicated_by_replay() {
        let mut seq = SequenceNumberManager::new();
        let mut tx = engine(8, 64);
        tx.submit(&mut seq, b"a", 0).unwrap();
        tx.submit(&mut seq, b"b", 0).unwrap();
        // nothing emitted yet; a NAK must not produce four frames
        tx.handle_nak(SequenceNumber::new(4095), 1);
        assert!(tx.poll_emit().is_some());
        assert!(tx.poll_emit().is_some());
        assert!(tx.poll_emit().is_none());
    }
}
