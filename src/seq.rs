//! # Sequence Number Management
//!
//! One counter per direction, each mutated by exactly one engine: the
//! transmit engine owns `tx_next` through [`SequenceNumberManager::allocate_tx`],
//! the receive engine owns `rx_expected` through
//! [`SequenceNumberManager::check_rx`]. A mismatch is not an error here; the
//! receive engine decides what to do with a `false` result.

#![forbid(unsafe_code)]

use crate::types::SequenceNumber;

/// Allocates outgoing sequence numbers and tracks the next expected incoming
/// sequence number, both mod 4096.
#[derive(Debug, Default)]
pub struct SequenceNumberManager {
    tx_next: SequenceNumber,
    rx_expected: SequenceNumber,
}

impl SequenceNumberManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next outgoing sequence number (post-increment).
    pub fn allocate_tx(&mut self) -> SequenceNumber {
        let seq = self.tx_next;
        self.tx_next = self.tx_next.wrapping_next();
        seq
    }

    /// Check a received sequence number against `rx_expected`.
    ///
    /// Returns true and advances the counter iff `seq` is exactly the
    /// expected value. There is no reordering tolerance.
    pub fn check_rx(&mut self, seq: SequenceNumber) -> bool {
        if seq == self.rx_expected {
            self.rx_expected = self.rx_expected.wrapping_next();
            true
        } else {
            false
        }
    }

    /// Next sequence number that will be allocated.
    pub fn tx_next(&self) -> SequenceNumber {
        self.tx_next
    }

    /// Next sequence number required on receive.
    pub fn rx_expected(&self) -> SequenceNumber {
        self.rx_expected
    }
}
