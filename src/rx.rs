//! # Receive Engine
//!
//! Validates incoming TLP frames (LCRC, then sequence), answers with ACK or
//! NAK, and hands accepted payloads upward. The CHECK_CRC/CHECK_SEQ steps
//! run straight-line per frame; failure at either point drops the frame and
//! emits `Nak { last_good }`.
//!
//! `last_good` is the most recently validated sequence number, tracked
//! independently of `rx_expected`. Before anything has been accepted it
//! reads as 4095, i.e. `(0 - 1) mod 4096`.

#![forbid(unsafe_code)]

use crate::crc::{lcrc_validate, LCRC_LEN};
use crate::dllp::Dllp;
use crate::seq::SequenceNumberManager;
use crate::tx::TLP_HEADER_LEN;
use crate::types::SequenceNumber;
use bytes::Bytes;
use tracing::{trace, warn};

/// Smallest valid TLP frame: header + LCRC, empty payload
pub const MIN_FRAME_LEN: usize = TLP_HEADER_LEN + LCRC_LEN;

/// Why a frame was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxError {
    /// Runt frame or LCRC residue mismatch
    Crc,
    /// Sequence number did not match `rx_expected`
    Sequence,
}

/// Outcome of processing one received frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxOutcome {
    /// Frame validated; forward `payload` upward and emit `ack`
    Accepted { payload: Bytes, ack: Dllp },
    /// Frame dropped; emit `nak`
    Rejected { nak: Dllp, error: RxError },
}

/// The receive half of the data link
#[derive(Debug, Default)]
pub struct ReceiveEngine {
    last_good: Option<SequenceNumber>,
}

impl ReceiveEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last sequence number that passed validation, if any.
    pub fn last_good(&self) -> Option<SequenceNumber> {
        self.last_good
    }

    /// Validate one delimited frame from the physical layer.
    pub fn process(&mut self, seq_mgr: &mut SequenceNumberManager, frame: &Bytes) -> RxOutcome {
        if frame.len() < MIN_FRAME_LEN || !lcrc_validate(frame) {
            warn!(len = frame.len(), "frame failed LCRC check");
            return self.reject(RxError::Crc);
        }

        let seq = SequenceNumber::new(((frame[0] as u16 & 0x0F) << 8) | frame[1] as u16);
        if !seq_mgr.check_rx(seq) {
            warn!(
                seq = %seq,
                expected = %seq_mgr.rx_expected(),
                "sequence mismatch"
            );
            return self.reject(RxError::Sequence);
        }

        self.last_good = Some(seq);
        trace!(seq = %seq, "tlp accepted");
        RxOutcome::Accepted {
            payload: frame.slice(TLP_HEADER_LEN..frame.len() - LCRC_LEN),
            ack: Dllp::Ack { seq },
        }
    }

    fn reject(&self, error: RxError) -> RxOutcome {
        let last_good = self
            .last_good
            .unwrap_or_else(|| SequenceNumber::ZERO.wrapping_prev());
        RxOutcome::Rejected {
            nak: Dllp::Nak { last_good },
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::frame_tlp;

    #[test]
    fn accepts_valid_in_order_frame() {
        let mut seq = SequenceNumberManager::new();
        let mut rx = ReceiveEngine::new();
        let frame = frame_tlp(SequenceNumber::ZERO, b"data");
        match rx.process(&mut seq, &frame) {
            RxOutcome::Accepted { payload, ack } => {
                assert_eq!(&payload[..], b"data");
                assert_eq!(ack, Dllp::Ack { seq: SequenceNumber::ZERO });
            }
            other => panic!("expected accept, got {other:?}"),
        }
        assert_eq!(seq.rx_expected().raw(), 1);
        assert_eq!(rx.last_good(), Some(SequenceNumber::ZERO));
    }

    #[test]
    fn corrupt_frame_naks_with_no_last_good() {
        let mut seq = SequenceNumberManager::new();
        let mut rx = ReceiveEngine::new();
        let mut bytes = frame_tlp(SequenceNumber::ZERO, b"data").to_vec();
        bytes[3] ^= 0xFF;
        match rx.process(&mut seq, &Bytes::from(bytes)) {
            RxOutcome::Rejected { nak, error } => {
                assert_eq!(error, RxError::Crc);
                assert_eq!(
                    nak,
                    Dllp::Nak {
                        last_good: SequenceNumber::new(4095)
                    }
                );
            }
            other => panic!("expected reject, got {other:?}"),
        }
        // rx_expected untouched, frame not forwarded
        assert_eq!(seq.rx_expected().raw(), 0);
    }

    #[test]
    fn sequence_mismatch_naks_with_last_good() {
        let mut seq = SequenceNumberManager::new();
        let mut rx = ReceiveEngine::new();
        let first = frame_tlp(SequenceNumber::ZERO, b"a");
        assert!(matches!(
            rx.process(&mut seq, &first),
            RxOutcome::Accepted { .. }
        ));
        // skip seq 1, deliver seq 2
        let skipped = frame_tlp(SequenceNumber::new(2), b"c");
        match rx.process(&mut seq, &skipped) {
            RxOutcome::Rejected { nak, error } => {
                assert_eq!(error, RxError::Sequence);
                assert_eq!(
                    nak,
                    Dllp::Nak {
                        last_good: SequenceNumber::ZERO
                    }
                );
            }
            other => panic!("expected reject, got {other:?}"),
        }
        assert_eq!(seq.rx_expected().raw(), 1);
    }

    #[test]
    fn runt_frame_is_a_crc_reject() {
        let mut seq = SequenceNumberManager::new();
        let mut rx = ReceiveEngine::new();
        let outcome = rx.process(&mut seq, &Bytes::from_static(&[0x00, 0x01, 0x02]));
        assert!(matches!(
            outcome,
            RxOutcome::Rejected {
                error: RxError::Crc,
                ..
            }
        ));
    }

    #[test]
    fn empty_payload_frame_is_valid() {
        let mut seq = SequenceNumberManager::new();
        let mut rx = ReceiveEngine::new();
        let frame = frame_tlp(SequenceNumber::ZERO, b"");
        match rx.process(&mut seq, &frame) {
            RxOutcome::Accepted { payload, .. } => assert!(payload.is_empty()),
            other => panic!("expected accept, got {other:?}"),
        }
    }
}
