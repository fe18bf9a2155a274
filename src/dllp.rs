//! # Data Link Layer Packet (DLLP) Codec
//!
//! DLLPs are fixed 8-byte control packets: 6 content bytes followed by a
//! big-endian CRC-16 over the content. They carry acknowledgment, flow
//! control, and power management traffic, and are never subject to the
//! ACK/NAK retry protocol themselves.
//!
//! ## Wire layout
//!
//! ```text
//! byte 0      type (flow-control types carry the VC in the low bits)
//! byte 1      reserved / header credits (UpdateFC)
//! byte 2      low nibble: seq[11:8] or data credits[11:8]
//! byte 3      seq[7:0] or data credits[7:0]
//! bytes 4..6  reserved, must be zero
//! bytes 6..8  CRC-16, big-endian
//! ```

#![forbid(unsafe_code)]

use crate::crc::{crc16_compute, crc16_validate};
use crate::error::{DllError, Result};
use crate::types::SequenceNumber;

/// Total DLLP length on the wire
pub const DLLP_LEN: usize = 8;

/// Content bytes covered by the CRC-16
pub const DLLP_CONTENT_LEN: usize = 6;

/// DLLP type encodings
pub const DLLP_TYPE_ACK: u8 = 0x00;
pub const DLLP_TYPE_NAK: u8 = 0x10;
pub const DLLP_TYPE_PM_ENTER_L1: u8 = 0x20;
pub const DLLP_TYPE_PM_REQUEST_ACK: u8 = 0x24;
pub const DLLP_TYPE_UPDATE_FC_P: u8 = 0x80;
pub const DLLP_TYPE_UPDATE_FC_NP: u8 = 0x90;
pub const DLLP_TYPE_UPDATE_FC_CPL: u8 = 0xA0;

/// Mask selecting the base type of a flow-control DLLP (VC lives below it)
const UPDATE_FC_TYPE_MASK: u8 = 0xF8;
const UPDATE_FC_VC_MASK: u8 = 0x07;

/// Flow-control credit class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcKind {
    Posted,
    NonPosted,
    Completion,
}

impl FcKind {
    fn type_byte(self) -> u8 {
        match self {
            FcKind::Posted => DLLP_TYPE_UPDATE_FC_P,
            FcKind::NonPosted => DLLP_TYPE_UPDATE_FC_NP,
            FcKind::Completion => DLLP_TYPE_UPDATE_FC_CPL,
        }
    }
}

/// A decoded Data Link Layer Packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dllp {
    /// Cumulative acknowledgment of every TLP up to and including `seq`
    Ack { seq: SequenceNumber },

    /// Negative acknowledgment; `last_good` is the last sequence received
    /// intact ((rx_expected - 1) mod 4096; 4095 when nothing has been)
    Nak { last_good: SequenceNumber },

    /// Flow-control credit update for one virtual channel
    UpdateFc {
        kind: FcKind,
        vc: u8,
        header_credits: u8,
        data_credits: u16,
    },

    /// Request to enter L1 sleep
    PmEnterL1,

    /// Acknowledge the partner's L1 entry request
    PmRequestAck,
}

impl Dllp {
    /// Encode into the 8-byte wire form.
    pub fn encode(&self) -> [u8; DLLP_LEN] {
        let mut buf = [0u8; DLLP_LEN];
        match *self {
            Dllp::Ack { seq } => {
                buf[0] = DLLP_TYPE_ACK;
                buf[2] = (seq.raw() >> 8) as u8 & 0x0F;
                buf[3] = seq.raw() as u8;
            }
            Dllp::Nak { last_good } => {
                buf[0] = DLLP_TYPE_NAK;
                buf[2] = (last_good.raw() >> 8) as u8 & 0x0F;
                buf[3] = last_good.raw() as u8;
            }
            Dllp::UpdateFc {
                kind,
                vc,
                header_credits,
                data_credits,
            } => {
                buf[0] = kind.type_byte() | (vc & UPDATE_FC_VC_MASK);
                buf[1] = header_credits;
                buf[2] = (data_credits >> 8) as u8 & 0x0F;
                buf[3] = data_credits as u8;
            }
            Dllp::PmEnterL1 => buf[0] = DLLP_TYPE_PM_ENTER_L1,
            Dllp::PmRequestAck => buf[0] = DLLP_TYPE_PM_REQUEST_ACK,
        }
        let crc = crc16_compute(&buf[..DLLP_CONTENT_LEN]);
        buf[6] = (crc >> 8) as u8;
        buf[7] = crc as u8;
        buf
    }

    /// Decode and validate an 8-byte wire block.
    ///
    /// # Errors
    /// [`DllError::MalformedDllp`] on wrong length, CRC failure, unknown
    /// type, or nonzero reserved fields.
    pub fn decode(buf: &[u8]) -> Result<Dllp> {
        if buf.len() != DLLP_LEN {
            return Err(DllError::MalformedDllp("wrong length"));
        }
        if !crc16_validate(buf) {
            return Err(DllError::MalformedDllp("CRC-16 mismatch"));
        }
        if buf[4] != 0 || buf[5] != 0 {
            return Err(DllError::MalformedDllp("nonzero reserved field"));
        }

        let seq_field = || SequenceNumber::new(((buf[2] as u16 & 0x0F) << 8) | buf[3] as u16);

        match buf[0] {
            DLLP_TYPE_ACK if buf[1] == 0 && buf[2] & 0xF0 == 0 => {
                Ok(Dllp::Ack { seq: seq_field() })
            }
            DLLP_TYPE_NAK if buf[1] == 0 && buf[2] & 0xF0 == 0 => Ok(Dllp::Nak {
                last_good: seq_field(),
            }),
            DLLP_TYPE_PM_ENTER_L1 if buf[1..4] == [0, 0, 0] => Ok(Dllp::PmEnterL1),
            DLLP_TYPE_PM_REQUEST_ACK if buf[1..4] == [0, 0, 0] => Ok(Dllp::PmRequestAck),
            t if buf[2] & 0xF0 == 0 => {
                let kind = match t & UPDATE_FC_TYPE_MASK {
                    DLLP_TYPE_UPDATE_FC_P => FcKind::Posted,
                    DLLP_TYPE_UPDATE_FC_NP => FcKind::NonPosted,
                    DLLP_TYPE_UPDATE_FC_CPL => FcKind::Completion,
                    _ => return Err(DllError::MalformedDllp("unknown type")),
                };
                Ok(Dllp::UpdateFc {
                    kind,
                    vc: t & UPDATE_FC_VC_MASK,
                    header_credits: buf[1],
                    data_credits: ((buf[2] as u16 & 0x0F) << 8) | buf[3] as u16,
                })
            }
            _ => Err(DllError::MalformedDllp("unknown type")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_round_trip() {
        let dllp = Dllp::Ack {
            seq: SequenceNumber::new(0x0ABC),
        };
        let wire = dllp.encode();
        assert_eq!(wire.len(), DLLP_LEN);
        assert_eq!(Dllp::decode(&wire).unwrap(), dllp);
    }

    #[test]
    fn nak_encodes_none_as_4095() {
        let dllp = Dllp::Nak {
            last_good: SequenceNumber::new(4095),
        };
        let wire = dllp.encode();
        match Dllp::decode(&wire).unwrap() {
            Dllp::Nak { last_good } => assert_eq!(last_good.raw(), 4095),
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn update_fc_carries_all_fields() {
        let dllp = Dllp::UpdateFc {
            kind: FcKind::NonPosted,
            vc: 3,
            header_credits: 0x7F,
            data_credits: 0x0FED,
        };
        assert_eq!(Dllp::decode(&dllp.encode()).unwrap(), dllp);
    }

    #[test]
    fn pm_round_trip() {
        for dllp in [Dllp::PmEnterL1, Dllp::PmRequestAck] {
            assert_eq!(Dllp::decode(&dllp.encode()).unwrap(), dllp);
        }
    }

    #[test]
    fn rejects_truncated_input() {
        let wire = Dllp::Ack {
            seq: SequenceNumber::ZERO,
        }
        .encode();
        assert_eq!(
            Dllp::decode(&wire[..7]),
            Err(DllError::MalformedDllp("wrong length"))
        );
    }

    #[test]
    fn rejects_bad_crc() {
        let mut wire = Dllp::PmEnterL1.encode();
        wire[7] ^= 0x01;
        assert_eq!(
            Dllp::decode(&wire),
            Err(DllError::MalformedDllp("CRC-16 mismatch"))
        );
    }

    #[test]
    fn rejects_unknown_type_with_valid_crc() {
        let mut wire = [0u8; DLLP_LEN];
        wire[0] = 0x3C;
        let crc = crate::crc::crc16_compute(&wire[..DLLP_CONTENT_LEN]);
        wire[6] = (crc >> 8) as u8;
        wire[7] = crc as u8;
        assert_eq!(
            Dllp::decode(&wire),
            Err(DllError::MalformedDllp("unknown type"))
        );
    }

    #[test]
    fn rejects_nonzero_reserved_bytes() {
        let mut wire = [0u8; DLLP_LEN];
        wire[0] = DLLP_TYPE_ACK;
        wire[4] = 0x01;
        let crc = crate::crc::crc16_compute(&wire[..DLLP_CONTENT_LEN]);
        wire[6] = (crc >> 8) as u8;
        wire[7] = crc as u8;
        assert!(Dllp::decode(&wire).is_err());
    }
}
