//! # Link CRC Engine
//!
//! Two checksums protect the wire:
//!
//! - **LCRC**: a 32-bit CRC over a TLP frame's sequence header and payload,
//!   appended big-endian as the trailing 4 bytes.
//! - **DLLP CRC**: a 16-bit CRC over the 6 content bytes of a control
//!   packet, appended big-endian as bytes 6..8.
//!
//! Both use the self-checking receive design: the receiver runs the same
//! computation over the *entire* frame including the trailing CRC field and
//! compares against a fixed good-packet residue, so payload and CRC never
//! need to be separated before validation.
//!
//! Convention: MSB-first (non-reflected), all-ones initial value, no final
//! XOR. Under this convention the register absorbs the big-endian image of
//! its own value down to zero, so both residues are 0. The constants are
//! named so that a convention change is a one-line edit.

#![forbid(unsafe_code)]

/// LCRC generator polynomial (Ethernet polynomial)
pub const LCRC_POLY: u32 = 0x04C1_1DB7;

/// LCRC initial register value
pub const LCRC_INIT: u32 = 0xFFFF_FFFF;

/// Value a good frame's full-stream computation reduces to
pub const LCRC_RESIDUE: u32 = 0x0000_0000;

/// Length of the appended LCRC field in bytes
pub const LCRC_LEN: usize = 4;

/// DLLP CRC generator polynomial (x^16 + x^12 + x^3 + x + 1)
pub const CRC16_POLY: u16 = 0x100B;

/// DLLP CRC initial register value
pub const CRC16_INIT: u16 = 0xFFFF;

/// Value a good DLLP's full-stream computation reduces to
pub const CRC16_RESIDUE: u16 = 0x0000;

/// Length of the appended DLLP CRC field in bytes
pub const CRC16_LEN: usize = 2;

/// Compute the 32-bit LCRC over a frame's header and payload.
pub fn lcrc_compute(bytes: &[u8]) -> u32 {
    let mut crc = LCRC_INIT;
    for &byte in bytes {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ LCRC_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Validate a received frame including its trailing LCRC field.
///
/// Runs the computation over the whole stream and checks the residue; any
/// corruption anywhere in the frame, CRC field included, fails the check.
pub fn lcrc_validate(bytes_with_crc: &[u8]) -> bool {
    bytes_with_crc.len() > LCRC_LEN && lcrc_compute(bytes_with_crc) == LCRC_RESIDUE
}

/// Compute the 16-bit DLLP CRC over a control packet's content bytes.
pub fn crc16_compute(bytes: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    for &byte in bytes {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Validate a received DLLP including its trailing CRC field.
pub fn crc16_validate(bytes_with_crc: &[u8]) -> bool {
    bytes_with_crc.len() > CRC16_LEN && crc16_compute(bytes_with_crc) == CRC16_RESIDUE
}
