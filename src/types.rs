//! # Core Scalar Types
//!
//! Shared newtypes and enums: the 12-bit sequence number with its mod-4096
//! window ordering, link speed/width, and the read-only link status snapshot
//! published by the LTSSM.

#![forbid(unsafe_code)]

use core::fmt;
use serde::{Deserialize, Serialize};

/// Number of bits in a TLP sequence number
pub const SEQ_BITS: u32 = 12;

/// Sequence number modulus (4096)
pub const SEQ_MODULUS: u16 = 1 << SEQ_BITS;

/// Mask extracting the 12 significant bits
pub const SEQ_MASK: u16 = SEQ_MODULUS - 1;

/// Half the sequence space; the in-flight window must stay below this so
/// mod-4096 ordering is unambiguous
pub const SEQ_HALF_WINDOW: u16 = SEQ_MODULUS / 2;

/// Discrete time of the single-clock model. One tick = one cycle.
pub type Tick = u64;

/// A 12-bit TLP sequence number.
///
/// All arithmetic wraps mod 4096. Ordering is only meaningful inside an
/// in-flight window smaller than [`SEQ_HALF_WINDOW`]; see
/// [`SequenceNumber::precedes_or_equals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SequenceNumber(u16);

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    /// Construct from a raw value, masking to 12 bits.
    pub fn new(raw: u16) -> Self {
        Self(raw & SEQ_MASK)
    }

    /// The raw 12-bit value.
    pub fn raw(self) -> u16 {
        self.0
    }

    /// Next sequence number, wrapping 4095 -> 0.
    pub fn wrapping_next(self) -> Self {
        Self((self.0 + 1) & SEQ_MASK)
    }

    /// Previous sequence number, wrapping 0 -> 4095.
    pub fn wrapping_prev(self) -> Self {
        Self(self.0.wrapping_sub(1) & SEQ_MASK)
    }

    /// Window ordering: `self <= other` interpreted mod 4096.
    ///
    /// Holds iff the forward distance from `self` to `other` is less than
    /// half the sequence space. With fewer than 2048 packets in flight this
    /// is exact; a cumulative ACK for a value outside the window releases
    /// nothing.
    pub fn precedes_or_equals(self, other: SequenceNumber) -> bool {
        other.0.wrapping_sub(self.0) & SEQ_MASK < SEQ_HALF_WINDOW
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Link data rate generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkSpeed {
    /// 2.5 GT/s
    Gen1,
    /// 5.0 GT/s
    Gen2,
}

impl fmt::Display for LinkSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkSpeed::Gen1 => write!(f, "2.5GT/s"),
            LinkSpeed::Gen2 => write!(f, "5.0GT/s"),
        }
    }
}

/// Negotiated link width in lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkWidth {
    X1 = 1,
    X2 = 2,
    X4 = 4,
    X8 = 8,
    X16 = 16,
    X32 = 32,
}

impl LinkWidth {
    /// Construct from a lane count; only power-of-two widths up to x32 exist.
    pub fn from_lanes(lanes: u8) -> Option<Self> {
        match lanes {
            1 => Some(LinkWidth::X1),
            2 => Some(LinkWidth::X2),
            4 => Some(LinkWidth::X4),
            8 => Some(LinkWidth::X8),
            16 => Some(LinkWidth::X16),
            32 => Some(LinkWidth::X32),
            _ => None,
        }
    }

    /// The lane count.
    pub fn lanes(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for LinkWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.lanes())
    }
}

/// Read-only link status snapshot.
///
/// Written only by the LTSSM, read everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    /// True only in L0 (and L0s, which is link-up with TX idle)
    pub link_up: bool,
    /// Negotiated data rate
    pub link_speed: LinkSpeed,
    /// Negotiated width
    pub link_width: LinkWidth,
}
