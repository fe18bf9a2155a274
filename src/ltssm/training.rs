//! # Training Sequence Model
//!
//! TS1/TS2 ordered sets as exchanged with the physical layer during link
//! training, plus the lane-numbering logic: width negotiation, lane
//! reversal detection, and the stable logical-to-physical remap table
//! computed once in Configuration.

#![forbid(unsafe_code)]

use crate::config::Generation;
use tinyvec::ArrayVec;

/// Upper bound on lanes per link
pub const MAX_LANES: usize = 32;

/// Bounded per-lane table (lane numbers, remap entries)
pub type LaneMap = ArrayVec<[u8; MAX_LANES]>;

/// A TS1 or TS2 ordered set, reduced to the fields this layer negotiates on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrainingSet {
    /// Link number proposed by the sender
    pub link_number: u8,

    /// Lane numbers as the sender assigns them, one entry per lane it
    /// advertises. Length is the sender's advertised width.
    pub lane_numbers: LaneMap,

    /// Sender is 5.0 GT/s capable
    pub supports_gen2: bool,

    /// Speed-change request bit (set during Recovery.Speed arbitration)
    pub speed_change: bool,
}

impl TrainingSet {
    /// The training set this port sends: ascending lane numbers 0..lanes.
    pub fn local(lanes: u8, generation: Generation, speed_change: bool) -> Self {
        let mut lane_numbers = LaneMap::new();
        for lane in 0..lanes.min(MAX_LANES as u8) {
            lane_numbers.push(lane);
        }
        Self {
            link_number: 0,
            lane_numbers,
            supports_gen2: generation == Generation::Gen2,
            speed_change,
        }
    }

    /// Width the sender advertises.
    pub fn advertised_lanes(&self) -> u8 {
        self.lane_numbers.len() as u8
    }
}

/// Negotiated width: the minimum of both partners' advertised lane counts.
pub fn negotiate_width(local_lanes: u8, partner_lanes: u8) -> u8 {
    local_lanes.min(partner_lanes)
}

/// Detect lane reversal from the partner's lane numbering over the
/// negotiated width.
///
/// A straight link sees ascending numbers starting at 0; a reversed link
/// sees them descending from `width - 1`. Anything else is a wiring state
/// this layer cannot train on.
pub fn detect_reversal(partner_lanes: &[u8], width: u8) -> Option<bool> {
    if partner_lanes.len() < width as usize || width == 0 {
        return None;
    }
    let received = &partner_lanes[..width as usize];
    if received.iter().enumerate().all(|(i, &n)| n == i as u8) {
        Some(false)
    } else if received
        .iter()
        .enumerate()
        .all(|(i, &n)| n == width - 1 - i as u8)
    {
        Some(true)
    } else {
        None
    }
}

/// Build the logical-to-physical lane remap table. Computed once in
/// Configuration and held for the life of the link.
pub fn remap_table(width: u8, reversed: bool) -> LaneMap {
    let mut table = LaneMap::new();
    for logical in 0..width.min(MAX_LANES as u8) {
        let physical = if reversed { width - 1 - logical } else { logical };
        table.push(physical);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_set_numbers_lanes_in_order() {
        let ts = TrainingSet::local(4, Generation::Gen2, false);
        assert_eq!(&ts.lane_numbers[..], &[0, 1, 2, 3]);
        assert!(ts.supports_gen2);
        assert_eq!(ts.advertised_lanes(), 4);
    }

    #[test]
    fn width_is_minimum_of_both_sides() {
        assert_eq!(negotiate_width(8, 4), 4);
        assert_eq!(negotiate_width(2, 16), 2);
        assert_eq!(negotiate_width(4, 4), 4);
    }

    #[test]
    fn straight_wiring_is_not_reversed() {
        assert_eq!(detect_reversal(&[0, 1, 2, 3], 4), Some(false));
    }

    #[test]
    fn descending_numbers_mean_reversal() {
        assert_eq!(detect_reversal(&[3, 2, 1, 0], 4), Some(true));
        assert_eq!(detect_reversal(&[0], 1), Some(false));
    }

    #[test]
    fn scrambled_numbers_are_untrainable() {
        assert_eq!(detect_reversal(&[0, 2, 1, 3], 4), None);
        assert_eq!(detect_reversal(&[0, 1], 4), None);
    }

    #[test]
    fn remap_is_identity_or_mirror() {
        assert_eq!(&remap_table(4, false)[..], &[0, 1, 2, 3]);
        assert_eq!(&remap_table(4, true)[..], &[3, 2, 1, 0]);
    }
}
