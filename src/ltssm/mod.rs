//! # Link Training and Status State Machine
//!
//! The LTSSM drives link bring-up, speed/width negotiation, error recovery,
//! and power-state transitions, and publishes the `link_up` /
//! `link_speed` / `link_width` snapshot the rest of the stack reads.
//!
//! **Pure state machine design**: no I/O, no timers. Each call to
//! [`Ltssm::step`] consumes one tick's worth of physical-layer status and
//! produces the control signals for that tick. Timeouts are tick counts;
//! every timeout forces a transition to a defined fallback state, never an
//! undefined one.
//!
//! Substate refinement (Polling.*, Recovery.*) is gated on
//! `detailed_substates`; when disabled, Polling and Recovery each run as a
//! single state with equivalent external behavior but reduced
//! diagnosability.

#![forbid(unsafe_code)]

pub mod training;

use crate::config::{DllConfig, Generation, LtssmTimeouts};
use crate::types::{LinkSpeed, LinkStatus, LinkWidth, Tick};
use core::fmt;
use tracing::{debug, warn};
use training::{detect_reversal, negotiate_width, remap_table, LaneMap, TrainingSet};

/// Polling substates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingSubstate {
    /// Send TS1, require 8 consecutive partner TS1
    Active,
    /// Send/await TS2
    Configuration,
    /// Transmit the compliance pattern; exits only by timeout
    Compliance,
}

/// Equalization phases (fixed duration each)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqPhase {
    /// Transmit preset
    Phase0,
    /// Receiver coefficient request
    Phase1,
    /// Transmitter coefficient update
    Phase2,
    /// Link evaluation
    Phase3,
}

/// Recovery substates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySubstate {
    /// Re-acquire bit lock via TS1
    RcvrLock,
    /// Re-validate negotiated parameters via TS2
    RcvrCfg,
    /// Final TS2 dwell before returning to L0
    Idle,
    /// Gen1 <-> Gen2 speed change arbitration
    Speed,
    /// Post-speed-change equalization
    Equalization(EqPhase),
}

/// L0s substates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L0sSubstate {
    /// Transmitter electrically idle
    Idle,
    /// Exiting: exchange Fast Training Sequences
    Fts,
}

/// LTSSM top-level state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LtssmState {
    Detect,
    Polling(PollingSubstate),
    Configuration,
    L0,
    Recovery(RecoverySubstate),
    L0s(L0sSubstate),
    L1,
    L2,
}

impl LtssmState {
    /// True in the states where the data link carries traffic (L0s counts:
    /// link-up with TX idle).
    pub fn is_link_up(self) -> bool {
        matches!(self, LtssmState::L0 | LtssmState::L0s(_))
    }
}

impl fmt::Display for LtssmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LtssmState::Detect => write!(f, "Detect"),
            LtssmState::Polling(s) => write!(f, "Polling.{s:?}"),
            LtssmState::Configuration => write!(f, "Configuration"),
            LtssmState::L0 => write!(f, "L0"),
            LtssmState::Recovery(RecoverySubstate::Equalization(p)) => {
                write!(f, "Recovery.Equalization.{p:?}")
            }
            LtssmState::Recovery(s) => write!(f, "Recovery.{s:?}"),
            LtssmState::L0s(s) => write!(f, "L0s.{s:?}"),
            LtssmState::L1 => write!(f, "L1"),
            LtssmState::L2 => write!(f, "L2"),
        }
    }
}

/// Per-tick status from the physical layer
#[derive(Debug, Clone, Default)]
pub struct PhyStatus {
    /// Receiver presence detected on the far end
    pub receiver_detected: bool,
    /// Receive side sees electrical idle
    pub rx_elecidle: bool,
    /// A TS1 ordered set arrived this tick
    pub ts1: Option<TrainingSet>,
    /// A TS2 ordered set arrived this tick
    pub ts2: Option<TrainingSet>,
    /// A Fast Training Sequence arrived this tick
    pub fts_seen: bool,
    /// Symbol decode error this tick
    pub decode_error: bool,
}

/// Per-tick control signals to the physical layer
#[derive(Debug, Clone, Default)]
pub struct PhyControl {
    /// Drive the transmitter to electrical idle
    pub tx_elecidle: bool,
    /// Transmit this TS1 ordered set
    pub send_ts1: Option<TrainingSet>,
    /// Transmit this TS2 ordered set
    pub send_ts2: Option<TrainingSet>,
    /// Transmit a Fast Training Sequence
    pub send_fts: bool,
    /// Transmit the compliance pattern
    pub send_compliance: bool,
}

/// The Link Training and Status State Machine
#[derive(Debug)]
pub struct Ltssm {
    state: LtssmState,
    ticks_in_state: Tick,

    generation: Generation,
    lanes: u8,
    detailed: bool,
    equalization: bool,
    l0s_enabled: bool,
    l1_enabled: bool,
    l2_enabled: bool,
    timeouts: LtssmTimeouts,

    /// Consecutive training sets observed in the current step
    ts_run: u32,
    /// Longest consecutive run seen since entering the current state
    ts_run_best: u32,
    /// FTS observed while exiting L0s
    fts_run: u32,

    /// Last training set received from the partner
    partner: Option<TrainingSet>,

    // Negotiated parameters; written only in Configuration/Recovery.Speed
    link_speed: LinkSpeed,
    link_width: LinkWidth,
    lane_reversal: bool,
    remap: LaneMap,

    error_flag: bool,
    compliance_requested: bool,
    speed_change_pending: bool,
}

impl Ltssm {
    pub fn new(config: &DllConfig) -> Self {
        Self {
            state: LtssmState::Detect,
            ticks_in_state: 0,
            generation: config.generation,
            lanes: config.lanes,
            detailed: config.detailed_substates,
            equalization: config.equalization,
            l0s_enabled: config.l0s,
            l1_enabled: config.l1,
            l2_enabled: config.l2,
            timeouts: config.ltssm.clone(),
            ts_run: 0,
            ts_run_best: 0,
            fts_run: 0,
            partner: None,
            link_speed: LinkSpeed::Gen1,
            link_width: LinkWidth::X1,
            lane_reversal: false,
            remap: LaneMap::new(),
            error_flag: false,
            compliance_requested: false,
            speed_change_pending: false,
        }
    }

    pub fn state(&self) -> LtssmState {
        self.state
    }

    pub fn link_up(&self) -> bool {
        self.state.is_link_up()
    }

    /// Read-only snapshot of the negotiated link.
    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            link_up: self.link_up(),
            link_speed: self.link_speed,
            link_width: self.link_width,
        }
    }

    pub fn lane_reversal(&self) -> bool {
        self.lane_reversal
    }

    /// Logical-to-physical lane remap, computed once in Configuration.
    pub fn lane_map(&self) -> &[u8] {
        &self.remap
    }

    /// Report a link error (decode failure, protocol violation). Takes
    /// effect on the next tick in L0.
    pub fn link_error(&mut self) {
        self.error_flag = true;
    }

    /// Request the compliance pattern; honored from Polling.Active.
    pub fn request_compliance(&mut self) {
        self.compliance_requested = true;
    }

    /// Request a Gen1 <-> Gen2 speed change; drives L0 into Recovery.
    pub fn request_speed_change(&mut self) {
        if self.generation == Generation::Gen2 {
            self.speed_change_pending = true;
        }
    }

    /// Enter L0s fast idle from L0. No handshake.
    pub fn request_l0s(&mut self) {
        if self.state == LtssmState::L0 && self.l0s_enabled {
            self.enter(LtssmState::L0s(L0sSubstate::Idle));
        }
    }

    /// Enter L1. Called by the facade once the PM DLLP handshake completed.
    pub fn enter_l1(&mut self) {
        if self.state == LtssmState::L0 && self.l1_enabled {
            self.enter(LtssmState::L1);
        }
    }

    /// Enter L2 from L1.
    pub fn enter_l2(&mut self) {
        if self.state == LtssmState::L1 && self.l2_enabled {
            self.enter(LtssmState::L2);
        }
    }

    /// Leave the current low-power state: L0s exits through FTS, L1 through
    /// a full Recovery retrain, L2 through Detect (full link reset).
    pub fn exit_low_power(&mut self) {
        match self.state {
            LtssmState::L0s(L0sSubstate::Idle) => {
                self.enter(LtssmState::L0s(L0sSubstate::Fts));
            }
            LtssmState::L1 => self.enter(LtssmState::Recovery(RecoverySubstate::RcvrLock)),
            LtssmState::L2 => self.enter(LtssmState::Detect),
            _ => {}
        }
    }

    /// Explicit reset: any state back to Detect.
    pub fn reset(&mut self) {
        self.enter(LtssmState::Detect);
    }

    /// Advance one tick.
    pub fn step(&mut self, phy: &PhyStatus) -> PhyControl {
        self.ticks_in_state += 1;
        let mut ctl = PhyControl::default();

        match self.state {
            LtssmState::Detect => {
                ctl.tx_elecidle = true;
                if phy.receiver_detected {
                    self.enter(LtssmState::Polling(PollingSubstate::Active));
                }
            }

            LtssmState::Polling(PollingSubstate::Active) => {
                if self.compliance_requested {
                    self.compliance_requested = false;
                    self.enter(LtssmState::Polling(PollingSubstate::Compliance));
                    ctl.send_compliance = true;
                    return ctl;
                }
                ctl.send_ts1 = Some(self.local_ts(false));
                // A partner that has already advanced sends TS2; both count.
                self.track_ts(phy.ts1.as_ref().or(phy.ts2.as_ref()));
                if self.ts_run >= self.timeouts.ts1_threshold {
                    if self.detailed {
                        self.enter(LtssmState::Polling(PollingSubstate::Configuration));
                    } else {
                        self.enter(LtssmState::Configuration);
                    }
                } else if self.ticks_in_state >= self.timeouts.polling_timeout {
                    self.fail_to_detect("Polling.Active timeout");
                }
            }

            LtssmState::Polling(PollingSubstate::Configuration) => {
                ctl.send_ts2 = Some(self.local_ts(false));
                self.track_ts(phy.ts2.as_ref());
                if self.ts_run >= self.timeouts.ts1_threshold {
                    self.enter(LtssmState::Configuration);
                } else if self.ticks_in_state >= self.timeouts.polling_timeout {
                    self.fail_to_detect("Polling.Configuration timeout");
                }
            }

            LtssmState::Polling(PollingSubstate::Compliance) => {
                ctl.send_compliance = true;
                if self.ticks_in_state >= self.timeouts.compliance_timeout {
                    self.fail_to_detect("compliance pattern complete");
                }
            }

            LtssmState::Configuration => {
                ctl.send_ts2 = Some(self.local_ts(false));
                if let Some(ts) = phy.ts2.as_ref().or(phy.ts1.as_ref()) {
                    self.partner = Some(ts.clone());
                }
                // Dwell at least a threshold's worth of TS2 so a slightly
                // lagging partner still sees our lane numbers.
                if self.ticks_in_state >= self.timeouts.ts1_threshold as Tick {
                    if self.try_finalize_configuration() {
                        self.enter(LtssmState::L0);
                    }
                }
                if self.state == LtssmState::Configuration
                    && self.ticks_in_state >= self.timeouts.config_timeout
                {
                    self.fail_to_detect("Configuration timeout");
                }
            }

            LtssmState::L0 => {
                self.track_ts(phy.ts1.as_ref().or(phy.ts2.as_ref()));
                let idle_glitch = phy.rx_elecidle && !self.l0s_enabled;
                // a full run of consecutive sets filters out the stragglers a
                // partner sends in the few ticks before it reaches L0 itself
                let partner_retrain = self.ts_run >= self.timeouts.ts1_threshold;
                if self.error_flag || phy.decode_error || idle_glitch {
                    self.error_flag = false;
                    warn!("link error in L0, entering Recovery");
                    self.enter(LtssmState::Recovery(RecoverySubstate::RcvrLock));
                } else if partner_retrain || self.speed_change_pending {
                    self.enter(LtssmState::Recovery(RecoverySubstate::RcvrLock));
                }
            }

            LtssmState::Recovery(RecoverySubstate::RcvrLock) => {
                ctl.send_ts1 = Some(self.local_ts(self.speed_change_pending));
                self.track_ts(phy.ts1.as_ref().or(phy.ts2.as_ref()));
                if self.ts_run >= self.timeouts.ts1_threshold {
                    if self.detailed {
                        self.enter(LtssmState::Recovery(RecoverySubstate::RcvrCfg));
                    } else {
                        // Collapsed recovery: apply a pending speed change
                        // here; external behavior matches the refined path.
                        if self.speed_change_pending {
                            self.apply_speed_change();
                        }
                        self.enter(LtssmState::L0);
                    }
                } else if self.ticks_in_state >= self.timeouts.recovery_timeout {
                    self.fail_to_detect("Recovery.RcvrLock timeout");
                }
            }

            LtssmState::Recovery(RecoverySubstate::RcvrCfg) => {
                ctl.send_ts2 = Some(self.local_ts(self.speed_change_pending));
                self.track_ts(phy.ts2.as_ref());
                if self.ts_run >= self.timeouts.ts1_threshold {
                    if self.speed_change_pending {
                        self.enter(LtssmState::Recovery(RecoverySubstate::Speed));
                    } else {
                        self.enter(LtssmState::Recovery(RecoverySubstate::Idle));
                    }
                } else if self.ticks_in_state >= self.timeouts.recovery_timeout {
                    self.fail_to_detect("Recovery.RcvrCfg timeout");
                }
            }

            LtssmState::Recovery(RecoverySubstate::Speed) => {
                ctl.send_ts1 = Some(self.local_ts(true));
                self.track_ts(phy.ts1.as_ref().or(phy.ts2.as_ref()));
                if self.ts_run >= self.timeouts.ts1_threshold {
                    self.apply_speed_change();
                    if self.equalization && self.link_speed == LinkSpeed::Gen2 {
                        self.enter(LtssmState::Recovery(RecoverySubstate::Equalization(
                            EqPhase::Phase0,
                        )));
                    } else {
                        self.enter(LtssmState::Recovery(RecoverySubstate::Idle));
                    }
                } else if self.ticks_in_state >= self.timeouts.recovery_timeout {
                    self.fail_to_detect("Recovery.Speed timeout");
                }
            }

            LtssmState::Recovery(RecoverySubstate::Equalization(phase)) => {
                ctl.send_ts1 = Some(self.local_ts(false));
                if self.ticks_in_state >= self.timeouts.eq_phase_ticks {
                    match phase {
                        EqPhase::Phase0 => self.enter(LtssmState::Recovery(
                            RecoverySubstate::Equalization(EqPhase::Phase1),
                        )),
                        EqPhase::Phase1 => self.enter(LtssmState::Recovery(
                            RecoverySubstate::Equalization(EqPhase::Phase2),
                        )),
                        EqPhase::Phase2 => self.enter(LtssmState::Recovery(
                            RecoverySubstate::Equalization(EqPhase::Phase3),
                        )),
                        EqPhase::Phase3 => self.enter(LtssmState::L0),
                    }
                }
            }

            LtssmState::Recovery(RecoverySubstate::Idle) => {
                ctl.send_ts2 = Some(self.local_ts(false));
                self.track_ts(phy.ts2.as_ref());
                // Transmit for twice the run we require to receive: a partner
                // that entered Idle a few ticks behind us (and so latched its
                // run later) still sees a full run before we stop sending.
                // The partner may already sit in L0 by the time our dwell
                // ends, hence the latched best run rather than the live one.
                if self.ts_run_best >= self.timeouts.ts1_threshold
                    && self.ticks_in_state >= 2 * self.timeouts.ts1_threshold as Tick
                {
                    self.enter(LtssmState::L0);
                } else if self.ticks_in_state >= self.timeouts.recovery_timeout {
                    self.fail_to_detect("Recovery.Idle timeout");
                }
            }

            LtssmState::L0s(L0sSubstate::Idle) => {
                ctl.tx_elecidle = true;
                // Partner-initiated exit: FTS on the wire wakes us too.
                if phy.fts_seen {
                    self.enter(LtssmState::L0s(L0sSubstate::Fts));
                }
            }

            LtssmState::L0s(L0sSubstate::Fts) => {
                ctl.send_fts = true;
                if phy.fts_seen {
                    self.fts_run += 1;
                }
                if self.fts_run >= self.timeouts.n_fts {
                    self.enter(LtssmState::L0);
                } else if self.ticks_in_state >= self.timeouts.recovery_timeout {
                    // FTS exchange failed; retrain instead of hanging
                    warn!("L0s exit timeout, entering Recovery");
                    self.enter(LtssmState::Recovery(RecoverySubstate::RcvrLock));
                }
            }

            LtssmState::L1 => {
                ctl.tx_elecidle = true;
                // partner-initiated exit shows up as training sets
                if phy.ts1.is_some() || phy.ts2.is_some() {
                    self.enter(LtssmState::Recovery(RecoverySubstate::RcvrLock));
                }
            }

            LtssmState::L2 => {
                ctl.tx_elecidle = true;
            }
        }

        ctl
    }

    fn local_ts(&self, speed_change: bool) -> TrainingSet {
        TrainingSet::local(self.lanes, self.generation, speed_change)
    }

    fn track_ts(&mut self, ts: Option<&TrainingSet>) {
        match ts {
            Some(ts) => {
                self.ts_run += 1;
                self.ts_run_best = self.ts_run_best.max(self.ts_run);
                if ts.speed_change {
                    self.speed_change_pending = self.generation == Generation::Gen2;
                }
                self.partner = Some(ts.clone());
            }
            None => self.ts_run = 0,
        }
    }

    /// Write the negotiated parameters from the latched partner training
    /// set. Returns false (and keeps waiting) until a coherent lane
    /// numbering has been seen.
    fn try_finalize_configuration(&mut self) -> bool {
        let Some(partner) = self.partner.clone() else {
            return false;
        };
        let lanes = negotiate_width(self.lanes, partner.advertised_lanes());
        let Some(width) = LinkWidth::from_lanes(lanes) else {
            return false;
        };
        let Some(reversed) = detect_reversal(&partner.lane_numbers, lanes) else {
            return false;
        };

        self.link_width = width;
        self.lane_reversal = reversed;
        self.remap = remap_table(lanes, reversed);
        self.link_speed = if self.generation == Generation::Gen2 && partner.supports_gen2 {
            LinkSpeed::Gen2
        } else {
            LinkSpeed::Gen1
        };
        debug!(
            width = %self.link_width,
            speed = %self.link_speed,
            reversed,
            "link configured"
        );
        true
    }

    /// Gen1 <-> Gen2 change; the upshift happens only when both partners
    /// advertise 5.0 GT/s support.
    fn apply_speed_change(&mut self) {
        let partner_gen2 = self
            .partner
            .as_ref()
            .map(|p| p.supports_gen2)
            .unwrap_or(false);
        let new_speed = if self.link_speed == LinkSpeed::Gen1
            && self.generation == Generation::Gen2
            && partner_gen2
        {
            LinkSpeed::Gen2
        } else {
            LinkSpeed::Gen1
        };
        if new_speed != self.link_speed {
            debug!(from = %self.link_speed, to = %new_speed, "speed change");
            self.link_speed = new_speed;
        }
        self.speed_change_pending = false;
    }

    fn fail_to_detect(&mut self, reason: &str) {
        warn!(state = %self.state, reason, "training failed, falling back to Detect");
        self.enter(LtssmState::Detect);
    }

    fn enter(&mut self, next: LtssmState) {
        debug!(from = %self.state, to = %next, "ltssm transition");
        self.state = next;
        self.ticks_in_state = 0;
        self.ts_run = 0;
        self.ts_run_best = 0;
        self.fts_run = 0;
    }
}
