//! # Data Link Facade
//!
//! [`DataLink`] wires the transmit engine, receive engine, DLLP codec, and
//! LTSSM into the single surface the Transaction Layer and physical layer
//! talk to. The interface is poll-based: bytes in via
//! [`on_symbol_stream`], time in via [`tick`], bytes out via
//! [`poll_emit`], notifications out via [`poll_event`].
//!
//! Received blocks are discriminated by shape: an 8-byte block that decodes
//! as a valid DLLP (CRC-16 and reserved-field checks included) is control
//! traffic; everything else takes the TLP validation path. Data link layer
//! state is reset when the LTSSM falls all the way back to Detect; Recovery
//! and the low-power states preserve the retry buffer and sequence
//! counters.
//!
//! [`on_symbol_stream`]: DataLink::on_symbol_stream
//! [`tick`]: DataLink::tick
//! [`poll_emit`]: DataLink::poll_emit
//! [`poll_event`]: DataLink::poll_event

#![forbid(unsafe_code)]

use crate::config::DllConfig;
use crate::dllp::{Dllp, FcKind, DLLP_LEN};
use crate::error::{DllError, Result};
use crate::ltssm::{Ltssm, LtssmState, PhyControl, PhyStatus};
use crate::rx::{ReceiveEngine, RxError, RxOutcome};
use crate::seq::SequenceNumberManager;
use crate::tx::TransmitEngine;
use crate::types::{LinkStatus, Tick};
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Notifications surfaced to the layer above
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A validated TLP payload, delivered in order
    PacketReceived(Bytes),
    /// The link reached a traffic-carrying state
    LinkUp,
    /// The link left the traffic-carrying states
    LinkDown,
    /// The partner published flow-control credits
    FlowControlUpdate {
        kind: FcKind,
        vc: u8,
        header_credits: u8,
        data_credits: u16,
    },
}

/// Running counters, monotonic for the life of the [`DataLink`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub tlps_sent: u64,
    pub tlps_received: u64,
    pub dllps_sent: u64,
    pub dllps_received: u64,
    pub naks_sent: u64,
    pub naks_received: u64,
    /// Frames re-emitted from the retry buffer (NAK or replay timer)
    pub replays: u64,
    pub crc_errors: u64,
    pub seq_errors: u64,
}

/// The Data Link Layer endpoint
#[derive(Debug)]
pub struct DataLink {
    config: DllConfig,
    seq: SequenceNumberManager,
    tx: TransmitEngine,
    rx: ReceiveEngine,
    ltssm: Ltssm,
    /// Control traffic (ACK/NAK/FC/PM); drains ahead of TLP frames
    outbox: VecDeque<Bytes>,
    events: VecDeque<LinkEvent>,
    stats: LinkStats,
    now: Tick,
    was_up: bool,
    /// DLL state holds content that must be cleared next time the LTSSM
    /// falls back to Detect
    dl_active: bool,
    /// We sent PmEnterL1 and are waiting for the acknowledgment
    l1_requested: bool,
}

impl DataLink {
    /// Build an endpoint from a validated configuration.
    ///
    /// # Errors
    /// [`DllError::InvalidConfig`] listing every problem found.
    pub fn new(config: DllConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| DllError::InvalidConfig(errors.join("; ")))?;
        Ok(Self {
            seq: SequenceNumberManager::new(),
            tx: TransmitEngine::new(&config),
            rx: ReceiveEngine::new(),
            ltssm: Ltssm::new(&config),
            outbox: VecDeque::new(),
            events: VecDeque::new(),
            stats: LinkStats::default(),
            now: 0,
            was_up: false,
            dl_active: false,
            l1_requested: false,
            config,
        })
    }

    pub fn ltssm_state(&self) -> LtssmState {
        self.ltssm.state()
    }

    /// Negotiated link snapshot.
    pub fn status(&self) -> LinkStatus {
        self.ltssm.status()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// TLPs stored and awaiting acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.tx.in_flight()
    }

    /// Accept a Transaction Layer packet for reliable transmission.
    ///
    /// # Errors
    /// [`DllError::LinkDown`] outside the traffic-carrying states,
    /// [`DllError::Backpressure`] while the retry buffer is full or a
    /// replay is draining.
    pub fn submit(&mut self, payload: &[u8]) -> Result<()> {
        if !self.ltssm.link_up() {
            return Err(DllError::LinkDown);
        }
        self.tx.submit(&mut self.seq, payload, self.now)?;
        self.stats.tlps_sent += 1;
        Ok(())
    }

    /// Publish flow-control credits to the partner.
    pub fn send_fc_update(
        &mut self,
        kind: FcKind,
        vc: u8,
        header_credits: u8,
        data_credits: u16,
    ) -> Result<()> {
        if !self.ltssm.link_up() {
            return Err(DllError::LinkDown);
        }
        self.queue_dllp(Dllp::UpdateFc {
            kind,
            vc,
            header_credits,
            data_credits,
        });
        Ok(())
    }

    /// Enter L0s fast idle.
    pub fn request_l0s(&mut self) {
        self.ltssm.request_l0s();
    }

    /// Start the L1 entry handshake: send PmEnterL1 and wait for the
    /// partner's acknowledgment before actually sleeping.
    pub fn request_l1(&mut self) -> Result<()> {
        if !self.ltssm.link_up() {
            return Err(DllError::LinkDown);
        }
        self.l1_requested = true;
        self.queue_dllp(Dllp::PmEnterL1);
        Ok(())
    }

    /// Enter L2 deep sleep from L1.
    pub fn request_l2(&mut self) {
        self.ltssm.enter_l2();
    }

    /// Leave the current low-power state.
    pub fn exit_low_power(&mut self) {
        self.ltssm.exit_low_power();
    }

    /// Request a Gen1 <-> Gen2 speed change through Recovery.
    pub fn request_speed_change(&mut self) {
        self.ltssm.request_speed_change();
    }

    /// Request the compliance test pattern.
    pub fn request_compliance(&mut self) {
        self.ltssm.request_compliance();
    }

    /// Process one delimited block from the physical layer.
    pub fn on_symbol_stream(&mut self, block: Bytes) {
        if !self.ltssm.link_up() {
            trace!(len = block.len(), "block dropped, link not up");
            return;
        }

        if block.len() == DLLP_LEN {
            if let Ok(dllp) = Dllp::decode(&block) {
                self.stats.dllps_received += 1;
                self.handle_dllp(dllp);
                return;
            }
        }

        match self.rx.process(&mut self.seq, &block) {
            RxOutcome::Accepted { payload, ack } => {
                self.stats.tlps_received += 1;
                self.queue_dllp(ack);
                self.events.push_back(LinkEvent::PacketReceived(payload));
            }
            RxOutcome::Rejected { nak, error } => {
                match error {
                    RxError::Crc => self.stats.crc_errors += 1,
                    RxError::Sequence => self.stats.seq_errors += 1,
                }
                self.stats.naks_sent += 1;
                self.queue_dllp(nak);
            }
        }
    }

    /// Advance one tick: run the LTSSM against the physical-layer status
    /// and the replay timer against the retry buffer.
    pub fn tick(&mut self, phy: &PhyStatus) -> PhyControl {
        // Detect entered between ticks (L2 exit, explicit reset) may be left
        // again within the step below, so check before stepping too.
        if self.dl_active && self.ltssm.state() == LtssmState::Detect {
            self.reset_dl_state();
        }
        self.now += 1;
        let ctl = self.ltssm.step(phy);

        let up = self.ltssm.link_up();
        if up != self.was_up {
            self.was_up = up;
            if up {
                self.dl_active = true;
                debug!(status = ?self.ltssm.status(), "link up");
                self.events.push_back(LinkEvent::LinkUp);
            } else {
                debug!(state = %self.ltssm.state(), "link down");
                self.events.push_back(LinkEvent::LinkDown);
            }
        }

        // Falling back to Detect voids all DLL state; Recovery and the
        // low-power states keep the retry buffer and sequence counters.
        if self.dl_active && self.ltssm.state() == LtssmState::Detect {
            self.reset_dl_state();
        }

        if up {
            self.stats.replays += self.tx.on_tick(self.now) as u64;
        }
        ctl
    }

    /// Pull the next block for the physical layer. Control traffic drains
    /// ahead of TLP frames so acknowledgments are never stuck behind data.
    pub fn poll_emit(&mut self) -> Option<Bytes> {
        if let Some(block) = self.outbox.pop_front() {
            return Some(block);
        }
        self.tx.poll_emit()
    }

    /// Pull the next notification for the layer above.
    pub fn poll_event(&mut self) -> Option<LinkEvent> {
        self.events.pop_front()
    }

    fn handle_dllp(&mut self, dllp: Dllp) {
        match dllp {
            Dllp::Ack { seq } => self.tx.handle_ack(seq, self.now),
            Dllp::Nak { last_good } => {
                self.stats.naks_received += 1;
                self.stats.replays += self.tx.handle_nak(last_good, self.now) as u64;
            }
            Dllp::UpdateFc {
                kind,
                vc,
                header_credits,
                data_credits,
            } => self.events.push_back(LinkEvent::FlowControlUpdate {
                kind,
                vc,
                header_credits,
                data_credits,
            }),
            Dllp::PmEnterL1 => {
                debug!("partner requested L1");
                self.queue_dllp(Dllp::PmRequestAck);
                self.ltssm.enter_l1();
            }
            Dllp::PmRequestAck => {
                if self.l1_requested {
                    self.l1_requested = false;
                    debug!("L1 entry acknowledged");
                    self.ltssm.enter_l1();
                }
            }
        }
    }

    fn queue_dllp(&mut self, dllp: Dllp) {
        self.stats.dllps_sent += 1;
        self.outbox
            .push_back(Bytes::copy_from_slice(&dllp.encode()));
    }

    fn reset_dl_state(&mut self) {
        debug!("ltssm in Detect, resetting data link state");
        self.seq = SequenceNumberManager::new();
        self.tx = TransmitEngine::new(&self.config);
        self.rx = ReceiveEngine::new();
        self.outbox.clear();
        self.dl_active = false;
        self.l1_requested = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LtssmTimeouts;
    use crate::ltssm::training::TrainingSet;
    use crate::types::{LinkSpeed, SequenceNumber};

    fn config() -> DllConfig {
        DllConfig {
            retry_capacity: 8,
            replay_timeout: 16,
            ltssm: LtssmTimeouts {
                polling_timeout: 100,
                config_timeout: 100,
                recovery_timeout: 100,
                n_fts: 4,
                ..LtssmTimeouts::default()
            },
            ..DllConfig::default()
        }
    }

    fn trained_link() -> DataLink {
        let mut link = DataLink::new(config()).unwrap();
        let partner = TrainingSet::local(4, crate::config::Generation::Gen2, false);
        let mut status = PhyStatus {
            receiver_detected: true,
            ..PhyStatus::default()
        };
        for _ in 0..200 {
            if link.ltssm_state() == LtssmState::L0 {
                break;
            }
            status.ts1 = Some(partner.clone());
            status.ts2 = Some(partner.clone());
            link.tick(&status);
        }
        assert_eq!(link.ltssm_state(), LtssmState::L0);
        assert_eq!(link.poll_event(), Some(LinkEvent::LinkUp));
        link
    }

    #[test]
    fn rejects_invalid_config() {
        let cfg = DllConfig {
            lanes: 5,
            ..DllConfig::default()
        };
        assert!(matches!(
            DataLink::new(cfg),
            Err(DllError::InvalidConfig(_))
        ));
    }

    #[test]
    fn submit_refused_while_training() {
        let mut link = DataLink::new(config()).unwrap();
        assert_eq!(link.submit(b"tlp"), Err(DllError::LinkDown));
    }

    #[test]
    fn received_blocks_dropped_while_down() {
        let mut link = DataLink::new(config()).unwrap();
        link.on_symbol_stream(Bytes::from_static(b"whatever"));
        assert_eq!(link.poll_event(), None);
        assert_eq!(link.stats().tlps_received, 0);
    }

    #[test]
    fn ack_dllp_releases_in_flight() {
        let mut link = trained_link();
        link.submit(b"hello").unwrap();
        assert_eq!(link.in_flight(), 1);
        let ack = Dllp::Ack {
            seq: SequenceNumber::ZERO,
        };
        link.on_symbol_stream(Bytes::copy_from_slice(&ack.encode()));
        assert_eq!(link.in_flight(), 0);
    }

    #[test]
    fn accepted_tlp_produces_event_and_ack() {
        let mut link = trained_link();
        let frame = crate::tx::frame_tlp(SequenceNumber::ZERO, b"payload");
        link.on_symbol_stream(frame);
        assert_eq!(
            link.poll_event(),
            Some(LinkEvent::PacketReceived(Bytes::from_static(b"payload")))
        );
        let out = link.poll_emit().unwrap();
        assert_eq!(
            Dllp::decode(&out).unwrap(),
            Dllp::Ack {
                seq: SequenceNumber::ZERO
            }
        );
    }

    #[test]
    fn control_traffic_drains_ahead_of_data() {
        let mut link = trained_link();
        link.submit(b"data").unwrap();
        let frame = crate::tx::frame_tlp(SequenceNumber::ZERO, b"incoming");
        link.on_symbol_stream(frame);
        // the ACK for the incoming frame must not queue behind our TLP
        let first = link.poll_emit().unwrap();
        assert!(Dllp::decode(&first).is_ok());
        let second = link.poll_emit().unwrap();
        assert!(Dllp::decode(&second).is_err());
    }

    #[test]
    fn fc_update_surfaces_as_event() {
        let mut link = trained_link();
        let dllp = Dllp::UpdateFc {
            kind: FcKind::Posted,
            vc: 0,
            header_credits: 32,
            data_credits: 256,
        };
        link.on_symbol_stream(Bytes::copy_from_slice(&dllp.encode()));
        assert_eq!(
            link.poll_event(),
            Some(LinkEvent::FlowControlUpdate {
                kind: FcKind::Posted,
                vc: 0,
                header_credits: 32,
                data_credits: 256,
            })
        );
    }

    #[test]
    fn partner_l1_request_is_acknowledged() {
        let mut link = trained_link();
        link.on_symbol_stream(Bytes::copy_from_slice(&Dllp::PmEnterL1.encode()));
        let out = link.poll_emit().unwrap();
        assert_eq!(Dllp::decode(&out).unwrap(), Dllp::PmRequestAck);
        assert_eq!(link.ltssm_state(), LtssmState::L1);
    }

    #[test]
    fn detect_fallback_resets_dl_state() {
        let mut link = trained_link();
        link.submit(b"in flight").unwrap();
        assert_eq!(link.in_flight(), 1);
        // recovery with a silent partner falls to Detect
        link.on_symbol_stream(Bytes::copy_from_slice(
            &Dllp::Nak {
                last_good: SequenceNumber::new(4095),
            }
            .encode(),
        ));
        let quiet = PhyStatus::default();
        let mut status_with_error = PhyStatus::default();
        status_with_error.decode_error = true;
        link.tick(&status_with_error);
        for _ in 0..120 {
            link.tick(&quiet);
        }
        assert_eq!(link.ltssm_state(), LtssmState::Detect);
        assert_eq!(link.in_flight(), 0);
    }
}
