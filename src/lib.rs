//! pcie-dll: PCI Express Data Link Layer Core
//!
//! This crate models the Data Link Layer of a PCI Express protocol stack:
//! the subsystem that turns an unreliable, error-prone physical link into a
//! dependable, ordered packet channel between a Transaction Layer above and
//! a Physical/PIPE layer below.
//!
//! # Architecture
//!
//! - **Pure state machines**: No I/O and no timers inside the core. Bytes go
//!   in via [`DataLink::on_symbol_stream`], time goes in via
//!   [`DataLink::tick`], and bytes/events come out via
//!   [`DataLink::poll_emit`] / [`DataLink::poll_event`].
//! - **Single-clock model**: Every component advances on a discrete tick;
//!   all state transitions are atomic within a step, so no partial state is
//!   ever visible externally.
//! - **Zero-copy payloads**: Packet bytes travel as `bytes::Bytes`; replayed
//!   frames are re-emitted byte-for-byte from the retry buffer.
//! - **Deterministic**: Same inputs produce same outputs; timeouts are tick
//!   counts, not wall-clock time.
//!
//! # Module Organization
//!
//! - `seq`: sequence-number allocation and receive-side checking (mod 4096)
//! - `crc`: 32-bit link CRC (LCRC) and 16-bit DLLP CRC
//! - `dllp`: 8-byte control packet codec (ACK/NAK/UpdateFC/power management)
//! - `retry`: circular retry buffer with replay-on-NAK
//! - `tx` / `rx`: transmit and receive engines
//! - `ltssm`: link training and status state machine
//! - `link`: the [`DataLink`] facade wiring everything together

#![forbid(unsafe_code)]

pub mod config;
pub mod crc;
pub mod dllp;
pub mod error;
pub mod link;
pub mod ltssm;
pub mod retry;
pub mod rx;
pub mod seq;
pub mod tx;
pub mod types;

// Re-export key types
pub use config::{DllConfig, Generation, LtssmTimeouts};
pub use dllp::{Dllp, FcKind};
pub use error::{DllError, Result};
pub use link::{DataLink, LinkEvent, LinkStats};
pub use ltssm::training::TrainingSet;
pub use ltssm::{Ltssm, LtssmState, PhyControl, PhyStatus};
pub use retry::RetryBuffer;
pub use rx::{ReceiveEngine, RxError, RxOutcome};
pub use seq::SequenceNumberManager;
pub use tx::{TransmitEngine, TxState};
pub use types::{LinkSpeed, LinkStatus, LinkWidth, SequenceNumber};
