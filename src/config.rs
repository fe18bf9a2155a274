//! # Static Link Configuration
//!
//! The configuration surface is fixed at link construction: generation
//! capability, lane count, retry-buffer sizing, the replay timer, and the
//! enable flags for the optional LTSSM machinery. Nothing here is
//! runtime-mutable.
//!
//! All durations are discrete ticks of the single-clock model. A tick maps
//! to one symbol clock in hardware terms; callers that need wall time own
//! the conversion.

#![forbid(unsafe_code)]

use crate::types::{SEQ_HALF_WINDOW, Tick};
use serde::{Deserialize, Serialize};

/// Highest data rate this port is capable of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    Gen1,
    Gen2,
}

/// LTSSM timing and counting parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LtssmTimeouts {
    /// Consecutive partner TS1 (or TS2) required to advance a training step
    pub ts1_threshold: u32,

    /// Ticks allowed in either Polling substate before falling back to Detect
    pub polling_timeout: Tick,

    /// Ticks allowed in Configuration before falling back to Detect
    pub config_timeout: Tick,

    /// Ticks allowed in any Recovery substate before falling back to Detect
    pub recovery_timeout: Tick,

    /// Ticks spent in Polling.Compliance before returning to Detect
    pub compliance_timeout: Tick,

    /// Fixed duration of each of the four equalization phases
    pub eq_phase_ticks: Tick,

    /// Fast Training Sequences required to exit L0s
    pub n_fts: u32,
}

impl Default for LtssmTimeouts {
    fn default() -> Self {
        Self {
            ts1_threshold: 8,
            polling_timeout: 2400,
            config_timeout: 1200,
            recovery_timeout: 2400,
            compliance_timeout: 4800,
            eq_phase_ticks: 200,
            n_fts: 128,
        }
    }
}

/// Data Link Layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DllConfig {
    /// Generation capability advertised during training
    pub generation: Generation,

    /// Physical lane count of this port
    pub lanes: u8,

    /// Retry buffer slots. One slot is a ring sentinel, so the buffer holds
    /// `retry_capacity - 1` packets in flight.
    pub retry_capacity: usize,

    /// Ticks without ACK progress before an unacknowledged frame triggers a
    /// local replay (NAK-equivalent)
    pub replay_timeout: Tick,

    /// Model the full Polling/Recovery substate refinement. When false both
    /// collapse to single states with equivalent external behavior.
    pub detailed_substates: bool,

    /// Run the four-phase equalization procedure after a speed change
    pub equalization: bool,

    /// Allow L0s fast idle
    pub l0s: bool,

    /// Allow L1 sleep (DLLP handshake gated)
    pub l1: bool,

    /// Allow L2 deep sleep
    pub l2: bool,

    /// LTSSM timing parameters
    pub ltssm: LtssmTimeouts,
}

impl Default for DllConfig {
    fn default() -> Self {
        Self {
            generation: Generation::Gen2,
            lanes: 4,
            retry_capacity: 64,
            replay_timeout: 64,
            detailed_substates: true,
            equalization: true,
            l0s: true,
            l1: true,
            l2: false,
            ltssm: LtssmTimeouts::default(),
        }
    }
}

impl DllConfig {
    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !matches!(self.lanes, 1 | 2 | 4 | 8 | 16 | 32) {
            errors.push(format!(
                "lanes must be 1, 2, 4, 8, 16, or 32 (got {})",
                self.lanes
            ));
        }

        if self.retry_capacity < 2 {
            errors.push(format!(
                "retry_capacity must be at least 2 (got {})",
                self.retry_capacity
            ));
        }
        // The cumulative-ACK window comparison needs all in-flight sequence
        // numbers inside half the sequence space.
        if self.retry_capacity >= SEQ_HALF_WINDOW as usize {
            errors.push(format!(
                "retry_capacity must be below {} (got {})",
                SEQ_HALF_WINDOW, self.retry_capacity
            ));
        }

        if self.replay_timeout == 0 {
            errors.push("replay_timeout must be nonzero".to_string());
        }

        let t = &self.ltssm;
        if t.ts1_threshold == 0 {
            errors.push("ltssm.ts1_threshold must be nonzero".to_string());
        }
        for (name, value) in [
            ("ltssm.polling_timeout", t.polling_timeout),
            ("ltssm.config_timeout", t.config_timeout),
            ("ltssm.recovery_timeout", t.recovery_timeout),
            ("ltssm.compliance_timeout", t.compliance_timeout),
            ("ltssm.eq_phase_ticks", t.eq_phase_ticks),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be nonzero"));
            }
        }
        if t.n_fts == 0 {
            errors.push("ltssm.n_fts must be nonzero".to_string());
        }

        if self.l2 && !self.l1 {
            errors.push("l2 requires l1 (L2 is entered from L1)".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DllConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_lane_count() {
        let cfg = DllConfig {
            lanes: 3,
            ..DllConfig::default()
        };
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("lanes")));
    }

    #[test]
    fn rejects_undersized_retry_buffer() {
        let cfg = DllConfig {
            retry_capacity: 1,
            ..DllConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_oversized_retry_buffer() {
        let cfg = DllConfig {
            retry_capacity: 4096,
            ..DllConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn l2_requires_l1() {
        let cfg = DllConfig {
            l1: false,
            l2: true,
            ..DllConfig::default()
        };
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("l2")));
    }
}
