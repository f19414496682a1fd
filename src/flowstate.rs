//! Flow-state algebra
//!
//! A tiny finite algebra tracking whether an epoch's arrivals begin or end
//! mid-run or at a delimiter boundary. A `D` token marks an epoch delimiter,
//! a `P` token one or more in-sequence packets; adjacent identical tokens
//! collapse. The loss estimator uses `begins_with_p` to decide whether the
//! previous epoch's last sequence number anchors the current computation.

use std::fmt;

/// State of a flow's packet/delimiter history within an accumulation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    #[default]
    Null,
    D,
    P,
    Dp,
    Pd,
    Dpd,
    Error,
}

impl FlowState {
    /// Advance by a delimiter event
    pub fn delimit(self) -> FlowState {
        match self {
            FlowState::Null | FlowState::D => FlowState::D,
            FlowState::P | FlowState::Pd => FlowState::Pd,
            FlowState::Dp | FlowState::Dpd => FlowState::Dpd,
            FlowState::Error => FlowState::Error,
        }
    }

    /// Advance by a packet event
    pub fn packet(self) -> FlowState {
        match self {
            FlowState::Null | FlowState::P => FlowState::P,
            FlowState::D | FlowState::Dp => FlowState::Dp,
            _ => FlowState::Error,
        }
    }

    /// Concatenate two states: fold `other`'s token sequence onto `self`.
    /// `Error` is absorbing in both operands.
    pub fn concatenate(self, other: FlowState) -> FlowState {
        match other {
            FlowState::Null => self,
            FlowState::D => self.delimit(),
            FlowState::P => self.packet(),
            FlowState::Dp => self.delimit().packet(),
            FlowState::Pd => self.packet().delimit(),
            FlowState::Dpd => self.delimit().packet().delimit(),
            FlowState::Error => FlowState::Error,
        }
    }

    /// Does the token sequence begin with a packet run?
    pub fn begins_with_p(self) -> bool {
        matches!(self, FlowState::P | FlowState::Pd)
    }

    /// Does the token sequence end with a packet run?
    pub fn ends_with_p(self) -> bool {
        matches!(self, FlowState::P | FlowState::Dp)
    }

    pub fn is_error(self) -> bool {
        self == FlowState::Error
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowState::Null => "NULL",
            FlowState::D => "D",
            FlowState::P => "P",
            FlowState::Dp => "DP",
            FlowState::Pd => "PD",
            FlowState::Dpd => "DPD",
            FlowState::Error => "ERROR",
        };
        f.write_str(s)
    }
}
