//! Error types for the stage controller.
//!
//! Two layers, mirroring how errors actually flow:
//!
//! - [`AxisError`]: everything that can go wrong on one axis, already
//!   translated from raw driver errors. `Connection` is fatal at startup;
//!   `Timeout` and `Hardware` leave the axis position unknown but are
//!   non-fatal to a running scan.
//! - [`JointAxisError`]: the aggregate outcome of a paired X/Y operation.
//!   It always carries both per-axis sub-results, so a timeout on one axis
//!   never masks what actually happened on the other.
//!
//! [`StageError`] is the top-level application error; `Input` covers
//! non-numeric or out-of-range user input, which is recovered locally
//! (re-prompt or ignore) and never reaches a device.

use crate::hardware::AxisId;
use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Which motion operation an axis error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOp {
    Home,
    Move,
}

impl fmt::Display for MotionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionOp::Home => f.write_str("home"),
            MotionOp::Move => f.write_str("move"),
        }
    }
}

/// Failure of a single-axis operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AxisError {
    /// Device could not be found or enabled. Fatal at startup.
    #[error("axis {axis}: device {serial} could not be connected: {reason}")]
    Connection {
        axis: AxisId,
        serial: String,
        reason: String,
    },

    /// The operation did not confirm within its timeout. The axis is left in
    /// an indeterminate position.
    #[error("axis {axis}: {op} did not complete within {timeout_ms} ms")]
    Timeout {
        axis: AxisId,
        op: MotionOp,
        timeout_ms: u64,
    },

    /// Device-reported fault during motion.
    #[error("axis {axis}: hardware fault during {op}: {reason}")]
    Hardware {
        axis: AxisId,
        op: MotionOp,
        reason: String,
    },

    /// Operation attempted on an axis that is not connected.
    #[error("axis {axis} is not connected")]
    NotConnected { axis: AxisId },
}

/// Aggregate outcome of a joint (both-axes) home or move.
///
/// Constructed only when at least one axis failed; the other axis's
/// sub-result reflects its actual outcome, success included.
#[derive(Debug, Clone, PartialEq)]
pub struct JointAxisError {
    pub op: MotionOp,
    pub x: Result<(), AxisError>,
    pub y: Result<(), AxisError>,
}

impl JointAxisError {
    /// Outcome for one axis of the pair.
    pub fn outcome(&self, axis: AxisId) -> &Result<(), AxisError> {
        match axis {
            AxisId::X => &self.x,
            AxisId::Y => &self.y,
        }
    }
}

impl fmt::Display for JointAxisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "joint {} failed (", self.op)?;
        match &self.x {
            Ok(()) => write!(f, "X: ok")?,
            Err(e) => write!(f, "X: {e}")?,
        }
        match &self.y {
            Ok(()) => write!(f, ", Y: ok)"),
            Err(e) => write!(f, ", Y: {e})"),
        }
    }
}

impl std::error::Error for JointAxisError {}

/// Top-level application error.
#[derive(Debug, Error)]
pub enum StageError {
    /// Non-numeric or out-of-range user input. Recovered locally; never
    /// issued to a device.
    #[error("invalid input: {0}")]
    Input(String),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Axis(#[from] AxisError),

    #[error(transparent)]
    Joint(#[from] JointAxisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
