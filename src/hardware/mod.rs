//! Hardware boundary for motion axes.
//!
//! The rest of the crate talks to physical hardware only through the
//! [`MotionAxis`] capability trait. Drivers own their transport (serial
//! port, simulation state) behind interior mutability so every operation
//! takes `&self` and handles can be shared across tasks.
//!
//! Driver methods return `anyhow::Result`: raw transport and protocol
//! failures are translated into the typed [`crate::error::AxisError`]
//! taxonomy one layer up, by [`crate::stage::AxisHandle`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod mock;

#[cfg(feature = "hardware_kinesis")]
pub mod kinesis;

/// Identifies one of the two stage axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisId {
    /// Horizontal axis (columns).
    X,
    /// Vertical axis (rows).
    Y,
}

impl AxisId {
    pub fn as_str(&self) -> &'static str {
        match self {
            AxisId::X => "X",
            AxisId::Y => "Y",
        }
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection lifecycle of an axis device.
///
/// [`MotionAxis::connect`] establishes the link and enables the drive in
/// one step, so there is no observable connected-but-disabled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No device connection.
    Disconnected,
    /// Drive enabled and accepting motion commands.
    Enabled,
}

/// Capability trait for a single linear motion axis.
///
/// Implementations block (asynchronously) in `home` and `move_abs` until the
/// device confirms completion; bounded waiting is the caller's concern and
/// is applied with `tokio::time::timeout` in the axis handle.
#[async_trait]
pub trait MotionAxis: Send + Sync {
    /// Establish the device connection, load its configuration, and enable
    /// the drive.
    async fn connect(&self) -> Result<()>;

    /// Drive the axis to its reference (zero) position.
    async fn home(&self) -> Result<()>;

    /// Command absolute motion to `target_mm`.
    ///
    /// Callers must have range-validated the target; drivers do not enforce
    /// soft limits.
    async fn move_abs(&self, target_mm: f64) -> Result<()>;

    /// Read the current position in millimeters.
    async fn position(&self) -> Result<f64>;

    /// Release the device. Idempotent; disconnecting an already-released
    /// device is a no-op.
    async fn disconnect(&self) -> Result<()>;
}
