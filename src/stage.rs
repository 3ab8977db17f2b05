//! Axis handles and the dual-axis coordinator.
//!
//! [`AxisHandle`] wraps one hardware axis: it applies the configured
//! timeouts, translates raw driver errors into the typed [`AxisError`]
//! taxonomy, and tracks the last confirmed position (cleared to unknown on
//! timeout or fault).
//!
//! [`StageController`] exclusively owns the X and Y handles and presents
//! joint operations: home or move both axes concurrently and report one
//! aggregate outcome. The two axis futures are issued without inter-axis
//! ordering and joined; a failure on one axis never aborts the other, whose
//! sub-result reflects what actually happened.
//!
//! The controller is constructed once at startup and torn down with an
//! explicit [`StageController::disconnect`]; no device state lives in
//! globals.

use std::sync::Mutex;
use std::time::Duration;

use crate::config::{AxisSettings, StageConfig};
use crate::error::{AxisError, JointAxisError, MotionOp, StageError, StageResult};
use crate::hardware::{AxisId, ConnectionState, MotionAxis};

/// One physical motion axis: driver plus translation and position tracking.
pub struct AxisHandle {
    id: AxisId,
    settings: AxisSettings,
    driver: Box<dyn MotionAxis>,
    connection: Mutex<ConnectionState>,
    /// Last confirmed position. `None` before homing and after any timeout
    /// or fault, when the true position is indeterminate.
    last_position_mm: Mutex<Option<f64>>,
}

impl AxisHandle {
    pub fn new(id: AxisId, settings: AxisSettings, driver: Box<dyn MotionAxis>) -> Self {
        Self {
            id,
            settings,
            driver,
            connection: Mutex::new(ConnectionState::Disconnected),
            last_position_mm: Mutex::new(None),
        }
    }

    pub fn id(&self) -> AxisId {
        self.id
    }

    pub fn settings(&self) -> &AxisSettings {
        &self.settings
    }

    pub fn connection_state(&self) -> ConnectionState {
        *lock(&self.connection)
    }

    /// Last confirmed position, or `None` when unknown.
    pub fn last_known_position_mm(&self) -> Option<f64> {
        *lock(&self.last_position_mm)
    }

    /// Establish the device connection and enable the drive.
    pub async fn connect(&self) -> Result<(), AxisError> {
        tracing::info!(axis = %self.id, serial = %self.settings.serial, "connecting axis");
        self.driver
            .connect()
            .await
            .map_err(|e| AxisError::Connection {
                axis: self.id,
                serial: self.settings.serial.clone(),
                reason: e.to_string(),
            })?;
        *lock(&self.connection) = ConnectionState::Enabled;
        Ok(())
    }

    /// Drive the axis to its reference position, waiting at most `timeout`.
    pub async fn home(&self, timeout: Duration) -> Result<(), AxisError> {
        self.ensure_enabled()?;
        tracing::info!(axis = %self.id, "homing");
        match tokio::time::timeout(timeout, self.driver.home()).await {
            Ok(Ok(())) => {
                *lock(&self.last_position_mm) = Some(0.0);
                tracing::info!(axis = %self.id, "homed");
                Ok(())
            }
            Ok(Err(e)) => {
                *lock(&self.last_position_mm) = None;
                Err(AxisError::Hardware {
                    axis: self.id,
                    op: MotionOp::Home,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                *lock(&self.last_position_mm) = None;
                Err(AxisError::Timeout {
                    axis: self.id,
                    op: MotionOp::Home,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Command absolute motion, waiting at most `timeout` for confirmation.
    ///
    /// Callers must have validated `target_mm` against the axis range; the
    /// handle does not re-check.
    pub async fn move_to(&self, target_mm: f64, timeout: Duration) -> Result<(), AxisError> {
        self.ensure_enabled()?;
        tracing::debug!(axis = %self.id, target_mm, "moving");
        match tokio::time::timeout(timeout, self.driver.move_abs(target_mm)).await {
            Ok(Ok(())) => {
                *lock(&self.last_position_mm) = Some(target_mm);
                Ok(())
            }
            Ok(Err(e)) => {
                *lock(&self.last_position_mm) = None;
                Err(AxisError::Hardware {
                    axis: self.id,
                    op: MotionOp::Move,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                *lock(&self.last_position_mm) = None;
                Err(AxisError::Timeout {
                    axis: self.id,
                    op: MotionOp::Move,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Release the device. Safe to call on an already-disconnected handle.
    pub async fn disconnect(&self) {
        if self.connection_state() == ConnectionState::Disconnected {
            return;
        }
        if let Err(e) = self.driver.disconnect().await {
            tracing::warn!(axis = %self.id, error = %e, "disconnect reported an error");
        }
        *lock(&self.connection) = ConnectionState::Disconnected;
        tracing::info!(axis = %self.id, "disconnected");
    }

    fn ensure_enabled(&self) -> Result<(), AxisError> {
        if self.connection_state() == ConnectionState::Enabled {
            Ok(())
        } else {
            Err(AxisError::NotConnected { axis: self.id })
        }
    }
}

// The handle mutexes guard plain state and are never held across an await.
#[allow(clippy::unwrap_used)]
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

/// Dual-axis coordinator: joint operations over the X and Y handles.
pub struct StageController {
    x: AxisHandle,
    y: AxisHandle,
}

impl StageController {
    pub fn new(x: AxisHandle, y: AxisHandle) -> Self {
        Self { x, y }
    }

    /// Build a controller from configuration with a driver per axis.
    pub fn from_config(
        config: &StageConfig,
        x_driver: Box<dyn MotionAxis>,
        y_driver: Box<dyn MotionAxis>,
    ) -> Self {
        Self::new(
            AxisHandle::new(AxisId::X, config.x.clone(), x_driver),
            AxisHandle::new(AxisId::Y, config.y.clone(), y_driver),
        )
    }

    pub fn axis(&self, id: AxisId) -> &AxisHandle {
        match id {
            AxisId::X => &self.x,
            AxisId::Y => &self.y,
        }
    }

    /// Connect both axes. A connection failure is fatal at startup, so the
    /// first failing axis aborts initialization.
    pub async fn connect(&self) -> Result<(), AxisError> {
        self.x.connect().await?;
        self.y.connect().await?;
        Ok(())
    }

    /// Home both axes concurrently and wait for both to resolve.
    ///
    /// Completion order is non-deterministic; the call returns only after
    /// both axes have succeeded, faulted, or been abandoned at `timeout`.
    pub async fn home_both(&self, timeout: Duration) -> Result<(), JointAxisError> {
        let (x, y) = tokio::join!(self.x.home(timeout), self.y.home(timeout));
        joint_outcome(MotionOp::Home, x, y)
    }

    /// Move both axes concurrently to the given targets.
    ///
    /// Caller contract: both targets must already be range-validated (see
    /// [`StageController::validate_targets`]); a joint failure means stage
    /// position is unknown for the failed axis until the next successful
    /// home or move.
    pub async fn move_both(
        &self,
        x_mm: f64,
        y_mm: f64,
        timeout: Duration,
    ) -> Result<(), JointAxisError> {
        tracing::debug!(x_mm, y_mm, "joint move");
        let (x, y) = tokio::join!(self.x.move_to(x_mm, timeout), self.y.move_to(y_mm, timeout));
        joint_outcome(MotionOp::Move, x, y)
    }

    /// The codified caller contract for joint moves: rejects the whole
    /// request when either target is outside its axis range, before any
    /// device call is issued.
    pub fn validate_targets(&self, x_mm: f64, y_mm: f64) -> StageResult<()> {
        for (handle, target) in [(&self.x, x_mm), (&self.y, y_mm)] {
            let s = handle.settings();
            if !s.contains(target) {
                return Err(StageError::Input(format!(
                    "{} target {} mm outside range {} to {} mm",
                    handle.id(),
                    target,
                    s.range_min_mm,
                    s.range_max_mm
                )));
            }
        }
        Ok(())
    }

    /// Disconnect both axes. Idempotent.
    pub async fn disconnect(&self) {
        tokio::join!(self.x.disconnect(), self.y.disconnect());
    }
}

fn joint_outcome(
    op: MotionOp,
    x: Result<(), AxisError>,
    y: Result<(), AxisError>,
) -> Result<(), JointAxisError> {
    match (&x, &y) {
        (Ok(()), Ok(())) => Ok(()),
        _ => {
            let err = JointAxisError { op, x, y };
            tracing::warn!(error = %err, "joint operation failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockAxis, MockBehavior};

    fn handle(id: AxisId, axis: &MockAxis) -> AxisHandle {
        let settings = StageConfig::default().axis(id).clone();
        AxisHandle::new(id, settings, Box::new(axis.clone()))
    }

    #[tokio::test]
    async fn motion_requires_connection() {
        let mock = MockAxis::new();
        let h = handle(AxisId::X, &mock);
        assert_eq!(h.connection_state(), ConnectionState::Disconnected);
        let err = h.home(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, AxisError::NotConnected { axis: AxisId::X });
        // The driver never saw a home call.
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn successful_motion_tracks_position() {
        let mock = MockAxis::new();
        let h = handle(AxisId::Y, &mock);
        h.connect().await.unwrap();
        assert_eq!(h.connection_state(), ConnectionState::Enabled);
        assert_eq!(h.last_known_position_mm(), None);

        h.home(Duration::from_secs(1)).await.unwrap();
        assert_eq!(h.last_known_position_mm(), Some(0.0));

        h.move_to(12.5, Duration::from_secs(1)).await.unwrap();
        assert_eq!(h.last_known_position_mm(), Some(12.5));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_position_unknown() {
        let mock = MockAxis::new();
        let h = handle(AxisId::X, &mock);
        h.connect().await.unwrap();
        h.home(Duration::from_secs(1)).await.unwrap();

        mock.script_move(MockBehavior::Hang);
        let err = h.move_to(5.0, Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, AxisError::Timeout { op: MotionOp::Move, .. }));
        assert_eq!(h.last_known_position_mm(), None);
    }

    #[tokio::test]
    async fn fault_translates_to_hardware_error() {
        let mock = MockAxis::new();
        let h = handle(AxisId::X, &mock);
        h.connect().await.unwrap();

        mock.script_home(MockBehavior::Fault("limit switch".into()));
        let err = h.home(Duration::from_secs(1)).await.unwrap_err();
        match err {
            AxisError::Hardware { op, reason, .. } => {
                assert_eq!(op, MotionOp::Home);
                assert!(reason.contains("limit switch"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mock = MockAxis::new();
        let h = handle(AxisId::X, &mock);
        // Disconnecting a never-connected handle is a no-op.
        h.disconnect().await;
        assert!(mock.calls().is_empty());

        h.connect().await.unwrap();
        h.disconnect().await;
        h.disconnect().await;
        // Only one driver disconnect despite two calls.
        assert_eq!(
            mock.calls()
                .iter()
                .filter(|c| matches!(c, crate::hardware::mock::MockCall::Disconnect))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn validate_targets_rejects_out_of_range() {
        let x = MockAxis::new();
        let y = MockAxis::new();
        let stage = StageController::from_config(
            &StageConfig::default(),
            Box::new(x.clone()),
            Box::new(y.clone()),
        );

        assert!(stage.validate_targets(25.0, 25.0).is_ok());
        assert!(stage.validate_targets(-1.0, 25.0).is_err());
        assert!(stage.validate_targets(25.0, 51.0).is_err());
        // Rejection happens before any device call.
        assert!(x.calls().is_empty());
        assert!(y.calls().is_empty());
    }
}
