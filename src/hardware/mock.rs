//! Simulated motion axis.
//!
//! Used by the test suite and by the console's `--mock` mode. Beyond the
//! happy path, each motion operation can be scripted to fault or to hang
//! forever, which is how the timeout and joint-failure paths are exercised
//! without hardware.
//!
//! Clones share state, so a test can hand one clone to an axis handle and
//! keep another to inspect the recorded call log afterwards.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::hardware::MotionAxis;

/// Scripted outcome for a single home or move call.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Complete normally after the configured motion delay.
    Succeed,
    /// Report a device fault.
    Fault(String),
    /// Never complete; the caller's timeout fires.
    Hang,
}

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Connect,
    Home,
    Move(f64),
    Disconnect,
}

#[derive(Debug)]
struct MockInner {
    position_mm: Mutex<f64>,
    connected: Mutex<bool>,
    fail_connect: Mutex<bool>,
    motion_delay: Duration,
    home_script: Mutex<VecDeque<MockBehavior>>,
    move_script: Mutex<VecDeque<MockBehavior>>,
    calls: Mutex<Vec<MockCall>>,
}

/// Simulated axis with scriptable failures and a call log.
#[derive(Debug, Clone)]
pub struct MockAxis {
    inner: Arc<MockInner>,
}

impl MockAxis {
    /// New simulated axis at position 0.0 mm that completes all motion
    /// instantly.
    pub fn new() -> Self {
        Self::with_motion_delay(Duration::ZERO)
    }

    /// Simulated axis whose home and move operations take `delay` each.
    pub fn with_motion_delay(delay: Duration) -> Self {
        Self {
            inner: Arc::new(MockInner {
                position_mm: Mutex::new(0.0),
                connected: Mutex::new(false),
                fail_connect: Mutex::new(false),
                motion_delay: delay,
                home_script: Mutex::new(VecDeque::new()),
                move_script: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make the next `connect` call fail.
    pub fn fail_next_connect(&self) {
        *lock(&self.inner.fail_connect) = true;
    }

    /// Queue an outcome for the next unscripted `home` call.
    pub fn script_home(&self, behavior: MockBehavior) {
        lock(&self.inner.home_script).push_back(behavior);
    }

    /// Queue an outcome for the next unscripted `move_abs` call.
    pub fn script_move(&self, behavior: MockBehavior) {
        lock(&self.inner.move_script).push_back(behavior);
    }

    /// All driver calls recorded so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.inner.calls).clone()
    }

    /// Targets of all recorded `move_abs` calls, in order.
    pub fn move_targets(&self) -> Vec<f64> {
        lock(&self.inner.calls)
            .iter()
            .filter_map(|call| match call {
                MockCall::Move(target) => Some(*target),
                _ => None,
            })
            .collect()
    }

    /// Current simulated position without going through the driver trait.
    pub fn position_now(&self) -> f64 {
        *lock(&self.inner.position_mm)
    }

    pub fn is_connected(&self) -> bool {
        *lock(&self.inner.connected)
    }

    fn record(&self, call: MockCall) {
        lock(&self.inner.calls).push(call);
    }

    async fn run_behavior(&self, behavior: MockBehavior, op: &str) -> Result<()> {
        match behavior {
            MockBehavior::Succeed => {
                if !self.inner.motion_delay.is_zero() {
                    sleep(self.inner.motion_delay).await;
                }
                Ok(())
            }
            MockBehavior::Fault(reason) => {
                tracing::debug!(op, %reason, "mock axis fault");
                bail!("simulated fault: {reason}")
            }
            MockBehavior::Hang => {
                tracing::debug!(op, "mock axis hanging");
                futures::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

impl Default for MockAxis {
    fn default() -> Self {
        Self::new()
    }
}

// Lock helper: the inner mutexes are never held across an await, so a
// poisoned lock can only mean a panicked test thread.
#[allow(clippy::unwrap_used)]
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

#[async_trait]
impl MotionAxis for MockAxis {
    async fn connect(&self) -> Result<()> {
        self.record(MockCall::Connect);
        if std::mem::take(&mut *lock(&self.inner.fail_connect)) {
            bail!("simulated connect failure");
        }
        *lock(&self.inner.connected) = true;
        Ok(())
    }

    async fn home(&self) -> Result<()> {
        self.record(MockCall::Home);
        let behavior = lock(&self.inner.home_script)
            .pop_front()
            .unwrap_or(MockBehavior::Succeed);
        self.run_behavior(behavior, "home").await?;
        *lock(&self.inner.position_mm) = 0.0;
        Ok(())
    }

    async fn move_abs(&self, target_mm: f64) -> Result<()> {
        self.record(MockCall::Move(target_mm));
        let behavior = lock(&self.inner.move_script)
            .pop_front()
            .unwrap_or(MockBehavior::Succeed);
        self.run_behavior(behavior, "move").await?;
        *lock(&self.inner.position_mm) = target_mm;
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        Ok(self.position_now())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(MockCall::Disconnect);
        *lock(&self.inner.connected) = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_position_across_moves() {
        let axis = MockAxis::new();
        axis.connect().await.unwrap();
        axis.home().await.unwrap();
        assert_eq!(axis.position().await.unwrap(), 0.0);

        axis.move_abs(12.5).await.unwrap();
        assert_eq!(axis.position().await.unwrap(), 12.5);
        assert_eq!(axis.move_targets(), vec![12.5]);
    }

    #[tokio::test]
    async fn scripted_fault_surfaces_and_clears() {
        let axis = MockAxis::new();
        axis.script_move(MockBehavior::Fault("stalled".into()));

        assert!(axis.move_abs(5.0).await.is_err());
        // Position unchanged by the failed move; next move succeeds.
        assert_eq!(axis.position_now(), 0.0);
        axis.move_abs(5.0).await.unwrap();
        assert_eq!(axis.position_now(), 5.0);
    }

    #[tokio::test]
    async fn clones_share_call_log() {
        let axis = MockAxis::new();
        let observer = axis.clone();
        axis.connect().await.unwrap();
        axis.disconnect().await.unwrap();
        assert_eq!(
            observer.calls(),
            vec![MockCall::Connect, MockCall::Disconnect]
        );
    }
}
