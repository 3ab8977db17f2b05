//! Scan session: timed traversal of the sample grid.
//!
//! [`ScanSession`] layers a state machine over the grid model and the
//! dual-axis coordinator. An automated scan runs as a spawned tokio task
//! ticking at a fixed cadence, so issuing a scan never blocks the caller;
//! each tick advances the cursor, notifies subscribers, and awaits the
//! joint move before the next tick can fire, so motion commands never
//! overlap on the axes.
//!
//! Scan policy is best-effort: a failed or timed-out move is reported
//! through [`ScanEvent::AxisError`] and the scan proceeds to the next
//! point; there is no built-in retry. Pause, stop, and reset cancel future
//! ticks only — an in-flight joint move always runs to completion or
//! timeout.
//!
//! State machine: `Idle -> Running <-> Paused`, `Running|Paused -> Stopped`,
//! and reset returns to `Idle` with the cursor cleared. Paused and Stopped
//! behave identically (cadence halted, cursor kept, `start` resumes from
//! the cursor); they stay distinct states so front ends can label their
//! controls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{JointAxisError, StageError, StageResult};
use crate::grid::{CustomPoint, GridPoint, GridPointSet, GridSpec};
use crate::stage::StageController;

/// Scan session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// No scan has run since construction or the last reset.
    Idle,
    /// The cadence task is ticking.
    Running,
    /// Cadence halted by `pause`; cursor kept.
    Paused,
    /// Cadence halted by `stop` or by scan completion; cursor kept.
    Stopped,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// The highlighted grid index changed (`None` clears the highlight).
    IndexChanged(Option<usize>),
    /// The custom point changed (`None` clears it).
    CustomPointChanged(Option<CustomPoint>),
    /// A joint motion command failed; the scan continues.
    AxisError(JointAxisError),
    /// The scan visited the last grid point and halted.
    Completed,
}

/// Parse a scan delay entered as seconds of text.
///
/// Non-numeric or negative input is an input error; the session is left
/// untouched by the caller in that case.
pub fn parse_delay(text: &str) -> StageResult<Duration> {
    let seconds: f64 = text
        .trim()
        .parse()
        .map_err(|_| StageError::Input(format!("scan delay must be a number: {text:?}")))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(StageError::Input(format!(
            "scan delay must be non-negative: {seconds}"
        )));
    }
    Ok(Duration::from_secs_f64(seconds))
}

struct Shared {
    grid: Arc<GridPointSet>,
    cursor: Option<usize>,
    custom: Option<CustomPoint>,
    state: ScanState,
}

/// Scan state machine over a [`StageController`].
pub struct ScanSession {
    stage: Arc<StageController>,
    move_timeout: Duration,
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<ScanEvent>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ScanSession {
    /// New session with an empty grid. `move_timeout` bounds every joint
    /// move the session issues.
    pub fn new(stage: Arc<StageController>, move_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            stage,
            move_timeout,
            shared: Arc::new(Mutex::new(Shared {
                grid: Arc::new(GridPointSet::empty()),
                cursor: None,
                custom: None,
                state: ScanState::Idle,
            })),
            events,
            task: None,
            shutdown_tx: None,
        }
    }

    /// Subscribe to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// The current grid generation, shared immutably with renderers.
    pub fn grid(&self) -> Arc<GridPointSet> {
        lock(&self.shared).grid.clone()
    }

    /// Highlighted grid index, if any.
    pub fn current_index(&self) -> Option<usize> {
        lock(&self.shared).cursor
    }

    /// Active custom point, if any.
    pub fn custom_point(&self) -> Option<CustomPoint> {
        lock(&self.shared).custom
    }

    pub fn state(&self) -> ScanState {
        lock(&self.shared).state
    }

    /// Replace the grid with a fresh generation for `spec`.
    ///
    /// Always clears the cursor and the custom point, in every state. The
    /// cadence task is deliberately not halted: a running scan picks up the
    /// new grid from index 0 at its next tick.
    pub fn set_grid(&mut self, spec: GridSpec) {
        let generation = Arc::new(GridPointSet::generate(spec));
        {
            let mut shared = lock(&self.shared);
            shared.grid = generation;
            shared.cursor = None;
            shared.custom = None;
        }
        let _ = self.events.send(ScanEvent::IndexChanged(None));
        let _ = self.events.send(ScanEvent::CustomPointChanged(None));
    }

    /// Begin (or resume) the automated scan, ticking every `delay`.
    ///
    /// No-op when the grid is empty. Resumes from the current cursor; a
    /// session whose scan already completed halts again on its first tick.
    pub fn start(&mut self, delay: Duration) {
        {
            let shared = lock(&self.shared);
            if shared.grid.is_empty() {
                tracing::warn!("scan start ignored: no grid generated");
                return;
            }
        }

        // Restarting while running replaces the cadence task.
        self.halt_cadence();
        let prior = self.task.take();
        lock(&self.shared).state = ScanState::Running;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let stage = self.stage.clone();
        let shared = self.shared.clone();
        let events = self.events.clone();
        let move_timeout = self.move_timeout;
        // interval() panics on a zero period; a zero delay means
        // back-to-back ticks.
        let period = delay.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            // A halted cadence may still be draining an in-flight joint
            // move; wait it out so motion commands never overlap on the
            // axes.
            if let Some(prior) = prior {
                let _ = prior.await;
            }
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Discard the immediate first tick so the first step fires one
            // full period after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(point) = advance(&shared) else {
                            lock(&shared).state = ScanState::Stopped;
                            let _ = events.send(ScanEvent::Completed);
                            tracing::info!("scan complete");
                            break;
                        };
                        let _ = events.send(ScanEvent::IndexChanged(Some(point.index)));
                        if let Err(err) = stage
                            .move_both(point.x_mm, point.y_mm, move_timeout)
                            .await
                        {
                            // Best-effort policy: report and keep scanning.
                            tracing::warn!(index = point.index, error = %err, "scan move failed");
                            let _ = events.send(ScanEvent::AxisError(err));
                        }
                    }
                }
            }
        });

        self.task = Some(task);
        self.shutdown_tx = Some(shutdown_tx);
        tracing::info!(period_ms = period.as_millis() as u64, "scan started");
    }

    /// Halt the cadence, keeping the cursor. `start` resumes from here.
    pub fn pause(&mut self) {
        if self.state() == ScanState::Running {
            self.halt_cadence();
            lock(&self.shared).state = ScanState::Paused;
            tracing::info!("scan paused");
        }
    }

    /// Halt the cadence, keeping the cursor. Behaviorally identical to
    /// [`ScanSession::pause`]; only the resulting state differs.
    pub fn stop(&mut self) {
        if matches!(self.state(), ScanState::Running | ScanState::Paused) {
            self.halt_cadence();
            lock(&self.shared).state = ScanState::Stopped;
            tracing::info!("scan stopped");
        }
    }

    /// Halt the cadence and clear the highlighted point.
    pub fn reset(&mut self) {
        self.halt_cadence();
        {
            let mut shared = lock(&self.shared);
            shared.cursor = None;
            shared.state = ScanState::Idle;
        }
        let _ = self.events.send(ScanEvent::IndexChanged(None));
        tracing::info!("scan reset");
    }

    /// Select one grid point and move there immediately.
    ///
    /// Always accepted, scanning or not. Clears any custom point. The
    /// joint move is awaited; its failure is both returned and broadcast.
    pub async fn select_grid_point(&self, index: usize) -> StageResult<()> {
        let point = {
            let mut shared = lock(&self.shared);
            let point = *shared.grid.get(index).ok_or_else(|| {
                StageError::Input(format!(
                    "grid index {index} out of range (grid has {} points)",
                    shared.grid.len()
                ))
            })?;
            shared.cursor = Some(index);
            shared.custom = None;
            point
        };
        let _ = self.events.send(ScanEvent::IndexChanged(Some(index)));
        let _ = self.events.send(ScanEvent::CustomPointChanged(None));
        self.dispatch_move(point.x_mm, point.y_mm).await
    }

    /// Move to an arbitrary physical coordinate, clearing the highlighted
    /// grid index.
    pub async fn go_to_custom_point(&self, x_mm: f64, y_mm: f64) -> StageResult<()> {
        let point = CustomPoint { x_mm, y_mm };
        {
            let mut shared = lock(&self.shared);
            shared.cursor = None;
            shared.custom = Some(point);
        }
        let _ = self.events.send(ScanEvent::IndexChanged(None));
        let _ = self.events.send(ScanEvent::CustomPointChanged(Some(point)));
        self.dispatch_move(x_mm, y_mm).await
    }

    async fn dispatch_move(&self, x_mm: f64, y_mm: f64) -> StageResult<()> {
        match self.stage.move_both(x_mm, y_mm, self.move_timeout).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.events.send(ScanEvent::AxisError(err.clone()));
                Err(err.into())
            }
        }
    }

    /// Signal the cadence task to exit after its current step, if any.
    ///
    /// Never aborts the task: an in-flight joint move runs to completion or
    /// timeout regardless of session state changes. The join handle is kept
    /// so the next `start` can wait for the old cadence to drain before
    /// issuing motion of its own.
    fn halt_cadence(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.halt_cadence();
    }
}

/// Advance the cursor to the next grid point, or `None` when the scan is
/// past the final point (or the grid is empty).
fn advance(shared: &Arc<Mutex<Shared>>) -> Option<GridPoint> {
    let mut shared = lock(shared);
    let next = shared.cursor.map_or(0, |i| i + 1);
    let point = *shared.grid.get(next)?;
    shared.cursor = Some(next);
    Some(point)
}

// Guards plain state; never held across an await.
#[allow(clippy::unwrap_used)]
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}
