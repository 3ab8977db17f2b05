//! Grid-scan control library for a two-axis precision sample stage.
//!
//! This library drives an X/Y motion stage through a programmable lattice of
//! sample positions, either one point at a time (interactive selection) or as
//! an automated raster scan on a timed cadence. It keeps a renderable grid
//! model in sync with actual stage motion and reports per-axis failures
//! without losing track of the healthy axis.
//!
//! # Architecture
//!
//! - [`hardware`]: the `MotionAxis` capability trait plus the concrete
//!   drivers (simulated, and Thorlabs Kinesis behind `hardware_kinesis`).
//! - [`stage`]: `AxisHandle` (timeout and error translation for one axis)
//!   and `StageController` (joint home/move on both axes with a join
//!   barrier and aggregate failure reporting).
//! - [`grid`]: pure grid generation and physical-to-display transforms.
//! - [`scan`]: the scan session state machine and its event stream.
//! - [`config`]: strongly-typed configuration loaded from TOML and the
//!   environment.
//!
//! # Data flow
//!
//! ```text
//! front end --> ScanSession / grid model --> StageController --> AxisHandle (X, Y)
//!                      |                                              |
//!                      +-- ScanEvent broadcast <-- joint results <----+
//! ```

pub mod config;
pub mod error;
pub mod grid;
pub mod hardware;
pub mod scan;
pub mod stage;
