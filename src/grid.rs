//! Sample grid model: lattice generation and display-space transforms.
//!
//! Everything here is pure computation. A [`GridSpec`] describes the sample
//! area and the requested lattice density; [`GridPointSet::generate`]
//! deterministically derives the ordered row-major point sequence in
//! physical millimeters; [`GridLayout`] maps between physical points and
//! viewport pixels for whatever surface renders the grid.
//!
//! A point set is never mutated in place. Regeneration produces a fresh
//! value, and consumers hold it behind `Arc` so renderers and the scan
//! session share one immutable generation.

use crate::error::StageError;
use serde::{Deserialize, Serialize};

/// Lattice specification: sample extent and point counts.
///
/// Constructed through [`GridSpec::new`], which rejects malformed
/// dimensions so an invalid spec can never replace a good grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    rows: u32,
    cols: u32,
    sample_width_mm: f64,
    sample_height_mm: f64,
}

impl GridSpec {
    /// Validate and build a spec. `rows` and `cols` must be at least 1;
    /// sample dimensions must be finite and non-negative.
    pub fn new(
        rows: u32,
        cols: u32,
        sample_width_mm: f64,
        sample_height_mm: f64,
    ) -> Result<Self, StageError> {
        if rows < 1 || cols < 1 {
            return Err(StageError::Input(format!(
                "grid must have at least one row and one column (got {rows}x{cols})"
            )));
        }
        if !sample_width_mm.is_finite() || sample_width_mm < 0.0 {
            return Err(StageError::Input(format!(
                "sample width must be a non-negative number (got {sample_width_mm})"
            )));
        }
        if !sample_height_mm.is_finite() || sample_height_mm < 0.0 {
            return Err(StageError::Input(format!(
                "sample height must be a non-negative number (got {sample_height_mm})"
            )));
        }
        Ok(Self {
            rows,
            cols,
            sample_width_mm,
            sample_height_mm,
        })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn sample_width_mm(&self) -> f64 {
        self.sample_width_mm
    }

    pub fn sample_height_mm(&self) -> f64 {
        self.sample_height_mm
    }

    /// Physical x-coordinate of a column. Single-column grids sit at x = 0.
    fn col_x_mm(&self, col: u32) -> f64 {
        if self.cols > 1 {
            f64::from(col) / f64::from(self.cols - 1) * self.sample_width_mm
        } else {
            0.0
        }
    }

    /// Physical y-coordinate of a row. Single-row grids sit at y = 0.
    fn row_y_mm(&self, row: u32) -> f64 {
        if self.rows > 1 {
            f64::from(row) / f64::from(self.rows - 1) * self.sample_height_mm
        } else {
            0.0
        }
    }
}

/// One lattice coordinate, in physical millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Row-major position in the sequence: `row * cols + col`.
    pub index: usize,
    pub row: u32,
    pub col: u32,
    pub x_mm: f64,
    pub y_mm: f64,
}

/// A user-specified physical coordinate, not necessarily on the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustomPoint {
    pub x_mm: f64,
    pub y_mm: f64,
}

/// Ordered, immutable sequence of grid points derived from one spec.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPointSet {
    spec: Option<GridSpec>,
    points: Vec<GridPoint>,
}

impl GridPointSet {
    /// The empty point set, before any grid has been generated.
    pub fn empty() -> Self {
        Self {
            spec: None,
            points: Vec::new(),
        }
    }

    /// Derive the full lattice for `spec`: an evenly spaced rectangle from
    /// (0, 0) to (width, height) inclusive of both edges, row-major.
    ///
    /// Deterministic and pure: equal specs yield equal point sets.
    pub fn generate(spec: GridSpec) -> Self {
        let mut points = Vec::with_capacity(spec.rows as usize * spec.cols as usize);
        for row in 0..spec.rows {
            for col in 0..spec.cols {
                points.push(GridPoint {
                    index: (row * spec.cols + col) as usize,
                    row,
                    col,
                    x_mm: spec.col_x_mm(col),
                    y_mm: spec.row_y_mm(row),
                });
            }
        }
        Self {
            spec: Some(spec),
            points,
        }
    }

    /// The spec this set was derived from, if any.
    pub fn spec(&self) -> Option<&GridSpec> {
        self.spec.as_ref()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&GridPoint> {
        self.points.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GridPoint> {
        self.points.iter()
    }
}

impl Default for GridPointSet {
    fn default() -> Self {
        Self::empty()
    }
}

/// Maps the lattice into a viewport with equal cell spacing, centered.
///
/// This transform is the inverse of the hit test used for point selection:
/// [`GridLayout::hit_test`] rounds a click position to the nearest cell
/// center and accepts it only when it falls inside the lattice bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    rows: u32,
    cols: u32,
    sample_width_mm: f64,
    sample_height_mm: f64,
    cell_size: f64,
    x_offset: f64,
    y_offset: f64,
}

impl GridLayout {
    /// Lay out `spec` in a viewport of the given pixel dimensions.
    ///
    /// Cell spacing is `min(w / (cols + 1), h / (rows + 1))` so the lattice
    /// keeps a margin of at least one cell on every side; the lattice is
    /// centered, and a single row or column centers on the midline.
    pub fn new(spec: &GridSpec, viewport_width: f64, viewport_height: f64) -> Self {
        let cols = spec.cols();
        let rows = spec.rows();
        let cell_size = (viewport_width / f64::from(cols + 1))
            .min(viewport_height / f64::from(rows + 1));

        let x_offset = if cols > 1 {
            (viewport_width - f64::from(cols - 1) * cell_size) / 2.0
        } else {
            viewport_width / 2.0
        };
        let y_offset = if rows > 1 {
            (viewport_height - f64::from(rows - 1) * cell_size) / 2.0
        } else {
            viewport_height / 2.0
        };

        Self {
            rows,
            cols,
            sample_width_mm: spec.sample_width_mm(),
            sample_height_mm: spec.sample_height_mm(),
            cell_size,
            x_offset,
            y_offset,
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Pixel position of a lattice point.
    pub fn point_pixels(&self, point: &GridPoint) -> (f64, f64) {
        (
            self.x_offset + f64::from(point.col) * self.cell_size,
            self.y_offset + f64::from(point.row) * self.cell_size,
        )
    }

    /// Inverse transform: the lattice index nearest to a click position, or
    /// `None` when the click falls outside the lattice.
    pub fn hit_test(&self, pixel_x: f64, pixel_y: f64) -> Option<usize> {
        if self.cell_size <= 0.0 {
            return None;
        }
        let col = ((pixel_x - self.x_offset) / self.cell_size).round() as i64;
        let row = ((pixel_y - self.y_offset) / self.cell_size).round() as i64;
        if row < 0 || row >= i64::from(self.rows) || col < 0 || col >= i64::from(self.cols) {
            return None;
        }
        Some(row as usize * self.cols as usize + col as usize)
    }

    /// Pixel position of an arbitrary physical point, by linear
    /// interpolation against the sample dimensions. Independent of the
    /// lattice spacing, so custom points need not land on a cell.
    ///
    /// A zero sample dimension maps its ratio to 0 rather than dividing by
    /// zero.
    pub fn custom_point_pixels(&self, point: &CustomPoint) -> (f64, f64) {
        let x_ratio = if self.sample_width_mm > 0.0 {
            point.x_mm / self.sample_width_mm
        } else {
            0.0
        };
        let y_ratio = if self.sample_height_mm > 0.0 {
            point.y_mm / self.sample_height_mm
        } else {
            0.0
        };
        (
            self.x_offset + x_ratio * f64::from(self.cols - 1) * self.cell_size,
            self.y_offset + y_ratio * f64::from(self.rows - 1) * self.cell_size,
        )
    }
}
