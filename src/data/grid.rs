//! Grid reconstruction from scan samples.
//!
//! Samples arrive as an irregular list of `(x, y, z)` readings. The
//! reconstructor places them on a regular grid indexed by integer millimeter
//! coordinates:
//!
//! - shape is `(3, H, W)` with `H = max y + 1` and `W = max x + 1`
//! - layer 0 holds x, layer 1 holds y, layer 2 holds `reference_height - z`
//! - a cell that no sample visited stays at zero in all three layers
//! - when two samples share a cell, the later one in input order wins
//!
//! The dense [`Grid`] allocates `3 * H * W` values regardless of how many
//! samples there are, so a single outlying coordinate can make it large.
//! [`SparseGrid`] stores only visited cells behind the same [`SurfaceGrid`]
//! interface.

use crate::data::sample::SampleRecord;
use crate::error::{ScanError, ScanResult};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use std::collections::HashMap;
use tracing::debug;

/// Sensor mounting offset used when none is configured.
pub const DEFAULT_REFERENCE_HEIGHT_MM: f64 = 50.0;

/// Layer of a reconstructed grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridLayer {
    /// x coordinate of the sample stored in the cell
    X = 0,
    /// y coordinate of the sample stored in the cell
    Y = 1,
    /// Adjusted height (`reference_height - z`)
    Height = 2,
}

/// Read access shared by dense and sparse grids.
pub trait SurfaceGrid {
    /// Number of rows (`H = max y + 1`)
    fn rows(&self) -> usize;

    /// Number of columns (`W = max x + 1`)
    fn cols(&self) -> usize;

    /// `[x, y, height]` at column `x`, row `y`. Unvisited cells are all zero.
    fn cell(&self, x: usize, y: usize) -> [f64; 3];

    /// Adjusted-height layer as a dense `(H, W)` array.
    fn heights(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.rows(), self.cols()), |(y, x)| self.cell(x, y)[2])
    }

    /// Call `f` with every cell value, visited or not.
    fn for_each_cell<F: FnMut([f64; 3])>(&self, mut f: F)
    where
        Self: Sized,
    {
        for y in 0..self.rows() {
            for x in 0..self.cols() {
                f(self.cell(x, y));
            }
        }
    }
}

/// Dense `(3, H, W)` reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    data: Array3<f64>,
}

impl Grid {
    /// Shape as `(3, H, W)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// View one layer as an `(H, W)` array.
    pub fn layer(&self, layer: GridLayer) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), layer as usize)
    }

    /// The underlying array.
    pub fn as_array(&self) -> &Array3<f64> {
        &self.data
    }

    /// Consume the grid and return the underlying array.
    pub fn into_array(self) -> Array3<f64> {
        self.data
    }
}

impl SurfaceGrid for Grid {
    fn rows(&self) -> usize {
        self.data.dim().1
    }

    fn cols(&self) -> usize {
        self.data.dim().2
    }

    fn cell(&self, x: usize, y: usize) -> [f64; 3] {
        [
            self.data[[0, y, x]],
            self.data[[1, y, x]],
            self.data[[2, y, x]],
        ]
    }

    fn heights(&self) -> Array2<f64> {
        self.layer(GridLayer::Height).to_owned()
    }

    fn for_each_cell<F: FnMut([f64; 3])>(&self, mut f: F) {
        let xs = self.layer(GridLayer::X);
        let ys = self.layer(GridLayer::Y);
        let hs = self.layer(GridLayer::Height);
        for ((x, y), h) in xs.iter().zip(ys.iter()).zip(hs.iter()) {
            f([*x, *y, *h]);
        }
    }
}

/// Map-backed reconstruction holding only visited cells.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseGrid {
    rows: usize,
    cols: usize,
    cells: HashMap<(u32, u32), [f64; 3]>,
}

impl SparseGrid {
    /// Number of visited cells.
    pub fn visited(&self) -> usize {
        self.cells.len()
    }

    /// Densify into the `(3, H, W)` layout.
    pub fn to_dense(&self) -> Grid {
        let mut data = Array3::<f64>::zeros((3, self.rows, self.cols));
        for (&(x, y), values) in &self.cells {
            for (layer, value) in values.iter().enumerate() {
                data[[layer, y as usize, x as usize]] = *value;
            }
        }
        Grid { data }
    }
}

impl SurfaceGrid for SparseGrid {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn cell(&self, x: usize, y: usize) -> [f64; 3] {
        match (u32::try_from(x), u32::try_from(y)) {
            (Ok(x), Ok(y)) => self.cells.get(&(x, y)).copied().unwrap_or([0.0; 3]),
            _ => [0.0; 3],
        }
    }
}

/// Builds grids from samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridReconstructor {
    reference_height_mm: f64,
}

impl Default for GridReconstructor {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_HEIGHT_MM)
    }
}

impl GridReconstructor {
    /// Reconstructor subtracting readings from `reference_height_mm`.
    pub fn new(reference_height_mm: f64) -> Self {
        Self {
            reference_height_mm,
        }
    }

    /// Sensor mounting offset in use.
    pub fn reference_height_mm(&self) -> f64 {
        self.reference_height_mm
    }

    /// Build a dense grid. Fails with `EmptyInput` when there are no samples.
    pub fn reconstruct<I, S>(&self, samples: I) -> ScanResult<Grid>
    where
        I: IntoIterator<Item = S>,
        S: SampleRecord,
    {
        let samples = collect(samples);
        let (rows, cols) = extent(&samples)?;
        debug!(rows, cols, samples = samples.len(), "Reconstructing dense grid");

        let mut data = Array3::<f64>::zeros((3, rows, cols));
        for &(x, y, z) in &samples {
            let (row, col) = (y as usize, x as usize);
            data[[0, row, col]] = f64::from(x);
            data[[1, row, col]] = f64::from(y);
            data[[2, row, col]] = self.reference_height_mm - z;
        }
        Ok(Grid { data })
    }

    /// Build a sparse grid with the same contract as [`Self::reconstruct`].
    pub fn reconstruct_sparse<I, S>(&self, samples: I) -> ScanResult<SparseGrid>
    where
        I: IntoIterator<Item = S>,
        S: SampleRecord,
    {
        let samples = collect(samples);
        let (rows, cols) = extent(&samples)?;

        let mut cells = HashMap::with_capacity(samples.len());
        for &(x, y, z) in &samples {
            cells.insert(
                (x, y),
                [f64::from(x), f64::from(y), self.reference_height_mm - z],
            );
        }
        Ok(SparseGrid { rows, cols, cells })
    }
}

fn collect<I, S>(samples: I) -> Vec<(u32, u32, f64)>
where
    I: IntoIterator<Item = S>,
    S: SampleRecord,
{
    samples
        .into_iter()
        .map(|s| (s.x(), s.y(), s.z()))
        .collect()
}

fn extent(samples: &[(u32, u32, f64)]) -> ScanResult<(usize, usize)> {
    let max_x = samples.iter().map(|s| s.0).max().ok_or(ScanError::EmptyInput)?;
    let max_y = samples.iter().map(|s| s.1).max().ok_or(ScanError::EmptyInput)?;
    Ok((max_y as usize + 1, max_x as usize + 1))
}
