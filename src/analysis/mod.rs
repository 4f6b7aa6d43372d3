//! Surface analysis.
//!
//! Operates on any [`SurfaceGrid`]: center of mass of the material under the
//! scanned surface, its spline-integral volume, and a column-sum volume used as
//! a cross-check.

pub mod energy;
pub mod spline;

use crate::data::grid::SurfaceGrid;
use crate::error::{ScanError, ScanResult};
use serde::Serialize;
use spline::{BivariateSpline, SplineDegree};
use tracing::debug;

/// Relative tolerance for treating the total height as zero.
const MASS_EPSILON: f64 = 1e-12;

/// Height-weighted centroid in mm.
///
/// `z` is half the weighted height, i.e. the centroid of uniform-density
/// columns standing on the reference plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CenterOfMass {
    /// x in mm
    pub x: f64,
    /// y in mm
    pub y: f64,
    /// Height above the reference plane in mm
    pub z: f64,
}

/// Height-weighted centroid of the surface.
///
/// Sums run over every cell using the stored x and y layers. Fails with
/// [`ScanError::DegenerateMass`] when the heights sum to zero. `cancelled` is
/// set when nonzero heights of opposite sign sum to (nearly) zero.
pub fn center_of_mass<G: SurfaceGrid>(grid: &G) -> ScanResult<CenterOfMass> {
    let mut total = 0.0;
    let mut magnitude = 0.0;
    let (mut sx, mut sy, mut sz) = (0.0, 0.0, 0.0);

    grid.for_each_cell(|[x, y, h]| {
        total += h;
        magnitude += h.abs();
        sx += h * x;
        sy += h * y;
        sz += h * (h / 2.0);
    });

    if magnitude == 0.0 {
        return Err(ScanError::DegenerateMass { cancelled: false });
    }
    if total.abs() <= MASS_EPSILON * magnitude {
        return Err(ScanError::DegenerateMass { cancelled: true });
    }

    let com = CenterOfMass {
        x: sx / total,
        y: sy / total,
        z: sz / total,
    };
    debug!(x = com.x, y = com.y, z = com.z, "Computed center of mass");
    Ok(com)
}

/// Volume under the interpolated surface over `[0, W] × [0, H]`, in mm³.
pub fn volume<G: SurfaceGrid>(grid: &G, degree: SplineDegree) -> ScanResult<f64> {
    let heights = grid.heights();
    let (rows, cols) = heights.dim();
    let spline = BivariateSpline::fit(heights.view(), degree)?;
    let volume = spline.integral(0.0, cols as f64, 0.0, rows as f64)?;
    debug!(%degree, rows, cols, volume, "Integrated surface");
    Ok(volume)
}

/// Sum of the height layer times one square millimeter per cell.
pub fn bar_volume<G: SurfaceGrid>(grid: &G) -> f64 {
    let mut sum = 0.0;
    grid.for_each_cell(|[_, _, h]| sum += h);
    sum
}
