//! Interpolating splines for surface integration.
//!
//! [`Spline1D`] interpolates values at strictly increasing knots with either
//! linear or natural cubic pieces. [`BivariateSpline`] is the tensor product of
//! two such splines over a regular grid.
//!
//! Outside the knot range the first and last polynomial pieces are extended,
//! which keeps constants and linear functions exact everywhere.

use crate::error::{ScanError, ScanResult};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Polynomial degree of the interpolating pieces.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SplineDegree {
    /// Piecewise linear
    Linear,
    /// Natural cubic (zero second derivative at both ends)
    #[default]
    Cubic,
}

impl fmt::Display for SplineDegree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplineDegree::Linear => write!(f, "linear"),
            SplineDegree::Cubic => write!(f, "cubic"),
        }
    }
}

/// One-dimensional interpolating spline.
///
/// Piece `i` covers `[knots[i], knots[i + 1]]` and is stored as the
/// coefficients of `a + b·t + c·t² + d·t³` with `t = x - knots[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Spline1D {
    knots: Vec<f64>,
    pieces: Vec<[f64; 4]>,
}

impl Spline1D {
    /// Fit a spline through `(knots[i], values[i])`.
    ///
    /// Knots must be finite and strictly increasing. A single knot yields a
    /// constant; two knots always yield a line.
    pub fn fit(knots: &[f64], values: &[f64], degree: SplineDegree) -> ScanResult<Self> {
        if knots.is_empty() {
            return Err(ScanError::EmptyInput);
        }
        if knots.len() != values.len() {
            return Err(ScanError::InvalidQuantity(format!(
                "{} knots but {} values",
                knots.len(),
                values.len()
            )));
        }
        if knots.iter().chain(values).any(|v| !v.is_finite()) {
            return Err(ScanError::InvalidQuantity(
                "spline knots and values must be finite".to_string(),
            ));
        }
        if knots.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ScanError::InvalidQuantity(
                "spline knots must be strictly increasing".to_string(),
            ));
        }

        let n = knots.len();
        if n == 1 {
            return Ok(Self {
                knots: knots.to_vec(),
                pieces: vec![[values[0], 0.0, 0.0, 0.0]],
            });
        }

        let second = match degree {
            SplineDegree::Linear => vec![0.0; n],
            SplineDegree::Cubic => natural_second_derivatives(knots, values),
        };

        let pieces = (0..n - 1)
            .map(|i| {
                let h = knots[i + 1] - knots[i];
                let (m0, m1) = (second[i], second[i + 1]);
                [
                    values[i],
                    (values[i + 1] - values[i]) / h - h * (2.0 * m0 + m1) / 6.0,
                    m0 / 2.0,
                    (m1 - m0) / (6.0 * h),
                ]
            })
            .collect();

        Ok(Self {
            knots: knots.to_vec(),
            pieces,
        })
    }

    /// Fit over the knots `0, 1, ..., values.len() - 1`.
    pub fn fit_uniform(values: &[f64], degree: SplineDegree) -> ScanResult<Self> {
        let knots: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
        Self::fit(&knots, values, degree)
    }

    /// Value at `x`.
    pub fn evaluate(&self, x: f64) -> f64 {
        let i = self.piece_index(x);
        let t = x - self.knots[i];
        let [a, b, c, d] = self.pieces[i];
        a + t * (b + t * (c + t * d))
    }

    /// Definite integral over `[lo, hi]`; reversed bounds give the negated value.
    pub fn integral(&self, lo: f64, hi: f64) -> f64 {
        if hi < lo {
            return -self.integral(hi, lo);
        }

        // Piece boundaries are the interior knots only.
        let interior = if self.knots.len() > 2 {
            &self.knots[1..self.knots.len() - 1]
        } else {
            &[][..]
        };

        let mut bounds = Vec::with_capacity(interior.len() + 2);
        bounds.push(lo);
        bounds.extend(interior.iter().copied().filter(|&k| k > lo && k < hi));
        bounds.push(hi);

        bounds
            .windows(2)
            .map(|w| {
                let i = self.piece_index(0.5 * (w[0] + w[1]));
                let origin = self.knots[i];
                antiderivative(&self.pieces[i], w[1] - origin)
                    - antiderivative(&self.pieces[i], w[0] - origin)
            })
            .sum()
    }

    /// Knot positions.
    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    fn piece_index(&self, x: f64) -> usize {
        let last = self.pieces.len() - 1;
        let upper = self.knots.partition_point(|&k| k <= x);
        upper.saturating_sub(1).min(last)
    }
}

fn antiderivative(piece: &[f64; 4], t: f64) -> f64 {
    let [a, b, c, d] = *piece;
    t * (a + t * (b / 2.0 + t * (c / 3.0 + t * d / 4.0)))
}

/// Second derivatives of the natural cubic spline, via the Thomas algorithm.
fn natural_second_derivatives(knots: &[f64], values: &[f64]) -> Vec<f64> {
    let n = knots.len();
    let mut second = vec![0.0; n];
    if n < 3 {
        return second;
    }

    let m = n - 2;
    let mut diag = vec![0.0; m];
    let mut upper = vec![0.0; m];
    let mut lower = vec![0.0; m];
    let mut rhs = vec![0.0; m];

    for row in 0..m {
        let i = row + 1;
        let h0 = knots[i] - knots[i - 1];
        let h1 = knots[i + 1] - knots[i];
        lower[row] = h0;
        diag[row] = 2.0 * (h0 + h1);
        upper[row] = h1;
        rhs[row] = 6.0 * ((values[i + 1] - values[i]) / h1 - (values[i] - values[i - 1]) / h0);
    }

    // Forward sweep
    for row in 1..m {
        let w = lower[row] / diag[row - 1];
        diag[row] -= w * upper[row - 1];
        rhs[row] -= w * rhs[row - 1];
    }

    // Back substitution
    second[m] = rhs[m - 1] / diag[m - 1];
    for row in (0..m - 1).rev() {
        second[row + 1] = (rhs[row] - upper[row] * second[row + 2]) / diag[row];
    }
    second
}

/// Tensor-product spline over an `(H, W)` grid of values.
///
/// Column `x` sits at coordinate `x` and row `y` at coordinate `y`.
#[derive(Debug, Clone)]
pub struct BivariateSpline {
    degree: SplineDegree,
    rows: Vec<Spline1D>,
    row_knots: Vec<f64>,
}

impl BivariateSpline {
    /// Fit the interpolant through every value in `values`.
    pub fn fit(values: ArrayView2<'_, f64>, degree: SplineDegree) -> ScanResult<Self> {
        let (height, width) = values.dim();
        if height == 0 || width == 0 {
            return Err(ScanError::EmptyInput);
        }

        let rows = values
            .outer_iter()
            .map(|row| Spline1D::fit_uniform(&row.to_vec(), degree))
            .collect::<ScanResult<Vec<_>>>()?;

        Ok(Self {
            degree,
            rows,
            row_knots: (0..height).map(|y| y as f64).collect(),
        })
    }

    /// Convenience for an owned array.
    pub fn from_array(values: &Array2<f64>, degree: SplineDegree) -> ScanResult<Self> {
        Self::fit(values.view(), degree)
    }

    /// Value at `(x, y)`.
    pub fn evaluate(&self, x: f64, y: f64) -> ScanResult<f64> {
        let column: Vec<f64> = self.rows.iter().map(|row| row.evaluate(x)).collect();
        Ok(self.across_rows(&column)?.evaluate(y))
    }

    /// Definite integral over `[x0, x1] × [y0, y1]`.
    pub fn integral(&self, x0: f64, x1: f64, y0: f64, y1: f64) -> ScanResult<f64> {
        let row_integrals: Vec<f64> = self.rows.iter().map(|row| row.integral(x0, x1)).collect();
        Ok(self.across_rows(&row_integrals)?.integral(y0, y1))
    }

    fn across_rows(&self, values: &[f64]) -> ScanResult<Spline1D> {
        Spline1D::fit(&self.row_knots, values, self.degree)
    }
}
