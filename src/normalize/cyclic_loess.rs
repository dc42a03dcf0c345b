//! Cyclic loess between-sample normalization.
//!
//! Iterative pairwise normalization on the log scale: for every sample pair,
//! a local-regression curve of the per-protein difference (M) against the
//! per-protein average (A) estimates the systematic nonlinear offset between
//! the two samples, and half of the fitted curve is shifted from one sample
//! to the other. Repeating over all pairs for a fixed number of cycles pulls
//! every sample toward a common distribution.
//!
//! The iteration count is fixed by configuration rather than driven by a
//! convergence criterion, matching the reference behavior and ruling out
//! nontermination. The procedure is fully deterministic for a given input
//! and configuration.

use crate::data::NormalizedMatrix;
use crate::error::{ProteoError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for cyclic loess normalization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CyclicLoessConfig {
    /// Number of full cycles over all sample pairs.
    pub iterations: usize,
    /// Fraction of points in each local regression window (0, 1].
    pub span: f64,
}

impl Default for CyclicLoessConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            span: 0.7,
        }
    }
}

impl CyclicLoessConfig {
    /// Set the cycle count.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the loess span.
    pub fn with_span(mut self, span: f64) -> Self {
        self.span = span;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(ProteoError::InvalidParameter(
                "cyclic loess requires at least one iteration".to_string(),
            ));
        }
        if !(self.span > 0.0 && self.span <= 1.0) {
            return Err(ProteoError::InvalidParameter(
                "loess span must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Normalize a log-scale matrix across samples by cyclic loess.
pub fn normalize_cyclic_loess(
    matrix: &NormalizedMatrix,
    config: &CyclicLoessConfig,
) -> Result<NormalizedMatrix> {
    config.validate()?;
    let n_samples = matrix.n_samples();
    let n_proteins = matrix.n_proteins();
    if n_samples < 2 {
        return Err(ProteoError::DegenerateInput(
            "cyclic loess needs at least two samples".to_string(),
        ));
    }
    if n_proteins < 2 {
        return Err(ProteoError::DegenerateInput(
            "cyclic loess needs at least two proteins".to_string(),
        ));
    }

    let mut data = matrix.data().clone();
    let mut a = vec![0.0f64; n_proteins];
    let mut m = vec![0.0f64; n_proteins];

    for _ in 0..config.iterations {
        for j in 0..n_samples - 1 {
            for k in j + 1..n_samples {
                for i in 0..n_proteins {
                    let xj = data[(i, j)];
                    let xk = data[(i, k)];
                    a[i] = 0.5 * (xj + xk);
                    m[i] = xj - xk;
                }
                let fitted = loess_fit(&a, &m, config.span)?;
                for i in 0..n_proteins {
                    let half = 0.5 * fitted[i];
                    data[(i, j)] -= half;
                    data[(i, k)] += half;
                }
            }
        }
    }

    NormalizedMatrix::new(
        data,
        matrix.protein_ids().to_vec(),
        matrix.sample_ids().to_vec(),
    )
}

/// Fit a local linear regression of `y` on `x`, evaluated at every `x`.
///
/// For each point, the window holds the ⌈span·n⌉ nearest neighbors by x
/// distance; points are tricube-weighted by distance relative to the
/// furthest neighbor, and a weighted least-squares line gives the fitted
/// value. No robustness iterations.
pub fn loess_fit(x: &[f64], y: &[f64], span: f64) -> Result<Vec<f64>> {
    let n = x.len();
    if n != y.len() {
        return Err(ProteoError::DimensionMismatch {
            expected: n,
            actual: y.len(),
        });
    }
    if n < 2 {
        return Err(ProteoError::DegenerateInput(
            "loess needs at least two points".to_string(),
        ));
    }
    let q = ((span * n as f64).ceil() as usize).clamp(2, n);

    // Work in x-sorted order so neighbor windows are contiguous.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| x[i].partial_cmp(&x[j]).unwrap_or(std::cmp::Ordering::Equal));
    let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
    let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

    let mut fitted_sorted = vec![0.0f64; n];
    let mut lo = 0usize;
    for p in 0..n {
        // Slide the window right while that brings the furthest edge closer.
        while lo + q < n
            && (xs[lo + q] - xs[p]).abs() < (xs[p] - xs[lo]).abs()
        {
            lo += 1;
        }
        let hi = lo + q - 1;
        let dmax = (xs[p] - xs[lo]).abs().max((xs[hi] - xs[p]).abs());

        if dmax <= 0.0 {
            // All window points share one x; fall back to their mean.
            let mean: f64 = ys[lo..=hi].iter().sum::<f64>() / q as f64;
            fitted_sorted[p] = mean;
            continue;
        }

        let mut sw = 0.0;
        let mut swx = 0.0;
        let mut swy = 0.0;
        let mut swxx = 0.0;
        let mut swxy = 0.0;
        for idx in lo..=hi {
            let d = (xs[idx] - xs[p]).abs() / dmax;
            let t = (1.0 - d * d * d).max(0.0);
            let w = t * t * t;
            sw += w;
            swx += w * xs[idx];
            swy += w * ys[idx];
            swxx += w * xs[idx] * xs[idx];
            swxy += w * xs[idx] * ys[idx];
        }
        let denom = sw * swxx - swx * swx;
        fitted_sorted[p] = if denom.abs() < 1e-12 * sw.max(1.0) {
            swy / sw
        } else {
            let slope = (sw * swxy - swx * swy) / denom;
            let intercept = (swy - slope * swx) / sw;
            intercept + slope * xs[p]
        };
    }

    // Scatter back to input order.
    let mut fitted = vec![0.0f64; n];
    for (p, &orig) in order.iter().enumerate() {
        fitted[orig] = fitted_sorted[p];
    }
    Ok(fitted)
}
