//! Principal component analysis over samples.

use crate::data::NormalizedMatrix;
use crate::error::{ProteoError, Result};
use nalgebra::DMatrix;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// PCA scores and variance-explained fractions.
#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Sample identifiers, one per score row.
    pub sample_ids: Vec<String>,
    /// Component scores, samples × components.
    pub scores: DMatrix<f64>,
    /// Fraction of total variance explained per component.
    pub explained: Vec<f64>,
}

impl PcaResult {
    /// Number of components retained.
    pub fn n_components(&self) -> usize {
        self.scores.ncols()
    }

    /// Scores for one component, in sample order.
    pub fn component_scores(&self, component: usize) -> Result<Vec<f64>> {
        if component >= self.n_components() {
            return Err(ProteoError::InvalidParameter(format!(
                "component {} out of range (have {})",
                component,
                self.n_components()
            )));
        }
        Ok(self.scores.column(component).iter().cloned().collect())
    }

    /// Write scores and variance fractions to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write!(writer, "sample_id")?;
        for c in 0..self.n_components() {
            write!(writer, "\tPC{}", c + 1)?;
        }
        writeln!(writer)?;
        for (row, sid) in self.sample_ids.iter().enumerate() {
            write!(writer, "{}", sid)?;
            for c in 0..self.n_components() {
                write!(writer, "\t{}", self.scores[(row, c)])?;
            }
            writeln!(writer)?;
        }
        write!(writer, "variance_explained")?;
        for &v in &self.explained {
            write!(writer, "\t{}", v)?;
        }
        writeln!(writer)?;
        Ok(())
    }
}

/// Compute principal components of the sample-by-protein matrix.
///
/// Samples are the observations: the matrix is transposed, each protein is
/// mean-centered, and the components come from a deterministic SVD. Each
/// component is oriented so its largest-magnitude loading is positive, which
/// makes repeated runs on identical input bit-identical rather than equal
/// only up to sign.
pub fn pca(matrix: &NormalizedMatrix, n_components: usize) -> Result<PcaResult> {
    let n_samples = matrix.n_samples();
    let n_proteins = matrix.n_proteins();
    if n_samples < 2 {
        return Err(ProteoError::DegenerateInput(
            "PCA needs at least two samples".to_string(),
        ));
    }
    if n_proteins == 0 {
        return Err(ProteoError::EmptyData("PCA on empty matrix".to_string()));
    }
    if n_components == 0 {
        return Err(ProteoError::InvalidParameter(
            "n_components must be at least 1".to_string(),
        ));
    }

    // Samples as rows, proteins as centered columns.
    let mut x = matrix.data().transpose();
    for col in 0..n_proteins {
        let mean = x.column(col).sum() / n_samples as f64;
        for row in 0..n_samples {
            x[(row, col)] -= mean;
        }
    }

    let svd = x.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| ProteoError::Numerical("SVD did not produce U".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| ProteoError::Numerical("SVD did not produce V^T".to_string()))?;
    let sigma = &svd.singular_values;

    let total: f64 = sigma.iter().map(|s| s * s).sum();
    if total <= 0.0 {
        return Err(ProteoError::DegenerateInput(
            "matrix has zero variance across samples".to_string(),
        ));
    }

    let k = n_components.min(sigma.len());
    let mut scores = DMatrix::zeros(n_samples, k);
    let mut explained = Vec::with_capacity(k);
    for c in 0..k {
        // Orient by the largest-magnitude loading of the component.
        let loading = v_t.row(c);
        let mut max_abs = 0.0;
        let mut sign = 1.0;
        for &v in loading.iter() {
            if v.abs() > max_abs {
                max_abs = v.abs();
                sign = if v < 0.0 { -1.0 } else { 1.0 };
            }
        }
        for row in 0..n_samples {
            scores[(row, c)] = sign * u[(row, c)] * sigma[c];
        }
        explained.push(sigma[c] * sigma[c] / total);
    }

    Ok(PcaResult {
        sample_ids: matrix.sample_ids().to_vec(),
        scores,
        explained,
    })
}
