//! Spearman correlation between metadata variables and PC scores.

use crate::analyze::pca::PcaResult;
use crate::data::SampleMetadata;
use crate::error::{ProteoError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Default significance cut-off: pairs with p ≥ alpha are flagged
/// non-significant for display.
pub const DEFAULT_ALPHA: f64 = 0.1;

/// A variable excluded before the computation, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludedVariable {
    pub name: String,
    pub reason: String,
}

/// Correlation and p-value matrices for variables × components.
#[derive(Debug, Clone)]
pub struct CorrelationResult {
    /// Retained variable names (rows).
    pub variables: Vec<String>,
    /// Component labels (columns), e.g. `PC1`.
    pub components: Vec<String>,
    /// Spearman rho per (variable, component).
    pub rho: DMatrix<f64>,
    /// Two-sided p-value per (variable, component).
    pub p_values: DMatrix<f64>,
    /// Variables dropped as degenerate, with reasons.
    pub excluded: Vec<ExcludedVariable>,
    /// Significance cut-off used for flagging.
    pub alpha: f64,
}

impl CorrelationResult {
    /// Whether a pair is significant at the configured alpha.
    pub fn is_significant(&self, variable: usize, component: usize) -> bool {
        self.p_values[(variable, component)] < self.alpha
    }

    /// Write rho, p, and the significance flag as a long-format TSV.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "variable\tcomponent\trho\tp_value\tsignificant")?;
        for (vi, var) in self.variables.iter().enumerate() {
            for (ci, comp) in self.components.iter().enumerate() {
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}\t{}",
                    var,
                    comp,
                    self.rho[(vi, ci)],
                    self.p_values[(vi, ci)],
                    self.is_significant(vi, ci)
                )?;
            }
        }
        Ok(())
    }
}

/// Correlate metadata variables against the top PC scores.
///
/// Each requested field is numerically encoded (categorical values by level
/// index), aligned to the PCA's sample order, and tested pairwise against
/// every component with Spearman rank correlation. Missing values are
/// excluded pairwise. Degenerate variables (zero variance after dropping
/// missing, or fewer than three complete pairs) are excluded up front and
/// listed in the result rather than propagating NaN.
pub fn correlate_metadata_pcs(
    metadata: &SampleMetadata,
    fields: &[String],
    pca: &PcaResult,
    alpha: f64,
) -> Result<CorrelationResult> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(ProteoError::InvalidParameter(
            "alpha must be between 0 and 1".to_string(),
        ));
    }
    if fields.is_empty() {
        return Err(ProteoError::InvalidParameter(
            "no metadata fields requested".to_string(),
        ));
    }
    let aligned = metadata.align_to(&pca.sample_ids)?;

    let mut variables = Vec::new();
    let mut encoded: Vec<Vec<Option<f64>>> = Vec::new();
    let mut excluded = Vec::new();
    for field in fields {
        let values = aligned.encode_numeric(field)?;
        let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
        if present.len() < 3 {
            excluded.push(ExcludedVariable {
                name: field.clone(),
                reason: format!("only {} non-missing values", present.len()),
            });
            continue;
        }
        let first = present[0];
        if present.iter().all(|&v| v == first) {
            excluded.push(ExcludedVariable {
                name: field.clone(),
                reason: "zero variance".to_string(),
            });
            continue;
        }
        variables.push(field.clone());
        encoded.push(values);
    }
    if variables.is_empty() {
        return Err(ProteoError::DegenerateInput(
            "all requested metadata fields are degenerate".to_string(),
        ));
    }

    let n_components = pca.n_components();
    let components: Vec<String> = (1..=n_components).map(|c| format!("PC{}", c)).collect();
    let mut rho = DMatrix::zeros(variables.len(), n_components);
    let mut p_values = DMatrix::zeros(variables.len(), n_components);

    for (vi, values) in encoded.iter().enumerate() {
        for ci in 0..n_components {
            let scores = pca.component_scores(ci)?;
            let mut xs = Vec::new();
            let mut ys = Vec::new();
            for (v, s) in values.iter().zip(&scores) {
                if let Some(v) = v {
                    xs.push(*v);
                    ys.push(*s);
                }
            }
            let (r, p) = spearman_test(&xs, &ys)?;
            rho[(vi, ci)] = r;
            p_values[(vi, ci)] = p;
        }
    }

    Ok(CorrelationResult {
        variables,
        components,
        rho,
        p_values,
        excluded,
        alpha,
    })
}

/// Spearman rank correlation with a t-distribution significance test.
///
/// Ranks use midranks for ties; rho is the Pearson correlation of the
/// ranks. The p-value comes from t = r·sqrt((n−2)/(1−r²)) against
/// Student-t with n−2 degrees of freedom, two-sided; |r| = 1 gives p = 0.
pub fn spearman_test(x: &[f64], y: &[f64]) -> Result<(f64, f64)> {
    let n = x.len();
    if n != y.len() {
        return Err(ProteoError::DimensionMismatch {
            expected: n,
            actual: y.len(),
        });
    }
    if n < 3 {
        return Err(ProteoError::DegenerateInput(
            "correlation needs at least three pairs".to_string(),
        ));
    }
    let rx = midranks(x);
    let ry = midranks(y);
    let r = pearson(&rx, &ry)?;

    let p = if r.abs() >= 1.0 - 1e-12 {
        0.0
    } else {
        let df = (n - 2) as f64;
        let t = r * (df / (1.0 - r * r)).sqrt();
        let dist = StudentsT::new(0.0, 1.0, df)
            .map_err(|e| ProteoError::Numerical(format!("t-distribution: {}", e)))?;
        2.0 * (1.0 - dist.cdf(t.abs()))
    };
    Ok((r, p))
}

fn midranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        values[i]
            .partial_cmp(&values[j])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut ranks = vec![0.0f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // Average rank across the tie run (1-based ranks).
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

fn pearson(x: &[f64], y: &[f64]) -> Result<f64> {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return Err(ProteoError::DegenerateInput(
            "zero variance in correlation input".to_string(),
        ));
    }
    Ok(sxy / (sxx * syy).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_spearman_perfect_monotonic() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 9.0, 16.0, 30.0];
        let (r, p) = spearman_test(&x, &y).unwrap();
        assert_relative_eq!(r, 1.0, epsilon = 1e-12);
        assert_eq!(p, 0.0);
    }

    #[test]
    fn test_spearman_known_value() {
        // Classic IQ / TV-hours example: rho = -29/165.
        let x = [106.0, 86.0, 100.0, 101.0, 99.0, 103.0, 97.0, 113.0, 112.0, 110.0];
        let y = [7.0, 0.0, 27.0, 50.0, 28.0, 29.0, 20.0, 12.0, 6.0, 17.0];
        let (r, p) = spearman_test(&x, &y).unwrap();
        assert_relative_eq!(r, -29.0 / 165.0, epsilon = 1e-12);
        // Weak correlation: clearly non-significant.
        assert!(p > 0.1);
    }

    #[test]
    fn test_spearman_ties_use_midranks() {
        let x = [1.0, 2.0, 2.0, 3.0];
        let ranks = midranks(&x);
        assert_eq!(ranks, vec![1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn test_spearman_rejects_degenerate() {
        let x = [1.0, 1.0, 1.0, 1.0];
        let y = [1.0, 2.0, 3.0, 4.0];
        assert!(spearman_test(&x, &y).is_err());
        assert!(spearman_test(&[1.0, 2.0], &[1.0, 2.0]).is_err());
    }

    mod with_pca {
        use super::*;
        use crate::analyze::pca::pca;
        use crate::data::NormalizedMatrix;
        use nalgebra::DMatrix;
        use std::io::Write;
        use tempfile::NamedTempFile;

        fn fixtures() -> (SampleMetadata, PcaResult) {
            let n_proteins = 10;
            let n_samples = 8;
            // Sample j shifted by j: PC1 tracks the sample index.
            let data = DMatrix::from_fn(n_proteins, n_samples, |i, j| {
                j as f64 * 1.5 + (i as f64 * 0.77).sin() * 0.2
            });
            let matrix = NormalizedMatrix::new(
                data,
                (0..n_proteins).map(|i| format!("P{}", i)).collect(),
                (0..n_samples).map(|j| format!("{}", j + 1)).collect(),
            )
            .unwrap();
            let pca_result = pca(&matrix, 2).unwrap();

            let mut file = NamedTempFile::new().unwrap();
            writeln!(file, "sample_id\tAge\tSex\tConstant").unwrap();
            for j in 0..n_samples {
                writeln!(
                    file,
                    "{}\t{}\t{}\t1",
                    j + 1,
                    30 + j * 5,
                    if j % 2 == 0 { "M" } else { "F" }
                )
                .unwrap();
            }
            file.flush().unwrap();
            let metadata = SampleMetadata::from_tsv(file.path()).unwrap();
            (metadata, pca_result)
        }

        #[test]
        fn test_correlate_fields_against_pcs() {
            let (metadata, pca_result) = fixtures();
            let fields = vec![
                "Age".to_string(),
                "Sex".to_string(),
                "Constant".to_string(),
            ];
            let result =
                correlate_metadata_pcs(&metadata, &fields, &pca_result, DEFAULT_ALPHA)
                    .unwrap();

            // The constant column is degenerate and excluded, not NaN.
            assert_eq!(result.variables, vec!["Age", "Sex"]);
            assert_eq!(result.excluded.len(), 1);
            assert_eq!(result.excluded[0].name, "Constant");

            // Age increases with the sample index, which drives PC1.
            let age_pc1 = result.rho[(0, 0)];
            assert_relative_eq!(age_pc1.abs(), 1.0, epsilon = 1e-9);
            assert!(result.is_significant(0, 0));
        }

        #[test]
        fn test_all_degenerate_is_error() {
            let (metadata, pca_result) = fixtures();
            let fields = vec!["Constant".to_string()];
            assert!(matches!(
                correlate_metadata_pcs(&metadata, &fields, &pca_result, DEFAULT_ALPHA),
                Err(ProteoError::DegenerateInput(_))
            ));
        }
    }
}
