//! Low-abundance filtering by per-protein sample support.

use crate::data::{apply_protein_mask, NormalizedMatrix, ProteinAnnotations};
use crate::error::{ProteoError, Result};
use serde::{Deserialize, Serialize};

/// Support-threshold filter parameters.
///
/// `min_intensity` is expressed in the pre-log linear intensity space; a
/// log-normalized value passes iff it exceeds `log2(min_intensity +
/// log_offset)` where `log_offset` is the offset used at the log step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SupportFilter {
    /// Linear-space intensity a value must exceed to count as support.
    pub min_intensity: f64,
    /// Minimum number of samples that must exceed the threshold.
    pub min_samples: usize,
    /// Offset used by the log transform; needed to place the linear
    /// threshold on the log scale.
    pub log_offset: f64,
}

impl Default for SupportFilter {
    fn default() -> Self {
        Self {
            min_intensity: 0.5,
            min_samples: 3,
            log_offset: crate::normalize::DEFAULT_LOG_OFFSET,
        }
    }
}

impl SupportFilter {
    /// The threshold on the log2 scale.
    pub fn log_threshold(&self) -> f64 {
        (self.min_intensity + self.log_offset).log2()
    }

    fn validate(&self) -> Result<()> {
        if self.min_intensity < 0.0 {
            return Err(ProteoError::InvalidParameter(
                "min_intensity must be non-negative".to_string(),
            ));
        }
        if self.min_samples == 0 {
            return Err(ProteoError::InvalidParameter(
                "min_samples must be at least 1".to_string(),
            ));
        }
        if self.log_offset <= 0.0 {
            return Err(ProteoError::InvalidParameter(
                "log_offset must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counts from a support-filtering step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterReport {
    pub n_before: usize,
    pub n_after: usize,
    pub n_removed: usize,
}

impl std::fmt::Display for FilterReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Support filter")?;
        writeln!(f, "  Proteins before: {}", self.n_before)?;
        writeln!(f, "  Proteins after:  {}", self.n_after)?;
        writeln!(f, "  Removed:         {}", self.n_removed)?;
        Ok(())
    }
}

/// Drop proteins detected in fewer than `min_samples` samples.
///
/// The keep-mask is applied identically to the annotation table, preserving
/// row alignment between the two.
pub fn filter_support(
    matrix: &NormalizedMatrix,
    annotations: &ProteinAnnotations,
    filter: &SupportFilter,
) -> Result<(NormalizedMatrix, ProteinAnnotations, FilterReport)> {
    filter.validate()?;
    let threshold = filter.log_threshold();
    let mask: Vec<bool> = (0..matrix.n_proteins())
        .map(|row| {
            let support = matrix
                .data()
                .row(row)
                .iter()
                .filter(|&&v| v > threshold)
                .count();
            support >= filter.min_samples
        })
        .collect();

    let n_before = matrix.n_proteins();
    let (filtered, kept) = apply_protein_mask(matrix, annotations, &mask)?;
    let report = FilterReport {
        n_before,
        n_after: filtered.n_proteins(),
        n_removed: n_before - filtered.n_proteins(),
    };
    Ok((filtered, kept, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AbundanceMatrix, ProteinRecord};
    use crate::normalize::log2_offset;
    use nalgebra::DMatrix;

    fn record(accession: &str) -> ProteinRecord {
        ProteinRecord {
            protein_num: 0,
            raw_ids: String::new(),
            uniprot_id: accession.to_string(),
            gene: accession.to_string(),
            description: None,
            sequence_length: None,
            score: None,
        }
    }

    #[test]
    fn test_support_examples_from_linear_space() {
        // Row 0: three values above 0.5 → kept.
        // Row 1: only two values above 0.5 → dropped.
        let data = DMatrix::from_row_slice(
            2,
            5,
            &[
                0.0, 0.0, 1.0, 1.0, 1.0, //
                0.0, 0.0, 0.0, 1.0, 1.0,
            ],
        );
        let linear = AbundanceMatrix::new(
            data,
            vec!["P1".into(), "P2".into()],
            (0..5).map(|i| format!("S{}", i)).collect(),
        )
        .unwrap();
        let log = log2_offset(&linear, 0.25).unwrap();
        let (annotations, _) =
            ProteinAnnotations::from_records(vec![record("P1"), record("P2")]);

        let (filtered, kept, report) =
            filter_support(&log, &annotations, &SupportFilter::default()).unwrap();
        assert_eq!(filtered.protein_ids(), &["P1"]);
        assert_eq!(kept.uniprot_ids(), vec!["P1"]);
        assert_eq!(report.n_before, 2);
        assert_eq!(report.n_after, 1);
        assert_eq!(report.n_removed, 1);
    }

    #[test]
    fn test_mask_keeps_rows_aligned() {
        let data = DMatrix::from_row_slice(
            3,
            4,
            &[
                5.0, 5.0, 5.0, 5.0, //
                0.0, 0.0, 0.0, 0.0, //
                2.0, 2.0, 2.0, 0.0,
            ],
        );
        let linear = AbundanceMatrix::new(
            data,
            vec!["P1".into(), "P2".into(), "P3".into()],
            (0..4).map(|i| format!("S{}", i)).collect(),
        )
        .unwrap();
        let log = log2_offset(&linear, 0.25).unwrap();
        let (annotations, _) = ProteinAnnotations::from_records(vec![
            record("P1"),
            record("P2"),
            record("P3"),
        ]);

        let (filtered, kept, _) =
            filter_support(&log, &annotations, &SupportFilter::default()).unwrap();
        assert_eq!(filtered.n_proteins(), kept.len());
        assert_eq!(filtered.protein_ids(), &["P1", "P3"]);
        assert_eq!(kept.uniprot_ids(), vec!["P1", "P3"]);
    }

    #[test]
    fn test_invalid_parameters() {
        let data = DMatrix::from_row_slice(1, 1, &[1.0]);
        let log = NormalizedMatrix::new(data, vec!["P1".into()], vec!["S1".into()]).unwrap();
        let (annotations, _) = ProteinAnnotations::from_records(vec![record("P1")]);

        let bad = SupportFilter {
            min_intensity: -1.0,
            ..SupportFilter::default()
        };
        assert!(filter_support(&log, &annotations, &bad).is_err());

        let bad = SupportFilter {
            min_samples: 0,
            ..SupportFilter::default()
        };
        assert!(filter_support(&log, &annotations, &bad).is_err());
    }
}
