//! Log2 transform with a small positive offset.

use crate::data::{AbundanceMatrix, NormalizedMatrix, ProteinAnnotations};
use crate::error::{ProteoError, Result};

/// Default offset added before the base-2 logarithm.
pub const DEFAULT_LOG_OFFSET: f64 = 0.25;

/// Remove proteins whose abundance is zero in every sample.
///
/// The same mask is applied to the annotation table. Returns the reduced
/// matrix + annotations and the number of rows removed.
pub fn drop_empty_proteins(
    matrix: &AbundanceMatrix,
    annotations: &ProteinAnnotations,
) -> Result<(AbundanceMatrix, ProteinAnnotations, usize)> {
    if annotations.len() != matrix.n_proteins() {
        return Err(ProteoError::DimensionMismatch {
            expected: matrix.n_proteins(),
            actual: annotations.len(),
        });
    }
    let mask: Vec<bool> = (0..matrix.n_proteins())
        .map(|row| matrix.data().row(row).iter().any(|&v| v > 0.0))
        .collect();
    let n_removed = mask.iter().filter(|&&keep| !keep).count();
    Ok((
        matrix.apply_mask(&mask)?,
        annotations.apply_mask(&mask)?,
        n_removed,
    ))
}

/// Apply `log2(x + offset)` to every value.
///
/// The offset keeps zero intensities ("not detected") finite on the log
/// scale; the reference behavior uses 0.25.
pub fn log2_offset(matrix: &AbundanceMatrix, offset: f64) -> Result<NormalizedMatrix> {
    if offset <= 0.0 {
        return Err(ProteoError::InvalidParameter(
            "log offset must be positive".to_string(),
        ));
    }
    let data = matrix.data().map(|x| (x + offset).log2());
    NormalizedMatrix::new(
        data,
        matrix.protein_ids().to_vec(),
        matrix.sample_ids().to_vec(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ProteinRecord;
    use approx::assert_relative_eq;
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
    fn test_drop_empty_proteins() {
        let data = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 0.0, 0.0, 0.0, 5.0]);
        let matrix = AbundanceMatrix::new(
            data,
            vec!["P1".into(), "P2".into(), "P3".into()],
            vec!["S1".into(), "S2".into()],
        )
        .unwrap();
        let (annotations, _) = ProteinAnnotations::from_records(vec![
            record("P1"),
            record("P2"),
            record("P3"),
        ]);

        let (filtered, kept, n_removed) = drop_empty_proteins(&matrix, &annotations).unwrap();
        assert_eq!(n_removed, 1);
        assert_eq!(filtered.protein_ids(), &["P1", "P3"]);
        assert_eq!(filtered.n_proteins(), kept.len());
    }

    #[test]
    fn test_log2_offset_values() {
        let data = DMatrix::from_row_slice(1, 3, &[0.0, 0.75, 3.75]);
        let matrix = AbundanceMatrix::new(
            data,
            vec!["P1".into()],
            vec!["S1".into(), "S2".into(), "S3".into()],
        )
        .unwrap();
        let log = log2_offset(&matrix, 0.25).unwrap();
        assert_relative_eq!(log.get(0, 0), -2.0, epsilon = 1e-12);
        assert_relative_eq!(log.get(0, 1), 0.0, epsilon = 1e-12);
        assert_relative_eq!(log.get(0, 2), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_log2_offset_rejects_non_positive_offset() {
        let data = DMatrix::from_row_slice(1, 1, &[1.0]);
        let matrix =
            AbundanceMatrix::new(data, vec!["P1".into()], vec!["S1".into()]).unwrap();
        assert!(log2_offset(&matrix, 0.0).is_err());
    }
}
