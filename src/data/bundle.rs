//! The persisted analysis bundle: normalized matrix + annotations + metadata.
//!
//! The preparation pipeline writes one snapshot; every exploratory analysis
//! reads it back. JSON is used for the snapshot because serde_json prints
//! f64 values with a round-trippable shortest representation, so reloading
//! reproduces the matrix exactly.

use crate::data::{NormalizedMatrix, ProteinAnnotations, SampleMetadata};
use crate::error::{ProteoError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Normalized + filtered matrix with its parallel annotation table and the
/// joined sample metadata.
#[derive(Debug, Clone)]
pub struct AnalysisBundle {
    pub matrix: NormalizedMatrix,
    pub annotations: ProteinAnnotations,
    pub metadata: SampleMetadata,
}

/// Serialized form of an [`AnalysisBundle`]; matrix stored row-major.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    protein_ids: Vec<String>,
    sample_ids: Vec<String>,
    /// Row-major values, one inner vector per protein.
    values: Vec<Vec<f64>>,
    annotations: ProteinAnnotations,
    metadata: SampleMetadata,
}

impl AnalysisBundle {
    /// Assemble a bundle, validating row/column consistency.
    pub fn new(
        matrix: NormalizedMatrix,
        annotations: ProteinAnnotations,
        metadata: SampleMetadata,
    ) -> Result<Self> {
        let bundle = Self {
            matrix,
            annotations,
            metadata,
        };
        bundle.validate()?;
        Ok(bundle)
    }

    /// Check the bundle invariants: matrix rows equal annotation records
    /// (same accessions in the same order) and every matrix sample has a
    /// metadata record.
    pub fn validate(&self) -> Result<()> {
        if self.matrix.n_proteins() != self.annotations.len() {
            return Err(ProteoError::DimensionMismatch {
                expected: self.matrix.n_proteins(),
                actual: self.annotations.len(),
            });
        }
        for (row, record) in self.annotations.records().iter().enumerate() {
            if self.matrix.protein_ids()[row] != record.uniprot_id {
                return Err(ProteoError::SampleMismatch(format!(
                    "row {}: matrix protein '{}' != annotation '{}'",
                    row,
                    self.matrix.protein_ids()[row],
                    record.uniprot_id
                )));
            }
        }
        for sid in self.matrix.sample_ids() {
            if !self.metadata.has_sample(sid) {
                return Err(ProteoError::SampleMismatch(format!(
                    "matrix sample '{}' has no metadata record",
                    sid
                )));
            }
        }
        Ok(())
    }

    /// Write the bundle to a JSON snapshot file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let values: Vec<Vec<f64>> = (0..self.matrix.n_proteins())
            .map(|row| self.matrix.row_dense(row))
            .collect();
        let snapshot = Snapshot {
            protein_ids: self.matrix.protein_ids().to_vec(),
            sample_ids: self.matrix.sample_ids().to_vec(),
            values,
            annotations: self.annotations.clone(),
            metadata: self.metadata.clone(),
        };
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, &snapshot)?;
        Ok(())
    }

    /// Load a bundle from a JSON snapshot file, re-validating invariants.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;

        let n_proteins = snapshot.protein_ids.len();
        let n_samples = snapshot.sample_ids.len();
        let mut data = DMatrix::zeros(n_proteins, n_samples);
        if snapshot.values.len() != n_proteins {
            return Err(ProteoError::DimensionMismatch {
                expected: n_proteins,
                actual: snapshot.values.len(),
            });
        }
        for (row, row_values) in snapshot.values.iter().enumerate() {
            if row_values.len() != n_samples {
                return Err(ProteoError::DimensionMismatch {
                    expected: n_samples,
                    actual: row_values.len(),
                });
            }
            for (col, &v) in row_values.iter().enumerate() {
                data[(row, col)] = v;
            }
        }

        let matrix = NormalizedMatrix::new(data, snapshot.protein_ids, snapshot.sample_ids)?;
        Self::new(matrix, snapshot.annotations, snapshot.metadata)
    }
}
