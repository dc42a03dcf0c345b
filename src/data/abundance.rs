//! Dense abundance matrices for label-free quantification data.

use crate::data::ProteinAnnotations;
use crate::error::{ProteoError, Result};
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Raw LFQ intensity matrix.
///
/// Rows are proteins (UniProt accessions), columns are samples. Values are
/// non-negative linear intensities; zero means "not detected".
#[derive(Debug, Clone, PartialEq)]
pub struct AbundanceMatrix {
    data: DMatrix<f64>,
    protein_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl AbundanceMatrix {
    /// Create a new matrix, validating dimensions and non-negativity.
    pub fn new(
        data: DMatrix<f64>,
        protein_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows != protein_ids.len() {
            return Err(ProteoError::DimensionMismatch {
                expected: nrows,
                actual: protein_ids.len(),
            });
        }
        if ncols != sample_ids.len() {
            return Err(ProteoError::DimensionMismatch {
                expected: ncols,
                actual: sample_ids.len(),
            });
        }
        if data.iter().any(|&v| v < 0.0 || !v.is_finite()) {
            return Err(ProteoError::Numerical(
                "abundance values must be finite and non-negative".to_string(),
            ));
        }
        Ok(Self {
            data,
            protein_ids,
            sample_ids,
        })
    }

    /// Load a standalone matrix from a TSV file.
    ///
    /// First row: header with sample IDs (first column is the protein ID
    /// header); subsequent rows: protein ID followed by intensities.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| ProteoError::EmptyData("Empty TSV file".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').collect();
        if header.len() < 2 {
            return Err(ProteoError::EmptyData(
                "TSV must have at least one sample column".to_string(),
            ));
        }
        let sample_ids: Vec<String> = header[1..].iter().map(|s| s.to_string()).collect();
        let n_samples = sample_ids.len();

        let mut protein_ids = Vec::new();
        let mut values: Vec<f64> = Vec::new();
        for (row_idx, line_result) in lines.enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            protein_ids.push(fields[0].to_string());
            for col_idx in 0..n_samples {
                let raw = fields.get(col_idx + 1).map(|s| s.trim()).unwrap_or("");
                let value: f64 = raw.parse().map_err(|_| ProteoError::InvalidIntensity {
                    value: raw.to_string(),
                    row: row_idx,
                    col: col_idx,
                })?;
                values.push(value);
            }
        }

        if protein_ids.is_empty() {
            return Err(ProteoError::EmptyData("No proteins in TSV".to_string()));
        }
        let data = DMatrix::from_row_slice(protein_ids.len(), n_samples, &values);
        Self::new(data, protein_ids, sample_ids)
    }

    /// Write the matrix to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_matrix_tsv(&self.data, &self.protein_ids, &self.sample_ids, path)
    }

    /// Value at (row, col).
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[(row, col)]
    }

    /// Number of proteins (rows).
    #[inline]
    pub fn n_proteins(&self) -> usize {
        self.data.nrows()
    }

    /// Number of samples (columns).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Protein identifiers.
    #[inline]
    pub fn protein_ids(&self) -> &[String] {
        &self.protein_ids
    }

    /// Sample identifiers.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// The underlying dense matrix.
    #[inline]
    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// A protein row as a dense vector.
    pub fn row_dense(&self, row: usize) -> Vec<f64> {
        self.data.row(row).iter().cloned().collect()
    }

    /// A sample column as a dense vector.
    pub fn col_dense(&self, col: usize) -> Vec<f64> {
        self.data.column(col).iter().cloned().collect()
    }

    /// Total intensity per protein.
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.n_proteins())
            .into_par_iter()
            .map(|row| self.data.row(row).sum())
            .collect()
    }

    /// Keep only the rows where the mask is true.
    pub fn apply_mask(&self, mask: &[bool]) -> Result<Self> {
        let indices = mask_to_indices(mask, self.n_proteins())?;
        self.subset_proteins(&indices)
    }

    /// Subset to the given protein rows, preserving order.
    pub fn subset_proteins(&self, indices: &[usize]) -> Result<Self> {
        let (data, protein_ids) =
            subset_rows(&self.data, &self.protein_ids, indices)?;
        Ok(Self {
            data,
            protein_ids,
            sample_ids: self.sample_ids.clone(),
        })
    }

    /// Subset to the given sample columns, preserving order.
    pub fn subset_samples(&self, indices: &[usize]) -> Result<Self> {
        let (data, sample_ids) = subset_cols(&self.data, &self.sample_ids, indices)?;
        Ok(Self {
            data,
            protein_ids: self.protein_ids.clone(),
            sample_ids,
        })
    }

    /// Replace the sample identifiers, keeping the column order.
    pub fn with_sample_ids(&self, sample_ids: Vec<String>) -> Result<Self> {
        if sample_ids.len() != self.n_samples() {
            return Err(ProteoError::DimensionMismatch {
                expected: self.n_samples(),
                actual: sample_ids.len(),
            });
        }
        Ok(Self {
            data: self.data.clone(),
            protein_ids: self.protein_ids.clone(),
            sample_ids,
        })
    }

    /// Reorder rows to exactly match an annotation table's accession set.
    ///
    /// Every retained accession must have a matrix row; rows without a
    /// retained annotation are dropped. Returns the re-synchronized matrix
    /// and the number of rows dropped.
    pub fn sync_to_annotations(
        &self,
        annotations: &ProteinAnnotations,
    ) -> Result<(Self, usize)> {
        let mut indices = Vec::with_capacity(annotations.len());
        for record in annotations.records() {
            let idx = self
                .protein_ids
                .iter()
                .position(|id| *id == record.uniprot_id)
                .ok_or_else(|| {
                    ProteoError::SampleMismatch(format!(
                        "retained protein '{}' has no abundance row",
                        record.uniprot_id
                    ))
                })?;
            indices.push(idx);
        }
        let dropped = self.n_proteins() - indices.len();
        Ok((self.subset_proteins(&indices)?, dropped))
    }
}

/// Log-scale matrix derived from an [`AbundanceMatrix`].
///
/// Same shape and identifiers as its source; values may be negative.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMatrix {
    pub(crate) data: DMatrix<f64>,
    protein_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl NormalizedMatrix {
    /// Create a new log-scale matrix, validating dimensions.
    pub fn new(
        data: DMatrix<f64>,
        protein_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows != protein_ids.len() {
            return Err(ProteoError::DimensionMismatch {
                expected: nrows,
                actual: protein_ids.len(),
            });
        }
        if ncols != sample_ids.len() {
            return Err(ProteoError::DimensionMismatch {
                expected: ncols,
                actual: sample_ids.len(),
            });
        }
        Ok(Self {
            data,
            protein_ids,
            sample_ids,
        })
    }

    /// Value at (row, col).
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[(row, col)]
    }

    /// Number of proteins (rows).
    #[inline]
    pub fn n_proteins(&self) -> usize {
        self.data.nrows()
    }

    /// Number of samples (columns).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Protein identifiers.
    #[inline]
    pub fn protein_ids(&self) -> &[String] {
        &self.protein_ids
    }

    /// Sample identifiers.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// The underlying dense matrix.
    #[inline]
    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// A protein row as a dense vector.
    pub fn row_dense(&self, row: usize) -> Vec<f64> {
        self.data.row(row).iter().cloned().collect()
    }

    /// A sample column as a dense vector.
    pub fn col_dense(&self, col: usize) -> Vec<f64> {
        self.data.column(col).iter().cloned().collect()
    }

    /// Keep only the rows where the mask is true.
    pub fn apply_mask(&self, mask: &[bool]) -> Result<Self> {
        let indices = mask_to_indices(mask, self.n_proteins())?;
        let (data, protein_ids) =
            subset_rows(&self.data, &self.protein_ids, &indices)?;
        Ok(Self {
            data,
            protein_ids,
            sample_ids: self.sample_ids.clone(),
        })
    }

    /// Replace the sample identifiers, keeping the column order.
    pub fn with_sample_ids(&self, sample_ids: Vec<String>) -> Result<Self> {
        if sample_ids.len() != self.n_samples() {
            return Err(ProteoError::DimensionMismatch {
                expected: self.n_samples(),
                actual: sample_ids.len(),
            });
        }
        Ok(Self {
            data: self.data.clone(),
            protein_ids: self.protein_ids.clone(),
            sample_ids,
        })
    }

    /// Subset samples by column indices, preserving the given order.
    pub fn subset_samples(&self, indices: &[usize]) -> Result<Self> {
        let (data, sample_ids) = subset_cols(&self.data, &self.sample_ids, indices)?;
        Ok(Self {
            data,
            protein_ids: self.protein_ids.clone(),
            sample_ids,
        })
    }

    /// Write the matrix to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_matrix_tsv(&self.data, &self.protein_ids, &self.sample_ids, path)
    }
}

/// Apply one keep-mask to a log matrix and its parallel annotation table.
///
/// This is the alignment invariant for every filtering step: both row sets
/// are reduced by the same mask, so `matrix.n_proteins()` always equals
/// `annotations.len()` afterwards.
pub fn apply_protein_mask(
    matrix: &NormalizedMatrix,
    annotations: &ProteinAnnotations,
    mask: &[bool],
) -> Result<(NormalizedMatrix, ProteinAnnotations)> {
    if annotations.len() != matrix.n_proteins() {
        return Err(ProteoError::DimensionMismatch {
            expected: matrix.n_proteins(),
            actual: annotations.len(),
        });
    }
    Ok((matrix.apply_mask(mask)?, annotations.apply_mask(mask)?))
}

fn mask_to_indices(mask: &[bool], n_rows: usize) -> Result<Vec<usize>> {
    if mask.len() != n_rows {
        return Err(ProteoError::DimensionMismatch {
            expected: n_rows,
            actual: mask.len(),
        });
    }
    Ok(mask
        .iter()
        .enumerate()
        .filter(|(_, &keep)| keep)
        .map(|(i, _)| i)
        .collect())
}

fn subset_rows(
    data: &DMatrix<f64>,
    row_ids: &[String],
    indices: &[usize],
) -> Result<(DMatrix<f64>, Vec<String>)> {
    let mut new_ids = Vec::with_capacity(indices.len());
    let mut out = DMatrix::zeros(indices.len(), data.ncols());
    for (new_row, &old_row) in indices.iter().enumerate() {
        if old_row >= data.nrows() {
            return Err(ProteoError::InvalidParameter(format!(
                "Protein index {} out of bounds",
                old_row
            )));
        }
        new_ids.push(row_ids[old_row].clone());
        out.set_row(new_row, &data.row(old_row));
    }
    Ok((out, new_ids))
}

fn subset_cols(
    data: &DMatrix<f64>,
    col_ids: &[String],
    indices: &[usize],
) -> Result<(DMatrix<f64>, Vec<String>)> {
    let mut new_ids = Vec::with_capacity(indices.len());
    let mut out = DMatrix::zeros(data.nrows(), indices.len());
    for (new_col, &old_col) in indices.iter().enumerate() {
        if old_col >= data.ncols() {
            return Err(ProteoError::InvalidParameter(format!(
                "Sample index {} out of bounds",
                old_col
            )));
        }
        new_ids.push(col_ids[old_col].clone());
        out.set_column(new_col, &data.column(old_col));
    }
    Ok((out, new_ids))
}

fn write_matrix_tsv<P: AsRef<Path>>(
    data: &DMatrix<f64>,
    row_ids: &[String],
    col_ids: &[String],
    path: P,
) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write!(writer, "protein_id")?;
    for sample_id in col_ids {
        write!(writer, "\t{}", sample_id)?;
    }
    writeln!(writer)?;

    for (row, protein_id) in row_ids.iter().enumerate() {
        write!(writer, "{}", protein_id)?;
        for col in 0..data.ncols() {
            write!(writer, "\t{}", data[(row, col)])?;
        }
        writeln!(writer)?;
    }
    Ok(())
}
