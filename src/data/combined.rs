//! Splitting a combined annotation + abundance table.
//!
//! Protein-group exports carry annotation columns and per-sample intensity
//! columns side by side. The intensity columns are identified by a header
//! prefix; everything else is annotation. The split applies the organism
//! filter and accession de-duplication, then re-synchronizes the matrix rows
//! to the retained accession set.

use crate::data::{
    parse_composite_id, AbundanceMatrix, ParsedId, ProteinAnnotations, ProteinRecord,
    SplitReport,
};
use crate::error::{ProteoError, Result};
use nalgebra::DMatrix;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Column conventions of the combined table.
#[derive(Debug, Clone)]
pub struct CombinedTableConfig {
    /// Header of the composite protein-ID column.
    pub id_column: String,
    /// Prefix identifying the per-sample intensity columns; the sample ID is
    /// the header with the prefix stripped.
    pub intensity_prefix: String,
    /// Optional annotation columns carried into [`ProteinRecord`].
    pub description_column: Option<String>,
    pub length_column: Option<String>,
    pub score_column: Option<String>,
}

impl Default for CombinedTableConfig {
    fn default() -> Self {
        Self {
            id_column: "Protein.IDs".to_string(),
            intensity_prefix: "LFQ.intensity.".to_string(),
            description_column: Some("Protein.names".to_string()),
            length_column: Some("Sequence.length".to_string()),
            score_column: Some("Score".to_string()),
        }
    }
}

/// Split a combined TSV into annotations and an abundance matrix.
///
/// Rows without a human sub-identifier are dropped; duplicate accessions
/// keep their first occurrence. An empty retained set is not an error — the
/// report carries the discarded fraction either way.
pub fn load_combined_tsv<P: AsRef<Path>>(
    path: P,
    config: &CombinedTableConfig,
) -> Result<(ProteinAnnotations, AbundanceMatrix, SplitReport)> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header_line = lines
        .next()
        .ok_or_else(|| ProteoError::EmptyData("Empty combined table".to_string()))??;
    let header: Vec<String> = header_line.split('\t').map(|s| s.to_string()).collect();

    let id_idx = column_index(&header, &config.id_column)?;
    let description_idx = optional_index(&header, config.description_column.as_deref());
    let length_idx = optional_index(&header, config.length_column.as_deref());
    let score_idx = optional_index(&header, config.score_column.as_deref());

    // Intensity columns in header order; sample IDs with the prefix stripped.
    let mut intensity_cols = Vec::new();
    let mut sample_ids = Vec::new();
    for (idx, name) in header.iter().enumerate() {
        if let Some(sample) = name.strip_prefix(&config.intensity_prefix) {
            intensity_cols.push(idx);
            sample_ids.push(sample.to_string());
        }
    }
    if intensity_cols.is_empty() {
        return Err(ProteoError::MissingColumn(format!(
            "no columns with intensity prefix '{}'",
            config.intensity_prefix
        )));
    }

    let mut n_input = 0usize;
    let mut n_non_human = 0usize;
    let mut human_records = Vec::new();
    let mut human_rows: Vec<Vec<f64>> = Vec::new();

    for (row_idx, line_result) in lines.enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        n_input += 1;
        let fields: Vec<&str> = line.split('\t').collect();
        let raw_ids = fields.get(id_idx).map(|s| s.trim()).unwrap_or("");

        match parse_composite_id(raw_ids)? {
            ParsedId::NonHuman => {
                n_non_human += 1;
                continue;
            }
            ParsedId::Human { uniprot_id, gene } => {
                let mut row_values = Vec::with_capacity(intensity_cols.len());
                for (col_pos, &col_idx) in intensity_cols.iter().enumerate() {
                    let raw = fields.get(col_idx).map(|s| s.trim()).unwrap_or("");
                    // Empty cells are "not detected"; anything else must parse.
                    let value = if raw.is_empty() {
                        0.0
                    } else {
                        raw.parse().map_err(|_| ProteoError::InvalidIntensity {
                            value: raw.to_string(),
                            row: row_idx,
                            col: col_pos,
                        })?
                    };
                    row_values.push(value);
                }
                human_records.push(ProteinRecord {
                    protein_num: row_idx,
                    raw_ids: raw_ids.to_string(),
                    uniprot_id,
                    gene,
                    description: field_string(&fields, description_idx),
                    sequence_length: field_number(&fields, length_idx),
                    score: field_number(&fields, score_idx),
                });
                human_rows.push(row_values);
            }
        }
    }

    let n_human = human_records.len();
    let (annotations, dedup_mask) = ProteinAnnotations::from_records(human_records);
    let n_duplicates = n_human - annotations.len();

    let mut data = DMatrix::zeros(annotations.len(), sample_ids.len());
    let mut out_row = 0usize;
    for (values, keep) in human_rows.iter().zip(&dedup_mask) {
        if *keep {
            for (col, &v) in values.iter().enumerate() {
                data[(out_row, col)] = v;
            }
            out_row += 1;
        }
    }

    let protein_ids: Vec<String> = annotations
        .records()
        .iter()
        .map(|r| r.uniprot_id.clone())
        .collect();
    let matrix = AbundanceMatrix::new(data, protein_ids, sample_ids)?;

    let report = SplitReport {
        n_input,
        n_non_human,
        n_duplicates,
        n_retained: annotations.len(),
    };
    Ok((annotations, matrix, report))
}

fn column_index(header: &[String], name: &str) -> Result<usize> {
    header
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| ProteoError::MissingColumn(name.to_string()))
}

fn optional_index(header: &[String], name: Option<&str>) -> Option<usize> {
    name.and_then(|n| header.iter().position(|h| h == n))
}

fn field_string(fields: &[&str], idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| fields.get(i))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn field_number(fields: &[&str], idx: Option<usize>) -> Option<f64> {
    idx.and_then(|i| fields.get(i))
        .and_then(|s| s.trim().parse().ok())
}
