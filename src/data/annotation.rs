//! Protein annotation records and composite-ID parsing.
//!
//! MaxQuant-style protein group tables carry a composite ID field such as
//! `sp|P02675|FIBB_HUMAN;tr|Q3SX14|Q3SX14_BOVIN`. Parsing splits that field
//! into sub-identifiers, keeps rows with a human entry, extracts the
//! accession/gene pair from the first human entry, and de-duplicates by
//! accession (first occurrence wins).

use crate::error::{ProteoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Suffix marking the organism of interest on the symbol segment.
const ORGANISM_SUFFIX: &str = "_HUMAN";

/// Annotation for a single retained protein.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProteinRecord {
    /// Row identifier from the source table.
    pub protein_num: usize,
    /// Original composite ID string, unmodified.
    pub raw_ids: String,
    /// UniProt accession parsed from the first human sub-identifier.
    pub uniprot_id: String,
    /// Gene symbol with the species suffix stripped.
    pub gene: String,
    /// Free-text description, if the source table carried one.
    pub description: Option<String>,
    /// Sequence length, if present.
    pub sequence_length: Option<f64>,
    /// Identification score, if present.
    pub score: Option<f64>,
}

/// Result of parsing a single composite ID field.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedId {
    /// A human entry was found: (accession, gene).
    Human { uniprot_id: String, gene: String },
    /// No sub-identifier carried the organism suffix.
    NonHuman,
}

/// Parse one composite ID field.
///
/// Sub-identifiers are `;`-separated; each is expected to be a
/// `namespace|accession|symbol` triplet. A sub-identifier belongs to the
/// organism of interest iff its symbol segment ends with `_HUMAN`. The first
/// matching sub-identifier wins; a matching entry that is not a triplet is a
/// parse error.
pub fn parse_composite_id(raw: &str) -> Result<ParsedId> {
    for part in raw.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let symbol = part.rsplit('|').next().unwrap_or(part);
        if !symbol.ends_with(ORGANISM_SUFFIX) {
            continue;
        }
        let segments: Vec<&str> = part.split('|').collect();
        if segments.len() != 3 {
            return Err(ProteoError::MalformedProteinId {
                id: part.to_string(),
                reason: format!(
                    "expected namespace|accession|symbol, got {} segments",
                    segments.len()
                ),
            });
        }
        let gene = segments[2]
            .strip_suffix(ORGANISM_SUFFIX)
            .unwrap_or(segments[2])
            .to_string();
        return Ok(ParsedId::Human {
            uniprot_id: segments[1].to_string(),
            gene,
        });
    }
    Ok(ParsedId::NonHuman)
}

/// Annotation table parallel to the abundance matrix rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProteinAnnotations {
    records: Vec<ProteinRecord>,
}

impl ProteinAnnotations {
    /// Build from already-parsed records, de-duplicating by accession
    /// (first occurrence wins).
    ///
    /// Returns the retained annotations together with the per-row keep mask
    /// over the input order, so callers can apply the identical mask to a
    /// parallel abundance matrix.
    pub fn from_records(records: Vec<ProteinRecord>) -> (Self, Vec<bool>) {
        let mut seen: HashSet<String> = HashSet::new();
        let mut mask = Vec::with_capacity(records.len());
        let mut retained = Vec::new();
        for record in records {
            if seen.insert(record.uniprot_id.clone()) {
                mask.push(true);
                retained.push(record);
            } else {
                mask.push(false);
            }
        }
        (Self { records: retained }, mask)
    }

    /// Number of retained proteins.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no proteins were retained.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Access all records in row order.
    pub fn records(&self) -> &[ProteinRecord] {
        &self.records
    }

    /// Record at a row index.
    pub fn get(&self, row: usize) -> Option<&ProteinRecord> {
        self.records.get(row)
    }

    /// Accessions in row order.
    pub fn uniprot_ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.uniprot_id.as_str()).collect()
    }

    /// Gene symbol for an accession, if retained.
    pub fn gene_for(&self, uniprot_id: &str) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.uniprot_id == uniprot_id)
            .map(|r| r.gene.as_str())
    }

    /// Keep only the rows where the mask is true.
    ///
    /// The mask length must match the number of records; callers apply the
    /// same mask to the abundance matrix to keep the two row sets in sync.
    pub fn apply_mask(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.records.len() {
            return Err(ProteoError::DimensionMismatch {
                expected: self.records.len(),
                actual: mask.len(),
            });
        }
        let records = self
            .records
            .iter()
            .zip(mask)
            .filter(|(_, &keep)| keep)
            .map(|(r, _)| r.clone())
            .collect();
        Ok(Self { records })
    }

    /// Subset by row indices, preserving the given order.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        let mut records = Vec::with_capacity(indices.len());
        for &idx in indices {
            let record = self.records.get(idx).ok_or_else(|| {
                ProteoError::InvalidParameter(format!("annotation index {} out of bounds", idx))
            })?;
            records.push(record.clone());
        }
        Ok(Self { records })
    }
}

/// Counts from splitting a combined table into annotation + matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitReport {
    /// Rows in the source table.
    pub n_input: usize,
    /// Rows dropped because no sub-identifier was human.
    pub n_non_human: usize,
    /// Rows dropped as duplicate accessions.
    pub n_duplicates: usize,
    /// Rows retained.
    pub n_retained: usize,
}

impl SplitReport {
    /// Fraction of input rows discarded by the organism filter and dedup.
    pub fn fraction_discarded(&self) -> f64 {
        if self.n_input == 0 {
            0.0
        } else {
            (self.n_input - self.n_retained) as f64 / self.n_input as f64
        }
    }
}

impl std::fmt::Display for SplitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Protein table split")?;
        writeln!(f, "  Rows in:          {}", self.n_input)?;
        writeln!(f, "  Non-human:        {}", self.n_non_human)?;
        writeln!(f, "  Duplicates:       {}", self.n_duplicates)?;
        writeln!(f, "  Retained:         {}", self.n_retained)?;
        writeln!(
            f,
            "  Discarded:        {:.1}%",
            self.fraction_discarded() * 100.0
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(num: usize, accession: &str, gene: &str) -> ProteinRecord {
        ProteinRecord {
            protein_num: num,
            raw_ids: format!("sp|{}|{}_HUMAN", accession, gene),
            uniprot_id: accession.to_string(),
            gene: gene.to_string(),
            description: None,
            sequence_length: None,
            score: None,
        }
    }

    #[test]
    fn test_parse_human_entry() {
        let parsed = parse_composite_id("sp|P02675|FIBB_HUMAN").unwrap();
        assert_eq!(
            parsed,
            ParsedId::Human {
                uniprot_id: "P02675".to_string(),
                gene: "FIBB".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_skips_other_species() {
        let parsed =
            parse_composite_id("tr|Q3SX14|Q3SX14_BOVIN;sp|P02675|FIBB_HUMAN").unwrap();
        assert_eq!(
            parsed,
            ParsedId::Human {
                uniprot_id: "P02675".to_string(),
                gene: "FIBB".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_first_human_wins() {
        let parsed =
            parse_composite_id("sp|P02671|FIBA_HUMAN;sp|P02675|FIBB_HUMAN").unwrap();
        assert_eq!(
            parsed,
            ParsedId::Human {
                uniprot_id: "P02671".to_string(),
                gene: "FIBA".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_non_human() {
        let parsed = parse_composite_id("tr|Q3SX14|Q3SX14_BOVIN").unwrap();
        assert_eq!(parsed, ParsedId::NonHuman);
    }

    #[test]
    fn test_parse_malformed_human_entry() {
        let result = parse_composite_id("P02675|FIBB_HUMAN");
        assert!(result.is_err());
    }

    #[test]
    fn test_dedup_first_occurrence_wins() {
        let records = vec![
            record(0, "P02675", "FIBB"),
            record(1, "P02671", "FIBA"),
            record(2, "P02675", "FIBB_DUP"),
        ];
        let (annotations, mask) = ProteinAnnotations::from_records(records);
        assert_eq!(annotations.len(), 2);
        assert_eq!(mask, vec![true, true, false]);
        // First occurrence retained, not the later duplicate.
        assert_eq!(annotations.get(0).unwrap().gene, "FIBB");
        assert_eq!(annotations.gene_for("P02671"), Some("FIBA"));
    }

    #[test]
    fn test_apply_mask_length_check() {
        let (annotations, _) =
            ProteinAnnotations::from_records(vec![record(0, "P02675", "FIBB")]);
        assert!(annotations.apply_mask(&[true, false]).is_err());
        let kept = annotations.apply_mask(&[false]).unwrap();
        assert!(kept.is_empty());
    }

    #[test]
    fn test_split_report_fraction() {
        let report = SplitReport {
            n_input: 10,
            n_non_human: 3,
            n_duplicates: 1,
            n_retained: 6,
        };
        assert!((report.fraction_discarded() - 0.4).abs() < 1e-12);
    }
}
