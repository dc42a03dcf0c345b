//! Protein shortlists: consistently top-abundant and highly variable.

use crate::data::{NormalizedMatrix, ProteinAnnotations};
use crate::error::{ProteoError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Proteins per sample considered "top" when counting recurrence.
pub const DEFAULT_TOP_N: usize = 10;

/// One protein that recurs among the most abundant across samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopProtein {
    pub uniprot_id: String,
    pub gene: String,
    /// Samples in which the protein ranked within the per-sample top N.
    pub n_samples: usize,
}

/// Recurrently top-abundant proteins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopAbundantResult {
    pub top_n: usize,
    /// Sorted by descending sample count, then by accession.
    pub proteins: Vec<TopProtein>,
}

impl TopAbundantResult {
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "uniprot_id\tgene\tn_samples")?;
        for p in &self.proteins {
            writeln!(writer, "{}\t{}\t{}", p.uniprot_id, p.gene, p.n_samples)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for TopAbundantResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Proteins in the top {} of more than one sample: {}",
            self.top_n,
            self.proteins.len()
        )?;
        for p in &self.proteins {
            writeln!(f, "  {:<12} {:<12} {} samples", p.uniprot_id, p.gene, p.n_samples)?;
        }
        Ok(())
    }
}

/// Find proteins that rank in the per-sample top N of more than one sample.
///
/// Within each sample, proteins are ranked by descending abundance with ties
/// broken by row order. A protein appearing in exactly one sample's top list
/// is not reported.
pub fn top_abundant(
    matrix: &NormalizedMatrix,
    annotations: &ProteinAnnotations,
    top_n: usize,
) -> Result<TopAbundantResult> {
    if top_n == 0 {
        return Err(ProteoError::InvalidParameter(
            "top_n must be at least 1".to_string(),
        ));
    }
    let n_proteins = matrix.n_proteins();
    if n_proteins != annotations.len() {
        return Err(ProteoError::DimensionMismatch {
            expected: n_proteins,
            actual: annotations.len(),
        });
    }
    if n_proteins == 0 {
        return Err(ProteoError::EmptyData(
            "no proteins to rank".to_string(),
        ));
    }

    let mut counts = vec![0usize; n_proteins];
    for col in 0..matrix.n_samples() {
        let values = matrix.col_dense(col);
        let mut order: Vec<usize> = (0..n_proteins).collect();
        // Stable sort keeps row order within ties.
        order.sort_by(|&a, &b| {
            values[b]
                .partial_cmp(&values[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for &idx in order.iter().take(top_n.min(n_proteins)) {
            counts[idx] += 1;
        }
    }

    let mut proteins: Vec<TopProtein> = counts
        .iter()
        .enumerate()
        .filter(|(_, &c)| c > 1)
        .map(|(idx, &c)| {
            let record = &annotations.records()[idx];
            TopProtein {
                uniprot_id: record.uniprot_id.clone(),
                gene: record.gene.clone(),
                n_samples: c,
            }
        })
        .collect();
    proteins.sort_by(|a, b| {
        b.n_samples
            .cmp(&a.n_samples)
            .then_with(|| a.uniprot_id.cmp(&b.uniprot_id))
    });

    Ok(TopAbundantResult { top_n, proteins })
}

/// One protein flagged as highly variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableProtein {
    pub uniprot_id: String,
    pub gene: String,
    /// Across-sample standard deviation on the log scale.
    pub sd: f64,
    /// Summed abundance across samples.
    pub total: f64,
}

/// Proteins with both high variability and high overall abundance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlyVariableResult {
    /// The sd threshold used (75th percentile of per-protein sds).
    pub sd_threshold: f64,
    /// The total-abundance threshold used (50th percentile of totals).
    pub total_threshold: f64,
    /// Proteins passing both thresholds, sorted by descending sd.
    pub proteins: Vec<VariableProtein>,
}

impl HighlyVariableResult {
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "uniprot_id\tgene\tsd\ttotal")?;
        for p in &self.proteins {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}",
                p.uniprot_id, p.gene, p.sd, p.total
            )?;
        }
        Ok(())
    }
}

impl std::fmt::Display for HighlyVariableResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Highly variable proteins: {} (sd >= {:.4}, total >= {:.4})",
            self.proteins.len(),
            self.sd_threshold,
            self.total_threshold
        )?;
        for p in &self.proteins {
            writeln!(
                f,
                "  {:<12} {:<12} sd={:.4} total={:.2}",
                p.uniprot_id, p.gene, p.sd, p.total
            )?;
        }
        Ok(())
    }
}

/// Flag proteins whose across-sample variability and abundance are both high.
///
/// A protein qualifies when its standard deviation reaches the 75th
/// percentile of all per-protein sds and its summed abundance reaches the
/// median of all totals. Both cut-offs are empirical quantiles of the input
/// itself, recomputed on every call.
pub fn highly_variable(
    matrix: &NormalizedMatrix,
    annotations: &ProteinAnnotations,
) -> Result<HighlyVariableResult> {
    let n_proteins = matrix.n_proteins();
    if n_proteins != annotations.len() {
        return Err(ProteoError::DimensionMismatch {
            expected: n_proteins,
            actual: annotations.len(),
        });
    }
    if n_proteins == 0 {
        return Err(ProteoError::EmptyData(
            "no proteins to score".to_string(),
        ));
    }
    if matrix.n_samples() < 2 {
        return Err(ProteoError::DegenerateInput(
            "variability needs at least two samples".to_string(),
        ));
    }

    let n_samples = matrix.n_samples() as f64;
    let mut sds = Vec::with_capacity(n_proteins);
    let mut totals = Vec::with_capacity(n_proteins);
    for row in 0..n_proteins {
        let values = matrix.row_dense(row);
        let total: f64 = values.iter().sum();
        let mean = total / n_samples;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (n_samples - 1.0);
        sds.push(var.sqrt());
        totals.push(total);
    }

    let sd_threshold = quantile(&sds, 0.75);
    let total_threshold = quantile(&totals, 0.5);

    let mut proteins: Vec<VariableProtein> = (0..n_proteins)
        .filter(|&i| sds[i] >= sd_threshold && totals[i] >= total_threshold)
        .map(|i| {
            let record = &annotations.records()[i];
            VariableProtein {
                uniprot_id: record.uniprot_id.clone(),
                gene: record.gene.clone(),
                sd: sds[i],
                total: totals[i],
            }
        })
        .collect();
    proteins.sort_by(|a, b| {
        b.sd.partial_cmp(&a.sd)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.uniprot_id.cmp(&b.uniprot_id))
    });

    Ok(HighlyVariableResult {
        sd_threshold,
        total_threshold,
        proteins,
    })
}

/// Empirical quantile with linear interpolation between order statistics.
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}
