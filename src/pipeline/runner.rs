//! Pipeline runner for composing and executing pre-processing steps.

use crate::data::{AbundanceMatrix, NormalizedMatrix, ProteinAnnotations};
use crate::error::{ProteoError, Result};
use crate::filter::{filter_support, FilterReport, SupportFilter};
use crate::normalize::{
    drop_empty_proteins, log2_offset, normalize_cyclic_loess, CyclicLoessConfig,
    DEFAULT_LOG_OFFSET,
};
use serde::{Deserialize, Serialize};

/// A step in the pre-processing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineStep {
    /// Remove proteins with zero abundance in every sample.
    DropEmptyProteins,
    /// Apply `log2(x + offset)` to move to the log scale.
    Log2Offset { offset: f64 },
    /// Cyclic loess normalization across samples (log scale).
    CyclicLoess { iterations: usize, span: f64 },
    /// Drop proteins detected in too few samples (log scale).
    FilterSupport {
        min_intensity: f64,
        min_samples: usize,
    },
}

/// What a completed step did, for logging and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepReport {
    DropEmptyProteins { n_removed: usize },
    Log2Offset { offset: f64 },
    CyclicLoess { iterations: usize, span: f64 },
    FilterSupport(FilterReport),
}

impl std::fmt::Display for StepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepReport::DropEmptyProteins { n_removed } => {
                writeln!(f, "Dropped {} all-zero proteins", n_removed)
            }
            StepReport::Log2Offset { offset } => {
                writeln!(f, "Applied log2(x + {})", offset)
            }
            StepReport::CyclicLoess { iterations, span } => {
                writeln!(
                    f,
                    "Cyclic loess normalization ({} iterations, span {})",
                    iterations, span
                )
            }
            StepReport::FilterSupport(report) => write!(f, "{}", report),
        }
    }
}

/// Pipeline configuration for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the pipeline.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Steps to execute, in order.
    pub steps: Vec<PipelineStep>,
}

impl PipelineConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(ProteoError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ProteoError::from)
    }
}

/// Final state of a pipeline run: log-scale matrix, aligned annotations,
/// and one report per executed step.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub matrix: NormalizedMatrix,
    pub annotations: ProteinAnnotations,
    pub reports: Vec<StepReport>,
}

/// Builder for constructing and running pre-processing pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    name: String,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create a new empty pipeline.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            name: "unnamed".to_string(),
        }
    }

    /// Create from a config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            name: config.name.clone(),
        }
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Remove proteins that are zero in every sample.
    pub fn drop_empty_proteins(mut self) -> Self {
        self.steps.push(PipelineStep::DropEmptyProteins);
        self
    }

    /// Move to the log scale with `log2(x + offset)`.
    pub fn log2_offset(mut self, offset: f64) -> Self {
        self.steps.push(PipelineStep::Log2Offset { offset });
        self
    }

    /// Add cyclic loess normalization.
    pub fn cyclic_loess(mut self, iterations: usize, span: f64) -> Self {
        self.steps
            .push(PipelineStep::CyclicLoess { iterations, span });
        self
    }

    /// Add support filtering.
    ///
    /// `min_intensity` is in the linear intensity space; the threshold is
    /// translated using the offset of the preceding log step.
    pub fn filter_support(mut self, min_intensity: f64, min_samples: usize) -> Self {
        self.steps.push(PipelineStep::FilterSupport {
            min_intensity,
            min_samples,
        });
        self
    }

    /// Convert to config for serialization.
    pub fn to_config(&self, description: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            name: self.name.clone(),
            description: description.map(String::from),
            steps: self.steps.clone(),
        }
    }

    /// Run the pipeline on data.
    pub fn run(
        &self,
        matrix: &AbundanceMatrix,
        annotations: &ProteinAnnotations,
    ) -> Result<PipelineOutput> {
        let mut state = PipelineState::new(matrix.clone(), annotations.clone());
        for (i, step) in self.steps.iter().enumerate() {
            state = state.apply(step).map_err(|e| {
                ProteoError::Pipeline(format!("Step {} ({:?}) failed: {}", i + 1, step, e))
            })?;
        }
        state.finalize()
    }
}

/// Internal state during pipeline execution.
///
/// The stage tracks which scale the matrix is on: linear-scale steps refuse
/// to run after the log transform, and log-scale steps refuse to run before
/// it, so mis-ordered configs fail instead of normalizing the wrong scale.
enum Stage {
    Linear(AbundanceMatrix),
    /// Log-scale matrix plus the offset the log step used; the support
    /// filter needs it to place its linear threshold on the log scale.
    Log(NormalizedMatrix, f64),
}

struct PipelineState {
    stage: Stage,
    annotations: ProteinAnnotations,
    reports: Vec<StepReport>,
}

impl PipelineState {
    fn new(matrix: AbundanceMatrix, annotations: ProteinAnnotations) -> Self {
        Self {
            stage: Stage::Linear(matrix),
            annotations,
            reports: Vec::new(),
        }
    }

    fn apply(mut self, step: &PipelineStep) -> Result<Self> {
        match step {
            PipelineStep::DropEmptyProteins => {
                let matrix = match &self.stage {
                    Stage::Linear(m) => m,
                    Stage::Log(..) => {
                        return Err(ProteoError::Pipeline(
                            "DropEmptyProteins runs on the linear scale, before Log2Offset"
                                .to_string(),
                        ));
                    }
                };
                let (reduced, annotations, n_removed) =
                    drop_empty_proteins(matrix, &self.annotations)?;
                self.stage = Stage::Linear(reduced);
                self.annotations = annotations;
                self.reports
                    .push(StepReport::DropEmptyProteins { n_removed });
            }
            PipelineStep::Log2Offset { offset } => {
                let matrix = match &self.stage {
                    Stage::Linear(m) => m,
                    Stage::Log(..) => {
                        return Err(ProteoError::Pipeline(
                            "Log2Offset applied twice".to_string(),
                        ));
                    }
                };
                self.stage = Stage::Log(log2_offset(matrix, *offset)?, *offset);
                self.reports.push(StepReport::Log2Offset { offset: *offset });
            }
            PipelineStep::CyclicLoess { iterations, span } => {
                let (matrix, log_offset) = match &self.stage {
                    Stage::Log(m, off) => (m, *off),
                    Stage::Linear(_) => {
                        return Err(ProteoError::Pipeline(
                            "CyclicLoess requires Log2Offset first".to_string(),
                        ));
                    }
                };
                let config = CyclicLoessConfig::default()
                    .with_iterations(*iterations)
                    .with_span(*span);
                self.stage = Stage::Log(normalize_cyclic_loess(matrix, &config)?, log_offset);
                self.reports.push(StepReport::CyclicLoess {
                    iterations: *iterations,
                    span: *span,
                });
            }
            PipelineStep::FilterSupport {
                min_intensity,
                min_samples,
            } => {
                let (matrix, log_offset) = match &self.stage {
                    Stage::Log(m, off) => (m, *off),
                    Stage::Linear(_) => {
                        return Err(ProteoError::Pipeline(
                            "FilterSupport requires Log2Offset first".to_string(),
                        ));
                    }
                };
                let filter = SupportFilter {
                    min_intensity: *min_intensity,
                    min_samples: *min_samples,
                    log_offset,
                };
                let (filtered, annotations, report) =
                    filter_support(matrix, &self.annotations, &filter)?;
                self.stage = Stage::Log(filtered, log_offset);
                self.annotations = annotations;
                self.reports.push(StepReport::FilterSupport(report));
            }
        }
        Ok(self)
    }

    fn finalize(self) -> Result<PipelineOutput> {
        match self.stage {
            Stage::Log(matrix, _) => Ok(PipelineOutput {
                matrix,
                annotations: self.annotations,
                reports: self.reports,
            }),
            Stage::Linear(_) => Err(ProteoError::Pipeline(
                "Pipeline must include a Log2Offset step".to_string(),
            )),
        }
    }
}

/// Run the standard pre-processing pipeline: drop empty proteins, log2 with
/// the default offset, cyclic loess, then support filtering.
pub fn run_standard(
    matrix: &AbundanceMatrix,
    annotations: &ProteinAnnotations,
) -> Result<PipelineOutput> {
    let loess = CyclicLoessConfig::default();
    let support = SupportFilter::default();
    Pipeline::new()
        .name("standard")
        .drop_empty_proteins()
        .log2_offset(DEFAULT_LOG_OFFSET)
        .cyclic_loess(loess.iterations, loess.span)
        .filter_support(support.min_intensity, support.min_samples)
        .run(matrix, annotations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ProteinRecord;
    use nalgebra::DMatrix;

    fn test_inputs() -> (AbundanceMatrix, ProteinAnnotations) {
        let n_proteins = 30;
        let n_samples = 5;
        let mut state = 11u64;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64) / (u64::MAX as f64)
        };
        let data = DMatrix::from_fn(n_proteins, n_samples, |i, _| {
            if i < 3 {
                0.0
            } else if i < 6 {
                // Detected in too few samples to survive the support filter.
                0.0
            } else {
                100.0 + next() * 900.0
            }
        });
        // Give the sparse rows one detected sample each.
        let mut data = data;
        for i in 3..6 {
            data[(i, 0)] = 50.0;
        }
        let records: Vec<ProteinRecord> = (0..n_proteins)
            .map(|i| ProteinRecord {
                protein_num: i,
                raw_ids: format!("sp|P{:05}|G{}_HUMAN", i, i),
                uniprot_id: format!("P{:05}", i),
                gene: format!("G{}", i),
                description: None,
                sequence_length: None,
                score: None,
            })
            .collect();
        let (annotations, _) = ProteinAnnotations::from_records(records);
        let matrix = AbundanceMatrix::new(
            data,
            (0..n_proteins).map(|i| format!("P{:05}", i)).collect(),
            (0..n_samples).map(|j| format!("S{}", j)).collect(),
        )
        .unwrap();
        (matrix, annotations)
    }

    #[test]
    fn test_standard_pipeline() {
        let (matrix, annotations) = test_inputs();
        let output = run_standard(&matrix, &annotations).unwrap();

        // All-zero and low-support proteins are gone, alignment intact.
        assert_eq!(output.matrix.n_proteins(), 24);
        assert_eq!(output.annotations.len(), 24);
        assert_eq!(output.matrix.n_samples(), 5);
        assert_eq!(output.reports.len(), 4);
        for (pid, record) in output
            .matrix
            .protein_ids()
            .iter()
            .zip(output.annotations.records())
        {
            assert_eq!(pid, &record.uniprot_id);
        }
    }

    #[test]
    fn test_filter_threshold_follows_log_offset() {
        // With offset 3.75 a zero maps to log2(3.75) ≈ 1.91 and the support
        // threshold sits at log2(0.5 + 3.75) ≈ 2.09, so zeros must not count
        // as detected. A filter stuck on the default offset would place the
        // threshold at log2(0.75) ≈ −0.42 and keep both rows.
        let data = DMatrix::from_row_slice(
            2,
            5,
            &[
                0.0, 0.0, 0.0, 1.0, 1.0, //
                1.0, 1.0, 1.0, 1.0, 1.0,
            ],
        );
        let matrix = AbundanceMatrix::new(
            data,
            vec!["P1".into(), "P2".into()],
            (0..5).map(|j| format!("S{}", j)).collect(),
        )
        .unwrap();
        let records: Vec<ProteinRecord> = ["P1", "P2"]
            .iter()
            .map(|id| ProteinRecord {
                protein_num: 0,
                raw_ids: String::new(),
                uniprot_id: id.to_string(),
                gene: id.to_string(),
                description: None,
                sequence_length: None,
                score: None,
            })
            .collect();
        let (annotations, _) = ProteinAnnotations::from_records(records);

        let output = Pipeline::new()
            .log2_offset(3.75)
            .filter_support(0.5, 3)
            .run(&matrix, &annotations)
            .unwrap();
        assert_eq!(output.matrix.protein_ids(), &["P2"]);
        assert_eq!(output.annotations.len(), 1);
    }

    #[test]
    fn test_out_of_order_steps_fail() {
        let (matrix, annotations) = test_inputs();

        // Loess before the log transform.
        let result = Pipeline::new()
            .cyclic_loess(3, 0.7)
            .log2_offset(0.25)
            .run(&matrix, &annotations);
        assert!(matches!(result, Err(ProteoError::Pipeline(_))));

        // Drop-empty after the log transform.
        let result = Pipeline::new()
            .log2_offset(0.25)
            .drop_empty_proteins()
            .run(&matrix, &annotations);
        assert!(matches!(result, Err(ProteoError::Pipeline(_))));
    }

    #[test]
    fn test_missing_log_step_fails() {
        let (matrix, annotations) = test_inputs();
        let result = Pipeline::new()
            .drop_empty_proteins()
            .run(&matrix, &annotations);
        assert!(matches!(result, Err(ProteoError::Pipeline(_))));
    }

    #[test]
    fn test_pipeline_config_yaml() {
        let pipeline = Pipeline::new()
            .name("standard")
            .drop_empty_proteins()
            .log2_offset(0.25)
            .cyclic_loess(3, 0.7)
            .filter_support(0.5, 3);

        let config = pipeline.to_config(Some("Standard pre-processing"));
        let yaml = config.to_yaml().unwrap();
        let parsed = PipelineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.name, "standard");
        assert_eq!(parsed.steps.len(), 4);

        let rebuilt = Pipeline::from_config(&parsed);
        let (matrix, annotations) = test_inputs();
        let a = rebuilt.run(&matrix, &annotations).unwrap();
        let b = pipeline.run(&matrix, &annotations).unwrap();
        assert_eq!(a.matrix.n_proteins(), b.matrix.n_proteins());
    }
}
