//! Exploratory Proteomics Analysis for Clot Composition
//!
//! This library processes label-free quantification (LFQ) proteomics of
//! thrombus material together with clinical metadata: loading and splitting
//! MaxQuant-style combined tables, organism filtering, normalization, and a
//! set of exploratory analyses.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (AbundanceMatrix, ProteinAnnotations,
//!   SampleMetadata, AnalysisBundle)
//! - **normalize**: Log transform and cyclic loess normalization
//! - **filter**: Support-based protein filtering
//! - **analyze**: PCA, UMAP, metadata correlation, feature importance,
//!   and protein shortlists
//! - **pipeline**: Pipeline composition and execution
//!
//! # Example
//!
//! ```no_run
//! use proteoclot::prelude::*;
//!
//! // Load and split the combined protein table.
//! let config = CombinedTableConfig::default();
//! let (annotations, matrix, report) =
//!     load_combined_tsv("combined.tsv", &config).unwrap();
//! println!("{}", report);
//!
//! // Normalize and filter.
//! let output = Pipeline::new()
//!     .drop_empty_proteins()
//!     .log2_offset(0.25)
//!     .cyclic_loess(3, 0.7)
//!     .filter_support(0.5, 3)
//!     .run(&matrix, &annotations)
//!     .unwrap();
//!
//! // Explore.
//! let pca_result = pca(&output.matrix, 5).unwrap();
//! println!("PC1 explains {:.1}%", pca_result.explained[0] * 100.0);
//! ```

pub mod analyze;
pub mod data;
pub mod error;
pub mod filter;
pub mod normalize;
pub mod pipeline;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::analyze::{
        correlate_metadata_pcs, feature_importance, highly_variable, pca, spearman_test,
        top_abundant, umap, CorrelationResult, ExcludedVariable, FeatureImportance,
        HighlyVariableResult, ImportanceConfig, ImportanceResult, PcaResult, TopAbundantResult,
        TopProtein, UmapConfig, UmapResult, VariableProtein, DEFAULT_ALPHA, DEFAULT_TOP_N,
    };
    pub use crate::data::{
        apply_protein_mask, derive_keys, join, load_combined_tsv, parse_composite_id,
        AbundanceMatrix,
        AnalysisBundle, CombinedTableConfig, JoinReport, KeyReport, NormalizedMatrix, ParsedId,
        ProteinAnnotations, ProteinRecord, SampleMetadata, SplitReport, Variable, VariableType,
    };
    pub use crate::error::{ProteoError, Result};
    pub use crate::filter::{filter_support, FilterReport, SupportFilter};
    pub use crate::normalize::{
        drop_empty_proteins, log2_offset, normalize_cyclic_loess, CyclicLoessConfig,
        DEFAULT_LOG_OFFSET,
    };
    pub use crate::pipeline::{
        run_standard, Pipeline, PipelineConfig, PipelineOutput, PipelineStep, StepReport,
    };
}
