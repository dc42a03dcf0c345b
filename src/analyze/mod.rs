//! Exploratory analyses over the normalized, filtered data.

pub mod correlation;
pub mod importance;
pub mod pca;
pub mod top_proteins;
pub mod umap;

pub use correlation::{
    correlate_metadata_pcs, spearman_test, CorrelationResult, ExcludedVariable, DEFAULT_ALPHA,
};
pub use importance::{feature_importance, FeatureImportance, ImportanceConfig, ImportanceResult};
pub use pca::{pca, PcaResult};
pub use top_proteins::{
    highly_variable, top_abundant, HighlyVariableResult, TopAbundantResult, TopProtein,
    VariableProtein, DEFAULT_TOP_N,
};
pub use umap::{umap, UmapConfig, UmapResult};
