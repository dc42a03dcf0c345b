//! Core data structures: annotations, abundance matrices, metadata, bundle.

pub mod abundance;
pub mod annotation;
pub mod bundle;
pub mod combined;
pub mod metadata;

pub use abundance::{apply_protein_mask, AbundanceMatrix, NormalizedMatrix};
pub use annotation::{
    parse_composite_id, ParsedId, ProteinAnnotations, ProteinRecord, SplitReport,
};
pub use bundle::AnalysisBundle;
pub use combined::{load_combined_tsv, CombinedTableConfig};
pub use metadata::{
    derive_keys, join, JoinReport, KeyReport, SampleMetadata, Variable, VariableType,
};
