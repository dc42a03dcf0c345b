//! Error types for the proteoclot library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum ProteoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid intensity value '{value}' at row {row}, column {col}")]
    InvalidIntensity {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Sample ID mismatch: {0}")]
    SampleMismatch(String),

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Malformed protein ID '{id}': {reason}")]
    MalformedProteinId { id: String, reason: String },

    #[error("Value '{value}' is outside the declared domain of column '{column}'")]
    OutOfDomain { column: String, value: String },

    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, ProteoError>;
