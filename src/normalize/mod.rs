//! Normalization: log transform and cyclic loess.

pub mod cyclic_loess;
pub mod log2;

pub use cyclic_loess::{loess_fit, normalize_cyclic_loess, CyclicLoessConfig};
pub use log2::{drop_empty_proteins, log2_offset, DEFAULT_LOG_OFFSET};
