//! Abundance filtering.

pub mod support;

pub use support::{filter_support, FilterReport, SupportFilter};
