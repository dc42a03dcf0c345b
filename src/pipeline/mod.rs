//! Pipeline composition and execution for abundance pre-processing.

mod runner;

pub use runner::{
    run_standard, Pipeline, PipelineConfig, PipelineOutput, PipelineStep, StepReport,
};
