//! Adaptive CDK synthesis for cost and governance analysis.
//!
//! A project root goes through environment detection, a fallback ladder of
//! synth invocations, failure classification, and template normalization.
//! Cleaned templates and diagnoses are handed to downstream tooling as JSON.
pub mod classify;
pub mod clean;
pub mod config;
pub mod environment;
pub mod locate;
pub mod pipeline;
pub mod synth;
pub mod util;

pub use classify::{classify, is_fatal, Classifier, ErrorCategory, ErrorDiagnosis};
pub use clean::{
    clean, is_generated_by_tool, CleanOptions, CleaningReport, Template, TemplateCleaner,
};
pub use config::{StrategyDescriptor, SynthConfig};
pub use environment::{detect, EnvironmentDescriptor, Language};
pub use locate::{discover_roots, locate_app_root, AppLocation};
pub use pipeline::{
    process_project, run_batch, write_report, BatchReport, PipelineContext, ProjectReport,
};
pub use synth::{
    AttemptOutcome, AttemptRecord, CancelToken, LadderState, SynthesisResult, Synthesizer,
};
