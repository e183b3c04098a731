//! Document checks: upload validation, report options, scoring, report rendering
//! and the background processor that ties them together.

pub mod document;
pub mod options;
pub mod processor;
pub mod report;
pub mod scoring;

pub use options::ReportOptions;
pub use processor::{ProcessorConfig, SubmissionProcessor};
pub use scoring::{LocalScorer, ScoringProvider, VendorScorer};
