//! Core types for the analysis service

pub mod job;
pub mod report;

pub use job::{DocumentRef, JobMessage, JobRecord, JobState, ProgressMeta, StateUpdate};
pub use report::AnalysisReport;

/// Query used when the client sends none, or only whitespace
pub const DEFAULT_QUERY: &str = "Analyze this financial document for investment insights";

/// Trim a client query, falling back to [`DEFAULT_QUERY`] when blank
pub fn normalize_query(query: Option<&str>) -> String {
    match query.map(str::trim) {
        Some(q) if !q.is_empty() => q.to_string(),
        _ => DEFAULT_QUERY.to_string(),
    }
}
