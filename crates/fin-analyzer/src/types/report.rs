//! Analysis result payload

use serde::{Deserialize, Serialize};

/// Structured payload stored with a SUCCESS job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Always "success"
    pub status: String,
    /// The query the analysis answered
    pub query: String,
    /// Free-form analysis text produced by the pipeline
    pub analysis: String,
}

impl AnalysisReport {
    pub fn new(query: impl Into<String>, analysis: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            query: query.into(),
            analysis: analysis.into(),
        }
    }
}
