//! fin-analyzer: asynchronous financial document analysis
//!
//! Uploads are stored, queued on a broker and analyzed by a pool of
//! retrying workers; clients poll a status endpoint for the result.

pub mod analysis;
pub mod config;
pub mod error;
pub mod processing;
pub mod server;
pub mod storage;
pub mod types;

pub use config::AnalyzerConfig;
pub use error::{Error, Result};
pub use types::{AnalysisReport, JobMessage, JobRecord, JobState};
