//! Text extraction for uploaded documents

use async_trait::async_trait;

use super::{AnalysisError, TextExtractor};

/// Extracts text from PDFs with `pdf-extract`; UTF-8 text files pass through
#[derive(Debug, Default, Clone)]
pub struct DocumentTextExtractor;

impl DocumentTextExtractor {
    pub fn new() -> Self {
        Self
    }

    fn is_pdf(data: &[u8]) -> bool {
        data.starts_with(b"%PDF")
    }

    fn extract_pdf(data: Vec<u8>) -> Result<String, AnalysisError> {
        // pdf-extract panics on some malformed inputs
        match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&data)) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(AnalysisError::permanent(format!("Unreadable PDF: {}", e))),
            Err(_) => Err(AnalysisError::permanent("Unreadable PDF: parser aborted")),
        }
    }
}

#[async_trait]
impl TextExtractor for DocumentTextExtractor {
    async fn extract_text(&self, filename: &str, data: &[u8]) -> Result<String, AnalysisError> {
        let text = if Self::is_pdf(data) {
            let bytes = data.to_vec();
            // pdf-extract is CPU-bound and can be slow on large files
            tokio::task::spawn_blocking(move || Self::extract_pdf(bytes))
                .await
                .map_err(|e| AnalysisError::retryable(format!("Extraction task failed: {}", e)))??
        } else {
            String::from_utf8(data.to_vec()).map_err(|_| {
                AnalysisError::permanent(format!(
                    "'{}' is neither a PDF nor UTF-8 text",
                    filename
                ))
            })?
        };

        if text.trim().is_empty() {
            return Err(AnalysisError::permanent(format!(
                "No extractable text in '{}'",
                filename
            )));
        }

        tracing::debug!("Extracted {} characters from '{}'", text.len(), filename);
        Ok(text)
    }
}
