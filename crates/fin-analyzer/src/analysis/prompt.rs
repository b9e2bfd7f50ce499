//! Prompt templates for financial document analysis

/// Prompt builder for the analyst pipeline
pub struct PromptBuilder;

impl PromptBuilder {
    /// Cut document text to at most `max_chars` characters on a char boundary
    pub fn truncate_document(text: &str, max_chars: usize) -> (&str, bool) {
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => (&text[..idx], true),
            None => (text, false),
        }
    }

    /// Build the full analysis prompt with strict grounding
    pub fn build_analysis_prompt(document_text: &str, query: &str, max_chars: usize) -> String {
        let (document, truncated) = Self::truncate_document(document_text.trim(), max_chars);
        let notice = if truncated {
            "\n[Document truncated for length; analyze only the portion shown.]\n"
        } else {
            ""
        };

        format!(
            r#"You are a senior financial analyst with deep expertise in financial statements, ratio analysis and corporate performance evaluation.
You rely strictly on the provided document and avoid speculation.

TASK:
Analyze the financial document below and answer the user's query: {query}

STEPS:
1. Read the document carefully.
2. Extract key financial metrics such as revenue, profit, expenses, growth trends and risks.
3. Provide clear financial insights based only on the document.
4. Do NOT make assumptions outside the document.
5. Present findings in a structured format.

EXPECTED OUTPUT:
- Company performance summary
- Key financial metrics
- Growth trends
- Risks identified
- Investment insights based on data

DOCUMENT:
{document}{notice}
QUERY: {query}

Provide the structured analysis:"#,
            query = query,
            document = document,
            notice = notice,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_query_and_document() {
        let prompt = PromptBuilder::build_analysis_prompt("Revenue rose 8%", "Is it growing?", 1000);
        assert!(prompt.contains("Revenue rose 8%"));
        assert!(prompt.contains("QUERY: Is it growing?"));
        assert!(!prompt.contains("truncated"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let (cut, truncated) = PromptBuilder::truncate_document("€€€€", 2);
        assert_eq!(cut, "€€");
        assert!(truncated);

        let (whole, truncated) = PromptBuilder::truncate_document("abc", 10);
        assert_eq!(whole, "abc");
        assert!(!truncated);
    }

    #[test]
    fn test_long_document_is_flagged() {
        let text = "x".repeat(50);
        let prompt = PromptBuilder::build_analysis_prompt(&text, "q", 10);
        assert!(prompt.contains("Document truncated"));
        assert!(!prompt.contains(&"x".repeat(11)));
    }
}
