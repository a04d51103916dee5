// OCR extraction contract. The actual vision call is an external
// collaborator; this module owns the response shape and the degradation
// policy: a failed extraction yields one all-null placeholder item instead of
// failing the upload batch.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// One candidate expense pulled from a document. Every field is nullable -
/// the employee fills the gaps during review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedExpense {
    pub vendor: Option<String>,
    /// YYYY-MM-DD when the extractor could read it.
    pub date: Option<String>,
    pub amount: Option<f64>,
    pub description: Option<String>,
}

impl ExtractedExpense {
    /// The placeholder recorded for a document whose extraction failed.
    pub fn placeholder() -> Self {
        ExtractedExpense {
            vendor: None,
            date: None,
            amount: None,
            description: None,
        }
    }
}

/// Given a document URL, return zero or more candidate expense records.
pub trait ReceiptExtractor {
    fn extract(&self, file_url: &str) -> AppResult<Vec<ExtractedExpense>>;
}

/// Parse the raw model response into expense candidates.
///
/// The model is told to return a bare JSON array, but in practice wraps it in
/// Markdown code fences often enough that we strip them first. A single
/// object is accepted and treated as a one-element array.
pub fn parse_extraction_response(raw: &str) -> AppResult<Vec<ExtractedExpense>> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let value: serde_json::Value = serde_json::from_str(cleaned)
        .map_err(|e| AppError::Upstream(format!("unparseable OCR response: {}", e)))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| AppError::Upstream(format!("malformed OCR item: {}", e)))
        })
        .collect()
}

/// Run the extractor, degrading a failure to the all-null placeholder.
/// Partial failure is tolerated here but never at submission validation.
pub fn extract_or_placeholder(
    extractor: &dyn ReceiptExtractor,
    file_url: &str,
) -> Vec<ExtractedExpense> {
    match extractor.extract(file_url) {
        Ok(expenses) => expenses,
        Err(_) => vec![ExtractedExpense::placeholder()],
    }
}
