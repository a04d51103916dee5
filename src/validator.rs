// Claim Validator - decides whether a proposed batch of expense line items
// may become a claim. All-or-nothing: the first violation rejects the batch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::limits::{Category, LimitSet};

// ============================================================================
// SUBMISSION WIRE SHAPE
// ============================================================================

/// One proposed expense line item, as submitted by the employee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseDraft {
    pub vendor: String,

    /// ISO-8601 calendar date (YYYY-MM-DD).
    pub date: String,

    pub amount: f64,

    /// Defaults to "general" when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Source documents to link to this item after submission.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
}

impl ExpenseDraft {
    pub fn category_or_default(&self) -> Category {
        self.category.unwrap_or(Category::General)
    }
}

/// Parse a submitted date string. Accepts a plain calendar date or an
/// RFC 3339 timestamp (the date part is kept).
pub fn parse_expense_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.date_naive())
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Validate a proposed submission against the submitter's limits.
///
/// `limit_set` is None when the employee has no designation - that employee
/// bypasses all limit checks by policy. Checks run in strict order and the
/// first violation aborts with its reason. On success returns the exact sum
/// of the item amounts.
pub fn validate(limit_set: Option<&LimitSet>, items: &[ExpenseDraft]) -> AppResult<f64> {
    // 1. Non-empty batch
    if items.is_empty() {
        return Err(AppError::validation("At least one expense is required"));
    }

    // 2. Structural checks, per item
    for item in items {
        if item.vendor.trim().is_empty() {
            return Err(AppError::validation("Each expense must have a vendor"));
        }
        if parse_expense_date(&item.date).is_none() {
            return Err(AppError::validation("Each expense must have a valid date"));
        }
        if !item.amount.is_finite() || item.amount <= 0.0 {
            return Err(AppError::validation(
                "Each expense must have a positive amount",
            ));
        }
    }

    let total_amount: f64 = items.iter().map(|i| i.amount).sum();

    if let Some(limits) = limit_set {
        // 3. Per-item cap: exact category match, else the general fallback.
        //    Equality to the cap is allowed - only strictly greater fails.
        for item in items {
            if let Some((limit_category, max_amount)) = limits.cap_for(item.category_or_default()) {
                if item.amount > max_amount {
                    return Err(AppError::validation(format!(
                        "Expense \"{}\" ({}) exceeds limit of {} for {}",
                        item.vendor, item.amount, max_amount, limit_category
                    )));
                }
            }
        }

        // 4. Aggregate cap, evaluated after and independently of per-item checks
        if let Some(total_cap) = limits.total_cap() {
            if total_amount > total_cap {
                return Err(AppError::validation(format!(
                    "Total {} exceeds limit of {}",
                    total_amount, total_cap
                )));
            }
        }
    }

    Ok(total_amount)
}

// ============================================================================
// TESTS
// ============================================================================
