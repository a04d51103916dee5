// Fixed-layout PDF export of a claim. The currency symbol only affects
// rendering here - stored amounts are plain numbers.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use crate::claims::Claim;
use crate::error::{AppError, AppResult};

/// Default rendering currency when the caller does not pass one.
pub const DEFAULT_CURRENCY: &str = "Rs.";

const PAGE_WIDTH: i64 = 595; // A4 portrait, points
const PAGE_HEIGHT: i64 = 842;
const MARGIN: f32 = 50.0;

struct Line {
    x: f32,
    y: f32,
    size: i64,
    text: String,
}

/// Render a claim as a single-page PDF document.
pub fn render_claim_pdf(
    claim: &Claim,
    employee_name: &str,
    designation_name: Option<&str>,
    currency_symbol: &str,
) -> AppResult<Vec<u8>> {
    let mut lines = Vec::new();
    let mut y = PAGE_HEIGHT as f32 - 60.0;

    lines.push(Line {
        x: MARGIN,
        y,
        size: 18,
        text: "Expense Reimbursement Claim".to_string(),
    });
    y -= 30.0;

    lines.push(Line {
        x: MARGIN,
        y,
        size: 10,
        text: format!("Claim ID: {}", claim.id),
    });
    y -= 16.0;
    lines.push(Line {
        x: MARGIN,
        y,
        size: 10,
        text: format!("Employee: {}", employee_name),
    });
    y -= 16.0;
    lines.push(Line {
        x: MARGIN,
        y,
        size: 10,
        text: format!("Designation: {}", designation_name.unwrap_or("N/A")),
    });
    y -= 16.0;
    lines.push(Line {
        x: MARGIN,
        y,
        size: 10,
        text: format!(
            "Submitted: {}   Status: {}",
            claim.submitted_at.format("%Y-%m-%d"),
            claim.status
        ),
    });
    y -= 30.0;

    // Table header
    lines.push(Line {
        x: MARGIN,
        y,
        size: 11,
        text: "Vendor".to_string(),
    });
    lines.push(Line {
        x: 250.0,
        y,
        size: 11,
        text: "Date".to_string(),
    });
    lines.push(Line {
        x: 340.0,
        y,
        size: 11,
        text: "Category".to_string(),
    });
    lines.push(Line {
        x: 450.0,
        y,
        size: 11,
        text: "Amount".to_string(),
    });
    y -= 18.0;

    for expense in &claim.expenses {
        lines.push(Line {
            x: MARGIN,
            y,
            size: 10,
            text: truncate(&expense.vendor, 34),
        });
        lines.push(Line {
            x: 250.0,
            y,
            size: 10,
            text: expense.date.format("%Y-%m-%d").to_string(),
        });
        lines.push(Line {
            x: 340.0,
            y,
            size: 10,
            text: expense.category.to_string(),
        });
        lines.push(Line {
            x: 450.0,
            y,
            size: 10,
            text: format!("{} {:.2}", currency_symbol, expense.amount),
        });
        y -= 15.0;
    }

    y -= 10.0;
    lines.push(Line {
        x: 340.0,
        y,
        size: 12,
        text: format!("Total: {} {:.2}", currency_symbol, claim.total_amount),
    });

    build_document(&lines)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars - 1).collect();
        format!("{}…", cut)
    }
}

fn build_document(lines: &[Line]) -> AppResult<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = Vec::new();
    for line in lines {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F1".into(), line.size.into()]));
        operations.push(Operation::new("Td", vec![line.x.into(), line.y.into()]));
        operations.push(Operation::new(
            "Tj",
            vec![Object::string_literal(line.text.as_str())],
        ));
        operations.push(Operation::new("ET", vec![]));
    }

    let content = Content { operations };
    let encoded = content
        .encode()
        .map_err(|e| AppError::Internal(format!("PDF content encode: {}", e)))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| AppError::Internal(format!("PDF save: {}", e)))?;

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{ClaimStatus, Expense};
    use crate::limits::Category;
    use chrono::{NaiveDate, Utc};

    fn sample_claim() -> Claim {
        let claim_id = "claim-1".to_string();
        Claim {
            id: claim_id.clone(),
            employee_id: "emp-1".to_string(),
            total_amount: 500.0,
            status: ClaimStatus::Submitted,
            submitted_at: Utc::now(),
            approved_at: None,
            expenses: vec![
                Expense {
                    id: "e1".to_string(),
                    reimbursement_id: claim_id.clone(),
                    vendor: "Uber".to_string(),
                    date: NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
                    amount: 350.0,
                    category: Category::Travel,
                    description: None,
                },
                Expense {
                    id: "e2".to_string(),
                    reimbursement_id: claim_id,
                    vendor: "Office Depot".to_string(),
                    date: NaiveDate::from_ymd_opt(2026, 3, 16).unwrap(),
                    amount: 150.0,
                    category: Category::General,
                    description: Some("Chair".to_string()),
                },
            ],
        }
    }

    #[test]
    fn test_renders_valid_single_page_pdf() {
        let claim = sample_claim();
        let bytes =
            render_claim_pdf(&claim, "Ana", Some("Software Engineer"), DEFAULT_CURRENCY).unwrap();

        assert!(bytes.starts_with(b"%PDF"));

        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_currency_symbol_changes_rendering_only() {
        let claim = sample_claim();
        let rs = render_claim_pdf(&claim, "Ana", None, "Rs.").unwrap();
        let usd = render_claim_pdf(&claim, "Ana", None, "$").unwrap();
        assert_ne!(rs, usd);
    }

    #[test]
    fn test_long_vendor_is_truncated() {
        assert_eq!(truncate("short", 34), "short");
        let long = "A".repeat(50);
        let out = truncate(&long, 34);
        assert!(out.chars().count() <= 34);
        assert!(out.ends_with('…'));
    }
}
