// Claim Store - persistence and lifecycle of reimbursement claims.
//
// State machine: SUBMITTED -> APPROVED | REJECTED, admin-only, one-way.
// Submission runs the validator and persists inside a single transaction so
// a failed batch leaves the store untouched and two concurrent submissions
// cannot both slip past the same cap.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::{insert_event, Event};
use crate::documents::link_documents;
use crate::error::{AppError, AppResult};
use crate::limits::{limits_for, Category};
use crate::org::designation_of;
use crate::validator::{parse_expense_date, validate, ExpenseDraft};

// ============================================================================
// STATUS
// ============================================================================

/// Closed set of claim states. Draft never materializes - the only creation
/// path produces claims directly in Submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    #[serde(rename = "SUBMITTED")]
    Submitted,
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Submitted => "SUBMITTED",
            ClaimStatus::Approved => "APPROVED",
            ClaimStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClaimStatus::Submitted)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(ClaimStatus::Submitted),
            "APPROVED" => Ok(ClaimStatus::Approved),
            "REJECTED" => Ok(ClaimStatus::Rejected),
            other => Err(AppError::Internal(format!("Unknown claim status: {}", other))),
        }
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

/// One persisted expense line item. Immutable once its claim leaves
/// submission - the core exposes no post-submission edit path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub reimbursement_id: String,
    pub vendor: String,
    pub date: NaiveDate,
    pub amount: f64,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: String,
    pub employee_id: String,
    /// Sum of line-item amounts, fixed at submission time.
    pub total_amount: f64,
    pub status: ClaimStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    pub expenses: Vec<Expense>,
}

// ============================================================================
// SUBMISSION
// ============================================================================

/// Validate a batch of drafts for an employee and persist the claim.
///
/// Validation and creation run in one transaction: nothing persists on a
/// failed batch, and limit reads see a consistent snapshot. Source documents
/// named by each draft are linked to the persisted line item best-effort -
/// unknown document ids are silently skipped.
pub fn submit(
    conn: &mut Connection,
    employee_id: &str,
    drafts: &[ExpenseDraft],
) -> AppResult<Claim> {
    let tx = conn.transaction()?;

    let designation_id = designation_of(&tx, employee_id)?;
    let limit_set = match &designation_id {
        Some(d) => Some(limits_for(&tx, d)?),
        None => None,
    };

    let total_amount = validate(limit_set.as_ref(), drafts)?;

    let claim_id = uuid::Uuid::new_v4().to_string();
    let submitted_at = Utc::now();

    tx.execute(
        "INSERT INTO reimbursements (id, employee_id, total_amount, status, submitted_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            claim_id,
            employee_id,
            total_amount,
            ClaimStatus::Submitted.as_str(),
            submitted_at.to_rfc3339()
        ],
    )?;

    let mut expenses = Vec::with_capacity(drafts.len());
    for (position, draft) in drafts.iter().enumerate() {
        // The validator already guaranteed the date parses
        let date = parse_expense_date(&draft.date)
            .ok_or_else(|| AppError::validation("Each expense must have a valid date"))?;

        let expense = Expense {
            id: uuid::Uuid::new_v4().to_string(),
            reimbursement_id: claim_id.clone(),
            vendor: draft.vendor.clone(),
            date,
            amount: draft.amount,
            category: draft.category_or_default(),
            description: draft.description.clone(),
        };

        tx.execute(
            "INSERT INTO expenses (id, reimbursement_id, vendor, date, amount, category, description, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                expense.id,
                expense.reimbursement_id,
                expense.vendor,
                expense.date.format("%Y-%m-%d").to_string(),
                expense.amount,
                expense.category.as_str(),
                expense.description,
                position as i64
            ],
        )?;

        // Link source documents named by this draft (best-effort)
        link_documents(&tx, &expense.id, &draft.document_ids)?;

        expenses.push(expense);
    }

    let event = Event::new(
        "claim_submitted",
        "reimbursement",
        &claim_id,
        serde_json::json!({
            "total_amount": total_amount,
            "item_count": drafts.len(),
        }),
        employee_id,
    );
    let _ = insert_event(&tx, &event);

    tx.commit()?;

    Ok(Claim {
        id: claim_id,
        employee_id: employee_id.to_string(),
        total_amount,
        status: ClaimStatus::Submitted,
        submitted_at,
        approved_at: None,
        expenses,
    })
}

// ============================================================================
// TRANSITIONS
// ============================================================================

/// Approve a submitted claim. Admin only; terminal claims conflict.
pub fn approve(conn: &Connection, claim_id: &str, acting_role: Role) -> AppResult<Claim> {
    transition(conn, claim_id, acting_role, ClaimStatus::Approved)
}

/// Reject a submitted claim. Admin only; terminal claims conflict.
/// No rejection timestamp is recorded.
pub fn reject(conn: &Connection, claim_id: &str, acting_role: Role) -> AppResult<Claim> {
    transition(conn, claim_id, acting_role, ClaimStatus::Rejected)
}

fn transition(
    conn: &Connection,
    claim_id: &str,
    acting_role: Role,
    target: ClaimStatus,
) -> AppResult<Claim> {
    if !acting_role.is_admin() {
        return Err(AppError::Authorization(
            "Only an admin can decide a claim".to_string(),
        ));
    }

    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM reimbursements WHERE id = ?1",
            params![claim_id],
            |row| row.get(0),
        )
        .optional()?;

    let current: ClaimStatus = match current {
        Some(s) => s.parse()?,
        None => return Err(AppError::not_found("reimbursement", claim_id)),
    };

    if current.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Claim is already {}",
            current
        )));
    }

    let approved_at = match target {
        ClaimStatus::Approved => Some(Utc::now().to_rfc3339()),
        _ => None,
    };

    conn.execute(
        "UPDATE reimbursements SET status = ?1, approved_at = ?2 WHERE id = ?3",
        params![target.as_str(), approved_at, claim_id],
    )?;

    let event = Event::new(
        match target {
            ClaimStatus::Approved => "claim_approved",
            _ => "claim_rejected",
        },
        "reimbursement",
        claim_id,
        serde_json::json!({}),
        "admin",
    );
    let _ = insert_event(conn, &event);

    load_claim(conn, claim_id)?.ok_or_else(|| AppError::not_found("reimbursement", claim_id))
}

// ============================================================================
// QUERIES
// ============================================================================

/// Claims visible to the requester: admins see all, everyone else only their
/// own. Newest first.
pub fn list(conn: &Connection, requester_id: &str, role: Role) -> AppResult<Vec<Claim>> {
    let mut claims = if role.is_admin() {
        let mut stmt = conn.prepare(
            "SELECT id, employee_id, total_amount, status, submitted_at, approved_at
             FROM reimbursements ORDER BY submitted_at DESC",
        )?;
        let rows = stmt
            .query_map([], claim_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    } else {
        let mut stmt = conn.prepare(
            "SELECT id, employee_id, total_amount, status, submitted_at, approved_at
             FROM reimbursements WHERE employee_id = ?1 ORDER BY submitted_at DESC",
        )?;
        let rows = stmt
            .query_map(params![requester_id], claim_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    for claim in &mut claims {
        claim.expenses = expenses_of(conn, &claim.id)?;
    }

    Ok(claims)
}

/// Fetch one claim. NotFound when absent; Authorization unless the requester
/// is an admin or the owning employee.
pub fn get(
    conn: &Connection,
    claim_id: &str,
    requester_id: &str,
    role: Role,
) -> AppResult<Claim> {
    let claim = load_claim(conn, claim_id)?
        .ok_or_else(|| AppError::not_found("reimbursement", claim_id))?;

    if !role.is_admin() && claim.employee_id != requester_id {
        return Err(AppError::Authorization(
            "Not permitted to view this claim".to_string(),
        ));
    }

    Ok(claim)
}

fn load_claim(conn: &Connection, claim_id: &str) -> AppResult<Option<Claim>> {
    let claim = conn
        .query_row(
            "SELECT id, employee_id, total_amount, status, submitted_at, approved_at
             FROM reimbursements WHERE id = ?1",
            params![claim_id],
            claim_from_row,
        )
        .optional()?;

    match claim {
        Some(mut claim) => {
            claim.expenses = expenses_of(conn, &claim.id)?;
            Ok(Some(claim))
        }
        None => Ok(None),
    }
}

fn expenses_of(conn: &Connection, claim_id: &str) -> AppResult<Vec<Expense>> {
    let mut stmt = conn.prepare(
        "SELECT id, reimbursement_id, vendor, date, amount, category, description
         FROM expenses WHERE reimbursement_id = ?1 ORDER BY position ASC",
    )?;

    let expenses = stmt
        .query_map(params![claim_id], |row| {
            let date_str: String = row.get(3)?;
            let category_str: String = row.get(5)?;

            Ok(Expense {
                id: row.get(0)?,
                reimbursement_id: row.get(1)?,
                vendor: row.get(2)?,
                date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                amount: row.get(4)?,
                category: category_str
                    .parse()
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                description: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(expenses)
}

fn claim_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Claim> {
    let status_str: String = row.get(3)?;
    let submitted_at: String = row.get(4)?;
    let approved_at: Option<String> = row.get(5)?;

    Ok(Claim {
        id: row.get(0)?,
        employee_id: row.get(1)?,
        total_amount: row.get(2)?,
        status: status_str
            .parse()
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        submitted_at: DateTime::parse_from_rfc3339(&submitted_at)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc),
        approved_at: approved_at
            .as_deref()
            .map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| rusqlite::Error::InvalidQuery)
            })
            .transpose()?,
        expenses: Vec::new(),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::limits::set_limit;
    use crate::org::{create_designation, create_employee, NewEmployee};

    fn draft(vendor: &str, amount: f64, category: Option<Category>) -> ExpenseDraft {
        ExpenseDraft {
            vendor: vendor.to_string(),
            date: "2026-03-15".to_string(),
            amount,
            category,
            description: None,
            document_ids: Vec::new(),
        }
    }

    /// Employee under a designation with limits {general: 500, travel: 1000,
    /// total: 2000}. Returns (conn, employee_id).
    fn engineer_fixture() -> (Connection, String) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let designation = create_designation(&conn, "Software Engineer").unwrap();
        set_limit(&conn, &designation.id, "general", 500.0, None).unwrap();
        set_limit(&conn, &designation.id, "travel", 1000.0, None).unwrap();
        set_limit(&conn, &designation.id, "total", 2000.0, None).unwrap();

        let employee = create_employee(
            &conn,
            &NewEmployee {
                email: "ana@example.com".to_string(),
                password: "secret123".to_string(),
                name: "Ana".to_string(),
                role: None,
                designation_id: Some(designation.id.clone()),
            },
        )
        .unwrap();

        (conn, employee.id)
    }

    fn row_counts(conn: &Connection) -> (i64, i64) {
        let claims: i64 = conn
            .query_row("SELECT COUNT(*) FROM reimbursements", [], |r| r.get(0))
            .unwrap();
        let expenses: i64 = conn
            .query_row("SELECT COUNT(*) FROM expenses", [], |r| r.get(0))
            .unwrap();
        (claims, expenses)
    }

    #[test]
    fn test_submit_persists_claim_with_total() {
        let (mut conn, employee_id) = engineer_fixture();

        let claim = submit(
            &mut conn,
            &employee_id,
            &[
                draft("Uber", 350.0, Some(Category::Travel)),
                draft("Office", 150.0, Some(Category::General)),
            ],
        )
        .unwrap();

        assert_eq!(claim.status, ClaimStatus::Submitted);
        assert_eq!(claim.total_amount, 500.0);
        assert_eq!(claim.expenses.len(), 2);
        assert!(claim.expenses.iter().all(|e| !e.id.is_empty()));

        // Total on the stored row matches the sum of the line items
        let stored = get(&conn, &claim.id, &employee_id, Role::Employee).unwrap();
        let sum: f64 = stored.expenses.iter().map(|e| e.amount).sum();
        assert_eq!(stored.total_amount, sum);
    }

    #[test]
    fn test_failed_submission_persists_nothing() {
        let (mut conn, employee_id) = engineer_fixture();

        let err = submit(
            &mut conn,
            &employee_id,
            &[
                draft("Uber", 100.0, Some(Category::Travel)),
                draft("BigPurchase", 600.0, None),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds limit of 500"));

        assert_eq!(row_counts(&conn), (0, 0), "All-or-nothing: store unchanged");
    }

    #[test]
    fn test_category_defaults_to_general() {
        let (mut conn, employee_id) = engineer_fixture();

        let claim = submit(&mut conn, &employee_id, &[draft("Office", 100.0, None)]).unwrap();
        assert_eq!(claim.expenses[0].category, Category::General);
    }

    #[test]
    fn test_no_designation_employee_is_uncapped() {
        let (mut conn, _) = engineer_fixture();
        let loner = create_employee(
            &conn,
            &NewEmployee {
                email: "loner@example.com".to_string(),
                password: "secret123".to_string(),
                name: "Loner".to_string(),
                role: None,
                designation_id: None,
            },
        )
        .unwrap();

        let claim = submit(&mut conn, &loner.id, &[draft("Anything", 99_999.0, None)]).unwrap();
        assert_eq!(claim.total_amount, 99_999.0);
    }

    #[test]
    fn test_approve_stamps_timestamp_and_guards_terminal() {
        let (mut conn, employee_id) = engineer_fixture();
        let claim = submit(&mut conn, &employee_id, &[draft("Office", 100.0, None)]).unwrap();

        // Non-admin cannot decide
        let err = approve(&conn, &claim.id, Role::Employee).unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));

        let approved = approve(&conn, &claim.id, Role::Admin).unwrap();
        assert_eq!(approved.status, ClaimStatus::Approved);
        assert!(approved.approved_at.is_some());

        // Re-deciding a terminal claim conflicts
        let err = approve(&conn, &claim.id, Role::Admin).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let err = reject(&conn, &claim.id, Role::Admin).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // An employee trying to reject the approved claim is denied on role,
        // before the terminal-state guard is even reached
        let err = reject(&conn, &claim.id, Role::Employee).unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
    }

    #[test]
    fn test_reject_has_no_timestamp() {
        let (mut conn, employee_id) = engineer_fixture();
        let claim = submit(&mut conn, &employee_id, &[draft("Office", 100.0, None)]).unwrap();

        let rejected = reject(&conn, &claim.id, Role::Admin).unwrap();
        assert_eq!(rejected.status, ClaimStatus::Rejected);
        assert!(rejected.approved_at.is_none());
    }

    #[test]
    fn test_transition_on_missing_claim() {
        let (conn, _) = engineer_fixture();
        let err = approve(&conn, "missing", Role::Admin).unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn test_list_scoping_and_order() {
        let (mut conn, ana) = engineer_fixture();
        let bob = create_employee(
            &conn,
            &NewEmployee {
                email: "bob@example.com".to_string(),
                password: "secret123".to_string(),
                name: "Bob".to_string(),
                role: None,
                designation_id: None,
            },
        )
        .unwrap();

        let first = submit(&mut conn, &ana, &[draft("Office", 10.0, None)]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = submit(&mut conn, &bob.id, &[draft("Cafe", 20.0, None)]).unwrap();

        // Admin sees all, newest first
        let all = list(&conn, "whoever", Role::Admin).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);

        // Employee sees only their own
        let mine = list(&conn, &ana, Role::Employee).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, first.id);
        assert_eq!(mine[0].expenses.len(), 1);
    }

    #[test]
    fn test_get_authorization() {
        let (mut conn, ana) = engineer_fixture();
        let claim = submit(&mut conn, &ana, &[draft("Office", 10.0, None)]).unwrap();

        // Owner and admin may read
        assert!(get(&conn, &claim.id, &ana, Role::Employee).is_ok());
        assert!(get(&conn, &claim.id, "someone-else", Role::Admin).is_ok());

        // Stranger may not
        let err = get(&conn, &claim.id, "someone-else", Role::Employee).unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));

        // Absent claim is NotFound even for admins
        let err = get(&conn, "missing", "whoever", Role::Admin).unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn test_submit_links_documents_best_effort() {
        let (mut conn, employee_id) = engineer_fixture();

        conn.execute(
            "INSERT INTO documents (id, file_name, file_url, file_type, content_hash, uploaded_at)
             VALUES ('doc1', 'receipt.png', '/uploads/receipt.png', 'image/png', 'h', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let mut d = draft("Uber", 100.0, Some(Category::Travel));
        d.document_ids = vec!["doc1".to_string(), "missing-doc".to_string()];

        let claim = submit(&mut conn, &employee_id, &[d]).unwrap();

        let linked: Option<String> = conn
            .query_row("SELECT expense_id FROM documents WHERE id = 'doc1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(linked.as_deref(), Some(claim.expenses[0].id.as_str()));
    }

    #[test]
    fn test_lifecycle_leaves_audit_trail() {
        use crate::db::get_events_for_entity;

        let (mut conn, employee_id) = engineer_fixture();

        let claim = submit(&mut conn, &employee_id, &[draft("Dell", 300.0, None)]).unwrap();
        approve(&conn, &claim.id, Role::Admin).unwrap();

        let events = get_events_for_entity(&conn, "reimbursement", &claim.id).unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(types.contains(&"claim_submitted"));
        assert!(types.contains(&"claim_approved"));
        assert!(events.iter().all(|e| e.entity_id == claim.id));
    }
}
