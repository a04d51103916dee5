// Limit Registry - per-designation spending caps
// One row per (designation, category); the special "total" category caps the
// whole submission rather than a single line item.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{insert_event, Event};
use crate::error::{AppError, AppResult};

// ============================================================================
// CATEGORIES
// ============================================================================

/// Classification tag on an expense line item. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    General,
    Travel,
    Meals,
    Supplies,
    Lodging,
    Transport,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Travel => "travel",
            Category::Meals => "meals",
            Category::Supplies => "supplies",
            Category::Lodging => "lodging",
            Category::Transport => "transport",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Category::General),
            "travel" => Ok(Category::Travel),
            "meals" => Ok(Category::Meals),
            "supplies" => Ok(Category::Supplies),
            "lodging" => Ok(Category::Lodging),
            "transport" => Ok(Category::Transport),
            other => Err(AppError::validation(format!(
                "Unknown expense category: {}",
                other
            ))),
        }
    }
}

/// A limit's category: either a per-item category or the aggregate "total".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LimitCategory {
    Item(Category),
    Total,
}

impl LimitCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitCategory::Item(c) => c.as_str(),
            LimitCategory::Total => "total",
        }
    }
}

impl fmt::Display for LimitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("total") {
            return Ok(LimitCategory::Total);
        }
        Ok(LimitCategory::Item(s.parse()?))
    }
}

impl TryFrom<String> for LimitCategory {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LimitCategory> for String {
    fn from(c: LimitCategory) -> String {
        c.as_str().to_string()
    }
}

// ============================================================================
// PERIOD
// ============================================================================

/// Renewal period. Informational only - the validator does not implement
/// period-rollover accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Monthly,
    Yearly,
}

impl Default for Period {
    fn default() -> Self {
        Period::Monthly
    }
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Monthly => "monthly",
            Period::Yearly => "yearly",
        }
    }
}

impl FromStr for Period {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(Period::Monthly),
            "yearly" => Ok(Period::Yearly),
            other => Err(AppError::validation(format!(
                "Unknown limit period: {}",
                other
            ))),
        }
    }
}

// ============================================================================
// LIMIT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limit {
    pub id: String,
    pub designation_id: String,
    pub category: LimitCategory,
    pub max_amount: f64,
    pub period: Period,
}

/// Limit row joined with its designation name, for the admin listing.
#[derive(Debug, Clone, Serialize)]
pub struct LimitWithDesignation {
    #[serde(flatten)]
    pub limit: Limit,
    pub designation_name: String,
}

// ============================================================================
// LIMIT SET - per-request snapshot for the validator
// ============================================================================

/// All limits of one designation, indexed for O(1) resolution.
///
/// Exact category match wins; otherwise the "general" limit applies if
/// present; otherwise the item is uncapped.
#[derive(Debug, Clone, Default)]
pub struct LimitSet {
    caps: HashMap<Category, f64>,
    total: Option<f64>,
}

impl LimitSet {
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty() && self.total.is_none()
    }

    /// Resolve the cap that applies to an item of the given category.
    /// Returns the matched limit's own category alongside the amount so a
    /// rejection can name the limit that fired (general when falling back).
    pub fn cap_for(&self, category: Category) -> Option<(Category, f64)> {
        if let Some(&max) = self.caps.get(&category) {
            return Some((category, max));
        }
        self.caps
            .get(&Category::General)
            .map(|&max| (Category::General, max))
    }

    /// The aggregate cap on a whole submission, if configured.
    pub fn total_cap(&self) -> Option<f64> {
        self.total
    }
}

// ============================================================================
// REGISTRY OPERATIONS
// ============================================================================

/// Create or replace the unique (designation, category) limit.
pub fn set_limit(
    conn: &Connection,
    designation_id: &str,
    category: &str,
    max_amount: f64,
    period: Option<&str>,
) -> AppResult<Limit> {
    let category: LimitCategory = category.parse()?;

    if !max_amount.is_finite() || max_amount <= 0.0 {
        return Err(AppError::validation(
            "Limit maxAmount must be a positive number",
        ));
    }

    let period = match period {
        Some(p) => p.parse()?,
        None => Period::default(),
    };

    let exists: Option<String> = conn
        .query_row(
            "SELECT id FROM designations WHERE id = ?1",
            params![designation_id],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(AppError::not_found("designation", designation_id));
    }

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO limits (id, designation_id, category, max_amount, period)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(designation_id, category)
         DO UPDATE SET max_amount = excluded.max_amount, period = excluded.period",
        params![
            id,
            designation_id,
            category.as_str(),
            max_amount,
            period.as_str()
        ],
    )?;

    // The upsert may have kept the original row id
    let limit = conn.query_row(
        "SELECT id, designation_id, category, max_amount, period
         FROM limits WHERE designation_id = ?1 AND category = ?2",
        params![designation_id, category.as_str()],
        limit_from_row,
    )?;

    let event = Event::new(
        "limit_set",
        "limit",
        &limit.id,
        serde_json::json!({
            "designation_id": designation_id,
            "category": category.as_str(),
            "max_amount": max_amount,
        }),
        "admin",
    );
    let _ = insert_event(conn, &event);

    Ok(limit)
}

/// Snapshot of all limits configured for a designation.
/// Empty set means no cap is enforced.
pub fn limits_for(conn: &Connection, designation_id: &str) -> AppResult<LimitSet> {
    let mut stmt = conn.prepare(
        "SELECT id, designation_id, category, max_amount, period
         FROM limits WHERE designation_id = ?1",
    )?;

    let limits = stmt
        .query_map(params![designation_id], limit_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut set = LimitSet::default();
    for limit in limits {
        match limit.category {
            LimitCategory::Item(c) => {
                set.caps.insert(c, limit.max_amount);
            }
            LimitCategory::Total => {
                set.total = Some(limit.max_amount);
            }
        }
    }

    Ok(set)
}

/// All limits across designations, ordered by designation name.
pub fn list_limits(conn: &Connection) -> AppResult<Vec<LimitWithDesignation>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.designation_id, l.category, l.max_amount, l.period, d.name
         FROM limits l
         JOIN designations d ON d.id = l.designation_id
         ORDER BY d.name ASC, l.category ASC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            let limit = limit_from_row(row)?;
            let designation_name: String = row.get(5)?;
            Ok(LimitWithDesignation {
                limit,
                designation_name,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn limit_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Limit> {
    let category_str: String = row.get(2)?;
    let period_str: String = row.get(4)?;

    Ok(Limit {
        id: row.get(0)?,
        designation_id: row.get(1)?,
        category: category_str
            .parse()
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        max_amount: row.get(3)?,
        period: period_str
            .parse()
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn.execute(
            "INSERT INTO designations (id, name, created_at)
             VALUES ('d1', 'Software Engineer', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("Travel".parse::<Category>().unwrap(), Category::Travel);
        assert_eq!(
            "total".parse::<LimitCategory>().unwrap(),
            LimitCategory::Total
        );
        assert!("groceries".parse::<Category>().is_err());
    }

    #[test]
    fn test_set_limit_rejects_bad_input() {
        let conn = test_conn();

        let err = set_limit(&conn, "d1", "travel", -5.0, None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = set_limit(&conn, "d1", "groceries", 100.0, None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = set_limit(&conn, "missing", "travel", 100.0, None).unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn test_upsert_replaces_amount() {
        let conn = test_conn();

        set_limit(&conn, "d1", "travel", 1000.0, Some("monthly")).unwrap();
        set_limit(&conn, "d1", "travel", 1500.0, Some("yearly")).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM limits", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1, "Upsert must keep exactly one row per (designation, category)");

        let set = limits_for(&conn, "d1").unwrap();
        let (cat, max) = set.cap_for(Category::Travel).unwrap();
        assert_eq!(cat, Category::Travel);
        assert_eq!(max, 1500.0);
    }

    #[test]
    fn test_cap_resolution_precedence() {
        let conn = test_conn();

        set_limit(&conn, "d1", "general", 500.0, None).unwrap();
        set_limit(&conn, "d1", "travel", 1000.0, None).unwrap();

        let set = limits_for(&conn, "d1").unwrap();

        // Exact match beats the general fallback
        assert_eq!(set.cap_for(Category::Travel), Some((Category::Travel, 1000.0)));
        // No meals limit -> falls back to general
        assert_eq!(set.cap_for(Category::Meals), Some((Category::General, 500.0)));
    }

    #[test]
    fn test_no_limits_means_no_cap() {
        let conn = test_conn();

        let set = limits_for(&conn, "d1").unwrap();
        assert!(set.is_empty());
        assert_eq!(set.cap_for(Category::Travel), None);
        assert_eq!(set.total_cap(), None);
    }

    #[test]
    fn test_total_cap_kept_separate() {
        let conn = test_conn();

        set_limit(&conn, "d1", "total", 2000.0, None).unwrap();

        let set = limits_for(&conn, "d1").unwrap();
        assert_eq!(set.total_cap(), Some(2000.0));
        // The total cap never applies to individual items
        assert_eq!(set.cap_for(Category::General), None);
    }
}
