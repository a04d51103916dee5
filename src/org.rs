// Designations and employees - the organizational reference data every
// submission is checked against.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::auth::{hash_password, Role};
use crate::error::{AppError, AppResult};

// ============================================================================
// DESIGNATIONS
// ============================================================================

/// Organizational grade. Limits hang off a designation; employees reference
/// one (or none).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Designation {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Designation plus how many employees currently hold it.
#[derive(Debug, Clone, Serialize)]
pub struct DesignationWithCount {
    #[serde(flatten)]
    pub designation: Designation,
    pub employee_count: i64,
}

pub fn create_designation(conn: &Connection, name: &str) -> AppResult<Designation> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("Name is required"));
    }

    let designation = Designation {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        created_at: Utc::now(),
    };

    let result = conn.execute(
        "INSERT INTO designations (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![
            designation.id,
            designation.name,
            designation.created_at.to_rfc3339()
        ],
    );

    match result {
        Ok(_) => Ok(designation),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(AppError::Conflict(format!(
                "Designation \"{}\" already exists",
                name
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// All designations with employee counts, ordered by name.
pub fn list_designations(conn: &Connection) -> AppResult<Vec<DesignationWithCount>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.name, d.created_at, COUNT(e.id)
         FROM designations d
         LEFT JOIN employees e ON e.designation_id = d.id
         GROUP BY d.id
         ORDER BY d.name ASC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            let created_at: String = row.get(2)?;
            Ok(DesignationWithCount {
                designation: Designation {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?
                        .with_timezone(&Utc),
                },
                employee_count: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

// ============================================================================
// EMPLOYEES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Employee {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub designation_id: Option<String>,
    /// Designation name, resolved on read.
    pub designation: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEmployee {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub designation_id: Option<String>,
}

pub fn create_employee(conn: &Connection, new: &NewEmployee) -> AppResult<Employee> {
    if new.email.trim().is_empty() || new.password.is_empty() || new.name.trim().is_empty() {
        return Err(AppError::validation("Missing required fields"));
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM employees WHERE email = ?1",
            params![new.email],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Err(AppError::Conflict("Email already exists".to_string()));
    }

    let password_hash = hash_password(&new.password)?;
    let role = new.role.unwrap_or(Role::Employee);
    let id = uuid::Uuid::new_v4().to_string();
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO employees (id, email, name, password_hash, role, designation_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            new.email,
            new.name,
            password_hash,
            role.as_str(),
            new.designation_id,
            created_at.to_rfc3339()
        ],
    )?;

    get_employee(conn, &id)
}

/// All employees, newest first.
pub fn list_employees(conn: &Connection) -> AppResult<Vec<Employee>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.email, e.name, e.role, e.designation_id, d.name, e.created_at
         FROM employees e
         LEFT JOIN designations d ON d.id = e.designation_id
         ORDER BY e.created_at DESC",
    )?;

    let rows = stmt
        .query_map([], employee_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub fn get_employee(conn: &Connection, id: &str) -> AppResult<Employee> {
    conn.query_row(
        "SELECT e.id, e.email, e.name, e.role, e.designation_id, d.name, e.created_at
         FROM employees e
         LEFT JOIN designations d ON d.id = e.designation_id
         WHERE e.id = ?1",
        params![id],
        employee_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("employee", id))
}

/// The designation an employee holds, if any. None means every limit check
/// is bypassed for their submissions.
pub fn designation_of(conn: &Connection, employee_id: &str) -> AppResult<Option<String>> {
    let designation_id: Option<Option<String>> = conn
        .query_row(
            "SELECT designation_id FROM employees WHERE id = ?1",
            params![employee_id],
            |row| row.get(0),
        )
        .optional()?;

    match designation_id {
        Some(d) => Ok(d),
        None => Err(AppError::not_found("employee", employee_id)),
    }
}

fn employee_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Employee> {
    let role_str: String = row.get(3)?;
    let created_at: String = row.get(6)?;

    Ok(Employee {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        role: role_str.parse().map_err(|_| rusqlite::Error::InvalidQuery)?,
        designation_id: row.get(4)?,
        designation: row.get(5)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc),
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
        conn
    }

    fn new_employee(email: &str, designation_id: Option<String>) -> NewEmployee {
        NewEmployee {
            email: email.to_string(),
            password: "secret123".to_string(),
            name: "Test Person".to_string(),
            role: None,
            designation_id,
        }
    }

    #[test]
    fn test_duplicate_designation_name_conflicts() {
        let conn = test_conn();

        create_designation(&conn, "Engineer").unwrap();
        let err = create_designation(&conn, "Engineer").unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = create_designation(&conn, "  ").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_designation_listing_with_counts() {
        let conn = test_conn();

        let eng = create_designation(&conn, "Engineer").unwrap();
        create_designation(&conn, "Analyst").unwrap();

        create_employee(&conn, &new_employee("a@example.com", Some(eng.id.clone()))).unwrap();
        create_employee(&conn, &new_employee("b@example.com", Some(eng.id.clone()))).unwrap();

        let list = list_designations(&conn).unwrap();
        assert_eq!(list.len(), 2);
        // Ordered by name: Analyst first
        assert_eq!(list[0].designation.name, "Analyst");
        assert_eq!(list[0].employee_count, 0);
        assert_eq!(list[1].designation.name, "Engineer");
        assert_eq!(list[1].employee_count, 2);
    }

    #[test]
    fn test_duplicate_email_conflicts() {
        let conn = test_conn();

        create_employee(&conn, &new_employee("a@example.com", None)).unwrap();
        let err = create_employee(&conn, &new_employee("a@example.com", None)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_employee_defaults_and_designation() {
        let conn = test_conn();
        let eng = create_designation(&conn, "Engineer").unwrap();

        let emp = create_employee(&conn, &new_employee("a@example.com", Some(eng.id.clone())))
            .unwrap();
        assert_eq!(emp.role, Role::Employee);
        assert_eq!(emp.designation.as_deref(), Some("Engineer"));

        assert_eq!(designation_of(&conn, &emp.id).unwrap(), Some(eng.id));

        let loner = create_employee(&conn, &new_employee("b@example.com", None)).unwrap();
        assert_eq!(designation_of(&conn, &loner.id).unwrap(), None);

        assert!(matches!(
            designation_of(&conn, "missing").unwrap_err(),
            AppError::NotFound { .. }
        ));
    }
}
