use anyhow::{Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::Path;

use claimdesk::{
    create_designation, create_employee, get_events_for_entity, set_limit, setup_database,
    NewEmployee, Role,
};

const DB_PATH: &str = "claimdesk.db";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("seed") => run_seed(),
        Some("stats") => run_stats(),
        Some("events") => match args.get(2) {
            Some(entity_id) => run_events(entity_id),
            None => {
                eprintln!("❌ Usage: claimdesk events <entity-id>");
                std::process::exit(1);
            }
        },
        _ => {
            println!("claimdesk v{}", claimdesk::VERSION);
            println!();
            println!("Usage:");
            println!("  claimdesk seed          Initialize the database with sample data");
            println!("  claimdesk stats         Print claim counts by status");
            println!("  claimdesk events <id>   Show the audit trail for a claim or limit");
            println!();
            println!("  claimdesk-server  Run the REST API (requires --features server)");
            Ok(())
        }
    }
}

fn run_seed() -> Result<()> {
    println!("🗄️  Seeding database at {}", DB_PATH);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = Connection::open(DB_PATH).context("Failed to open database")?;
    setup_database(&conn)?;
    println!("✓ Database initialized with WAL mode");

    // Designations
    let engineer = create_designation(&conn, "Software Engineer")?;
    let senior = create_designation(&conn, "Senior Engineer")?;
    let manager = create_designation(&conn, "Engineering Manager")?;
    println!("✓ Created 3 designations");

    // Limits per designation: (category, max)
    let limit_rows = [
        (&engineer.id, "general", 500.0),
        (&engineer.id, "travel", 1000.0),
        (&engineer.id, "total", 2000.0),
        (&senior.id, "general", 1000.0),
        (&senior.id, "travel", 2000.0),
        (&senior.id, "total", 5000.0),
        (&manager.id, "general", 2000.0),
        (&manager.id, "travel", 5000.0),
        (&manager.id, "total", 10000.0),
    ];
    for (designation_id, category, max_amount) in limit_rows {
        set_limit(&conn, designation_id, category, max_amount, Some("monthly"))?;
    }
    println!("✓ Created limits for all designations");

    // Accounts
    create_employee(
        &conn,
        &NewEmployee {
            email: "admin@example.com".to_string(),
            password: "admin123".to_string(),
            name: "Admin".to_string(),
            role: Some(Role::Admin),
            designation_id: None,
        },
    )?;

    create_employee(
        &conn,
        &NewEmployee {
            email: "employee@example.com".to_string(),
            password: "employee123".to_string(),
            name: "Sample Employee".to_string(),
            role: Some(Role::Employee),
            designation_id: Some(engineer.id.clone()),
        },
    )?;
    println!("✓ Created admin and sample employee accounts");

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🎉 Seed complete!");
    println!("   admin@example.com / admin123");
    println!("   employee@example.com / employee123");

    Ok(())
}

fn run_events(entity_id: &str) -> Result<()> {
    let db_path = Path::new(DB_PATH);
    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: claimdesk seed");
        std::process::exit(1);
    }

    let conn = Connection::open(db_path)?;

    let mut events = Vec::new();
    for entity_type in ["reimbursement", "limit"] {
        events.extend(get_events_for_entity(&conn, entity_type, entity_id)?);
    }

    println!("📜 Audit trail for {}", entity_id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if events.is_empty() {
        println!("No events recorded.");
    } else {
        for event in events {
            println!(
                "{}  {:<16} by {:<12} {}",
                event.timestamp.to_rfc3339(),
                event.event_type,
                event.actor,
                event.data
            );
        }
    }

    Ok(())
}

fn run_stats() -> Result<()> {
    let db_path = Path::new(DB_PATH);
    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: claimdesk seed");
        std::process::exit(1);
    }

    let conn = Connection::open(db_path)?;

    println!("📊 Claim statistics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*), COALESCE(SUM(total_amount), 0)
         FROM reimbursements GROUP BY status ORDER BY status",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        println!("No claims submitted yet.");
    } else {
        for (status, count, total) in rows {
            println!("{:<12} {:>4} claims   total {:.2}", status, count, total);
        }
    }

    Ok(())
}
