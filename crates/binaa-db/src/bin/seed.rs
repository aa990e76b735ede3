//! # Seed Data Generator
//!
//! Populates the database with the Sana'a administrative hierarchy, demo
//! user assignments and a handful of field records for development.
//!
//! ## Usage
//! ```bash
//! cargo run -p binaa-db --bin seed
//!
//! # Specify database path
//! cargo run -p binaa-db --bin seed -- --db ./data/binaa.db
//! ```
//!
//! ## Generated Data
//! - 1 governorate (Sana'a) with 3 districts, 2 sub-districts each,
//!   3 neighborhoods per sub-district
//! - Assignments:
//!   - `surveyor-1` → district Shu'ub
//!   - `engineer-1` → one neighborhood of Shu'ub
//!   - `manager-1`  → governorate Sana'a
//! - One field visit per neighborhood, one appointment per demo user

use binaa_core::{GeoLevel, GeographicAssignment, SyncRecord};
use binaa_db::{now, Database, DbConfig};
use serde_json::json;
use std::env;
use uuid::Uuid;

/// Districts of Sana'a and their sub-districts.
const DISTRICTS: &[(&str, &str, &[&str])] = &[
    ("shuub", "Shu'ub", &["Al-Jiraf", "Al-Rawdah"]),
    ("maeen", "Ma'een", &["Hadda", "Al-Asbahi"]),
    ("tahrir", "Al-Tahrir", &["Bab Al-Yemen", "Al-Qa'"]),
];

const NEIGHBORHOODS_PER_SUB_DISTRICT: usize = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./binaa_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Binaa Field Sync Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./binaa_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Binaa Field Sync Seed Data Generator");
    println!("====================================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let geo = db.geography();
    let existing = geo.count(GeoLevel::Governorate).await?;
    if existing > 0 {
        println!("⚠ Database already has {} governorates", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let at = now();
    let start = std::time::Instant::now();

    geo.insert_entity(GeoLevel::Governorate, "gov-sanaa", None, "Sana'a")
        .await?;

    let mut neighborhoods = Vec::new();
    for (district_id, district_name, sub_districts) in DISTRICTS {
        let district_id = format!("dist-{}", district_id);
        geo.insert_entity(GeoLevel::District, &district_id, Some("gov-sanaa"), district_name)
            .await?;

        for (s, sub_name) in sub_districts.iter().enumerate() {
            let sub_id = format!("{}-sub-{}", district_id, s + 1);
            geo.insert_entity(GeoLevel::SubDistrict, &sub_id, Some(district_id.as_str()), sub_name)
                .await?;

            for n in 0..NEIGHBORHOODS_PER_SUB_DISTRICT {
                let nb_id = format!("{}-nb-{}", sub_id, n + 1);
                let nb_name = format!("{} {}", sub_name, n + 1);
                geo.insert_entity(GeoLevel::Neighborhood, &nb_id, Some(sub_id.as_str()), &nb_name)
                    .await?;
                neighborhoods.push((district_id.clone(), sub_id.clone(), nb_id));
            }
        }
    }
    println!("✓ Hierarchy: {} neighborhoods", neighborhoods.len());

    let assignments = [
        ("surveyor-1", None, Some("dist-shuub"), None),
        ("engineer-1", None, None, Some("dist-shuub-sub-1-nb-1")),
        ("manager-1", Some("gov-sanaa"), None, None),
    ];
    for (user_id, governorate, district, neighborhood) in assignments {
        geo.insert_assignment(&GeographicAssignment {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            governorate_id: governorate.map(str::to_string),
            district_id: district.map(str::to_string),
            sub_district_id: None,
            neighborhood_id: neighborhood.map(str::to_string),
            assignment_type: "primary".to_string(),
            start_date: at,
            end_date: None,
            is_active: true,
        })
        .await?;
    }
    println!("✓ Assignments: {}", assignments.len());

    let records = db.records();
    for (district_id, sub_id, nb_id) in &neighborhoods {
        let visit = SyncRecord::from_payload(
            Uuid::new_v4().to_string(),
            json!({
                "governorate_id": "gov-sanaa",
                "district_id": district_id,
                "sub_district_id": sub_id,
                "neighborhood_id": nb_id,
                "status": "scheduled",
                "notes": "Initial inspection"
            }),
            Some("manager-1".to_string()),
        );
        if let Err(e) = records.upsert("field_visits", &visit, at).await {
            eprintln!("Failed to insert visit {}: {}", visit.id, e);
        }
    }

    for assignee in ["surveyor-1", "engineer-1"] {
        let appointment = SyncRecord::from_payload(
            Uuid::new_v4().to_string(),
            json!({
                "assigned_user_id": assignee,
                "purpose": "Site measurement",
            }),
            Some("citizen-1".to_string()),
        );
        records.upsert("appointments", &appointment, at).await?;
    }

    let elapsed = start.elapsed();
    println!();
    println!("✓ Seed complete in {:.2?}", elapsed);

    db.close().await;
    Ok(())
}
