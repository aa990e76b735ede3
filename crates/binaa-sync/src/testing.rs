//! Fixtures shared by the engine tests.
//!
//! ```text
//!   gov-sanaa ─┬─ dist-shuub ── sub-x ─┬─ nb-y
//!              │                       └─ nb-y2
//!              └─ dist-maeen ── sub-m ─── nb-m
//!   gov-aden ──── dist-aden ─── sub-aden ─ nb-aden
//! ```

use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use binaa_core::{
    Device, GeoLevel, GeographicAssignment, SessionStatus, SessionType, SyncRecord, SyncSession,
};
use binaa_db::{now, Database, DbConfig};

pub(crate) async fn test_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub(crate) async fn seed_hierarchy(db: &Database) {
    let geo = db.geography();
    let entities: [(GeoLevel, &str, Option<&str>); 12] = [
        (GeoLevel::Governorate, "gov-sanaa", None),
        (GeoLevel::Governorate, "gov-aden", None),
        (GeoLevel::District, "dist-shuub", Some("gov-sanaa")),
        (GeoLevel::District, "dist-maeen", Some("gov-sanaa")),
        (GeoLevel::District, "dist-aden", Some("gov-aden")),
        (GeoLevel::SubDistrict, "sub-x", Some("dist-shuub")),
        (GeoLevel::SubDistrict, "sub-m", Some("dist-maeen")),
        (GeoLevel::SubDistrict, "sub-aden", Some("dist-aden")),
        (GeoLevel::Neighborhood, "nb-y", Some("sub-x")),
        (GeoLevel::Neighborhood, "nb-y2", Some("sub-x")),
        (GeoLevel::Neighborhood, "nb-m", Some("sub-m")),
        (GeoLevel::Neighborhood, "nb-aden", Some("sub-aden")),
    ];
    for (level, id, parent) in entities {
        geo.insert_entity(level, id, parent, id).await.unwrap();
    }
}

/// Active assignment that started yesterday and never ends.
pub(crate) async fn assign(db: &Database, user_id: &str, level: GeoLevel, id: &str) {
    let mut assignment = GeographicAssignment {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        governorate_id: None,
        district_id: None,
        sub_district_id: None,
        neighborhood_id: None,
        assignment_type: "primary".to_string(),
        start_date: now() - Duration::days(1),
        end_date: None,
        is_active: true,
    };
    let slot = match level {
        GeoLevel::Governorate => &mut assignment.governorate_id,
        GeoLevel::District => &mut assignment.district_id,
        GeoLevel::SubDistrict => &mut assignment.sub_district_id,
        GeoLevel::Neighborhood => &mut assignment.neighborhood_id,
    };
    *slot = Some(id.to_string());
    db.geography().insert_assignment(&assignment).await.unwrap();
}

/// Full location path of a fixture neighborhood.
pub(crate) fn path(neighborhood: &str) -> (&'static str, &'static str, &'static str) {
    match neighborhood {
        "nb-y" | "nb-y2" => ("gov-sanaa", "dist-shuub", "sub-x"),
        "nb-m" => ("gov-sanaa", "dist-maeen", "sub-m"),
        _ => ("gov-aden", "dist-aden", "sub-aden"),
    }
}

/// Field visit payload located in a fixture neighborhood.
pub(crate) fn visit_payload(neighborhood: &str) -> serde_json::Value {
    let (gov, district, sub) = path(neighborhood);
    json!({
        "governorate_id": gov,
        "district_id": district,
        "sub_district_id": sub,
        "neighborhood_id": neighborhood,
        "notes": "site inspection",
    })
}

pub(crate) fn located(id: &str, neighborhood: &str) -> SyncRecord {
    SyncRecord::from_payload(id, visit_payload(neighborhood), None)
}

pub(crate) async fn add_device(db: &Database, id: &str, user_id: &str) -> Device {
    let at = now();
    let device = Device {
        id: id.to_string(),
        user_id: user_id.to_string(),
        platform: "android".to_string(),
        os_version: Some("14".to_string()),
        app_version: Some("2.3.0".to_string()),
        model: None,
        is_active: true,
        last_sync_at: None,
        registered_at: at,
        updated_at: at,
    };
    db.devices().insert(&device).await.unwrap();
    device
}

pub(crate) async fn open_session(db: &Database, device_id: &str, user_id: &str) -> SyncSession {
    let session = SyncSession {
        id: Uuid::new_v4().to_string(),
        device_id: device_id.to_string(),
        user_id: user_id.to_string(),
        session_type: SessionType::Incremental,
        status: SessionStatus::Active,
        started_at: now(),
        ended_at: None,
        total_operations: 0,
        successful_operations: 0,
        failed_operations: 0,
        conflict_operations: 0,
        failure_reason: None,
    };
    db.sessions().insert(&session).await.unwrap();
    session
}
