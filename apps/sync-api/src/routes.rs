//! HTTP routes.
//!
//! ```text
//!   GET  /health
//!   ── bearer token required below ──────────────────────────────────────
//!   POST /sync/device                       register or refresh a device
//!   POST /sync/device/{id}/deactivate       admin / manager
//!   POST /sync/session                      open a session
//!   POST /sync/session/{id}/complete        close with counters
//!   POST /sync/session/{id}/fail            abort with a reason
//!   GET  /sync/session/{id}/conflicts       unresolved conflicts
//!   GET  /sync/changes?table=&since=&after_id=&limit=
//!                                           differential pull
//!   GET  /sync/scope                        caller's expanded scope
//!   POST /sync/operations                   push a batch
//!   POST /sync/conflicts/{id}/resolve       explicit resolution
//! ```

use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use binaa_core::access::Identity;
use binaa_core::{
    BulkApplyResult, ChangePage, Device, DeviceRegistration, GeographicScope, QueuedOperation,
    SessionStats, SessionType, SyncConflict, SyncSession,
};
use binaa_db::Database;
use binaa_sync::SyncEngine;

use crate::auth::{extract_bearer_token, JwtVerifier};
use crate::config::AuthSettings;
use crate::error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    db: Database,
    engine: SyncEngine,
    verifier: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(db: Database, engine: SyncEngine, auth: &AuthSettings) -> Self {
        AppState {
            db,
            engine,
            verifier: Arc::new(JwtVerifier::new(auth)),
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/device", post(register_device))
        .route("/device/{id}/deactivate", post(deactivate_device))
        .route("/session", post(open_session))
        .route("/session/{id}/complete", post(complete_session))
        .route("/session/{id}/fail", post(fail_session))
        .route("/session/{id}/conflicts", get(list_conflicts))
        .route("/changes", get(get_changes))
        .route("/scope", get(get_scope))
        .route("/operations", post(submit_operations))
        .route("/conflicts/{id}/resolve", post(resolve_conflict))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .nest("/sync", protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    let identity = state.verifier.verify(token)?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: bool,
    timestamp: i64,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = state.db.health_check().await;
    let (status, label) = if database {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        status,
        Json(HealthResponse {
            status: label,
            database,
            timestamp: Utc::now().timestamp(),
        }),
    )
}

// =============================================================================
// Devices
// =============================================================================

async fn register_device(
    State(state): State<AppState>,
    Extension(user): Extension<Identity>,
    Json(registration): Json<DeviceRegistration>,
) -> Result<Json<Device>, ApiError> {
    let device = state
        .engine
        .devices()
        .register_device(&user, &registration)
        .await?;
    Ok(Json(device))
}

async fn deactivate_device(
    State(state): State<AppState>,
    Extension(user): Extension<Identity>,
    Path(device_id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    let device = state
        .engine
        .devices()
        .deactivate_device(&user, &device_id)
        .await?;
    Ok(Json(device))
}

// =============================================================================
// Sessions
// =============================================================================

#[derive(Debug, Deserialize)]
struct OpenSessionRequest {
    device_id: String,
    #[serde(default = "default_session_type")]
    session_type: SessionType,
}

fn default_session_type() -> SessionType {
    SessionType::Incremental
}

#[derive(Debug, Serialize)]
struct OpenSessionResponse {
    session_id: String,
    #[serde(flatten)]
    session: SyncSession,
}

async fn open_session(
    State(state): State<AppState>,
    Extension(user): Extension<Identity>,
    Json(request): Json<OpenSessionRequest>,
) -> Result<(StatusCode, Json<OpenSessionResponse>), ApiError> {
    let session = state
        .engine
        .sessions()
        .create_session(&user, &request.device_id, request.session_type)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(OpenSessionResponse {
            session_id: session.id.clone(),
            session,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct CompleteSessionRequest {
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
    stats: SessionStats,
}

async fn complete_session(
    State(state): State<AppState>,
    Extension(user): Extension<Identity>,
    Path(session_id): Path<String>,
    Json(request): Json<CompleteSessionRequest>,
) -> Result<Json<SyncSession>, ApiError> {
    let session = state
        .engine
        .sessions()
        .complete_sync_session(&user, &session_id, request.end_time, &request.stats)
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct FailSessionRequest {
    reason: String,
}

async fn fail_session(
    State(state): State<AppState>,
    Extension(user): Extension<Identity>,
    Path(session_id): Path<String>,
    Json(request): Json<FailSessionRequest>,
) -> Result<Json<SyncSession>, ApiError> {
    let sessions = state.engine.sessions();
    sessions.active_session_for(&session_id, &user).await?;
    Ok(Json(sessions.fail_session(&session_id, &request.reason).await?))
}

async fn list_conflicts(
    State(state): State<AppState>,
    Extension(user): Extension<Identity>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<SyncConflict>>, ApiError> {
    let conflicts = state
        .engine
        .conflicts()
        .list_unresolved(&session_id, &user)
        .await?;
    Ok(Json(conflicts))
}

// =============================================================================
// Pull
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    table: String,
    #[serde(default)]
    since: Option<DateTime<Utc>>,
    #[serde(default)]
    after_id: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

async fn get_changes(
    State(state): State<AppState>,
    Extension(user): Extension<Identity>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<ChangePage>, ApiError> {
    let page = state
        .engine
        .changes()
        .get_changed_records(
            &query.table,
            query.since,
            query.after_id.as_deref(),
            query.limit,
            &user,
        )
        .await?;
    Ok(Json(page))
}

async fn get_scope(
    State(state): State<AppState>,
    Extension(user): Extension<Identity>,
) -> Result<Json<GeographicScope>, ApiError> {
    Ok(Json(state.engine.scope().expand_scope(&user.id).await?))
}

// =============================================================================
// Push
// =============================================================================

#[derive(Debug, Deserialize)]
struct SubmitOperationsRequest {
    session_id: String,
    table: String,
    operations: Vec<QueuedOperation>,
}

async fn submit_operations(
    State(state): State<AppState>,
    Extension(user): Extension<Identity>,
    Json(request): Json<SubmitOperationsRequest>,
) -> Result<Json<BulkApplyResult>, ApiError> {
    let result = state
        .engine
        .submit_operations(&user, &request.session_id, &request.table, request.operations)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct ResolveConflictRequest {
    strategy: String,
    resolved_data: Value,
}

async fn resolve_conflict(
    State(state): State<AppState>,
    Extension(user): Extension<Identity>,
    Path(conflict_id): Path<String>,
    Json(request): Json<ResolveConflictRequest>,
) -> Result<Json<SyncConflict>, ApiError> {
    let conflict = state
        .engine
        .conflicts()
        .resolve_sync_conflict(&conflict_id, &request.strategy, &request.resolved_data, &user)
        .await?;
    Ok(Json(conflict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{settings, token_for};
    use axum::body::Body;
    use axum::http::{header, Method};
    use binaa_core::{GeoLevel, GeographicAssignment, SyncRecord};
    use binaa_db::DbConfig;
    use binaa_sync::SyncSettings;
    use serde_json::json;
    use tower::ServiceExt;
    use uuid::Uuid;

    // gov-sanaa ── dist-shuub ── sub-x ── nb-y
    // gov-aden ─── dist-aden ─── sub-aden ─ nb-aden
    async fn test_app() -> (Database, Router) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let geo = db.geography();
        for (level, id, parent) in [
            (GeoLevel::Governorate, "gov-sanaa", None),
            (GeoLevel::Governorate, "gov-aden", None),
            (GeoLevel::District, "dist-shuub", Some("gov-sanaa")),
            (GeoLevel::District, "dist-aden", Some("gov-aden")),
            (GeoLevel::SubDistrict, "sub-x", Some("dist-shuub")),
            (GeoLevel::SubDistrict, "sub-aden", Some("dist-aden")),
            (GeoLevel::Neighborhood, "nb-y", Some("sub-x")),
            (GeoLevel::Neighborhood, "nb-aden", Some("sub-aden")),
        ] {
            geo.insert_entity(level, id, parent, id).await.unwrap();
        }
        geo.insert_assignment(&GeographicAssignment {
            id: Uuid::new_v4().to_string(),
            user_id: "surveyor-1".into(),
            governorate_id: None,
            district_id: Some("dist-shuub".into()),
            sub_district_id: None,
            neighborhood_id: None,
            assignment_type: "primary".into(),
            start_date: binaa_db::now() - chrono::Duration::days(1),
            end_date: None,
            is_active: true,
        })
        .await
        .unwrap();

        let engine = SyncEngine::new(db.clone(), SyncSettings::default()).unwrap();
        let app = app_router(AppState::new(db.clone(), engine, &settings()));
        (db, app)
    }

    fn visit(neighborhood: &str) -> Value {
        let (gov, district, sub) = match neighborhood {
            "nb-y" => ("gov-sanaa", "dist-shuub", "sub-x"),
            _ => ("gov-aden", "dist-aden", "sub-aden"),
        };
        json!({
            "governorate_id": gov,
            "district_id": district,
            "sub_district_id": sub,
            "neighborhood_id": neighborhood,
            "notes": "site inspection",
        })
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn open(app: &Router, token: &str) -> String {
        let (status, _) = call(
            app,
            Method::POST,
            "/sync/device",
            Some(token),
            Some(json!({ "device_id": "tab-001", "platform": "android" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            app,
            Method::POST,
            "/sync/session",
            Some(token),
            Some(json!({ "device_id": "tab-001", "session_type": "full" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (_db, app) = test_app().await;
        let (status, body) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_sync_routes_require_token() {
        let (_db, app) = test_app().await;
        let (status, body) = call(&app, Method::GET, "/sync/scope", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");

        let (status, _) = call(&app, Method::GET, "/sync/scope", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_scope_endpoint() {
        let (_db, app) = test_app().await;
        let token = token_for("surveyor-1", "surveyor");
        let (status, body) = call(&app, Method::GET, "/sync/scope", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["districts"], json!(["dist-shuub"]));
        assert_eq!(body["neighborhoods"], json!(["nb-y"]));
    }

    #[tokio::test]
    async fn test_full_sync_round() {
        let (db, app) = test_app().await;
        let token = token_for("surveyor-1", "surveyor");
        let session_id = open(&app, &token).await;

        // v-1 is at version 2 on the server
        for _ in 0..2 {
            db.records()
                .upsert(
                    "field_visits",
                    &SyncRecord::from_payload("v-1", visit("nb-y"), None),
                    binaa_db::now(),
                )
                .await
                .unwrap();
        }

        let op = |record_id: &str, kind: &str, base: Option<i64>, nb: &str| {
            json!({
                "id": Uuid::new_v4().to_string(),
                "record_id": record_id,
                "kind": kind,
                "local_timestamp": Utc::now().to_rfc3339(),
                "base_version": base,
                "after_data": visit(nb),
            })
        };
        let (status, result) = call(
            &app,
            Method::POST,
            "/sync/operations",
            Some(&token),
            Some(json!({
                "session_id": session_id,
                "table": "field_visits",
                "operations": [
                    op("v-new", "create", None, "nb-y"),
                    op("v-1", "update", Some(1), "nb-y"),
                    op("v-out", "create", None, "nb-aden"),
                ],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["success"], 1);
        assert_eq!(result["conflicts"], 1);
        assert_eq!(result["errors"], 1);
        assert_eq!(result["outcomes"].as_array().unwrap().len(), 3);

        let (status, page) = call(
            &app,
            Method::GET,
            "/sync/changes?table=field_visits&limit=10",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = page["records"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"v-1") && ids.contains(&"v-new"));

        let next = format!(
            "/sync/changes?table=field_visits&since={}&after_id={}",
            page["next_since"].as_str().unwrap(),
            page["next_id"].as_str().unwrap()
        );
        let (status, rest) = call(&app, Method::GET, &next, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(rest["records"].as_array().unwrap().is_empty());
        assert_eq!(rest["next_id"], page["next_id"]);

        let (status, conflicts) = call(
            &app,
            Method::GET,
            &format!("/sync/session/{session_id}/conflicts"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let conflict_id = conflicts[0]["id"].as_str().unwrap().to_string();

        let resolve = json!({ "strategy": "client_wins", "resolved_data": visit("nb-y") });
        let uri = format!("/sync/conflicts/{conflict_id}/resolve");
        let (status, resolved) =
            call(&app, Method::POST, &uri, Some(&token), Some(resolve.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved["status"], "resolved");

        let (status, body) = call(&app, Method::POST, &uri, Some(&token), Some(resolve)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");

        let complete = json!({
            "stats": {
                "total_operations": 3,
                "successful_operations": 1,
                "failed_operations": 1,
                "conflict_operations": 1,
            }
        });
        let uri = format!("/sync/session/{session_id}/complete");
        let (status, session) =
            call(&app, Method::POST, &uri, Some(&token), Some(complete.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["status"], "completed");

        let (status, _) = call(&app, Method::POST, &uri, Some(&token), Some(complete)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_engineer_gets_no_applications() {
        let (db, app) = test_app().await;
        db.records()
            .upsert(
                "applications",
                &SyncRecord::from_payload("app-1", json!({ "applicant": "x" }), None),
                binaa_db::now(),
            )
            .await
            .unwrap();

        let engineer = token_for("eng-1", "engineer");
        let (status, page) = call(
            &app,
            Method::GET,
            "/sync/changes?table=applications",
            Some(&engineer),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["records"], json!([]));

        let admin = token_for("admin-1", "admin");
        let (_, page) = call(
            &app,
            Method::GET,
            "/sync/changes?table=applications",
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(page["records"].as_array().unwrap().len(), 1);

        let (status, page) = call(
            &app,
            Method::GET,
            "/sync/changes?table=users",
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["records"], json!([]));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (_db, app) = test_app().await;
        let token = token_for("surveyor-1", "surveyor");
        let session_id = open(&app, &token).await;

        // surveyors cannot deactivate devices
        let (status, _) = call(
            &app,
            Method::POST,
            "/sync/device/tab-001/deactivate",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            Method::POST,
            "/sync/conflicts/missing/resolve",
            Some(&token),
            Some(json!({ "strategy": "merge", "resolved_data": {} })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/sync/session/{session_id}/complete"),
            Some(&token),
            Some(json!({ "stats": {
                "total_operations": 9,
                "successful_operations": 1,
                "failed_operations": 0,
                "conflict_operations": 0,
            }})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_failed");
        assert!(body["field"].is_string());

        let (status, body) = call(
            &app,
            Method::POST,
            "/sync/operations",
            Some(&token),
            Some(json!({ "session_id": session_id, "table": "users", "operations": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "unknown_table");

        let other = token_for("surveyor-2", "surveyor");
        let (status, _) = call(
            &app,
            Method::POST,
            "/sync/device",
            Some(&other),
            Some(json!({ "device_id": "tab-001", "platform": "android" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_deactivated_device_cannot_push() {
        let (_db, app) = test_app().await;
        let token = token_for("surveyor-1", "surveyor");
        let session_id = open(&app, &token).await;

        let manager = token_for("manager-1", "manager");
        let (status, device) = call(
            &app,
            Method::POST,
            "/sync/device/tab-001/deactivate",
            Some(&manager),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(device["is_active"], false);

        let (status, body) = call(
            &app,
            Method::POST,
            "/sync/operations",
            Some(&token),
            Some(json!({ "session_id": session_id, "table": "field_visits", "operations": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "device_inactive");

        let (status, session) = call(
            &app,
            Method::POST,
            &format!("/sync/session/{session_id}/fail"),
            Some(&token),
            Some(json!({ "reason": "device retired" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["status"], "failed");
    }
}
