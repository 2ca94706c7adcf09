use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;
use ulid::Ulid;

use crate::auth::{Caller, IdentityVerifier};
use crate::booking::{BookingService, CreateReservation, Error};
use crate::catalog::CatalogService;
use crate::model::Sec;
use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub booking: Arc<BookingService>,
    pub catalog: Arc<CatalogService>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/schedule/add", post(add_schedule))
        .route("/api/schedule/delete", post(delete_schedule))
        .route("/api/schedule", get(get_schedule))
        .route("/api/schedule/info", get(get_schedule_info))
        .route("/api/rooms", get(get_rooms_and_categories))
        .route("/api/room/add", post(add_room))
        .route("/api/room/delete", post(delete_room))
        .route("/api/category/add", post(add_category))
        .route("/api/category/delete", post(delete_category))
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn track_requests(req: Request, next: Next) -> Response {
    let route = req.uri().path().to_owned();
    let start = Instant::now();
    let resp = next.run(req).await;
    metrics::counter!(
        observability::REQUESTS_TOTAL,
        "route" => route.clone(),
        "status" => resp.status().as_u16().to_string(),
    )
    .increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "route" => route)
        .record(start.elapsed().as_secs_f64());
    resp
}

// ── error mapping ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ErrorResp {
    msg: String,
}

struct ApiError {
    status: StatusCode,
    msg: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResp { msg: self.msg })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::InvalidRange { .. }
            | Error::InvalidRepeats(_)
            | Error::TooManyRepeats { .. }
            | Error::WindowTooWide { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::RoomNotFound(_)
            | Error::CategoryNotFound(_)
            | Error::SlotNotFound(_)
            | Error::GroupNotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict { .. } | Error::RoomInUse(_) => StatusCode::CONFLICT,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %e, "request failed");
        }
        ApiError {
            status,
            msg: e.to_string(),
        }
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    state.verifier.authenticate(token).map_err(|e| {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        ApiError::from(Error::from(e))
    })
}

// ── wire types ──────────────────────────────────────────────────
//
// Absent category references travel as the nil ULID on the wire; internally
// they are `None`.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddScheduleReq {
    room_id: Ulid,
    reservee: String,
    email: String,
    phone_number: String,
    reason: String,
    start_timestamp: Sec,
    end_timestamp: Sec,
    repeats: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddScheduleResp {
    schedule_group_id: Ulid,
    schedule_ids: Vec<Ulid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteScheduleReq {
    schedule_id: Ulid,
    #[serde(default)]
    delete_all_in_group: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetScheduleParams {
    room_id: Ulid,
    start_timestamp: Sec,
    end_timestamp: Sec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Schedule {
    id: Ulid,
    room_id: Ulid,
    schedule_group_id: Ulid,
    reservee: String,
    start_timestamp: Sec,
    end_timestamp: Sec,
}

#[derive(Debug, Serialize)]
struct GetScheduleResp {
    schedules: Vec<Schedule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetScheduleInfoParams {
    schedule_group_id: Ulid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleGroup {
    id: Ulid,
    room_id: Ulid,
    reservee: String,
    email: String,
    phone_number: String,
    reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Room {
    id: Ulid,
    name: String,
    seats: u32,
    category_id: Ulid,
}

#[derive(Debug, Serialize)]
struct CategoryResp {
    id: Ulid,
    name: String,
    description: String,
}

#[derive(Debug, Serialize)]
struct GetRoomsResp {
    categories: Vec<CategoryResp>,
    rooms: Vec<Room>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddRoomReq {
    name: String,
    seats: u32,
    #[serde(default)]
    category_id: Option<Ulid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRoomReq {
    room_id: Ulid,
}

#[derive(Debug, Deserialize)]
struct AddCategoryReq {
    name: String,
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteCategoryReq {
    category_id: Ulid,
}

#[derive(Debug, Serialize)]
struct OkResp {
    msg: &'static str,
}

fn ok() -> Json<OkResp> {
    Json(OkResp { msg: "ok" })
}

// ── handlers ────────────────────────────────────────────────────

async fn add_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddScheduleReq>,
) -> Result<Json<AddScheduleResp>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let created = state
        .booking
        .create(
            &caller,
            CreateReservation {
                room_id: req.room_id,
                reservee: req.reservee,
                email: req.email,
                phone_number: req.phone_number,
                reason: req.reason,
                start: req.start_timestamp,
                end: req.end_timestamp,
                repeats: req.repeats,
            },
        )
        .await?;
    Ok(Json(AddScheduleResp {
        schedule_group_id: created.group_id,
        schedule_ids: created.slot_ids,
    }))
}

async fn delete_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeleteScheduleReq>,
) -> Result<Json<OkResp>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    state
        .booking
        .delete(&caller, req.schedule_id, req.delete_all_in_group)
        .await?;
    Ok(ok())
}

async fn get_schedule(
    State(state): State<AppState>,
    Query(params): Query<GetScheduleParams>,
) -> Result<Json<GetScheduleResp>, ApiError> {
    let slots = state
        .booking
        .slots_in_window(params.room_id, params.start_timestamp, params.end_timestamp)
        .await?;
    let schedules = slots
        .into_iter()
        .map(|s| Schedule {
            id: s.id,
            room_id: s.room_id,
            schedule_group_id: s.group_id,
            reservee: s.reservee,
            start_timestamp: s.start,
            end_timestamp: s.end,
        })
        .collect();
    Ok(Json(GetScheduleResp { schedules }))
}

async fn get_schedule_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<GetScheduleInfoParams>,
) -> Result<Json<ScheduleGroup>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let group = state
        .booking
        .group_detail(&caller, params.schedule_group_id)
        .await?;
    Ok(Json(ScheduleGroup {
        id: group.id,
        room_id: group.room_id,
        reservee: group.reservee,
        email: group.email,
        phone_number: group.phone_number,
        reason: group.reason,
    }))
}

async fn get_rooms_and_categories(State(state): State<AppState>) -> Json<GetRoomsResp> {
    let categories = state
        .catalog
        .list_categories()
        .into_iter()
        .map(|c| CategoryResp {
            id: c.id,
            name: c.name,
            description: c.description,
        })
        .collect();
    let rooms = state
        .catalog
        .list_rooms()
        .await
        .into_iter()
        .map(|r| Room {
            id: r.id,
            name: r.name,
            seats: r.seats,
            category_id: r.category_id.unwrap_or_else(Ulid::nil),
        })
        .collect();
    Json(GetRoomsResp { categories, rooms })
}

async fn add_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddRoomReq>,
) -> Result<Json<Room>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let category_id = req.category_id.filter(|id| !id.is_nil());
    let room = state
        .catalog
        .add_room(&caller, req.name, req.seats, category_id)
        .await?;
    Ok(Json(Room {
        id: room.id,
        name: room.name,
        seats: room.seats,
        category_id: room.category_id.unwrap_or_else(Ulid::nil),
    }))
}

async fn delete_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeleteRoomReq>,
) -> Result<Json<OkResp>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    state.catalog.delete_room(&caller, req.room_id).await?;
    Ok(ok())
}

async fn add_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddCategoryReq>,
) -> Result<Json<CategoryResp>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let category = state
        .catalog
        .add_category(&caller, req.name, req.description)
        .await?;
    Ok(Json(CategoryResp {
        id: category.id,
        name: category.name,
        description: category.description,
    }))
}

async fn delete_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeleteCategoryReq>,
) -> Result<Json<OkResp>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    state
        .catalog
        .delete_category(&caller, req.category_id)
        .await?;
    Ok(ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, JwtVerifier};
    use crate::config::Config;
    use crate::model::WEEK_SEC;
    use crate::store::Store;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::path::PathBuf;
    use tower::ServiceExt;

    const ADMIN: i64 = 1;

    const TEST_PUB_PEM: &[u8] = b"-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEEVs/o5+uQbTjL3chynL4wXgUg2R9
q9UU8I5mEovUf86QZ7kOBIjJwqnzD1omageEHWwHdBO6B+dFabmdT9POxg==
-----END PUBLIC KEY-----
";

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomledger_test_api");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn test_config() -> Config {
        Config {
            bind: "127.0.0.1".into(),
            port: 0,
            data_dir: std::env::temp_dir(),
            repeat_limit: 10,
            window_limit_sec: 100 * WEEK_SEC,
            admin_permission: ADMIN,
            dev_mode: false,
            jwt_public_key_path: "jwt.pub".into(),
            jwt_issuer: "id".into(),
            jwt_audience: "roomledger".into(),
            metrics_port: None,
        }
    }

    fn router(name: &str, verifier: Arc<dyn IdentityVerifier>) -> Router {
        let store = Arc::new(Store::open(&test_wal_path(name)).unwrap());
        let config = test_config();
        build_router(AppState {
            booking: Arc::new(BookingService::new(store.clone(), &config)),
            catalog: Arc::new(CatalogService::new(store, &config)),
            verifier,
        })
    }

    fn dev_router(name: &str) -> Router {
        router(name, Arc::new(AllowAll::new(ADMIN)))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn get_req(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn reserve_and_query_over_http() {
        let app = dev_router("reserve_query.wal");

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/room/add",
                serde_json::json!({"name": "A101", "seats": 8}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let room = json_body(resp).await;
        let room_id = room["id"].as_str().unwrap().to_owned();
        assert_eq!(room["categoryId"], Ulid::nil().to_string());

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/schedule/add",
                serde_json::json!({
                    "roomId": room_id,
                    "reservee": "doe",
                    "email": "doe@example.com",
                    "phoneNumber": "010",
                    "reason": "study",
                    "startTimestamp": 10_000,
                    "endTimestamp": 11_000,
                    "repeats": 2,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let created = json_body(resp).await;
        assert_eq!(created["scheduleIds"].as_array().unwrap().len(), 2);

        let uri = format!(
            "/api/schedule?roomId={room_id}&startTimestamp=0&endTimestamp={}",
            3 * WEEK_SEC
        );
        let resp = app.clone().oneshot(get_req(&uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        let schedules = body["schedules"].as_array().unwrap();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0]["startTimestamp"], 10_000);
        assert_eq!(schedules[0]["reservee"], "doe");
    }

    #[tokio::test]
    async fn overlapping_reservation_conflicts() {
        let app = dev_router("http_conflict.wal");

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/room/add",
                serde_json::json!({"name": "A101", "seats": 8}),
            ))
            .await
            .unwrap();
        let room_id = json_body(resp).await["id"].as_str().unwrap().to_owned();

        let book = |start: i64, end: i64| {
            serde_json::json!({
                "roomId": room_id,
                "reservee": "doe",
                "email": "doe@example.com",
                "phoneNumber": "010",
                "reason": "study",
                "startTimestamp": start,
                "endTimestamp": end,
                "repeats": 1,
            })
        };

        let resp = app
            .clone()
            .oneshot(post_json("/api/schedule/add", book(10_000, 11_000)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(post_json("/api/schedule/add", book(10_500, 11_500)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(json_body(resp).await["msg"].as_str().unwrap().contains("conflict"));
    }

    #[tokio::test]
    async fn validation_maps_to_bad_request() {
        let app = dev_router("http_validation.wal");

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/schedule/add",
                serde_json::json!({
                    "roomId": Ulid::new().to_string(),
                    "reservee": "doe",
                    "email": "e",
                    "phoneNumber": "p",
                    "reason": "r",
                    "startTimestamp": 11_000,
                    "endTimestamp": 10_000,
                    "repeats": 1,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let uri = format!(
            "/api/schedule?roomId={}&startTimestamp=0&endTimestamp={}",
            Ulid::new(),
            200 * WEEK_SEC
        );
        let resp = app.clone().oneshot(get_req(&uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let verifier = JwtVerifier::from_pem(TEST_PUB_PEM, "id", "roomledger").unwrap();
        let app = router("http_unauth.wal", Arc::new(verifier));

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/room/add",
                serde_json::json!({"name": "A101", "seats": 8}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // Public routes stay open
        let resp = app.clone().oneshot(get_req("/api/rooms")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_schedule_is_not_found() {
        let app = dev_router("http_not_found.wal");
        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/schedule/delete",
                serde_json::json!({"scheduleId": Ulid::new().to_string()}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn room_catalog_round_trip() {
        let app = dev_router("http_catalog.wal");

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/category/add",
                serde_json::json!({"name": "study", "description": "study rooms"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let category_id = json_body(resp).await["id"].as_str().unwrap().to_owned();

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/room/add",
                serde_json::json!({"name": "A101", "seats": 8, "categoryId": category_id}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let room_id = json_body(resp).await["id"].as_str().unwrap().to_owned();

        let resp = app.clone().oneshot(get_req("/api/rooms")).await.unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["rooms"].as_array().unwrap().len(), 1);
        assert_eq!(body["rooms"][0]["categoryId"], category_id);
        assert_eq!(body["categories"].as_array().unwrap().len(), 1);

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/room/delete",
                serde_json::json!({"roomId": room_id}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.clone().oneshot(get_req("/api/rooms")).await.unwrap();
        let body = json_body(resp).await;
        assert!(body["rooms"].as_array().unwrap().is_empty());
    }
}
