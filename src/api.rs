// 🌐 HTTP API - axum routes over the scheduling engine
//
// Handlers are thin: parse input into typed values, run the engine call on the
// blocking pool with a connection of its own, map the outcome to a status
// code. No handler holds state between requests.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use chrono::{Local, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::db::{self, AppointmentFilter, Database};
use crate::error::ScheduleError;
use crate::models::{normalize_patient_id, AppointmentStatus, NewAppointment};
use crate::slots::{format_time, parse_date, parse_slot_time};
use crate::{availability, blocks, reports, reservation};

const MAX_PAGE_LIMIT: u32 = 100;

// ============================================================================
// STATE
// ============================================================================

/// Source of "today" for schedulable-date checks.
#[derive(Debug, Clone, Copy)]
pub enum Clock {
    /// Local calendar date of the host
    System,
    Fixed(NaiveDate),
}

impl Clock {
    pub fn today(&self) -> NaiveDate {
        match self {
            Clock::System => Local::now().date_naive(),
            Clock::Fixed(date) => *date,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub clock: Clock,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            clock: Clock::System,
        }
    }

    /// Run one unit of store work on the blocking pool with its own connection.
    async fn run<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> crate::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut conn = db.connect()?;
            work(&mut conn)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))?;
        outcome.map_err(ApiError::from)
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("Malformed request: {0}")]
    Malformed(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, field) = match self {
            ApiError::Schedule(ScheduleError::Validation { field, message }) => {
                (StatusCode::BAD_REQUEST, "validation", message, Some(field))
            }
            ApiError::Schedule(ScheduleError::Conflict(reason)) => (
                StatusCode::CONFLICT,
                reason.code(),
                reason.message().to_string(),
                None,
            ),
            ApiError::Schedule(err @ ScheduleError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "not_found", err.to_string(), None)
            }
            ApiError::Schedule(err) => {
                tracing::error!(error = %err, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::Malformed(detail) => (StatusCode::BAD_REQUEST, "validation", detail, None),
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message, field },
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Malformed(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Malformed(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Malformed(rejection.body_text())
    }
}

// ============================================================================
// FIELD PARSING
// ============================================================================
//
// Request types carry raw strings and JSON values so that a wrong type is
// reported against the field that carried it.

/// Required field or a validation error naming it.
fn required<T>(field: &'static str, value: Option<T>) -> Result<T, ApiError> {
    value.ok_or_else(|| ScheduleError::validation(field, "is required").into())
}

fn parse_number<T: FromStr>(field: &'static str, text: &str) -> Result<T, ApiError> {
    text.trim()
        .parse()
        .map_err(|_| ScheduleError::validation(field, format!("'{}' is not a valid number", text)).into())
}

/// Optional numeric query or path parameter.
fn number_param<T: FromStr>(field: &'static str, value: Option<String>) -> Result<Option<T>, ApiError> {
    value.map(|v| parse_number(field, &v)).transpose()
}

/// JSON string field; null and absent are both `None`.
fn text_value(field: &'static str, value: Option<Value>) -> Result<Option<String>, ApiError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(_) => Err(ScheduleError::validation(field, "must be a string").into()),
    }
}

/// JSON integer field. Numeric strings are accepted.
fn integer_value(field: &'static str, value: Option<Value>) -> Result<Option<i64>, ApiError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| ScheduleError::validation(field, "must be an integer").into()),
        Some(Value::String(text)) => parse_number(field, &text).map(Some),
        Some(_) => Err(ScheduleError::validation(field, "must be an integer").into()),
    }
}

#[derive(Serialize)]
struct Message {
    message: &'static str,
}

// ============================================================================
// REQUEST TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentBody {
    pub name: Option<Value>,
    pub patient_id: Option<Value>,
    pub birth_date: Option<Value>,
    pub date: Option<Value>,
    pub time: Option<Value>,
    pub service_type_id: Option<Value>,
}

impl CreateAppointmentBody {
    fn into_new_appointment(self) -> Result<NewAppointment, ApiError> {
        let name = required("name", text_value("name", self.name)?)?;
        let patient_id = required("patient_id", text_value("patient_id", self.patient_id)?)?;
        let birth_date = required("birth_date", text_value("birth_date", self.birth_date)?)?;
        let date = required("date", text_value("date", self.date)?)?;
        let time = required("time", text_value("time", self.time)?)?;
        let service_type_id =
            required("service_type_id", integer_value("service_type_id", self.service_type_id)?)?;

        Ok(NewAppointment {
            name,
            patient_id,
            birth_date: parse_date("birth_date", &birth_date)?,
            date: parse_date("date", &date)?,
            time: parse_slot_time("time", &time)?,
            service_type_id,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub date: Option<String>,
    pub status: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PatientQuery {
    pub patient_id: Option<String>,
    pub birth_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DayBlockBody {
    pub date: Option<Value>,
    pub reason: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct TimeBlockBody {
    pub date: Option<Value>,
    pub time: Option<Value>,
    pub reason: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub year: Option<String>,
    pub month: Option<String>,
}

fn id_param(path: Result<Path<String>, PathRejection>) -> Result<i64, ApiError> {
    let Path(raw) = path?;
    parse_number("id", &raw)
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "OK",
        "timestamp": Utc::now(),
        "version": crate::VERSION,
    }))
}

/// GET /api/availability?date=YYYY-MM-DD
async fn get_availability(
    State(state): State<AppState>,
    query: Result<Query<DateQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let date = parse_date("date", &required("date", query.date)?)?;
    let today = state.clock.today();
    let slots = state
        .run(move |conn| availability::get_availability(conn, date, today))
        .await?;
    Ok(Json(slots))
}

/// GET /api/appointments - filtered admin listing
async fn list_appointments(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let date = query.date.as_deref().map(|d| parse_date("date", d)).transpose()?;
    let status = query.status.as_deref().map(AppointmentStatus::parse).transpose()?;
    let page: u32 = number_param("page", query.page)?.unwrap_or(1);
    if page == 0 {
        return Err(ScheduleError::validation("page", "must be a positive number").into());
    }
    let limit: u32 = number_param("limit", query.limit)?.unwrap_or(50);
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(ScheduleError::validation("limit", "must be between 1 and 100").into());
    }

    let filter = AppointmentFilter { date, status, page, limit };
    let listing = state.run(move |conn| db::list_appointments(conn, &filter)).await?;
    Ok(Json(listing))
}

/// POST /api/appointments - reserve a slot
async fn create_appointment(
    State(state): State<AppState>,
    body: Result<Json<CreateAppointmentBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let request = body.into_new_appointment()?;
    let today = state.clock.today();
    let appointment = state
        .run(move |conn| reservation::reserve(conn, &request, today))
        .await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

/// GET /api/appointments/by-date/:date - scheduled times of one day
async fn scheduled_times_on(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(raw) = path?;
    let date = parse_date("date", &raw)?;
    let times = state.run(move |conn| db::scheduled_times_on(conn, date)).await?;
    let times: Vec<String> = times.into_iter().map(format_time).collect();
    Ok(Json(times))
}

/// GET /api/appointments/patient?patient_id&birth_date
async fn patient_appointments(
    State(state): State<AppState>,
    query: Result<Query<PatientQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let patient_id = normalize_patient_id(&required("patient_id", query.patient_id)?)?;
    let birth_date = parse_date("birth_date", &required("birth_date", query.birth_date)?)?;
    let list = state
        .run(move |conn| db::get_appointments_for_patient(conn, &patient_id, birth_date))
        .await?;
    Ok(Json(list))
}

/// GET /api/appointments/stats
async fn appointment_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.run(|conn| reports::status_stats(conn)).await?;
    Ok(Json(stats))
}

/// PUT /api/appointments/:id/status
async fn update_status(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = id_param(path)?;
    let Json(body) = body?;
    let status = AppointmentStatus::parse(&required("status", text_value("status", body.status)?)?)?;
    let appointment = state
        .run(move |conn| reservation::set_status(conn, id, status))
        .await?;
    Ok(Json(appointment))
}

/// GET /api/services - active service types
async fn list_services(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let services = state.run(|conn| db::list_active_service_types(conn)).await?;
    Ok(Json(services))
}

/// GET /api/blocks/days
async fn list_day_blocks(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let list = state.run(|conn| blocks::list_day_blocks(conn)).await?;
    Ok(Json(list))
}

/// POST /api/blocks/days
async fn create_day_block(
    State(state): State<AppState>,
    body: Result<Json<DayBlockBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let date = parse_date("date", &required("date", text_value("date", body.date)?)?)?;
    let reason = text_value("reason", body.reason)?;
    let block = state
        .run(move |conn| blocks::create_day_block(conn, date, reason.as_deref()))
        .await?;
    Ok((StatusCode::CREATED, Json(block)))
}

/// DELETE /api/blocks/days/:id
async fn remove_day_block(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = id_param(path)?;
    state.run(move |conn| blocks::remove_day_block(conn, id)).await?;
    Ok(Json(Message { message: "Day unblocked" }))
}

/// GET /api/blocks/times
async fn list_time_blocks(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let list = state.run(|conn| blocks::list_time_blocks(conn)).await?;
    Ok(Json(list))
}

/// GET /api/blocks/times/by-date/:date
async fn list_time_blocks_on(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(raw) = path?;
    let date = parse_date("date", &raw)?;
    let list = state.run(move |conn| blocks::list_time_blocks_on(conn, date)).await?;
    Ok(Json(list))
}

/// POST /api/blocks/times
async fn create_time_block(
    State(state): State<AppState>,
    body: Result<Json<TimeBlockBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let date = parse_date("date", &required("date", text_value("date", body.date)?)?)?;
    let time = parse_slot_time("time", &required("time", text_value("time", body.time)?)?)?;
    let reason = text_value("reason", body.reason)?;
    let block = state
        .run(move |conn| blocks::create_time_block(conn, date, time, reason.as_deref()))
        .await?;
    Ok((StatusCode::CREATED, Json(block)))
}

/// DELETE /api/blocks/times/:id
async fn remove_time_block(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = id_param(path)?;
    state.run(move |conn| blocks::remove_time_block(conn, id)).await?;
    Ok(Json(Message { message: "Time slot unblocked" }))
}

/// GET /api/reports/monthly?year&month
async fn monthly_report(
    State(state): State<AppState>,
    query: Result<Query<MonthQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let year: i32 = required("year", number_param("year", query.year)?)?;
    let month: u32 = required("month", number_param("month", query.month)?)?;
    let report = state
        .run(move |conn| reports::monthly_report(conn, year, month))
        .await?;
    Ok(Json(report))
}

/// GET /api/admin/dashboard
async fn dashboard(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let today = state.clock.today();
    let dash = state.run(move |conn| reports::dashboard(conn, today)).await?;
    Ok(Json(dash))
}

// ============================================================================
// ROUTER
// ============================================================================

/// `/api` routes only.
pub fn api_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/availability", get(get_availability))
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/by-date/:date", get(scheduled_times_on))
        .route("/appointments/patient", get(patient_appointments))
        .route("/appointments/stats", get(appointment_stats))
        .route("/appointments/:id/status", put(update_status))
        .route("/services", get(list_services))
        .route("/blocks/days", get(list_day_blocks).post(create_day_block))
        .route("/blocks/days/:id", delete(remove_day_block))
        .route("/blocks/times", get(list_time_blocks).post(create_time_block))
        .route("/blocks/times/by-date/:date", get(list_time_blocks_on))
        .route("/blocks/times/:id", delete(remove_time_block))
        .route("/reports/monthly", get(monthly_report))
        .route("/admin/dashboard", get(dashboard))
        .with_state(state);

    Router::new().nest("/api", api_routes)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Full application: API, static pages fallback, CORS and request tracing.
pub fn app(state: AppState, server: &ServerConfig) -> Router {
    api_router(state)
        .fallback_service(ServeDir::new(&server.static_dir))
        .layer(cors_layer(&server.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
}
