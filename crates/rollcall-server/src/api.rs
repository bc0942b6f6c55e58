use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use rollcall_store::{Course, CourseDraft};

use crate::clock::Clock;
use crate::codes::CodeEngine;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::export::export_roll;
use crate::host_only;
use crate::presence::PresenceBus;
use crate::rate_limit::{throttle_submissions, SubmissionThrottle};
use crate::store::StoreHandle;
use crate::submit::{Rejection, SubmissionPipeline};
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub codes: Arc<CodeEngine>,
    pub presence: PresenceBus,
    pub pipeline: Arc<SubmissionPipeline>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState, throttle: SubmissionThrottle) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // Reachable from any device on the classroom network.
    let public = Router::new()
        .route("/courses", get(list_courses_handler))
        .route("/courses/{id}", get(get_course_handler))
        .route("/confirmation-code/{course_id}", get(confirmation_code_handler))
        .route(
            "/attendance",
            post(submit_attendance_handler).route_layer(middleware::from_fn_with_state(
                throttle,
                throttle_submissions,
            )),
        )
        .route("/ws/{course_id}", get(ws_handler));

    // Dashboard-host only: everything that mutates courses or reads the roll.
    let management = Router::new()
        .route("/courses", post(create_course_handler))
        .route(
            "/courses/{id}",
            axum::routing::put(update_course_handler).delete(delete_course_handler),
        )
        .route(
            "/preferences",
            get(get_preferences_handler).post(set_preferences_handler),
        )
        .route("/export/{course_id}", get(export_roll))
        .layer(middleware::from_fn(host_only::require_loopback));

    let mut router = public.merge(management);

    // Bundled dashboard, if a build is present. Unknown paths fall back to
    // index.html so client-side routing works.
    let frontend = &state.config.frontend_build_path;
    if frontend.join("index.html").is_file() {
        info!(path = %frontend.display(), "serving dashboard assets");
        let assets =
            ServeDir::new(frontend).not_found_service(ServeFile::new(frontend.join("index.html")));
        router = router.fallback_service(assets);
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    state: AppState,
    throttle: SubmissionThrottle,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state, throttle);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

/// Decode a JSON body into a typed payload, reporting schema problems in the
/// standard error shape.
fn parse_body<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ServerError> {
    serde_json::from_value(value)
        .map_err(|e| ServerError::BadRequest(format!("Invalid request body: {e}")))
}

// ─── Courses ───

async fn list_courses_handler(State(state): State<AppState>) -> Result<Json<Vec<Course>>, ServerError> {
    Ok(Json(state.store.all_courses().await?))
}

async fn get_course_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Course>, ServerError> {
    Ok(Json(state.store.get_course(id).await?))
}

async fn create_course_handler(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<Course>), ServerError> {
    let draft: CourseDraft = parse_body(body)?;
    let course = state.store.create_course(draft, state.clock.now()).await?;

    info!(course = %course.id, name = %course.name, "created course");
    Ok((StatusCode::CREATED, Json(course)))
}

async fn update_course_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<Course>, ServerError> {
    let draft: CourseDraft = parse_body(body)?;
    let course = state.store.update_course(id, draft, state.clock.now()).await?;

    info!(course = %course.id, "updated course");
    Ok(Json(course))
}

async fn delete_course_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServerError> {
    state.store.delete_course(id).await?;
    state.codes.forget(id).await;

    info!(course = %id, "deleted course");
    Ok(StatusCode::NO_CONTENT)
}

// ─── Confirmation code ───

#[derive(Serialize)]
struct ConfirmationCodeResponse {
    code: String,
    expires_at: DateTime<Utc>,
    expires_in_seconds: i64,
}

async fn confirmation_code_handler(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<ConfirmationCodeResponse>, ServerError> {
    let active = state.codes.current(course_id).await?;
    Ok(Json(ConfirmationCodeResponse {
        code: active.code,
        expires_at: active.expires_at,
        expires_in_seconds: active.seconds_remaining,
    }))
}

// ─── Attendance submission ───

#[derive(Debug, Deserialize)]
struct AttendanceSubmission {
    course_id: Uuid,
    student_name: String,
    student_id: String,
    confirmation_code: String,
}

impl From<Rejection> for ServerError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::CourseMissing => ServerError::NotFound("Course not found".to_string()),
            Rejection::FieldMissing => ServerError::BadRequest(rejection.to_string()),
            Rejection::InvalidCode => ServerError::InvalidCode,
            Rejection::ExpiredCode => ServerError::ExpiredCode,
            Rejection::DuplicateStudent | Rejection::DuplicateDevice => {
                ServerError::Conflict(rejection.to_string())
            }
            Rejection::Storage(detail) => ServerError::Storage(detail),
        }
    }
}

async fn submit_attendance_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let submission: AttendanceSubmission = parse_body(body)?;

    // The device key is the peer IP alone; the source port changes on every
    // connection and would defeat deduplication.
    let accepted = state
        .pipeline
        .submit(
            submission.course_id,
            &submission.student_name,
            &submission.student_id,
            &submission.confirmation_code,
            &peer.ip().to_string(),
        )
        .await?;

    Ok(Json(serde_json::json!({
        "message": "Attendance recorded successfully",
        "student_name": accepted.student_name,
    })))
}

// ─── Preferences ───

#[derive(Serialize, Deserialize)]
struct PreferencesResponse {
    current_course_id: Option<Uuid>,
}

async fn get_preferences_handler(
    State(state): State<AppState>,
) -> Result<Json<PreferencesResponse>, ServerError> {
    let current_course_id = state.store.current_course_id().await?;
    Ok(Json(PreferencesResponse { current_course_id }))
}

#[derive(Deserialize)]
struct SetPreferencesRequest {
    current_course_id: Uuid,
}

async fn set_preferences_handler(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<PreferencesResponse>, ServerError> {
    let request: SetPreferencesRequest = parse_body(body)?;

    // 404 rather than persisting a dangling reference.
    state.store.get_course(request.current_course_id).await?;
    state
        .store
        .set_current_course_id(request.current_course_id)
        .await?;

    info!(course = %request.current_course_id, "selected current course");
    Ok(Json(PreferencesResponse {
        current_course_id: Some(request.current_course_id),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_body_reports_schema_errors() {
        let err = parse_body::<AttendanceSubmission>(serde_json::json!({
            "course_id": "not-a-uuid",
        }))
        .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));

        let ok: AttendanceSubmission = parse_body(serde_json::json!({
            "course_id": Uuid::new_v4(),
            "student_name": "Ada",
            "student_id": "S001",
            "confirmation_code": "AB3DE6",
        }))
        .unwrap();
        assert_eq!(ok.student_name, "Ada");
    }

    #[test]
    fn rejections_translate_once_at_the_boundary() {
        assert!(matches!(
            ServerError::from(Rejection::CourseMissing),
            ServerError::NotFound(_)
        ));
        assert!(matches!(
            ServerError::from(Rejection::FieldMissing),
            ServerError::BadRequest(_)
        ));
        assert!(matches!(
            ServerError::from(Rejection::InvalidCode),
            ServerError::InvalidCode
        ));
        assert!(matches!(
            ServerError::from(Rejection::ExpiredCode),
            ServerError::ExpiredCode
        ));
        assert!(matches!(
            ServerError::from(Rejection::DuplicateStudent),
            ServerError::Conflict(_)
        ));
        assert!(matches!(
            ServerError::from(Rejection::DuplicateDevice),
            ServerError::Conflict(_)
        ));
    }
}
