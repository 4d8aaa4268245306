//! HTTP endpoints.
//!
//! - POST   /faces            - register a face (multipart `file`, optional `name`)
//! - POST   /faces/recognize  - recognize a face (multipart `file`, optional `tolerance`)
//! - GET    /faces            - list registered faces
//! - DELETE /faces/:name      - delete by name
//! - DELETE /faces/id/:id     - delete by id
//! - POST   /faces/refresh    - reload the gallery cache
//! - GET    /status           - service status
//! - GET    /health           - liveness check

use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::PathRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::middleware::map_response;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use facevault_store::FaceKey;
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::service::{FaceService, FaceSummary, ServiceError};
use crate::validate::{check_content_type, validate_tolerance, ValidationError};

type SharedService = Arc<FaceService>;

#[derive(Serialize)]
struct Success<T> {
    status: &'static str,
    data: T,
}

#[derive(Serialize)]
struct Failure {
    status: &'static str,
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    (
        status,
        Json(Success {
            status: "success",
            data,
        }),
    )
        .into_response()
}

fn failure(status: StatusCode, code: &'static str, message: String) -> Response {
    (
        status,
        Json(Failure {
            status: "error",
            error: ErrorBody { code, message },
        }),
    )
        .into_response()
}

fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Validation(ValidationError::PayloadTooLarge(_)) => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        ServiceError::Validation(_) | ServiceError::InvalidImage(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::DuplicateFace { .. } | ServiceError::NameTaken(_) => StatusCode::CONFLICT,
        ServiceError::NoFaceDetected | ServiceError::MultipleFaces(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ServiceError::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Provider(_) | ServiceError::Match(_) | ServiceError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let code = self.code();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "request failed");
        } else {
            tracing::debug!(error = %self, code, "request rejected");
        }
        failure(status, code, self.to_string())
    }
}

impl From<MultipartRejection> for ServiceError {
    fn from(rejection: MultipartRejection) -> Self {
        ValidationError::Malformed(rejection.body_text()).into()
    }
}

impl From<MultipartError> for ServiceError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ValidationError::PayloadTooLarge(err.body_text()).into();
        }
        ValidationError::Malformed(err.body_text()).into()
    }
}

impl From<PathRejection> for ServiceError {
    fn from(rejection: PathRejection) -> Self {
        ValidationError::Malformed(rejection.body_text()).into()
    }
}

/// Fields of a multipart upload.
#[derive(Debug, Default)]
struct Upload {
    image: Option<Vec<u8>>,
    name: Option<String>,
    tolerance: Option<String>,
}

impl Upload {
    fn image(&mut self) -> Result<Vec<u8>, ValidationError> {
        self.image.take().ok_or(ValidationError::MissingField("file"))
    }
}

async fn parse_upload(mut multipart: Multipart) -> Result<Upload, ServiceError> {
    let mut upload = Upload::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                check_content_type(field.content_type())?;
                upload.image = Some(field.bytes().await?.to_vec());
            }
            "name" => upload.name = Some(field.text().await?),
            "tolerance" => upload.tolerance = Some(field.text().await?),
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }
    Ok(upload)
}

/// Build the router with all endpoints.
pub fn router(service: SharedService, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/faces", post(register).get(list))
        .route("/faces/recognize", post(recognize))
        .route("/faces/refresh", post(refresh))
        .route("/faces/id/:id", delete(delete_by_id))
        .route("/faces/:name", delete(delete_by_name))
        .route("/status", get(status))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(map_response(envelope_method_not_allowed))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn register(
    State(service): State<SharedService>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
    let mut upload = parse_upload(multipart?).await?;
    let image = upload.image()?;
    let record = service.register(image, upload.name).await?;
    Ok(success(StatusCode::CREATED, FaceSummary::from(&record)))
}

async fn recognize(
    State(service): State<SharedService>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
    let mut upload = parse_upload(multipart?).await?;
    let image = upload.image()?;
    let tolerance = upload
        .tolerance
        .as_deref()
        .map(validate_tolerance)
        .transpose()?;
    let result = service.recognize(image, tolerance).await?;
    Ok(success(StatusCode::OK, result))
}

async fn list(State(service): State<SharedService>) -> Result<Response, ServiceError> {
    let faces = service.list().await?;
    Ok(success(
        StatusCode::OK,
        json!({ "count": faces.len(), "faces": faces }),
    ))
}

async fn delete_by_name(
    State(service): State<SharedService>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Response, ServiceError> {
    let Path(name) = path?;
    service.delete(FaceKey::Name(name.clone())).await?;
    Ok(success(StatusCode::OK, json!({ "deleted": name })))
}

async fn delete_by_id(
    State(service): State<SharedService>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Response, ServiceError> {
    let Path(id) = path?;
    service.delete(FaceKey::Id(id)).await?;
    Ok(success(StatusCode::OK, json!({ "deleted": id })))
}

async fn refresh(State(service): State<SharedService>) -> Result<Response, ServiceError> {
    let loaded = service.refresh().await?;
    Ok(success(StatusCode::OK, json!({ "loaded_faces": loaded })))
}

async fn status(State(service): State<SharedService>) -> Response {
    success(StatusCode::OK, service.status().await)
}

async fn health() -> Response {
    success(
        StatusCode::OK,
        json!({ "status": "healthy", "timestamp": chrono::Utc::now().to_rfc3339() }),
    )
}

/// Wrap the router's bare 405 in the error envelope, keeping `Allow`.
async fn envelope_method_not_allowed(response: Response) -> Response {
    if response.status() != StatusCode::METHOD_NOT_ALLOWED {
        return response;
    }
    let allow = response.headers().get(header::ALLOW).cloned();
    let mut wrapped = failure(
        StatusCode::METHOD_NOT_ALLOWED,
        "METHOD_NOT_ALLOWED",
        "method not allowed for this endpoint".to_string(),
    );
    if let Some(allow) = allow {
        wrapped.headers_mut().insert(header::ALLOW, allow);
    }
    wrapped
}

async fn not_found() -> Response {
    failure(
        StatusCode::NOT_FOUND,
        "NOT_FOUND",
        "no such endpoint".to_string(),
    )
}
