//! HTTP surface.
//!
//! ```text
//! POST /v1/transform   JSON in, JSON out; documents are base64
//! GET  /healthz        {"status": "ok"}
//! ```
//!
//! `X-API-Timeout` asks for a shorter request timeout, in seconds. It can
//! only tighten the configured one.
//!
//! Every error body is `{"request_id", "error": {"kind", "reason"}}`. The
//! kind and reason come from [`Error::kind`] and [`Error::public_reason`],
//! so key material and internal detail never reach the wire.

use crate::error::{Error, Result, ValidationFailure};
use crate::handler::{RequestHandler, TransformRequest};
use crate::signatures::Verdict;
use crate::transform::{TransformParams, TransformResult};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Room for the JSON envelope and parameters on top of the encoded document.
pub const BODY_SLACK_BYTES: usize = 64 * 1024;

/// The one media type a `mime_type` field may declare.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Header carrying the caller's timeout in seconds.
pub const TIMEOUT_HEADER: &str = "x-api-timeout";

/// Largest request body for a document ceiling of `max_size_bytes`.
pub fn body_limit(max_size_bytes: usize) -> usize {
    max_size_bytes
        .div_ceil(3)
        .saturating_mul(4)
        .saturating_add(BODY_SLACK_BYTES)
}

/// HTTP status for an error.
pub fn status_code(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) | Error::Parse { .. } => StatusCode::BAD_REQUEST,
        Error::DocumentTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Error::KeyNotFound(_) | Error::KeyUsage { .. } => StatusCode::FORBIDDEN,
        Error::Crypto(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Config(_) | Error::Internal(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Request body of `POST /v1/transform`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransformBody {
    operation: String,
    key_id: String,
    document: String,
    mime_type: Option<String>,
    #[serde(default)]
    params: ParamsBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParamsBody {
    passphrase: Option<String>,
    field_name: Option<String>,
    reason: Option<String>,
    location: Option<String>,
    signing_time: Option<String>,
    verify_at: Option<String>,
}

impl TransformBody {
    fn into_request(self) -> Result<TransformRequest> {
        if let Some(mime_type) = &self.mime_type {
            if !is_pdf_media_type(mime_type) {
                return Err(ValidationFailure::UnsupportedMediaType.into());
            }
        }
        let document = STANDARD
            .decode(self.document.as_bytes())
            .map_err(|_| Error::Validation(ValidationFailure::InvalidEncoding))?;

        let params = TransformParams {
            passphrase: self.params.passphrase.map(Zeroizing::new),
            field_name: self.params.field_name,
            reason: self.params.reason,
            location: self.params.location,
            signing_time: self.params.signing_time.as_deref().map(parse_timestamp).transpose()?,
            verify_at: self.params.verify_at.as_deref().map(parse_timestamp).transpose()?,
        };
        Ok(TransformRequest::new(self.operation, self.key_id, document).with_params(params))
    }
}

/// `application/pdf`, ignoring case and any parameters.
fn is_pdf_media_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case(PDF_MEDIA_TYPE)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| Error::Validation(ValidationFailure::InvalidTimestamp))
}

/// Read `X-API-Timeout` as a positive number of seconds.
pub fn timeout_from_headers(headers: &HeaderMap) -> Result<Option<Duration>> {
    let Some(value) = headers.get(TIMEOUT_HEADER) else {
        return Ok(None);
    };
    let invalid = || Error::Validation(ValidationFailure::InvalidTimeout);
    let seconds: f64 = value
        .to_str()
        .map_err(|_| invalid())?
        .trim()
        .parse()
        .map_err(|_| invalid())?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(invalid());
    }
    // anything too large for a Duration is capped by the handler anyway
    Ok(Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)))
}

#[derive(Serialize)]
struct DocumentResponse<'a> {
    request_id: Uuid,
    operation: &'a str,
    document: String,
}

#[derive(Serialize)]
struct VerdictResponse<'a> {
    request_id: Uuid,
    operation: &'a str,
    verdict: &'a Verdict,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    reason: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    request_id: Uuid,
    error: ErrorBody,
}

/// An error bound to the request it ended.
struct ApiError {
    request_id: Uuid,
    error: Error,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                kind: self.error.kind(),
                reason: self.error.public_reason(),
            },
        };
        (status_code(&self.error), Json(body)).into_response()
    }
}

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    handler: Arc<RequestHandler>,
}

/// Build the router around `handler`.
pub fn router(handler: Arc<RequestHandler>) -> Router {
    let limit = body_limit(handler.config().parser.max_size_bytes);
    Router::new()
        .route("/v1/transform", post(transform))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(AppState { handler })
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("Listening on {}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn transform(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> std::result::Result<Response, ApiError> {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let limit = state.handler.config().parser.max_size_bytes;
            let error = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                Error::DocumentTooLarge {
                    size: body_limit(limit).saturating_add(1),
                    limit,
                }
            } else {
                Error::Validation(ValidationFailure::MalformedBody)
            };
            return Err(reject(error));
        },
    };

    let timeout = timeout_from_headers(&headers).map_err(reject)?;
    let mut request = serde_json::from_slice::<TransformBody>(&body)
        .map_err(|_| Error::Validation(ValidationFailure::MalformedBody))
        .and_then(TransformBody::into_request)
        .map_err(reject)?;
    drop(body);
    if let Some(timeout) = timeout {
        request = request.with_timeout(timeout);
    }

    let request_id = request.id();
    let operation = request.operation.clone();
    let result = state
        .handler
        .handle(request)
        .await
        .map_err(|error| ApiError { request_id, error })?;

    let response = match &result {
        TransformResult::Document(bytes) => Json(DocumentResponse {
            request_id,
            operation: &operation,
            document: STANDARD.encode(bytes),
        })
        .into_response(),
        TransformResult::Verdict(verdict) => Json(VerdictResponse {
            request_id,
            operation: &operation,
            verdict,
        })
        .into_response(),
    };
    Ok(response)
}

/// Error for a request that never got as far as the handler.
fn reject(error: Error) -> ApiError {
    let request_id = Uuid::new_v4();
    log::info!("[{}] rejected: {} ({})", request_id, error.kind(), error.public_reason());
    ApiError { request_id, error }
}
