//! drnav HTTP front: the service-facing request API and the two cluster hooks.

#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use drnav_api::{ApiError, DrnavApi, ErrorBody, SiteManagerRequest};
use drnav_kubehub::BearerValidator;
use tracing::{error, warn};

mod webhook;

pub use webhook::{webhook_router, ConversionRequest, ConversionResponse, ConversionResult, ConversionReview};

/// Shared state of the request API.
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<dyn DrnavApi>,
    /// Inbound bearer check; `None` leaves `/sitemanager` open.
    pub bearer: Option<Arc<dyn BearerValidator>>,
}

impl AppState {
    pub fn new(api: Arc<dyn DrnavApi>) -> Self { Self { api, bearer: None } }

    pub fn with_bearer(mut self, validator: Arc<dyn BearerValidator>) -> Self {
        self.bearer = Some(validator);
        self
    }
}

/// `ApiError` rendered as an HTTP response.
pub struct ApiFailure(pub ApiError);

impl From<ApiError> for ApiFailure {
    fn from(e: ApiError) -> Self { Self(e) }
}

fn status_of(code: u16) -> StatusCode { StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR) }

fn error_reply(status: StatusCode, message: &str) -> Response { (status, Json(ErrorBody::plain(message))).into_response() }

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = status_of(self.0.status_code());
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(self.0.body())).into_response()
    }
}

/// Routes: `GET /health`, `GET|POST /sitemanager`.
pub fn api_router(state: AppState) -> Router {
    let sitemanager = Router::new()
        .route("/sitemanager", get(get_services).post(post_sitemanager))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));
    Router::new().route("/health", get(health)).merge(sitemanager).with_state(state)
}

async fn health() -> StatusCode { StatusCode::NO_CONTENT }

async fn get_services(State(state): State<AppState>) -> Result<Response, ApiFailure> {
    let reg = state.api.services().await?;
    Ok(Json(reg).into_response())
}

async fn post_sitemanager(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiFailure> {
    let req: SiteManagerRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "request body rejected");
            return Ok(error_reply(StatusCode::BAD_REQUEST, "No valid JSON data was received"));
        }
    };
    let reply = state.api.handle(req).await?;
    Ok((status_of(reply.status_code()), Json(reply)).into_response())
}

async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(validator) = state.bearer.as_ref() else {
        return next.run(req).await;
    };
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let Some(token) = token else {
        return error_reply(StatusCode::UNAUTHORIZED, "You should use Bearer for authorization");
    };
    match validator.validate(token.trim()).await {
        Ok(true) => next.run(req).await,
        Ok(false) => error_reply(StatusCode::FORBIDDEN, "Bearer is empty or wrong"),
        Err(e) => {
            error!(error = %e, "bearer validation failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
