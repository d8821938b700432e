//! HTTP surface: POST /dispatch plus health, CORS, and error mapping.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::db;
use crate::dispatch::{self, PacingOptions};
use crate::error::DispatchError;
use crate::model::{ChannelKind, DispatchRequest};
use crate::sender;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: db::Pool,
    pub config: Arc<Config>,
    /// Parent token; each run gets a child so shutdown aborts in-flight
    /// runs between batches.
    pub shutdown: CancellationToken,
}

/// Raw request body. Legacy field names from the original web client are
/// accepted as aliases.
#[derive(Debug, Deserialize)]
pub struct DispatchBody {
    pub title: Option<String>,
    #[serde(alias = "bodyHtml")]
    pub content: Option<String>,
    #[serde(alias = "timestampLabel")]
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Check presence and shape of every field before any side effect.
pub fn validate_body(body: &DispatchBody) -> Result<DispatchRequest, DispatchError> {
    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DispatchError::Validation("missing required field: title".into()))?;
    let content = body
        .content
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| DispatchError::Validation("missing required field: content".into()))?;
    let date = body
        .date
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DispatchError::Validation("missing required field: date".into()))?;
    let kind = body
        .kind
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DispatchError::Validation("missing required field: type".into()))?;
    let channel = ChannelKind::parse(kind)
        .ok_or_else(|| DispatchError::Validation(format!("unknown dispatch type: {kind}")))?;

    Ok(DispatchRequest {
        title: title.to_string(),
        body_html: content.to_string(),
        timestamp_label: date.to_string(),
        channel,
    })
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            DispatchError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, json!({ "error": msg }))
            }
            DispatchError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "configuration error", "details": msg }),
            ),
            DispatchError::DataUnavailable(source) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "failed to load recipients", "details": source.to_string() }),
            ),
            DispatchError::RunTooLong { projected, ceiling } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "dispatch would exceed the execution time limit",
                    "details": format!("projected {projected:?}, ceiling {ceiling:?}"),
                }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

async fn dispatch_handler(
    State(state): State<AppState>,
    body: Result<Json<DispatchBody>, JsonRejection>,
) -> Result<Response, DispatchError> {
    // A body axum cannot parse must still come back as the structured
    // 400 shape, not the extractor's plain-text rejection.
    let Json(body) = body.map_err(|rejection| DispatchError::Validation(rejection.body_text()))?;
    let req = validate_body(&body)?;
    let sender = sender::for_channel(&state.config, req.channel)?;
    let opts = PacingOptions::from_config(&state.config, req.channel);
    let cancel = state.shutdown.child_token();

    let result = dispatch::run(&state.pool, sender.as_ref(), &req, &opts, &cancel).await?;
    Ok(Json(json!({
        "success": true,
        "totalRecipients": result.total_recipients,
        "successfulDeliveries": result.successful_deliveries,
        "batches": result.batch_count,
        "errors": result.errors,
        "cancelled": result.cancelled,
    }))
    .into_response())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `CorsLayer` answers preflights itself with 200; the public contract is
/// 204 No Content, so rewrite the status on the way out.
async fn normalize_preflight(req: Request, next: Next) -> Response {
    let is_preflight = req.method() == Method::OPTIONS
        && req
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
    let mut res = next.run(req).await;
    if is_preflight && res.status() == StatusCode::OK {
        *res.status_mut() = StatusCode::NO_CONTENT;
    }
    res
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/dispatch", post(dispatch_handler))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(middleware::from_fn(normalize_preflight))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the shutdown token fires. In-flight dispatch runs
/// observe the same token and abort between batches.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "dispatch server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|err| {
            error!(?err, "server error");
            err.into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: serde_json::Value) -> DispatchBody {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn accepts_canonical_and_alias_fields() {
        let req = validate_body(&body(json!({
            "title": "June update",
            "content": "<p>news</p>",
            "date": "1 June 2026",
            "type": "update",
        })))
        .unwrap();
        assert_eq!(req.channel, ChannelKind::Update);

        let req = validate_body(&body(json!({
            "title": "June update",
            "bodyHtml": "<p>news</p>",
            "timestampLabel": "1 June 2026",
            "type": "urgent",
        })))
        .unwrap();
        assert_eq!(req.channel, ChannelKind::Urgent);
        assert_eq!(req.body_html, "<p>news</p>");
    }

    #[test]
    fn missing_fields_are_named() {
        let err = validate_body(&body(json!({ "content": "x", "date": "d", "type": "sms" })))
            .unwrap_err();
        match err {
            DispatchError::Validation(msg) => assert!(msg.contains("title")),
            _ => panic!("wrong error"),
        }

        let err = validate_body(&body(json!({ "title": "t", "date": "d", "type": "sms" })))
            .unwrap_err();
        match err {
            DispatchError::Validation(msg) => assert!(msg.contains("content")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn unknown_type_is_a_validation_error() {
        let err = validate_body(&body(json!({
            "title": "t",
            "content": "c",
            "date": "d",
            "type": "pigeon",
        })))
        .unwrap_err();
        match err {
            DispatchError::Validation(msg) => assert!(msg.contains("pigeon")),
            _ => panic!("wrong error"),
        }
    }
}
