//! Public HTTP surface: the three tokenized artifact endpoints and the
//! unauthenticated health check. Everything else (admin, auth) belongs to
//! the surrounding application and is not served here.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use chrono_tz::Europe::Paris;
use serde_json::json;
use tracing::error;

use listmill_publish::{AccessError, AccessGate, ArtifactFormat, Publisher};
use listmill_store::ListStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ListStore>,
    pub publisher: Arc<Publisher>,
    pub gate: Arc<AccessGate>,
}

pub fn public_router(state: AppState) -> Router {
    Router::new()
        .route("/public/csv/:token", get(public_csv))
        .route("/public/json/:token", get(public_json))
        .route("/public/txt/:token", get(public_txt))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Response {
    let timestamp = Utc::now().with_timezone(&Paris).to_rfc3339();
    Json(json!({"status": "healthy", "timestamp": timestamp})).into_response()
}

async fn public_csv(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    serve_artifact(&state, &token, ArtifactFormat::Csv, &headers, peer).await
}

async fn public_json(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    serve_artifact(&state, &token, ArtifactFormat::Json, &headers, peer).await
}

async fn public_txt(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    serve_artifact(&state, &token, ArtifactFormat::Txt, &headers, peer).await
}

async fn serve_artifact(
    state: &AppState,
    token: &str,
    format: ArtifactFormat,
    headers: &HeaderMap,
    peer: SocketAddr,
) -> Response {
    let client_ip = listmill_publish::derive_client_ip(
        |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        },
        peer.ip(),
    );

    let list = match state.gate.authorize(token, format, client_ip).await {
        Ok(list) => list,
        Err(AccessError::NotFound) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
        }
        Err(AccessError::Denied { client_ip, rules }) => {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": "access denied",
                    "client_ip": client_ip,
                    "allowed_rules": rules,
                })),
            )
                .into_response()
        }
        Err(AccessError::Store(e)) => {
            error!("Public artifact lookup failed: {e}");
            return internal_error();
        }
    };

    let path = match state.publisher.ensure_artifact(&list, format).await {
        Ok(path) => path,
        Err(e) => {
            error!("List {}: artifact generation failed: {e}", list.id);
            return internal_error();
        }
    };
    let body = match tokio::fs::read(&path).await {
        Ok(body) => body,
        Err(e) => {
            error!("List {}: cannot read artifact {}: {e}", list.id, path.display());
            return internal_error();
        }
    };

    let mut response = Response::builder().header(header::CONTENT_TYPE, format.content_type());
    if format == ArtifactFormat::Csv {
        response = response.header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", Publisher::download_name(&list)),
        );
    }
    response
        .body(axum::body::Body::from(body))
        .unwrap_or_else(|_| internal_error())
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
        .into_response()
}
