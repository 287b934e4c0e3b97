//! HTTP entry point.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::{Result, StackError};
use crate::orchestrator::{CancelSignal, Orchestrator};

use super::{Response, parse_request};

/// Query for a stack name preview.
#[derive(Debug, Deserialize)]
pub struct StackNameQuery {
    /// Deploying identity.
    pub identity: String,
    /// Operating-system tag.
    pub os: String,
}

/// Builds the router.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stacks", post(run_handler))
        .route("/stacks/name", get(stack_name_handler))
        .with_state(orchestrator)
}

/// Serves the router on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn stack_name_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<StackNameQuery>,
) -> impl IntoResponse {
    let name = orchestrator.stack_name(&query.identity, &query.os);
    Json(json!({ "stackName": name }))
}

async fn run_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: Bytes,
) -> impl IntoResponse {
    let response = match std::str::from_utf8(&body)
        .map_err(|e| StackError::invalid(format!("body is not UTF-8: {e}"), "body"))
        .and_then(parse_request)
    {
        Ok(input) => {
            let cancel = CancelSignal::never().with_timeout(orchestrator.settings().run_timeout);
            let report = orchestrator.execute(&input, None, &cancel).await;
            Response::from_report(&report)
        }
        Err(err) => {
            warn!("Rejected request body: {}", err);
            Response::from_error(&err)
        }
    };
    HttpResponse(response)
}

/// Adapts [`Response`] to axum.
struct HttpResponse(Response);

impl IntoResponse for HttpResponse {
    fn into_response(self) -> axum::response::Response {
        let Response {
            status_code,
            headers,
            body,
        } = self.0;
        let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = (status, Json(body)).into_response();
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name),
                HeaderValue::try_from(value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}
