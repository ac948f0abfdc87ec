use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use cortexos_bus::StreamController;
use cortexos_types::ExecutionOptions;
use cortexos_wire::{encode_sse, verify_signature, SignatureError};

use crate::{AppState, RunHandle};

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/run", post(submit_run))
        .route("/run/{id}", get(get_run))
        .route("/run/{id}/events", get(stream_run))
        .route(&format!("/{}", state.webhook_path.trim_start_matches('/')), post(webhook))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "cortexos-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    prompt: String,
    #[serde(flatten)]
    options: ExecutionOptions,
}

#[derive(Debug, Serialize)]
struct RunAccepted {
    run_id: String,
}

async fn submit_run(State(state): State<AppState>, Json(request): Json<RunRequest>) -> impl IntoResponse {
    let run_id = Uuid::new_v4().to_string();
    let (stream, handle) = state
        .engine
        .execute_streaming(request.prompt, request.options, CancellationToken::new());

    let run_handle = Arc::new(RunHandle {
        stream,
        result: tokio::sync::RwLock::new(None),
    });
    state.runs.write().await.insert(run_id.clone(), run_handle.clone());

    tokio::spawn(async move {
        if let Ok(result) = handle.await {
            *run_handle.result.write().await = Some(result);
        }
    });

    (StatusCode::ACCEPTED, Json(RunAccepted { run_id }))
}

async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    let Some(run) = state.runs.read().await.get(&run_id).cloned() else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown run id" }))).into_response();
    };
    match run.result.read().await.clone() {
        Some(result) => Json(result).into_response(),
        None => (StatusCode::ACCEPTED, Json(json!({ "status": "running" }))).into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
struct EventsQuery {
    #[serde(default, rename = "lastEventId")]
    last_event_id: Option<u64>,
}

async fn stream_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let Some(run) = state.runs.read().await.get(&run_id).cloned() else {
        return (StatusCode::NOT_FOUND, "unknown run id").into_response();
    };
    Sse::new(sse_stream(run.stream.clone(), query.last_event_id.unwrap_or(0)))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn sse_stream(
    stream: Arc<StreamController>,
    from_sequence: u64,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    stream.pull_stream(from_sequence).map(|event| {
        let sequence = event.sequence;
        let frame = encode_sse(&event);
        Ok(Event::default().id(sequence.to_string()).data(frame))
    })
}

#[derive(Debug, Serialize)]
struct WebhookAccepted {
    accepted: bool,
    #[serde(rename = "webhookId")]
    webhook_id: String,
}

async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let Some(secret) = &state.webhook_secret else {
        return (StatusCode::NOT_FOUND, "no webhook configured").into_response();
    };

    let signature = match headers.get("x-signature-256").and_then(|v| v.to_str().ok()) {
        Some(value) => value,
        None => return StatusCode::UNAUTHORIZED.into_response(),
    };

    match verify_signature(secret, &body, signature) {
        Ok(()) => {}
        Err(SignatureError::MalformedHeader) | Err(SignatureError::Mismatch) => {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let webhook_id = Uuid::new_v4().to_string();
    tracing::info!(webhook_id = %webhook_id, "webhook accepted");
    (
        StatusCode::OK,
        Json(WebhookAccepted {
            accepted: true,
            webhook_id,
        }),
    )
        .into_response()
}
