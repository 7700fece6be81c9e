//! HTTP boundary: REST routes plus the server-sent event stream.
//!
//! A thin adapter over the device manager, the stream manager, and the
//! event dispatcher; all behavior lives behind those.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use rocd_devices::{DeviceError, DeviceManager};
use rocd_events::EventDispatcher;
use rocd_models::{Device, Stream as StreamRecord};

use crate::streams::StreamManager;

#[derive(Clone)]
pub struct AppState {
    pub devices: Arc<DeviceManager>,
    pub streams: Arc<StreamManager>,
    pub edisp: Arc<EventDispatcher>,
}

/// Device errors mapped onto HTTP responses.
struct ApiError(DeviceError);

impl From<DeviceError> for ApiError {
    fn from(err: DeviceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DeviceError::NotFound(_) => StatusCode::NOT_FOUND,
            err if err.is_validation() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/:device_uid", get(get_device).put(update_device))
        .route(
            "/stream_devices",
            get(list_stream_devices).post(create_stream_device),
        )
        .route(
            "/stream_devices/:device_uid",
            get(get_stream_device)
                .put(update_stream_device)
                .delete(delete_stream_device),
        )
        .route("/streams", get(list_streams).post(create_stream))
        .route(
            "/streams/:stream_uid",
            get(get_stream).put(update_stream).delete(delete_stream),
        )
        .route("/events", get(listen_events))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Run the HTTP server until the shutdown token fires.
pub async fn serve(
    state: AppState,
    address: &str,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    info!("listening at http://{address}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server failed")?;

    Ok(())
}

async fn log_requests(request: axum::extract::Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    debug!(%method, %uri, "enter");
    let started = std::time::Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        %uri,
        status = %response.status().as_u16(),
        elapsed = ?started.elapsed(),
        "leave"
    );
    response
}

fn owned(devices: Vec<Arc<Device>>) -> Vec<Device> {
    devices.iter().map(|dev| dev.as_ref().clone()).collect()
}

async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<Device>>, ApiError> {
    let devices = state.devices.list_devices().await?;
    Ok(Json(owned(devices)))
}

async fn get_device(
    State(state): State<AppState>,
    Path(device_uid): Path<String>,
) -> Result<Json<Device>, ApiError> {
    let device = state.devices.get_device(&device_uid).await?;
    Ok(Json(device.as_ref().clone()))
}

async fn update_device(
    State(state): State<AppState>,
    Path(device_uid): Path<String>,
    Json(patch): Json<Device>,
) -> Result<Json<Device>, ApiError> {
    let device = state.devices.update_device(&device_uid, &patch).await?;
    Ok(Json(device.as_ref().clone()))
}

async fn list_stream_devices(
    State(state): State<AppState>,
) -> Result<Json<Vec<Device>>, ApiError> {
    let devices = state.devices.list_stream_devices().await?;
    Ok(Json(owned(devices)))
}

async fn create_stream_device(
    State(state): State<AppState>,
    Json(device): Json<Device>,
) -> Result<Json<Device>, ApiError> {
    let device = state.devices.create_stream_device(&device).await?;
    Ok(Json(device.as_ref().clone()))
}

async fn get_stream_device(
    State(state): State<AppState>,
    Path(device_uid): Path<String>,
) -> Result<Json<Device>, ApiError> {
    let device = state.devices.get_stream_device(&device_uid).await?;
    Ok(Json(device.as_ref().clone()))
}

async fn update_stream_device(
    State(state): State<AppState>,
    Path(device_uid): Path<String>,
    Json(patch): Json<Device>,
) -> Result<Json<Device>, ApiError> {
    let device = state
        .devices
        .update_stream_device(&device_uid, &patch)
        .await?;
    Ok(Json(device.as_ref().clone()))
}

async fn delete_stream_device(
    State(state): State<AppState>,
    Path(device_uid): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.devices.delete_stream_device(&device_uid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_streams(
    State(state): State<AppState>,
) -> Result<Json<Vec<StreamRecord>>, ApiError> {
    let streams = state.streams.list_streams().await?;
    Ok(Json(streams))
}

async fn create_stream(
    State(state): State<AppState>,
    Json(stream): Json<StreamRecord>,
) -> Result<Json<Option<StreamRecord>>, ApiError> {
    let stream = state.streams.create_stream(&stream).await?;
    Ok(Json(stream))
}

async fn get_stream(
    State(state): State<AppState>,
    Path(stream_uid): Path<String>,
) -> Result<Json<Option<StreamRecord>>, ApiError> {
    let stream = state.streams.get_stream(&stream_uid).await?;
    Ok(Json(stream))
}

async fn update_stream(
    State(state): State<AppState>,
    Path(stream_uid): Path<String>,
    Json(stream): Json<StreamRecord>,
) -> Result<Json<Option<StreamRecord>>, ApiError> {
    let stream = state.streams.update_stream(&stream_uid, &stream).await?;
    Ok(Json(stream))
}

async fn delete_stream(
    State(state): State<AppState>,
    Path(stream_uid): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.streams.delete_stream(&stream_uid).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Server-sent event stream; each event is one JSON device change.
async fn listen_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let listener = state.edisp.subscribe();

    let stream = futures::stream::unfold(listener, |mut listener| async move {
        let event = listener.recv().await?;
        let sse_event = match serde_json::to_string(&event) {
            Ok(data) => SseEvent::default().data(data),
            Err(_) => return None,
        };
        Some((Ok::<_, Infallible>(sse_event), listener))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
