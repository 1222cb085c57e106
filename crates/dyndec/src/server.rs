//! Control-plane HTTP API
//!
//! | Method | Path | Body | Success |
//! |---|---|---|---|
//! | POST | `/schema` | `{"ProtoDescriptor": "<base64>"}` | 200 |
//! | POST | `/stream` | `{"StreamUUID", "ProtoPackage", "ProtoMessage"}` | 200 |
//! | DELETE | `/stream?stream_uuid=<url-safe base64>` | | 202 |
//! | POST | `/control` | `{"StreamUUID", "Payload"}` | 200 |
//! | GET | `/health` | | 200 |
//! | GET | `/metrics` | | 200 |
//!
//! `/control` is only routed when control dispatch is enabled. Every failure
//! is reported as `500` with a generic body; the detailed error is only
//! logged.

use crate::config::ApiConfig;
use crate::dispatch::DispatchClient;
use crate::error::{DecoderError, DecoderResult};
use crate::metrics::DecoderMetrics;
use crate::resolver::{parse_descriptor, MessageResolver};
use crate::store::SchemaStore;
use crate::types::{
    AssociateOutcome, AssociateStreamRequest, DisassociateOutcome, SendControlRequest, StreamId,
    UpsertSchemaRequest,
};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared server state
pub struct ServerState {
    pub resolver: MessageResolver,
    pub metrics: DecoderMetrics,
    /// Present only when control dispatch is enabled
    pub dispatch: Option<Mutex<DispatchClient>>,
}

impl ServerState {
    pub fn new(
        resolver: MessageResolver,
        metrics: DecoderMetrics,
        dispatch: Option<DispatchClient>,
    ) -> Self {
        Self {
            resolver,
            metrics,
            dispatch: dispatch.map(Mutex::new),
        }
    }

    fn store(&self) -> &SchemaStore {
        self.resolver.store()
    }
}

/// Control-plane HTTP server bound to its listening socket
pub struct ControlPlaneServer {
    state: Arc<ServerState>,
    listener: TcpListener,
}

impl ControlPlaneServer {
    /// Bind the API socket; serving starts with [`ControlPlaneServer::serve`]
    pub async fn bind(config: &ApiConfig, state: Arc<ServerState>) -> DecoderResult<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        Ok(Self { state, listener })
    }

    pub fn local_addr(&self) -> DecoderResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until `cancel` fires, then drain in-flight requests
    pub async fn serve(self, cancel: CancellationToken) -> DecoderResult<()> {
        let router = self.router();
        info!(address = %self.local_addr()?, "Control-plane API listening");
        axum::serve(self.listener, router)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;
        info!("Control-plane API stopped");
        Ok(())
    }
}

/// Build the Axum router
pub fn router(state: Arc<ServerState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/schema", post(upsert_schema))
        .route(
            "/stream",
            post(associate_stream).delete(disassociate_stream),
        );

    if state.dispatch.is_some() {
        router = router.route("/control", post(send_control));
    }

    router.with_state(state).layer(TraceLayer::new_for_http())
}

// ============================================================================
// Error responses
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: u32,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn request_failed(operation: &'static str, e: DecoderError) -> ApiError {
    warn!(operation, kind = %e.kind(), "Control-plane request failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error_code: e.error_code(),
            message: e.kind().to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub schemas: usize,
    pub streams: usize,
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        schemas: state.store().schema_count(),
        streams: state.store().association_count(),
    })
}

async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.metrics.update_store_gauges(state.store());
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            warn!("Failed to render metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                String::new(),
            )
        }
    }
}

async fn upsert_schema(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    register_schema(&state, &body)
        .map(|_| StatusCode::OK)
        .map_err(|e| request_failed("upsert_schema", e))
}

fn register_schema(state: &ServerState, body: &[u8]) -> DecoderResult<()> {
    let request: UpsertSchemaRequest = serde_json::from_slice(body)?;
    let parsed = parse_descriptor(&request.proto_descriptor)?;
    let outcome = state
        .store()
        .upsert_schema(&parsed.package, request.proto_descriptor);
    info!(package = %parsed.package, applied = outcome.applied(), "Proto package upserted");
    Ok(())
}

async fn associate_stream(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    bind_stream(&state, &body)
        .map(|_| StatusCode::OK)
        .map_err(|e| request_failed("associate_stream", e))
}

fn bind_stream(state: &ServerState, body: &[u8]) -> DecoderResult<()> {
    let request: AssociateStreamRequest = serde_json::from_slice(body)?;
    let stream = request.stream_uuid;
    match state
        .store()
        .associate(stream, &request.proto_package, &request.proto_message)?
    {
        AssociateOutcome::Created | AssociateOutcome::AlreadyAssociated => Ok(()),
        AssociateOutcome::Conflict(current) => {
            warn!(
                stream_id = %stream,
                package = %request.proto_package,
                message = %request.proto_message,
                current_package = %current.package,
                current_message = %current.message,
                "Association rejected, stream already bound"
            );
            Err(DecoderError::Conflict {
                stream,
                package: current.package,
                message: current.message,
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct DisassociateParams {
    stream_uuid: Option<String>,
}

async fn disassociate_stream(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<DisassociateParams>,
) -> Result<StatusCode, ApiError> {
    unbind_stream(&state, params.stream_uuid.as_deref())
        .map(|_| StatusCode::ACCEPTED)
        .map_err(|e| request_failed("disassociate_stream", e))
}

fn unbind_stream(state: &ServerState, encoded: Option<&str>) -> DecoderResult<DisassociateOutcome> {
    let encoded = encoded.ok_or_else(|| {
        DecoderError::InvalidInput("missing stream_uuid query parameter".to_string())
    })?;
    let stream = StreamId::from_url_safe(encoded)?;
    Ok(state.store().disassociate(stream))
}

async fn send_control(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    dispatch_control(&state, &body)
        .await
        .map(|_| StatusCode::OK)
        .map_err(|e| request_failed("send_control", e))
}

async fn dispatch_control(state: &ServerState, body: &[u8]) -> DecoderResult<()> {
    let request: SendControlRequest = serde_json::from_slice(body)?;
    let dispatch = state.dispatch.as_ref().ok_or(DecoderError::DispatchDisabled)?;

    let stream = request.stream_uuid;
    let mut instance = state.resolver.build_instance(stream)?;
    instance.decode_json(&request.payload)?;
    let message = instance.encode_binary();

    let result = dispatch.lock().await.send_control(stream, &message).await;
    state.metrics.record_control(result.is_ok());
    result?;

    info!(
        stream_id = %stream,
        message = %instance.full_name(),
        bytes = message.len(),
        "Control message dispatched"
    );
    Ok(())
}
