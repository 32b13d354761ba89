//! HTTP view over a running carstats session.
//!
//! Read-only JSON endpoints for provider health, the merged schema and the
//! merged measurements, plus one endpoint that forces a pull-and-dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use log::{error, info};
use serde::Serialize;

use carstats_core::{
    CarStatsClient, ConnectionState, FieldSchema, Measurements, ProviderIdentity, ProviderStatus,
    Value,
};

/// Shared server state.
struct AppState {
    client: Arc<CarStatsClient>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    providers_connected: usize,
    providers_total: usize,
    fields: usize,
}

#[derive(Serialize)]
struct ProvidersResponse {
    providers: Vec<ProviderStatus>,
    total: usize,
}

#[derive(Serialize)]
struct FieldEntry {
    #[serde(flatten)]
    schema: FieldSchema,
    owner: Option<ProviderIdentity>,
}

#[derive(Serialize)]
struct SchemaResponse {
    fields: BTreeMap<String, FieldEntry>,
    total: usize,
}

#[derive(Serialize)]
struct MeasurementsResponse {
    timestamp_ms: u64,
    count: usize,
    values: BTreeMap<String, Value>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal_error(message: String) -> ApiError {
    error!("{message}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn measurements_response(values: Measurements) -> MeasurementsResponse {
    MeasurementsResponse {
        timestamp_ms: now_millis(),
        count: values.len(),
        values: values.into_iter().collect(),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let statuses = state.client.provider_statuses();
    let connected = statuses
        .iter()
        .filter(|s| s.state == ConnectionState::Connected)
        .count();
    Json(HealthResponse {
        status: if connected > 0 {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        providers_connected: connected,
        providers_total: statuses.len(),
        fields: state.client.get_schema().len(),
    })
}

async fn handle_providers(State(state): State<Arc<AppState>>) -> Json<ProvidersResponse> {
    let providers = state.client.provider_statuses();
    let total = providers.len();
    Json(ProvidersResponse { providers, total })
}

async fn handle_schema(State(state): State<Arc<AppState>>) -> Json<SchemaResponse> {
    let snapshot = state.client.get_schema();
    let fields: BTreeMap<String, FieldEntry> = snapshot
        .fields()
        .iter()
        .map(|(key, schema)| {
            (
                key.clone(),
                FieldEntry {
                    schema: schema.clone(),
                    owner: snapshot.owner_of(key).cloned(),
                },
            )
        })
        .collect();
    let total = fields.len();
    Json(SchemaResponse { fields, total })
}

async fn handle_measurements(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MeasurementsResponse>, ApiError> {
    // Provider calls block for up to the RPC timeout.
    let client = Arc::clone(&state.client);
    let values = tokio::task::spawn_blocking(move || client.get_merged_measurements())
        .await
        .map_err(|e| internal_error(format!("measurement pull failed: {e}")))?;
    Ok(Json(measurements_response(values)))
}

async fn handle_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MeasurementsResponse>, ApiError> {
    let client = Arc::clone(&state.client);
    let values = tokio::task::spawn_blocking(move || client.force_update_measurements())
        .await
        .map_err(|e| internal_error(format!("forced update failed: {e}")))?;
    Ok(Json(measurements_response(values)))
}

async fn handle_index(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let providers: Vec<String> = state
        .client
        .provider_statuses()
        .iter()
        .map(|s| s.identity.to_string())
        .collect();

    Json(serde_json::json!({
        "name": "CarStats Server",
        "version": carstats_core::VERSION,
        "providers": providers,
        "endpoints": {
            "/": "This API index",
            "/health": "Connected providers and merged field count",
            "/providers": "Per-provider connection state, in priority order",
            "/schema": "Merged field schema with the owning provider of each field",
            "/measurements": "Merged measurements pulled from every connected provider",
            "/measurements/refresh": {
                "method": "POST",
                "description": "Pull merged measurements and deliver them to every listener",
            },
        },
    }))
}

/// Build the axum router.
pub fn build_router(client: Arc<CarStatsClient>) -> Router {
    let state = Arc::new(AppState { client });

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/providers", get(handle_providers))
        .route("/schema", get(handle_schema))
        .route("/measurements", get(handle_measurements))
        .route("/measurements/refresh", post(handle_refresh))
        .with_state(state)
}

/// Run the HTTP server until the task is cancelled or the socket fails.
pub async fn run_server(client: Arc<CarStatsClient>, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(client);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("serving on http://{addr}");
    axum::serve(listener, app).await
}
