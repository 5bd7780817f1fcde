//! Order fulfillment endpoints: start, inspect, query and signal executions.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ExecutionId;
use domain::{Items, OrderInput};
use history::{HistoryQuery, HistoryStore, Version};
use saga::{
    ExecutionOutcome, InMemoryStatusPublisher, STATUS_KEY, SagaCoordinator, SagaError, SagaInstance,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: HistoryStore + Clone + 'static> {
    pub coordinator: SagaCoordinator<S>,
    /// The coordinator's status publisher, read as a visibility index.
    pub status: InMemoryStatusPublisher,
}

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub address: String,
    pub items: Option<Items>,
}

#[derive(Deserialize)]
pub struct ListParams {
    /// Only executions whose current status tag equals this value.
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelParams {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct AddressUpdateRequest {
    pub address: String,
}

#[derive(Deserialize)]
pub struct HistoryParams {
    pub event_type: Option<String>,
    /// First version to return (inclusive).
    pub from_version: Option<i64>,
    pub limit: Option<usize>,
}

impl HistoryParams {
    fn into_query(self) -> HistoryQuery {
        let mut query = HistoryQuery::new();
        if let Some(event_type) = self.event_type {
            query = query.event_type(event_type);
        }
        if let Some(from_version) = self.from_version {
            query = query.from_version(Version::new(from_version));
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query
    }
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStartedResponse {
    pub execution_id: String,
    pub order_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummaryResponse {
    pub execution_id: String,
    pub order_id: String,
    pub started_at: String,
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct ProgressResponse {
    pub progress: u8,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalAcceptedResponse {
    pub execution_id: String,
    pub accepted: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEventResponse {
    pub event_id: String,
    pub event_type: String,
    pub version: i64,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

// -- Handlers --

/// POST /orders: start a fulfillment saga for an order.
#[tracing::instrument(skip(state, req), fields(order_id = %req.order_id))]
pub async fn create<S: HistoryStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderStartedResponse>), ApiError> {
    let mut input = OrderInput::new(req.order_id, req.address);
    if let Some(items) = req.items {
        input = input.with_items(items);
    }
    let order_id = input.order_id.clone();

    let execution_id = state.coordinator.start_saga(input).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(OrderStartedResponse {
            execution_id: execution_id.to_string(),
            order_id,
        }),
    ))
}

/// GET /orders: list started executions, optionally by current status tag.
#[tracing::instrument(skip(state, params))]
pub async fn list<S: HistoryStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<OrderSummaryResponse>>, ApiError> {
    let executions = state.coordinator.list_executions().await?;
    let matching = params
        .status
        .as_deref()
        .map(|tag| state.status.find(STATUS_KEY, tag));

    let responses = executions
        .into_iter()
        .filter(|summary| {
            matching
                .as_ref()
                .is_none_or(|ids| ids.contains(&summary.execution_id))
        })
        .map(|summary| OrderSummaryResponse {
            execution_id: summary.execution_id.to_string(),
            status: state.status.tag(summary.execution_id, STATUS_KEY),
            order_id: summary.order_id,
            started_at: summary.started_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(responses))
}

/// GET /orders/{id}: the saga view folded from history.
#[tracing::instrument(skip(state))]
pub async fn get<S: HistoryStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaInstance>, ApiError> {
    let execution_id = parse_execution_id(&id)?;
    Ok(Json(state.coordinator.get_saga(execution_id).await?))
}

/// GET /orders/{id}/progress
#[tracing::instrument(skip(state))]
pub async fn progress<S: HistoryStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let execution_id = parse_execution_id(&id)?;
    let progress = state.coordinator.progress(execution_id).await?;
    Ok(Json(ProgressResponse { progress }))
}

/// GET /orders/{id}/queries/{name}
#[tracing::instrument(skip(state))]
pub async fn query<S: HistoryStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let execution_id = parse_execution_id(&id)?;
    Ok(Json(state.coordinator.query(execution_id, &name).await?))
}

/// GET /orders/{id}/result: 200 with the output, 202 while running, 422 on failure.
#[tracing::instrument(skip(state))]
pub async fn result<S: HistoryStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let execution_id = parse_execution_id(&id)?;

    let response = match state.coordinator.outcome(execution_id).await? {
        None => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "running" })),
        )
            .into_response(),
        Some(ExecutionOutcome::Completed(output)) => Json(output).into_response(),
        Some(ExecutionOutcome::Failed(failure)) => return Err(SagaError::Failed(failure).into()),
        Some(ExecutionOutcome::Crashed(reason)) => return Err(SagaError::Crashed(reason).into()),
    };
    Ok(response)
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state, params))]
pub async fn cancel<S: HistoryStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(params): Query<CancelParams>,
) -> Result<(StatusCode, Json<SignalAcceptedResponse>), ApiError> {
    let execution_id = parse_execution_id(&id)?;
    state.coordinator.cancel(execution_id, params.reason).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SignalAcceptedResponse {
            execution_id: execution_id.to_string(),
            accepted: "cancel",
        }),
    ))
}

/// PUT /orders/{id}/address
#[tracing::instrument(skip(state, req))]
pub async fn update_address<S: HistoryStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<AddressUpdateRequest>,
) -> Result<(StatusCode, Json<SignalAcceptedResponse>), ApiError> {
    let execution_id = parse_execution_id(&id)?;
    state
        .coordinator
        .update_address(execution_id, req.address)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SignalAcceptedResponse {
            execution_id: execution_id.to_string(),
            accepted: "updateAddress",
        }),
    ))
}

/// GET /orders/{id}/history: raw history, filtered by type and paged by version.
#[tracing::instrument(skip(state, params))]
pub async fn history<S: HistoryStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryEventResponse>>, ApiError> {
    let execution_id = parse_execution_id(&id)?;

    let events = state
        .coordinator
        .history(execution_id, params.into_query())
        .await?;

    let responses = events
        .into_iter()
        .map(|e| HistoryEventResponse {
            event_id: e.event_id.to_string(),
            event_type: e.event_type,
            version: e.version.as_i64(),
            timestamp: e.timestamp.to_rfc3339(),
            payload: e.payload,
        })
        .collect();

    Ok(Json(responses))
}

fn parse_execution_id(id: &str) -> Result<ExecutionId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid execution ID format: {e}")))?;
    Ok(ExecutionId::from(uuid))
}
