//! HTTP API server for the order fulfillment saga.
//!
//! Provides REST endpoints to start fulfillment executions, follow their
//! progress, send them signals and inspect their history, with structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use history::HistoryStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryActivities, InMemoryStatusPublisher, SagaCoordinator, SagaOptions};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: HistoryStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health::<S>))
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/progress", get(routes::orders::progress::<S>))
        .route(
            "/orders/{id}/queries/{name}",
            get(routes::orders::query::<S>),
        )
        .route("/orders/{id}/result", get(routes::orders::result::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route(
            "/orders/{id}/address",
            put(routes::orders::update_address::<S>),
        )
        .route("/orders/{id}/history", get(routes::orders::history::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state: a coordinator over `store` with
/// simulated activities and an in-memory status index.
pub fn create_default_state<S: HistoryStore + Clone + 'static>(
    store: S,
    options: SagaOptions,
) -> Arc<AppState<S>> {
    let status = InMemoryStatusPublisher::new();
    let activities = InMemoryActivities::new();
    let coordinator = SagaCoordinator::new(store, activities.activities())
        .with_options(options)
        .with_status_publisher(Arc::new(status.clone()));

    Arc::new(AppState {
        coordinator,
        status,
    })
}
