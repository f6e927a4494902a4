use std::net::SocketAddr;
use std::sync::Arc;

use adk_catalog::{CatalogService, Readiness};
use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::ApiError;
use crate::protocol::{
    BatchAddRequest, BatchAddResponse, CollectionInfo, HealthResponse, ListCollectionsResponse,
    MessageResponse, RagInfoCreate, RagInfoItem, RagInfoListParams, RagInfoPageResponse,
    RagInfoUpdate, SearchAllParams, SearchAllResponse, SearchParams, SearchResponse, SimilarityHit,
    StatusResponse,
};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CatalogService>,
}

impl AppState {
    pub fn new(service: Arc<CatalogService>) -> Self {
        Self { service }
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(status))
        .route("/health", get(health))
        .route("/collections", get(list_collections))
        .route("/collection/{name}", post(create_collection).delete(delete_collection))
        .route("/add_batch", post(add_batch))
        .route("/search", get(search))
        .route("/search_all", get(search_all))
        .route("/v1/rag-info", get(list_rag_info).post(create_rag_info))
        .route("/v1/rag-info/{key}", get(get_rag_info).put(update_rag_info).delete(delete_rag_info))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Serve the API on the configured address until Ctrl-C, then shut the service down.
pub async fn run_server(service: Arc<CatalogService>) -> anyhow::Result<()> {
    let bind = service.config().server.bind_address();
    let addr: SocketAddr =
        bind.parse().with_context(|| format!("invalid server address '{bind}'"))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("adk-catalog listening on http://{}", addr);

    let app = app_router(AppState::new(service.clone()));
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(service)).await?;
    Ok(())
}

async fn shutdown_signal(service: Arc<CatalogService>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutdown requested");
    service.shutdown().await;
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "adk-catalog".to_string(),
        readiness: state.service.readiness().await,
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.service.status().await;
    let healthy = status.backend_connected && status.readiness == Readiness::Ready;
    Json(StatusResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        backend: status.backend,
        backend_connected: status.backend_connected,
        readiness: status.readiness,
        collections: status.collections.into_iter().map(|c| c.name).collect(),
    })
}

async fn list_collections(State(state): State<AppState>) -> ApiResult<Json<ListCollectionsResponse>> {
    let collections = state.service.list_collections().await?;
    Ok(Json(ListCollectionsResponse {
        collections: collections.into_iter().map(CollectionInfo::from).collect(),
    }))
}

async fn create_collection(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<CollectionInfo>)> {
    let collection = state.service.create_collection(&name).await?;
    Ok((StatusCode::CREATED, Json(collection.into())))
}

async fn delete_collection(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<MessageResponse>> {
    state.service.delete_collection(&name).await?;
    Ok(Json(MessageResponse { message: format!("Collection {name} deleted successfully") }))
}

async fn add_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchAddRequest>,
) -> ApiResult<Json<BatchAddResponse>> {
    let report = state.service.ingest_batch(&request.collection_name, request.items).await?;
    let count = report.succeeded.len();
    let message = if report.is_complete() {
        format!("Successfully added {count} items to collection {}", request.collection_name)
    } else {
        format!(
            "Added {count} of {} items to collection {}; {} failed",
            report.submitted,
            request.collection_name,
            report.failed_count()
        )
    };
    Ok(Json(BatchAddResponse { message, count, report }))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    let config = state.service.config();
    let limit = params.limit.unwrap_or(config.search.default_limit);
    let collection_name =
        params.collection_name.unwrap_or_else(|| config.collections.default_collection.clone());
    let results = state.service.search(&collection_name, &params.query, limit).await?;
    Ok(Json(SearchResponse {
        query: params.query,
        collection_name,
        results: results.into_iter().map(SimilarityHit::from).collect(),
    }))
}

async fn search_all(
    State(state): State<AppState>,
    Query(params): Query<SearchAllParams>,
) -> ApiResult<Json<SearchAllResponse>> {
    let defaults = &state.service.config().search;
    let limit = params.limit_per_collection.unwrap_or(defaults.default_limit_per_collection);
    let min_score = params.min_score.unwrap_or(defaults.default_min_score);

    let grouped = match params.collections.as_deref() {
        Some(names) => {
            let names: Vec<String> = names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
            state.service.search_collections(&params.query, &names, limit, min_score).await?
        }
        None => state.service.search_all(&params.query, limit, min_score).await?,
    };

    Ok(Json(SearchAllResponse {
        query: params.query,
        results: grouped
            .groups
            .into_iter()
            .map(|(collection, hits)| (collection, hits.into_iter().map(SimilarityHit::from).collect()))
            .collect(),
        failures: grouped.failures,
    }))
}

async fn list_rag_info(
    State(state): State<AppState>,
    Query(params): Query<RagInfoListParams>,
) -> ApiResult<Json<RagInfoPageResponse>> {
    let page = state
        .service
        .rag_info_list(params.page.unwrap_or(1), params.limit.unwrap_or(10), params.search.as_deref())
        .await?;
    Ok(Json(page.into()))
}

async fn create_rag_info(
    State(state): State<AppState>,
    Json(request): Json<RagInfoCreate>,
) -> ApiResult<(StatusCode, Json<RagInfoItem>)> {
    let entry = state.service.rag_info_create(&request.key, &request.description).await?;
    Ok((StatusCode::CREATED, Json(entry.into())))
}

async fn get_rag_info(Path(key): Path<String>, State(state): State<AppState>) -> ApiResult<Json<RagInfoItem>> {
    Ok(Json(state.service.rag_info_get(&key).await?.into()))
}

async fn update_rag_info(
    Path(key): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<RagInfoUpdate>,
) -> ApiResult<Json<RagInfoItem>> {
    Ok(Json(state.service.rag_info_update(&key, &request.description).await?.into()))
}

async fn delete_rag_info(Path(key): Path<String>, State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.service.rag_info_delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
