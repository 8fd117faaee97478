use crate::config::{Config, PipelineConfig};
use crate::error::PrepError;
use crate::planning::profiles::{OcrProfile, PageContext, ProfileSpec};
use crate::preprocessing::codec::decode_image;
use crate::preprocessing::pipeline::{Pipeline, PipelineReport, StageKind};
use crate::structure::{
    build_retry_plan, compute_structure_score, extract_signals, RecordCandidates, RetryPlan,
    StructureOptions, TableExtraction,
};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, pipeline_config: PipelineConfig) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::new(pipeline_config)),
            config: Arc::new(config),
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct StageInfo {
    pub stage: StageKind,
    pub method: &'static str,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub stages: Vec<StageInfo>,
    pub profiles: Vec<ProfileSpec>,
    pub supported_formats: Vec<String>,
    pub max_file_size_bytes: usize,
}

/// An extraction and its derived record candidates.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExtractionInput {
    pub table: Option<TableExtraction>,
    pub record_candidates: Option<RecordCandidates>,
}

/// Body of `POST /structure/retry-plan`. When `retry` is present the
/// plan is resolved against it.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RetryPlanRequest {
    #[serde(flatten)]
    pub initial: ExtractionInput,
    pub options: Option<StructureOptions>,
    pub retry: Option<ExtractionInput>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let max_file_size = state.config.max_file_size;
    Router::new()
        .route("/preprocess", post(handle_preprocess))
        .route("/structure/retry-plan", post(handle_retry_plan))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(DefaultBodyLimit::max(max_file_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: Config) -> anyhow::Result<()> {
    let pipeline_config = config.load_pipeline_config()?;
    let addr = format!("{}:{}", config.host, config.port);
    let app = router(AppState::new(config, pipeline_config));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Handle preprocessing requests
async fn handle_preprocess(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PipelineReport>, PrepError> {
    let start = Instant::now();

    let mut file_data: Option<Bytes> = None;
    let mut context = PageContext::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PrepError::InvalidRequest(format!("Failed to parse multipart: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                file_data = Some(field.bytes().await.map_err(|e| {
                    PrepError::InvalidRequest(format!("Failed to read file data: {}", e))
                })?);
            }
            "record_type" => {
                let value = field.text().await.map_err(|e| {
                    PrepError::InvalidRequest(format!("Invalid record_type: {}", e))
                })?;
                context.record_type = Some(value).filter(|v| !v.trim().is_empty());
            }
            "layout_template_id" => {
                let value = field.text().await.map_err(|e| {
                    PrepError::InvalidRequest(format!("Invalid layout_template_id: {}", e))
                })?;
                let id = value.trim().parse::<u64>().map_err(|_| {
                    PrepError::InvalidRequest(format!("layout_template_id must be an integer: {}", value))
                })?;
                context.layout_template_id = Some(id);
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    let data = file_data.ok_or(PrepError::MissingFile)?;

    if data.len() > state.config.max_file_size {
        return Err(PrepError::ImageTooLarge {
            size: data.len(),
            max: state.config.max_file_size,
        });
    }

    let pipeline = Arc::clone(&state.pipeline);
    let output = tokio::task::spawn_blocking(move || {
        let image = decode_image(&data)?;
        pipeline.process(image, &context)
    })
    .await
    .map_err(|e| PrepError::Internal(format!("Pipeline task failed: {}", e)))??;

    tracing::info!(
        "Preprocessing completed in {}ms, {} page(s)",
        start.elapsed().as_millis(),
        output.report.pages.len()
    );

    Ok(Json(output.report))
}

/// Handle structure retry planning requests
async fn handle_retry_plan(
    State(state): State<AppState>,
    payload: Result<Json<RetryPlanRequest>, JsonRejection>,
) -> Result<Json<RetryPlan>, PrepError> {
    let Json(request) = payload.map_err(|e| PrepError::InvalidRequest(e.body_text()))?;
    let options = request
        .options
        .unwrap_or_else(|| state.pipeline.config().structure.clone());

    let mut plan = build_retry_plan(
        request.initial.table.as_ref(),
        request.initial.record_candidates.as_ref(),
        &options,
    );
    if let Some(retry) = request.retry {
        let signals = extract_signals(retry.table.as_ref(), retry.record_candidates.as_ref());
        plan = plan.resolve(compute_structure_score(signals));
    }

    Ok(Json(plan))
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        stages: StageKind::ORDER
            .iter()
            .map(|&stage| StageInfo {
                stage,
                method: stage.method(),
            })
            .collect(),
        profiles: OcrProfile::ALL.iter().map(|p| p.spec()).collect(),
        supported_formats: ["image/png", "image/jpeg", "image/tiff", "image/bmp", "image/webp"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        max_file_size_bytes: state.config.max_file_size,
    })
}
