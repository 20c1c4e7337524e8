use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Request, State, multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    http::{HeaderValue, Method, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{SecondsFormat, Utc};
use metrics::counter;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::{CropEngine, DiseaseEngine};
use crate::error::ApiError;
use crate::types::{
    API_MESSAGE, API_STATUS, CropFeatures, CropResponse, DiseaseResult, MessageResponse,
    StatusResponse,
};

const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    crops: Arc<dyn CropEngine + Send + Sync>,
    disease: Arc<dyn DiseaseEngine + Send + Sync>,
}

impl AppState {
    pub fn new(
        crops: Arc<dyn CropEngine + Send + Sync>,
        disease: Arc<dyn DiseaseEngine + Send + Sync>,
    ) -> Self {
        Self { crops, disease }
    }
}

/// CORS policy for the browser clients: explicit origins, credentials allowed.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("Invalid CORS origin {origin:?}"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

pub fn router(state: AppState, cors: CorsLayer, max_upload_bytes: usize) -> Router {
    let status = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .layer(cors.clone());

    // Plain OPTIONS requests are answered before the CORS layer sees them;
    // real preflights still go through it.
    let inference = Router::new()
        .route("/recommend_crops", post(recommend_crops))
        .route("/detect_disease", post(detect_disease))
        .layer(cors)
        .layer(middleware::from_fn(plain_options));

    status
        .merge(inference)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn plain_options(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS
        && !request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
    {
        return Json(MessageResponse { message: "OK" }).into_response();
    }
    next.run(request).await
}

async fn root() -> Json<StatusResponse> {
    Json(StatusResponse {
        message: API_MESSAGE,
        status: API_STATUS,
        timestamp: None,
    })
}

async fn health() -> Json<StatusResponse> {
    Json(StatusResponse {
        message: API_MESSAGE,
        status: API_STATUS,
        timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
    })
}

#[tracing::instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4().simple()))]
async fn recommend_crops(
    State(state): State<AppState>,
    payload: Result<Json<CropFeatures>, JsonRejection>,
) -> Result<Json<CropResponse>, ApiError> {
    counter!("crop_recommendations_total").increment(1);

    let result = rank_crops(&state, payload).await;
    if let Err(err) = &result {
        counter!("inference_errors_total", "endpoint" => "recommend_crops").increment(1);
        tracing::warn!(error = %err, "Crop recommendation failed");
    }
    result
}

async fn rank_crops(
    state: &AppState,
    payload: Result<Json<CropFeatures>, JsonRejection>,
) -> Result<Json<CropResponse>, ApiError> {
    let Json(features) = payload?;
    tracing::debug!(?features, "Received crop recommendation request");

    let recommended_crops = state.crops.recommend(features).await?;
    tracing::debug!(?recommended_crops, "Returning recommendations");
    Ok(Json(CropResponse { recommended_crops }))
}

#[tracing::instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4().simple()))]
async fn detect_disease(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DiseaseResult>, ApiError> {
    let result = score_upload(&state, multipart).await;
    match &result {
        Ok(Json(detection)) => {
            counter!("disease_detections_total", "result" => detection.result.as_str())
                .increment(1);
        }
        Err(err) => {
            counter!("inference_errors_total", "endpoint" => "detect_disease").increment(1);
            tracing::warn!(error = %err, "Disease detection failed");
        }
    }
    result
}

async fn score_upload(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DiseaseResult>, ApiError> {
    let mut multipart = multipart?;
    let image = loop {
        let Some(field) = multipart.next_field().await? else {
            return Err(ApiError::unprocessable(format!(
                "Field required: {UPLOAD_FIELD}"
            )));
        };
        if field.name() == Some(UPLOAD_FIELD) {
            tracing::debug!(filename = ?field.file_name(), "Received disease detection upload");
            break field.bytes().await?;
        }
    };

    let detection = state.disease.detect(image.to_vec()).await?;
    tracing::debug!(?detection, "Detection finished");
    Ok(Json(detection))
}
