use crate::{
    model_service::{ModelService, PredictionError},
    state::ServiceContext,
};
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const ROUTE: &str = "/predict";

#[derive(Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: String,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Error, Debug)]
pub enum PredictImageError {
    #[error("No file part in the request")]
    MissingFile,
    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Prediction failed: {0}")]
    Prediction(#[from] PredictionError),
}

impl IntoResponse for PredictImageError {
    fn into_response(self) -> Response {
        let status = match self {
            PredictImageError::MissingFile | PredictImageError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            PredictImageError::Prediction(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!("Rejected prediction request ({}): {}", status, self);

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// First part that carries a file name, whatever its field name.
async fn read_file_part(multipart: &mut Multipart) -> Result<Bytes, PredictImageError> {
    while let Some(field) = multipart.next_field().await? {
        if field.file_name().is_some() {
            return Ok(field.bytes().await?);
        }
    }
    Err(PredictImageError::MissingFile)
}

#[instrument(skip(state, multipart))]
pub async fn predict_image<M: ModelService>(
    State(state): State<ServiceContext<M>>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, PredictImageError> {
    state.metrics.record_request(ROUTE);
    let image_data = read_file_part(&mut multipart).await?;

    let now = Instant::now();
    let prediction = state.model_service.predict(image_data).await?;
    state
        .metrics
        .record_prediction_duration(now.elapsed().as_millis() as u64, ROUTE);
    state.metrics.record_prediction(&prediction.label);

    tracing::debug!(
        "Predicted `{}` (class {})",
        prediction.label,
        prediction.class_index
    );

    Ok(Json(PredictionResponse {
        prediction: prediction.label,
    }))
}
