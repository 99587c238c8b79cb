mod health;
mod labels;
mod metrics;
mod predict;

use crate::{model_service::ModelService, state::ServiceContext};
use axum::{
    routing::{get, post},
    Router,
};

pub use health::healthcheck;
pub use labels::{class_labels, LabelsResponse};
pub use metrics::metrics_handler;
pub use predict::{predict_image, ErrorResponse, PredictImageError, PredictionResponse};

pub fn api_routes<M: ModelService>() -> Router<ServiceContext<M>> {
    Router::new()
        .route("/predict", post(predict_image::<M>))
        .route("/labels", get(class_labels::<M>))
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler::<M>))
}
