use crate::{model_service::ModelService, state::ServiceContext};
use axum::{extract::State, response::Json};
use lesion_core::labels::ClassLabels;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct LabelsResponse {
    pub class_labels: ClassLabels,
}

pub async fn class_labels<M: ModelService>(
    State(state): State<ServiceContext<M>>,
) -> Json<LabelsResponse> {
    Json(LabelsResponse {
        class_labels: state.model_service.class_labels().clone(),
    })
}
