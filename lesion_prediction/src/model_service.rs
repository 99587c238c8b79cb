use async_trait::async_trait;
use bytes::Bytes;
use lesion_core::{labels::ClassLabels, preprocess::TransformError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Image transformation error: {0}")]
    Transform(#[from] TransformError),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Model returned unknown class index {0}")]
    UnknownClass(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub label: String,
}

#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn predict(&self, image_data: Bytes) -> Result<Prediction, PredictionError>;

    fn class_labels(&self) -> &ClassLabels;
}
