use crate::model_service::{ModelService, Prediction, PredictionError};
use async_trait::async_trait;
use burn::tensor::backend::Backend;
use bytes::Bytes;
use lesion_core::{
    artifact::{load_artifact, ArtifactError, ArtifactMetadata},
    config::ArtifactConfig,
    labels::ClassLabels,
    model::LesionClassifier,
    preprocess::{self, ImageTransform},
};
use ndarray::{Array, Ix3};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

/// Serves predictions from a pool of model copies picked round-robin.
#[derive(Clone)]
pub struct BurnModelService<B: Backend> {
    models: Arc<Vec<Arc<Mutex<LesionClassifier<B>>>>>,
    counter: Arc<AtomicUsize>,
    transform: ImageTransform,
    class_labels: ClassLabels,
    device: B::Device,
}

impl<B: Backend> BurnModelService<B> {
    pub fn new(
        model: LesionClassifier<B>,
        metadata: ArtifactMetadata,
        num_instances: usize,
        device: &B::Device,
    ) -> Self {
        let num_instances = num_instances.max(1);
        let models = (0..num_instances)
            .map(|_| Arc::new(Mutex::new(model.clone())))
            .collect();

        tracing::info!("Created {} model instances", num_instances);

        Self {
            models: Arc::new(models),
            counter: Arc::new(AtomicUsize::new(0)),
            transform: metadata.transform(),
            class_labels: metadata.class_labels,
            device: device.clone(),
        }
    }

    pub fn from_artifact(
        artifact: &ArtifactConfig,
        num_instances: usize,
        device: &B::Device,
    ) -> Result<Self, ArtifactError> {
        let (model, metadata) = load_artifact::<B>(artifact, device)?;
        Ok(Self::new(model, metadata, num_instances, device))
    }

    fn run_inference(&self, input: Array<f32, Ix3>) -> Result<usize, PredictionError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.models.len();
        // The model is never mutated, so a poisoned lock still guards a usable model.
        let model = self.models[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        tracing::debug!("Handling request with model instance {}", index);
        let images = preprocess::to_tensor::<B>(
            preprocess::stack(vec![input], self.transform.size()),
            &self.device,
        );

        model
            .predict(images)
            .first()
            .copied()
            .ok_or_else(|| PredictionError::Inference("empty model output".into()))
    }
}

#[async_trait]
impl<B: Backend> ModelService for BurnModelService<B> {
    async fn predict(&self, image_data: Bytes) -> Result<Prediction, PredictionError> {
        let service = self.clone();
        let class_index = tokio::task::spawn_blocking(move || {
            let input = service.transform.transform_bytes(&image_data)?;
            service.run_inference(input)
        })
        .await
        .map_err(|e| PredictionError::Inference(format!("inference task failed: {}", e)))??;

        let label = self
            .class_labels
            .get(class_index)
            .ok_or(PredictionError::UnknownClass(class_index))?;

        Ok(Prediction {
            class_index,
            label: label.to_string(),
        })
    }

    fn class_labels(&self) -> &ClassLabels {
        &self.class_labels
    }
}
