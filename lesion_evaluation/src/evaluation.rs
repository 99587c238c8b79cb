use crate::report::ClassificationReport;
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    tensor::backend::Backend,
};
use lesion_core::{
    artifact::{load_artifact, ArtifactError},
    backend::{select_device, InferenceBackend},
    config::{ArtifactConfig, Config},
    dataset::{DatasetError, ImageFolder, LesionBatch, LesionBatcher},
};
use std::{path::Path, sync::Arc};
use thiserror::Error;

const BATCH_SIZE: usize = 32;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Failed to load model artifact: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("Failed to load test dataset: {0}")]
    Dataset(#[from] DatasetError),
}

/// Scores the persisted model on `test_dir`. The test classes must be exactly
/// the classes the model was trained on.
pub fn evaluate<B: Backend>(
    test_dir: &Path,
    artifact: &ArtifactConfig,
    device: &B::Device,
) -> Result<ClassificationReport, EvaluationError> {
    let (model, metadata) = load_artifact::<B>(artifact, device)?;
    let dataset = ImageFolder::with_class_labels(test_dir, &metadata.class_labels)?;

    let dataloader: Arc<dyn DataLoader<B, LesionBatch<B>>> =
        DataLoaderBuilder::new(LesionBatcher::new(metadata.transform()))
            .batch_size(BATCH_SIZE)
            .set_device(device.clone())
            .build(dataset);

    let mut targets = Vec::new();
    let mut predictions = Vec::new();
    for batch in dataloader.iter() {
        targets.extend(
            batch
                .targets
                .into_data()
                .iter::<i64>()
                .map(|target| target as usize),
        );
        predictions.extend(model.predict(batch.images));
    }

    tracing::info!(
        "Evaluated {} images from {}",
        targets.len(),
        test_dir.display()
    );

    Ok(ClassificationReport::new(
        &metadata.class_labels,
        &targets,
        &predictions,
    ))
}

pub fn start_evaluation(config: &Config) -> Result<ClassificationReport, EvaluationError> {
    let device = select_device();
    evaluate::<InferenceBackend>(&config.dataset.test_dir, &config.artifact, &device)
}
