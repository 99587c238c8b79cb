use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    data::dataset::Dataset,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::RecorderError,
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use lesion_core::{
    artifact::{save_artifact, ArtifactError, ArtifactMetadata},
    backend::{select_device, TrainingBackend},
    config::{ArtifactConfig, Config, ModelConfig, TrainingConfig},
    dataset::{DatasetError, ImageFolder, LesionBatch, LesionBatcher},
    model::{LesionClassifier, ResNetBackbone},
    preprocess::ImageTransform,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Invalid training settings: {0}")]
    InvalidSettings(String),
    #[error("Failed to load dataset: {0}")]
    Dataset(#[from] DatasetError),
    #[error("Pretrained weights not found: {0:?}")]
    MissingPretrained(PathBuf),
    #[error("Failed to load pretrained weights from {path:?}: {source}")]
    Pretrained {
        path: PathBuf,
        source: RecorderError,
    },
    #[error("Failed to save artifact: {0}")]
    Artifact(#[from] ArtifactError),
}

/// The trained model (without autodiff) together with what was persisted.
pub struct TrainingOutcome<B: Backend> {
    pub model: LesionClassifier<B>,
    pub metadata: ArtifactMetadata,
    pub epoch_losses: Vec<f64>,
}

fn validate(training: &TrainingConfig, model: &ModelConfig) -> Result<(), TrainingError> {
    if training.batch_size == 0 {
        return Err(TrainingError::InvalidSettings("batch_size must be positive".into()));
    }
    if model.image_size == 0 {
        return Err(TrainingError::InvalidSettings("image_size must be positive".into()));
    }
    Ok(())
}

fn init_model<B: Backend>(
    model_config: &ModelConfig,
    num_classes: usize,
    device: &B::Device,
) -> Result<LesionClassifier<B>, TrainingError> {
    let backbone = ResNetBackbone::<B>::new(device);
    let backbone = match &model_config.pretrained_weights {
        Some(path) if !path.exists() => {
            return Err(TrainingError::MissingPretrained(path.clone()));
        }
        Some(path) => {
            tracing::info!("Loading pretrained backbone from {}", path.display());
            backbone
                .load_pretrained(path, device)
                .map_err(|source| TrainingError::Pretrained {
                    path: path.clone(),
                    source,
                })?
        }
        None => {
            tracing::warn!("No pretrained weights configured, the backbone starts from scratch");
            backbone
        }
    };

    Ok(LesionClassifier::with_backbone(backbone, num_classes, device))
}

pub fn train<B: AutodiffBackend>(
    train_dir: &Path,
    model_config: &ModelConfig,
    training: &TrainingConfig,
    artifact: &ArtifactConfig,
    device: &B::Device,
) -> Result<TrainingOutcome<B::InnerBackend>, TrainingError> {
    validate(training, model_config)?;

    let dataset = ImageFolder::new(train_dir)?;
    let class_labels = dataset.class_labels().clone();
    let num_items = dataset.len();

    let mut model = init_model::<B>(model_config, class_labels.len(), device)?;
    let mut optim = AdamConfig::new().init::<B, LesionClassifier<B>>();

    let mut builder = DataLoaderBuilder::new(LesionBatcher::new(ImageTransform::new(
        model_config.image_size,
    )))
    .batch_size(training.batch_size)
    .shuffle(training.seed)
    .set_device(device.clone());
    if training.num_workers > 0 {
        builder = builder.num_workers(training.num_workers);
    }
    let dataloader: Arc<dyn DataLoader<B, LesionBatch<B>>> = builder.build(dataset);

    tracing::info!(
        "Training on {} images, {} classes {:?}, for {} epochs",
        num_items,
        class_labels.len(),
        class_labels.as_slice(),
        training.num_epochs
    );

    let now = Instant::now();
    let mut epoch_losses = Vec::with_capacity(training.num_epochs);
    for epoch in 1..=training.num_epochs {
        let mut total_loss = 0.0;

        for batch in dataloader.iter() {
            let batch_size = batch.targets.dims()[0];
            let loss = model
                .forward_classification(batch.images, batch.targets)
                .loss;
            total_loss += loss.clone().into_scalar().elem::<f64>() * batch_size as f64;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(training.learning_rate, model, grads);
        }

        let mean_loss = total_loss / num_items as f64;
        tracing::info!(
            "Epoch {}/{}, mean loss {:.4}",
            epoch,
            training.num_epochs,
            mean_loss
        );
        epoch_losses.push(mean_loss);
    }
    let elapsed = now.elapsed().as_secs();
    tracing::info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

    let model = model.valid();
    let metadata =
        ArtifactMetadata::new(class_labels, model_config.image_size, training.num_epochs);
    save_artifact(artifact, model.clone(), &metadata)?;

    Ok(TrainingOutcome {
        model,
        metadata,
        epoch_losses,
    })
}

pub fn start_training(config: &Config) -> Result<(), TrainingError> {
    let device = select_device();

    let outcome = train::<TrainingBackend>(
        &config.dataset.train_dir,
        &config.model,
        &config.training,
        &config.artifact,
        &device,
    )?;

    tracing::info!(
        "Weights written to {}, final mean loss {:.4}",
        config.artifact.get_weights_path().display(),
        outcome.epoch_losses.last().copied().unwrap_or_default()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::{Distribution, Tensor},
    };
    use image::{ImageBuffer, Rgb};
    use lesion_core::artifact::load_artifact;

    type TestBackend = NdArray<f32>;

    fn synthetic_dataset(root: &Path) {
        for (class, color) in [("benign", [230, 40, 40]), ("malignant", [30, 30, 200])] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for n in 0..2u8 {
                ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(40, 40, |x, y| {
                    let noise = ((x + y) as u8).wrapping_mul(n + 1) % 16;
                    Rgb([color[0] - noise, color[1] + noise, color[2]])
                })
                .save(dir.join(format!("{n}.png")))
                .unwrap();
            }
        }
    }

    fn tiny_settings() -> (ModelConfig, TrainingConfig) {
        let model = ModelConfig {
            image_size: 32,
            pretrained_weights: None,
        };
        let training = TrainingConfig {
            batch_size: 2,
            num_epochs: 1,
            num_workers: 0,
            ..TrainingConfig::default()
        };
        (model, training)
    }

    #[test]
    fn test_train_writes_artifact_that_reproduces_predictions() {
        let dir = tempfile::tempdir().unwrap();
        synthetic_dataset(&dir.path().join("train"));
        let artifact = ArtifactConfig::new(dir.path().join("artifacts"));
        let (model_config, training) = tiny_settings();
        let device = Default::default();

        let outcome = train::<Autodiff<TestBackend>>(
            &dir.path().join("train"),
            &model_config,
            &training,
            &artifact,
            &device,
        )
        .unwrap();

        assert!(artifact.get_weights_path().exists());
        assert_eq!(outcome.epoch_losses.len(), 1);
        assert!(outcome.epoch_losses[0].is_finite());
        assert_eq!(
            outcome.metadata.class_labels.as_slice(),
            &["benign".to_string(), "malignant".into()]
        );

        let images =
            Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        let (loaded, metadata) = load_artifact::<TestBackend>(&artifact, &device).unwrap();
        assert_eq!(metadata, outcome.metadata);
        assert_eq!(loaded.predict(images.clone()), outcome.model.predict(images));
    }

    #[test]
    fn test_missing_dataset_fails_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = ArtifactConfig::new(dir.path().join("artifacts"));
        let (model_config, training) = tiny_settings();

        let result = train::<Autodiff<TestBackend>>(
            &dir.path().join("missing"),
            &model_config,
            &training,
            &artifact,
            &Default::default(),
        );

        assert!(matches!(result, Err(TrainingError::Dataset(_))));
        assert!(!artifact.get_weights_path().exists());
    }

    #[test]
    fn test_missing_pretrained_weights_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        synthetic_dataset(&dir.path().join("train"));
        let artifact = ArtifactConfig::new(dir.path().join("artifacts"));
        let (mut model_config, training) = tiny_settings();
        model_config.pretrained_weights = Some(dir.path().join("resnet18.pth"));

        let result = train::<Autodiff<TestBackend>>(
            &dir.path().join("train"),
            &model_config,
            &training,
            &artifact,
            &Default::default(),
        );

        assert!(matches!(result, Err(TrainingError::MissingPretrained(_))));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let (model_config, mut training) = tiny_settings();
        training.batch_size = 0;

        assert!(matches!(
            validate(&training, &model_config),
            Err(TrainingError::InvalidSettings(_))
        ));
    }
}
