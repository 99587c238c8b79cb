use crate::{
    config::{ArtifactConfig, Validatable},
    labels::ClassLabels,
    model::{LesionClassifier, ARCHITECTURE},
    preprocess::ImageTransform,
};
use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, RecorderError},
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Invalid artifact: {0}")]
    Invalid(String),
    #[error("Failed to access artifact file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize artifact metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("Failed to record model weights: {0}")]
    Weights(#[from] RecorderError),
}

/// Everything needed to rebuild the trained model, persisted next to the
/// weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub class_labels: ClassLabels,
    pub image_size: u32,
    pub architecture: String,
    pub num_epochs: usize,
    pub trained_at: String,
}

impl ArtifactMetadata {
    pub fn new(class_labels: ClassLabels, image_size: u32, num_epochs: usize) -> Self {
        Self {
            class_labels,
            image_size,
            architecture: ARCHITECTURE.to_string(),
            num_epochs,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn transform(&self) -> ImageTransform {
        ImageTransform::new(self.image_size)
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let metadata: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;

        if metadata.architecture != ARCHITECTURE {
            return Err(ArtifactError::Invalid(format!(
                "unsupported architecture `{}`, expected `{}`",
                metadata.architecture, ARCHITECTURE
            )));
        }
        if metadata.class_labels.is_empty() {
            return Err(ArtifactError::Invalid("no class labels".into()));
        }

        Ok(metadata)
    }

    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Writes weights and metadata, replacing any previous artifact.
pub fn save_artifact<B: Backend>(
    config: &ArtifactConfig,
    model: LesionClassifier<B>,
    metadata: &ArtifactMetadata,
) -> Result<(), ArtifactError> {
    std::fs::create_dir_all(&config.dir)?;

    model.save_file(config.get_weights_path(), &recorder())?;
    metadata.save(&config.get_metadata_path())?;

    tracing::info!(
        "Saved {} model with {} classes to {}",
        metadata.architecture,
        metadata.class_labels.len(),
        config.dir.display()
    );

    Ok(())
}

pub fn load_artifact<B: Backend>(
    config: &ArtifactConfig,
    device: &B::Device,
) -> Result<(LesionClassifier<B>, ArtifactMetadata), ArtifactError> {
    config.validate().map_err(ArtifactError::Invalid)?;

    let metadata = ArtifactMetadata::load(&config.get_metadata_path())?;
    let model = LesionClassifier::<B>::new(metadata.class_labels.len(), device).load_file(
        config.get_weights_path(),
        &recorder(),
        device,
    )?;

    tracing::info!(
        "Loaded model with classes {:?} from {}",
        metadata.class_labels.as_slice(),
        config.dir.display()
    );

    Ok((model, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        tensor::{Distribution, Tensor},
    };

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_round_trip_reproduces_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let config = ArtifactConfig::new(dir.path().join("artifacts"));
        let device = Default::default();

        let labels: ClassLabels = ["bcc", "mel", "nv"].into_iter().collect();
        let model = LesionClassifier::<TestBackend>::new(labels.len(), &device);
        let images = Tensor::<TestBackend, 4>::random([3, 3, 32, 32], Distribution::Default, &device);
        let expected = model.forward(images.clone()).into_data();
        let expected_labels = model.predict(images.clone());

        let metadata = ArtifactMetadata::new(labels.clone(), 32, 1);
        save_artifact(&config, model, &metadata).unwrap();
        let (loaded, loaded_metadata) = load_artifact::<TestBackend>(&config, &device).unwrap();

        assert_eq!(loaded_metadata, metadata);
        assert_eq!(loaded.predict(images.clone()), expected_labels);
        loaded
            .forward(images)
            .into_data()
            .assert_approx_eq::<f32>(&expected, burn::tensor::Tolerance::default());
    }

    #[test]
    fn test_missing_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = ArtifactConfig::new(dir.path());

        let result = load_artifact::<TestBackend>(&config, &Default::default());
        assert!(matches!(result, Err(ArtifactError::Invalid(_))));
    }

    #[test]
    fn test_metadata_rejects_unknown_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        let mut metadata = ArtifactMetadata::new(["a", "b"].into_iter().collect(), 224, 3);
        metadata.architecture = "vgg16".into();
        metadata.save(&path).unwrap();

        assert!(matches!(
            ArtifactMetadata::load(&path),
            Err(ArtifactError::Invalid(_))
        ));
    }
}
