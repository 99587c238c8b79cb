use crate::{
    labels::ClassLabels,
    preprocess::{self, ImageTransform},
};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Int, Tensor, TensorData},
};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};
use thiserror::Error;

const SUPPORTED_FILES: [&str; 4] = ["bmp", "jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Dataset directory not found: {0}")]
    MissingRoot(PathBuf),
    #[error("No class directories found in {0}")]
    NoClasses(PathBuf),
    #[error("No images found in {0}")]
    Empty(PathBuf),
    #[error("Invalid class directory name: {0}")]
    InvalidClassName(PathBuf),
    #[error("Class mismatch in {root}: missing {missing:?}, unexpected {unexpected:?}")]
    ClassMismatch {
        root: PathBuf,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LesionItem {
    pub path: PathBuf,
    pub label: usize,
}

/// Labeled images laid out as `root/<class>/<image>`.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    items: Vec<LesionItem>,
    class_labels: ClassLabels,
}

impl ImageFolder {
    /// Discovers the classes from the subdirectory names, sorted.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let root = root.as_ref();
        let class_labels: ClassLabels = class_directories(root)?.into_iter().collect();
        if class_labels.is_empty() {
            return Err(DatasetError::NoClasses(root.to_path_buf()));
        }

        Self::load(root, class_labels)
    }

    /// Loads the folder against an existing class ordering. The class set on
    /// disk has to match `class_labels` exactly.
    pub fn with_class_labels(
        root: impl AsRef<Path>,
        class_labels: &ClassLabels,
    ) -> Result<Self, DatasetError> {
        let root = root.as_ref();
        let on_disk: BTreeSet<String> = class_directories(root)?.into_iter().collect();
        let expected: BTreeSet<String> = class_labels.iter().map(String::from).collect();

        if on_disk != expected {
            return Err(DatasetError::ClassMismatch {
                root: root.to_path_buf(),
                missing: expected.difference(&on_disk).cloned().collect(),
                unexpected: on_disk.difference(&expected).cloned().collect(),
            });
        }

        Self::load(root, class_labels.clone())
    }

    fn load(root: &Path, class_labels: ClassLabels) -> Result<Self, DatasetError> {
        let mut items = Vec::new();
        for (label, class_name) in class_labels.iter().enumerate() {
            let mut paths = Vec::new();
            for entry in std::fs::read_dir(root.join(class_name))? {
                let path = entry?.path();
                if path.is_file() && is_supported(&path) {
                    paths.push(path);
                }
            }
            paths.sort();

            tracing::debug!("Class {} ({}): {} images", label, class_name, paths.len());
            items.extend(paths.into_iter().map(|path| LesionItem { path, label }));
        }

        if items.is_empty() {
            return Err(DatasetError::Empty(root.to_path_buf()));
        }

        tracing::info!(
            "Loaded {} images in {} classes from {}",
            items.len(),
            class_labels.len(),
            root.display()
        );

        Ok(Self {
            root: root.to_path_buf(),
            items,
            class_labels,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn class_labels(&self) -> &ClassLabels {
        &self.class_labels
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }
}

impl Dataset<LesionItem> for ImageFolder {
    fn get(&self, index: usize) -> Option<LesionItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

fn class_directories(root: &Path) -> Result<Vec<String>, DatasetError> {
    if !root.is_dir() {
        return Err(DatasetError::MissingRoot(root.to_path_buf()));
    }

    let mut classes = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| DatasetError::InvalidClassName(path.clone()))?;
            classes.push(name.to_string());
        }
    }
    classes.sort();

    Ok(classes)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_FILES.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Clone, Debug)]
pub struct LesionBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct LesionBatcher {
    transform: ImageTransform,
}

impl LesionBatcher {
    pub fn new(transform: ImageTransform) -> Self {
        Self { transform }
    }
}

impl<B: Backend> Batcher<B, LesionItem, LesionBatch<B>> for LesionBatcher {
    fn batch(&self, items: Vec<LesionItem>, device: &B::Device) -> LesionBatch<B> {
        let targets: Vec<i64> = items.iter().map(|item| item.label as i64).collect();

        // Batching is infallible, an unreadable image aborts the run.
        let images = items
            .iter()
            .map(|item| {
                self.transform
                    .transform_path(&item.path)
                    .unwrap_or_else(|e| panic!("Failed to load {}: {}", item.path.display(), e))
            })
            .collect();

        let images = preprocess::to_tensor::<B>(
            preprocess::stack(images, self.transform.size()),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets.clone(), [targets.len()]).convert::<B::IntElem>(),
            device,
        );

        LesionBatch { images, targets }
    }
}
