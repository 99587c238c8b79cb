//! ResNet-18 backbone with a replaceable classification head.
//!
//! Parameter names follow torchvision's `resnet18` so a pretrained PyTorch
//! checkpoint can be loaded into [`ResNetBackbone`] directly; only the
//! `downsample` sequential needs remapping.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    record::{FullPrecisionSettings, Recorder, RecorderError},
    tensor::{backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::path::Path;

pub const ARCHITECTURE: &str = "resnet18";
const STAGE_WIDTHS: [usize; 4] = [64, 128, 256, 512];
const BLOCKS_PER_STAGE: [usize; 4] = [2, 2, 2, 2];
const FEATURE_DIM: usize = 512;

#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(input))
    }
}

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    relu: Relu,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1: conv3x3(in_channels, out_channels, stride, device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv3x3(out_channels, out_channels, 1, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            downsample,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(input)));
        let x = self.bn2.forward(self.conv2.forward(x));

        self.relu.forward(x + identity)
    }
}

fn conv3x3<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

fn make_layer<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    blocks: usize,
    stride: usize,
    device: &B::Device,
) -> Vec<BasicBlock<B>> {
    let mut layer = Vec::with_capacity(blocks);
    layer.push(BasicBlock::new(in_channels, out_channels, stride, device));
    for _ in 1..blocks {
        layer.push(BasicBlock::new(out_channels, out_channels, 1, device));
    }
    layer
}

/// Everything up to and including global average pooling.
#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    relu: Relu,
    maxpool: MaxPool2d,
    layer1: Vec<BasicBlock<B>>,
    layer2: Vec<BasicBlock<B>>,
    layer3: Vec<BasicBlock<B>>,
    layer4: Vec<BasicBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> ResNetBackbone<B> {
    pub fn new(device: &B::Device) -> Self {
        let [layer1, layer2, layer3, layer4] = [0, 1, 2, 3].map(|stage| {
            let in_channels = if stage == 0 { 64 } else { STAGE_WIDTHS[stage - 1] };
            let stride = if stage == 0 { 1 } else { 2 };
            make_layer(in_channels, STAGE_WIDTHS[stage], BLOCKS_PER_STAGE[stage], stride, device)
        });

        Self {
            conv1: Conv2dConfig::new([3, 64], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(64).init(device),
            relu: Relu::new(),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    /// Loads torchvision-named weights, ignoring the checkpoint's `fc` head.
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self, RecorderError> {
        let load_args = LoadArgs::new(path.to_path_buf())
            .with_key_remap(r"(layer[1-4]\.[0-9]+)\.downsample\.0\.(.+)", "$1.downsample.conv.$2")
            .with_key_remap(r"(layer[1-4]\.[0-9]+)\.downsample\.1\.(.+)", "$1.downsample.bn.$2");
        let record = PyTorchFileRecorder::<FullPrecisionSettings>::default().load(load_args, device)?;

        Ok(self.load_record(record))
    }

    /// Returns `[batch, 512]` features.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(images)));
        let mut x = self.maxpool.forward(x);

        for block in self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
        {
            x = block.forward(x);
        }

        self.avgpool.forward(x).flatten(1, 3)
    }
}

#[derive(Module, Debug)]
pub struct LesionClassifier<B: Backend> {
    backbone: ResNetBackbone<B>,
    head: Linear<B>,
}

impl<B: Backend> LesionClassifier<B> {
    pub fn new(num_classes: usize, device: &B::Device) -> Self {
        Self::with_backbone(ResNetBackbone::new(device), num_classes, device)
    }

    /// Puts a fresh `num_classes` head on top of an existing backbone.
    pub fn with_backbone(
        backbone: ResNetBackbone<B>,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            backbone,
            head: LinearConfig::new(FEATURE_DIM, num_classes).init(device),
        }
    }

    /// Returns `[batch, num_classes]` logits.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// Arg-max class index for each image of the batch.
    pub fn predict(&self, images: Tensor<B, 4>) -> Vec<usize> {
        self.forward(images)
            .argmax(1)
            .into_data()
            .iter::<i64>()
            .map(|index| index as usize)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model = LesionClassifier::<TestBackend>::new(7, &device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);

        assert_eq!(model.forward(images.clone()).dims(), [2, 7]);
        assert_eq!(model.backbone.forward(images).dims(), [2, FEATURE_DIM]);
    }

    #[test]
    fn test_downsample_only_where_shape_changes() {
        let device = Default::default();
        let backbone = ResNetBackbone::<TestBackend>::new(&device);

        assert!(backbone.layer1.iter().all(|block| block.downsample.is_none()));
        for layer in [&backbone.layer2, &backbone.layer3, &backbone.layer4] {
            assert_eq!(layer.len(), 2);
            assert!(layer[0].downsample.is_some());
            assert!(layer[1].downsample.is_none());
        }
    }

    #[test]
    fn test_predict_is_stable() {
        let device = Default::default();
        let model = LesionClassifier::<TestBackend>::new(3, &device);
        let images = Tensor::<TestBackend, 4>::random(
            [2, 3, 32, 32],
            burn::tensor::Distribution::Default,
            &device,
        );

        let first = model.predict(images.clone());
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|&index| index < 3));
        assert_eq!(first, model.predict(images));
    }

    #[test]
    fn test_classification_loss_is_finite() {
        let device = Default::default();
        let model = LesionClassifier::<Autodiff<TestBackend>>::new(2, &device);
        let images = Tensor::zeros([2, 3, 32, 32], &device);
        let targets = Tensor::<Autodiff<TestBackend>, 1, Int>::from_ints([0, 1], &device);

        let output = model.forward_classification(images, targets);
        let loss: f32 = output.loss.into_scalar();

        assert!(loss.is_finite());
    }
}
