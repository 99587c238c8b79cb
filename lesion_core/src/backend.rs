//! Backend selection. The CPU `ndarray` backend is the default; building with
//! the `wgpu` feature picks the best GPU adapter available at run time.

use burn::backend::Autodiff;
use burn::tensor::Device;

#[cfg(not(feature = "wgpu"))]
pub type InferenceBackend = burn::backend::NdArray<f32>;

#[cfg(feature = "wgpu")]
pub type InferenceBackend = burn::backend::Wgpu;

pub type TrainingBackend = Autodiff<InferenceBackend>;

pub fn select_device() -> Device<InferenceBackend> {
    let device = Device::<InferenceBackend>::default();
    tracing::info!("Using device {:?}", device);
    device
}
