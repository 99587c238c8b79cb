use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array, Ix3, Ix4};
use std::path::Path;
use thiserror::Error;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Error reading image {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Error decoding image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Resize, scale to `[0, 1]` and normalize an image into a `[C, H, W]` array.
///
/// Training, evaluation and serving share this transform so the model always
/// sees identically prepared inputs.
#[derive(Debug, Clone)]
pub struct ImageTransform {
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImageTransform {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    pub fn with_normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn apply(&self, image: &DynamicImage) -> Array<f32, Ix3> {
        let size = self.size as usize;
        let img = image
            .resize_exact(self.size, self.size, FilterType::Triangle)
            .to_rgb8();

        let mut input = Array::zeros((3, size, size));
        for (x, y, pixel) in img.enumerate_pixels() {
            let x = x as usize;
            let y = y as usize;
            for (channel, value) in pixel.0.iter().enumerate() {
                let scaled = (*value as f32) / 255.;
                input[[channel, y, x]] = (scaled - self.mean[channel]) / self.std[channel];
            }
        }

        input
    }

    pub fn transform_bytes(&self, image_data: &[u8]) -> Result<Array<f32, Ix3>, TransformError> {
        let image = image::ImageReader::new(std::io::Cursor::new(image_data))
            .with_guessed_format()
            .map_err(|e| TransformError::Io {
                path: "<upload>".into(),
                source: e,
            })?
            .decode()?;

        Ok(self.apply(&image))
    }

    pub fn transform_path(&self, path: &Path) -> Result<Array<f32, Ix3>, TransformError> {
        let image = image::ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| TransformError::Io {
                path: path.display().to_string(),
                source: e,
            })?
            .decode()?;

        Ok(self.apply(&image))
    }
}

/// Stacks `[C, H, W]` arrays into a `[N, C, H, W]` batch.
pub fn stack(images: Vec<Array<f32, Ix3>>, size: u32) -> Array<f32, Ix4> {
    let size = size as usize;
    let mut batch = Array::zeros((images.len(), 3, size, size));
    for (mut slot, image) in batch.outer_iter_mut().zip(images) {
        slot.assign(&image);
    }
    batch
}

pub fn to_tensor<B: Backend>(batch: Array<f32, Ix4>, device: &B::Device) -> Tensor<B, 4> {
    let shape = batch.shape().to_vec();
    let (values, _) = batch.as_standard_layout().into_owned().into_raw_vec_and_offset();
    let data = TensorData::new(values, shape);

    Tensor::<B, 4>::from_data(data.convert::<B::FloatElem>(), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb(color)
            } else {
                Rgb([color[2], color[0], color[1]])
            }
        });
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
            .unwrap();
        image_data
    }

    #[test]
    fn test_transform_shape() {
        let transform = ImageTransform::new(32);
        let input = transform.transform_bytes(&png_bytes(100, 60, [255, 0, 0])).unwrap();

        assert_eq!(input.shape(), &[3, 32, 32]);
    }

    #[test]
    fn test_transform_is_deterministic() {
        let transform = ImageTransform::new(48);
        let image_data = png_bytes(97, 131, [12, 200, 77]);

        let first = transform.transform_bytes(&image_data).unwrap();
        let second = transform.transform_bytes(&image_data).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_normalization_constants() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(8, 8, Rgb([255, 0, 255]));
        let input = ImageTransform::new(8).apply(&DynamicImage::ImageRgb8(img));

        let expected_red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let expected_green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((input[[0, 3, 3]] - expected_red).abs() < 1e-6);
        assert!((input[[1, 3, 3]] - expected_green).abs() < 1e-6);
    }

    #[test]
    fn test_transform_rejects_non_image() {
        let transform = ImageTransform::new(32);
        let result = transform.transform_bytes(b"definitely not an image");

        assert!(matches!(result, Err(TransformError::Decode(_))));
    }

    #[test]
    fn test_stack_and_to_tensor() {
        let transform = ImageTransform::new(16);
        let images = vec![
            transform.transform_bytes(&png_bytes(20, 20, [1, 2, 3])).unwrap(),
            transform.transform_bytes(&png_bytes(30, 10, [9, 8, 7])).unwrap(),
        ];
        let batch = stack(images.clone(), 16);
        assert_eq!(batch.shape(), &[2, 3, 16, 16]);
        assert_eq!(batch.index_axis(ndarray::Axis(0), 1), images[1]);

        let tensor = to_tensor::<NdArray<f32>>(batch, &Default::default());
        assert_eq!(tensor.dims(), [2, 3, 16, 16]);
    }
}
