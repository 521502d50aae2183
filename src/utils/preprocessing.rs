//! Image to tensor encoding
//!
//! Converts a decoded bitmap into the normalized, channel-first float tensor
//! the segmentation model consumes.

use crate::{
    error::Result, models::PreprocessingConfig, utils::validation::TensorValidator,
};
use image::{imageops::FilterType, DynamicImage, RgbaImage};
use ndarray::Array4;

/// Tensor encoder for model input
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Encode an image into a `[1, 3, H, W]` tensor
    ///
    /// The image is resampled to exactly the configured target size (bilinear,
    /// no aspect-ratio preservation), alpha is dropped and each channel is
    /// normalized as `(v / 255 - mean[c]) / std[c]`.
    ///
    /// # Errors
    /// - `InvalidImage` if the source has zero width or height
    /// - `InvalidConfig` if the preprocessing constants are invalid
    pub fn encode(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        TensorValidator::validate_image_dimensions(image.width(), image.height())?;
        preprocessing_config.validate()?;

        let resized = Self::resample(image, preprocessing_config);
        Ok(Self::rgba_to_tensor(&resized, preprocessing_config))
    }

    /// Resample to the target size; identical sizes are passed through untouched
    #[must_use]
    pub fn resample(image: &DynamicImage, preprocessing_config: &PreprocessingConfig) -> RgbaImage {
        let (width, height) = (preprocessing_config.width(), preprocessing_config.height());
        let rgba = image.to_rgba8();
        if rgba.dimensions() == (width, height) {
            return rgba;
        }
        image::imageops::resize(&rgba, width, height, FilterType::Triangle)
    }

    /// Pack an already-resampled RGBA bitmap into a normalized NCHW tensor
    ///
    /// Plane `c` occupies flat offsets `c*H*W .. (c+1)*H*W`.
    #[must_use]
    pub fn rgba_to_tensor(
        canvas: &RgbaImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let (width, height) = (width as usize, height as usize);
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        let mut tensor = Array4::<f32>::zeros((1, 3, height, width));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size
        for (y, row) in canvas.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for c in 0..3 {
                    let value = f32::from(pixel[c]) / 255.0;
                    tensor[[0, c, y, x]] = (value - mean[c]) / std[c];
                }
            }
        }

        tensor
    }
}
