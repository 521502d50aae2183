//! Tensor validation utilities
//!
//! Provides centralized validation for tensor shapes, dimensions, and
//! array-related operations.

use crate::error::{LesionSegError, Result};
use ndarray::Array4;

/// Validator for tensor operations and shape validation
pub struct TensorValidator;

impl TensorValidator {
    /// Read the shape of a 4D tensor as a tuple
    #[must_use]
    pub fn shape_of(tensor: &Array4<f32>) -> (usize, usize, usize, usize) {
        tensor.dim()
    }

    /// Validate tensor shape matches expected dimensions
    ///
    /// # Errors
    /// - Shape differs from `expected_shape`
    pub fn validate_tensor_shape(
        tensor: &Array4<f32>,
        expected_shape: (usize, usize, usize, usize),
    ) -> Result<()> {
        let actual = Self::shape_of(tensor);
        if actual != expected_shape {
            let (batch, channels, height, width) = expected_shape;
            return Err(LesionSegError::inference(format!(
                "Tensor shape mismatch. Expected [{}, {}, {}, {}], got [{}, {}, {}, {}]",
                batch, channels, height, width, actual.0, actual.1, actual.2, actual.3
            )));
        }

        Ok(())
    }

    /// Validate that tensor has batch size of 1 and single channel
    ///
    /// # Errors
    /// - Batch size or channel count other than 1
    pub fn validate_single_batch_single_channel(tensor: &Array4<f32>) -> Result<()> {
        let (batch, channels, _, _) = Self::shape_of(tensor);
        if batch != 1 || channels != 1 {
            return Err(LesionSegError::inference(format!(
                "Logits must have batch size 1 and a single channel, got [{batch}, {channels}, _, _]"
            )));
        }
        Ok(())
    }

    /// Validate image dimensions are non-degenerate and within reasonable bounds
    ///
    /// # Errors
    /// - Zero width or height, or either side above 16K pixels
    pub fn validate_image_dimensions(width: u32, height: u32) -> Result<()> {
        const MAX_DIMENSION: u32 = 16384;

        if width == 0 || height == 0 {
            return Err(LesionSegError::invalid_image(format!(
                "Image has degenerate dimensions {}x{}",
                width, height
            )));
        }

        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(LesionSegError::invalid_image(format!(
                "Image dimensions too large: {}x{}. Maximum: {}x{}",
                width, height, MAX_DIMENSION, MAX_DIMENSION
            )));
        }

        Ok(())
    }

    /// Validate every tensor value is finite
    ///
    /// # Errors
    /// - Tensor contains NaN or infinity
    pub fn validate_finite(tensor: &Array4<f32>) -> Result<()> {
        if let Some(value) = tensor.iter().find(|v| !v.is_finite()) {
            return Err(LesionSegError::inference(format!(
                "Tensor contains non-finite value {value}"
            )));
        }
        Ok(())
    }
}
