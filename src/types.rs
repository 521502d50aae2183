//! Core data types shared across the pipeline

use crate::{
    error::{LesionSegError, Result},
    utils::TensorValidator,
};
use instant::Duration;
use ndarray::Array4;

/// Logistic function mapping a logit to a probability
///
/// `sigmoid(0.0)` is exactly `0.5`.
#[inline]
#[must_use]
pub fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

/// Lesion classification rule: strictly greater than the threshold
#[inline]
#[must_use]
pub fn is_lesion(probability: f32, threshold: f32) -> bool {
    probability > threshold
}

/// Per-pixel lesion probabilities, row-major, every value in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl ProbabilityMap {
    /// Apply the sigmoid to a `[1, 1, H, W]` logits tensor
    ///
    /// # Errors
    /// - `InferenceFailure` if the tensor is not single-batch single-channel
    /// - `InferenceFailure` if any logit is NaN
    pub fn from_logits(logits: &Array4<f32>) -> Result<Self> {
        TensorValidator::validate_single_batch_single_channel(logits)?;
        let (_, _, height, width) = logits.dim();

        let values: Vec<f32> = logits.iter().map(|&logit| sigmoid(logit)).collect();
        if values.iter().any(|p| p.is_nan()) {
            return Err(LesionSegError::inference("Model produced NaN logits"));
        }

        Self::from_probabilities(
            u32::try_from(width).map_err(|_| LesionSegError::inference("Logits too wide"))?,
            u32::try_from(height).map_err(|_| LesionSegError::inference("Logits too tall"))?,
            values,
        )
    }

    /// Build a map from probabilities that were computed elsewhere
    ///
    /// # Errors
    /// - Length does not equal `width * height`
    /// - Any value outside `[0, 1]`
    pub fn from_probabilities(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(LesionSegError::inference(format!(
                "Probability map has {} values, expected {}x{} = {}",
                values.len(),
                width,
                height,
                expected
            )));
        }
        if let Some(p) = values.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(LesionSegError::inference(format!(
                "Probability {p} outside [0, 1]"
            )));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Probability at pixel `(x, y)`
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

/// Lesion coverage at a given threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskStats {
    pub threshold: f32,
    pub lesion_pixels: usize,
    pub total_pixels: usize,
}

impl MaskStats {
    /// Fraction of pixels classified as lesion
    #[must_use]
    pub fn coverage(&self) -> f64 {
        if self.total_pixels == 0 {
            0.0
        } else {
            self.lesion_pixels as f64 / self.total_pixels as f64
        }
    }
}

/// Raw result of one inference cycle
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    /// Logits shaped `[1, 1, H, W]`
    pub logits: Array4<f32>,
    /// Duration of the timed call
    pub latency: Duration,
    /// Duration of the warm-up call, if one was made
    pub warmup_latency: Option<Duration>,
}
