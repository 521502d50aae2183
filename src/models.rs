//! Model asset description and fixed input/output contract

use crate::error::{LesionSegError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default model file shipped next to the application
pub const DEFAULT_MODEL_FILE: &str = "lesion_256_fp16.onnx";

/// Spatial resolution the bundled model was exported with
pub const DEFAULT_INPUT_SIZE: u32 = 256;

/// ImageNet channel means (R, G, B)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations (R, G, B)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessing parameters applied by the tensor encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Target resolution as `[width, height]`
    pub target_size: [u32; 2],
    /// Per-channel mean subtracted after scaling to `[0, 1]`
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation divided out after mean subtraction
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE],
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
        }
    }
}

impl PreprocessingConfig {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.target_size[0]
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.target_size[1]
    }

    /// Validate target size and normalization constants
    ///
    /// # Errors
    /// - Zero target width or height
    /// - Non-finite mean, or standard deviation that is not strictly positive
    pub fn validate(&self) -> Result<()> {
        if self.width() == 0 || self.height() == 0 {
            return Err(LesionSegError::invalid_config(format!(
                "Target size must be non-zero, got {}x{}",
                self.width(),
                self.height()
            )));
        }

        for (channel, (mean, std)) in self
            .normalization_mean
            .iter()
            .zip(self.normalization_std.iter())
            .enumerate()
        {
            if !mean.is_finite() {
                return Err(LesionSegError::invalid_config(format!(
                    "Normalization mean for channel {channel} must be finite"
                )));
            }
            if !std.is_finite() || *std <= 0.0 {
                return Err(LesionSegError::config_value_error(
                    "normalization std",
                    *std,
                    "> 0.0",
                    None,
                ));
            }
        }

        Ok(())
    }
}

/// Fixed tensor contract of the exported segmentation model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelContract {
    /// Name of the single float32 input
    pub input_name: String,
    /// Name of the single float32 logits output
    pub output_name: String,
    /// Input shape `(N, C, H, W)`
    pub input_shape: (usize, usize, usize, usize),
    /// Output shape `(N, 1, H, W)`
    pub output_shape: (usize, usize, usize, usize),
}

impl Default for ModelContract {
    fn default() -> Self {
        let size = DEFAULT_INPUT_SIZE as usize;
        Self {
            input_name: "input".to_string(),
            output_name: "logits".to_string(),
            input_shape: (1, 3, size, size),
            output_shape: (1, 1, size, size),
        }
    }
}

impl ModelContract {
    /// Contract for a model with the given square input resolution
    #[must_use]
    pub fn square(size: usize) -> Self {
        Self {
            input_shape: (1, 3, size, size),
            output_shape: (1, 1, size, size),
            ..Self::default()
        }
    }

    /// Number of output logits (one per pixel)
    #[must_use]
    pub fn output_len(&self) -> usize {
        let (n, c, h, w) = self.output_shape;
        n * c * h * w
    }

    /// Validate the contract describes a single-image RGB in, single-channel out model
    ///
    /// # Errors
    /// - Batch size other than 1, wrong channel counts or zero spatial size
    /// - Input and output spatial sizes differ
    pub fn validate(&self) -> Result<()> {
        let (n, c, h, w) = self.input_shape;
        let (on, oc, oh, ow) = self.output_shape;

        if n != 1 || c != 3 || h == 0 || w == 0 {
            return Err(LesionSegError::invalid_config(format!(
                "Model input must be [1, 3, H, W], got [{n}, {c}, {h}, {w}]"
            )));
        }
        if on != 1 || oc != 1 {
            return Err(LesionSegError::invalid_config(format!(
                "Model output must be [1, 1, H, W], got [{on}, {oc}, {oh}, {ow}]"
            )));
        }
        if (oh, ow) != (h, w) {
            return Err(LesionSegError::invalid_config(format!(
                "Model output size {ow}x{oh} does not match input size {w}x{h}"
            )));
        }
        Ok(())
    }
}

/// Where the model binary lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelLocation {
    /// Remote `http(s)://` URL
    Url(String),
    /// Local file path
    Path(PathBuf),
}

impl ModelLocation {
    /// Parse a CLI-style model argument: URLs stay URLs, everything else is a path
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            Self::Url(value.to_string())
        } else {
            Self::Path(PathBuf::from(value.strip_prefix("file://").unwrap_or(value)))
        }
    }
}

impl std::fmt::Display for ModelLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A model binary plus the contract it is expected to honor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAsset {
    pub location: ModelLocation,
    /// Optional version appended as `v=` query parameter to bust stale caches
    pub version: Option<String>,
    pub contract: ModelContract,
}

impl Default for ModelAsset {
    fn default() -> Self {
        Self {
            location: ModelLocation::Path(PathBuf::from(DEFAULT_MODEL_FILE)),
            version: None,
            contract: ModelContract::default(),
        }
    }
}

impl ModelAsset {
    #[must_use]
    pub fn new(location: ModelLocation) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_contract(mut self, contract: ModelContract) -> Self {
        self.contract = contract;
        self
    }

    /// The request key used against the asset cache, including the version query
    ///
    /// # Examples
    /// ```
    /// use lesionseg::models::{ModelAsset, ModelLocation};
    ///
    /// let asset = ModelAsset::new(ModelLocation::parse("https://example.com/m.onnx"))
    ///     .with_version("3");
    /// assert_eq!(asset.request_url(), "https://example.com/m.onnx?v=3");
    /// ```
    #[must_use]
    pub fn request_url(&self) -> String {
        let base = self.location.to_string();
        match &self.version {
            Some(version) if base.contains('?') => format!("{base}&v={version}"),
            Some(version) => format!("{base}?v={version}"),
            None => base,
        }
    }
}
