//! Configuration types for lesion segmentation

use crate::error::{LesionSegError, Result};
use crate::models::{ModelAsset, ModelContract, PreprocessingConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Compute backend identifiers, tried in priority order at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// ONNX Runtime with NVIDIA CUDA (accelerated GPU)
    OnnxCuda,
    /// ONNX Runtime with Apple `CoreML` (portable GPU / Neural Engine)
    OnnxCoreMl,
    /// ONNX Runtime on the CPU
    OnnxCpu,
    /// Tract, pure Rust CPU inference (always-available fallback)
    Tract,
}

impl BackendKind {
    /// All backend kinds in default priority order
    pub const ALL: [Self; 4] = [Self::OnnxCuda, Self::OnnxCoreMl, Self::OnnxCpu, Self::Tract];

    /// Identifier in `backend:provider` form
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::OnnxCuda => "onnx:cuda",
            Self::OnnxCoreMl => "onnx:coreml",
            Self::OnnxCpu => "onnx:cpu",
            Self::Tract => "tract:cpu",
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::OnnxCuda => "ONNX Runtime, NVIDIA GPU acceleration",
            Self::OnnxCoreMl => "ONNX Runtime, Apple Silicon GPU acceleration",
            Self::OnnxCpu => "ONNX Runtime, CPU execution",
            Self::Tract => "Tract, pure Rust CPU execution",
        }
    }

    /// Whether support for this backend was compiled into the crate
    #[must_use]
    pub fn is_compiled_in(self) -> bool {
        match self {
            Self::OnnxCuda | Self::OnnxCoreMl | Self::OnnxCpu => cfg!(feature = "onnx"),
            Self::Tract => cfg!(feature = "tract"),
        }
    }

    /// Default fallback chain, restricted to compiled-in backends
    #[must_use]
    pub fn default_priority() -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|kind| kind.is_compiled_in())
            .collect()
    }

    /// Parse a comma separated backend list such as `onnx:cuda,tract`
    ///
    /// # Errors
    /// - Any entry is not a known backend identifier
    pub fn parse_list(value: &str) -> Result<Vec<Self>> {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Self::from_str)
            .collect()
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for BackendKind {
    type Err = LesionSegError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx:cuda" | "cuda" => Ok(Self::OnnxCuda),
            "onnx:coreml" | "coreml" => Ok(Self::OnnxCoreMl),
            "onnx:cpu" | "onnx" => Ok(Self::OnnxCpu),
            "tract:cpu" | "tract" => Ok(Self::Tract),
            other => Err(LesionSegError::invalid_config(format!(
                "Unknown backend '{other}'. Expected one of: onnx:cuda, onnx:coreml, onnx:cpu, tract:cpu"
            ))),
        }
    }
}

/// Color and opacity used for lesion pixels in the overlay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayStyle {
    /// Highlight color (RGB)
    pub color: [u8; 3],
    /// Opacity of lesion pixels in `[0, 1]`
    pub opacity: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: [255, 0, 0],
            opacity: 0.5,
        }
    }
}

impl OverlayStyle {
    /// Alpha byte written for lesion pixels
    #[must_use]
    pub fn alpha(&self) -> u8 {
        (255.0 * self.opacity.clamp(0.0, 1.0)).round() as u8
    }
}

/// Configuration for a segmentation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Backends tried in order; the first that loads the model wins
    pub backends: Vec<BackendKind>,

    /// Model asset and its tensor contract
    pub model: ModelAsset,

    /// Tensor encoder parameters
    pub preprocessing: PreprocessingConfig,

    /// Initial probability threshold (lesion iff `p > threshold`)
    pub threshold: f32,

    /// Overlay color and opacity
    pub overlay: OverlayStyle,

    /// Run one untimed warm-up call before the timed call
    pub warmup: bool,

    /// Upper bound for a single backend call (None = wait indefinitely)
    #[serde(with = "optional_millis")]
    pub inference_timeout: Option<Duration>,

    /// How many times a timed-out call is retried before it is reported
    pub timeout_retries: u32,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            backends: BackendKind::default_priority(),
            model: ModelAsset::default(),
            preprocessing: PreprocessingConfig::default(),
            threshold: 0.5,
            overlay: OverlayStyle::default(),
            warmup: true,
            inference_timeout: None,
            timeout_retries: 0,
            intra_threads: 0,
        }
    }
}

impl SegmentationConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use lesionseg::{BackendKind, SegmentationConfig};
    ///
    /// let config = SegmentationConfig::builder()
    ///     .backends(vec![BackendKind::OnnxCpu, BackendKind::Tract])
    ///     .threshold(0.4)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.backends.len(), 2);
    /// ```
    #[must_use]
    pub fn builder() -> SegmentationConfigBuilder {
        SegmentationConfigBuilder::default()
    }

    /// Model contract shortcut
    #[must_use]
    pub fn contract(&self) -> &ModelContract {
        &self.model.contract
    }

    /// Load a configuration from a JSON file; missing fields take their defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - Invalid JSON
    /// - Validation failures
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| LesionSegError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Threshold or opacity outside `[0, 1]`
    /// - Invalid preprocessing constants or model contract
    /// - Preprocessing target size differs from the model input size
    /// - Zero inference timeout
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.threshold)?;

        if !(0.0..=1.0).contains(&self.overlay.opacity) {
            return Err(LesionSegError::config_value_error(
                "overlay opacity",
                self.overlay.opacity,
                "0.0-1.0",
                Some(0.5),
            ));
        }

        self.preprocessing.validate()?;
        self.model.contract.validate()?;

        let (_, _, h, w) = self.model.contract.input_shape;
        if (self.preprocessing.width() as usize, self.preprocessing.height() as usize) != (w, h) {
            return Err(LesionSegError::invalid_config(format!(
                "Preprocessing target {}x{} does not match model input {}x{}",
                self.preprocessing.width(),
                self.preprocessing.height(),
                w,
                h
            )));
        }

        if self.inference_timeout.is_some_and(|t| t.is_zero()) {
            return Err(LesionSegError::invalid_config(
                "Inference timeout must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Check that a threshold is a finite value in `[0, 1]`
///
/// # Errors
/// - Threshold is NaN, infinite or out of range
pub fn validate_threshold(threshold: f32) -> Result<()> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(LesionSegError::config_value_error(
            "threshold",
            threshold,
            "0.0-1.0",
            Some(0.5),
        ))
    }
}

/// Builder for `SegmentationConfig`
#[derive(Debug, Default)]
pub struct SegmentationConfigBuilder {
    config: SegmentationConfig,
}

impl SegmentationConfigBuilder {
    #[must_use]
    pub fn backends(mut self, backends: Vec<BackendKind>) -> Self {
        self.config.backends = backends;
        self
    }

    #[must_use]
    pub fn model(mut self, model: ModelAsset) -> Self {
        self.config.model = model;
        self
    }

    /// Set a square input resolution for both the encoder and the model contract
    #[must_use]
    pub fn input_size(mut self, size: u32) -> Self {
        self.config.preprocessing.target_size = [size, size];
        self.config.model.contract = ModelContract {
            input_name: self.config.model.contract.input_name.clone(),
            output_name: self.config.model.contract.output_name.clone(),
            ..ModelContract::square(size as usize)
        };
        self
    }

    #[must_use]
    pub fn preprocessing(mut self, preprocessing: PreprocessingConfig) -> Self {
        self.config.preprocessing = preprocessing;
        self
    }

    #[must_use]
    pub fn threshold(mut self, threshold: f32) -> Self {
        self.config.threshold = threshold;
        self
    }

    #[must_use]
    pub fn overlay(mut self, overlay: OverlayStyle) -> Self {
        self.config.overlay = overlay;
        self
    }

    #[must_use]
    pub fn warmup(mut self, warmup: bool) -> Self {
        self.config.warmup = warmup;
        self
    }

    #[must_use]
    pub fn inference_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.inference_timeout = timeout;
        self
    }

    #[must_use]
    pub fn timeout_retries(mut self, retries: u32) -> Self {
        self.config.timeout_retries = retries;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any validation failure from [`SegmentationConfig::validate`]
    pub fn build(self) -> Result<SegmentationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => {
                serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            },
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
