//! ONNX Runtime backend implementation for lesion segmentation models
//!
//! One backend instance is bound to one execution provider. When the provider
//! cannot be registered the backend fails to initialize instead of quietly
//! running on the CPU, so the session's fallback chain decides what runs next.

use crate::config::{BackendKind, SegmentationConfig};
use crate::error::{LesionSegError, Result};
use crate::inference::InferenceBackend;
use crate::models::ModelContract;
use log;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::{self, value::Value};

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// ONNX Runtime backend for running lesion segmentation models
#[derive(Debug)]
pub struct OnnxBackend {
    kind: BackendKind,
    session: Option<Session>,
    input_name: Option<String>,
    output_name: Option<String>,
    initialized: bool,
}

impl OnnxBackend {
    /// Create a backend for one of the `onnx:*` kinds
    ///
    /// Non-ONNX kinds are accepted but fail at initialization.
    #[must_use]
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            session: None,
            input_name: None,
            output_name: None,
            initialized: false,
        }
    }

    /// Whether ONNX Runtime can register the execution provider behind `kind`
    ///
    /// # Examples
    /// ```rust
    /// use lesionseg::{backends::OnnxBackend, BackendKind};
    ///
    /// assert!(OnnxBackend::provider_available(BackendKind::OnnxCpu));
    /// assert!(!OnnxBackend::provider_available(BackendKind::Tract));
    /// ```
    #[must_use]
    pub fn provider_available(kind: BackendKind) -> bool {
        match kind {
            BackendKind::OnnxCpu => true,
            BackendKind::OnnxCuda => {
                log::debug!("🔍 Checking CUDA availability...");
                OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
                    .unwrap_or(false)
            },
            BackendKind::OnnxCoreMl => {
                log::debug!("🔍 Checking CoreML availability...");
                OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                    .unwrap_or(false)
            },
            BackendKind::Tract => false,
        }
    }

    /// Load and initialize the ONNX model
    fn load_model(
        &mut self,
        model: &[u8],
        contract: &ModelContract,
        config: &SegmentationConfig,
    ) -> Result<Duration> {
        let model_load_start = Instant::now();

        let session_builder = Session::builder()
            .map_err(|e| {
                LesionSegError::backend_unavailable(format!(
                    "Failed to create session builder: {e}"
                ))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                LesionSegError::backend_unavailable(format!(
                    "Failed to set optimization level: {e}"
                ))
            })?;

        // Register exactly the requested provider; unavailability ends this attempt
        let session_builder = match self.kind {
            BackendKind::OnnxCpu => {
                log::info!("Using CPU execution provider");
                session_builder
            },
            BackendKind::OnnxCuda => {
                let cuda_provider = CUDAExecutionProvider::default();
                if !OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                    log::warn!("🚫 CUDA execution provider is not available");
                    return Err(LesionSegError::backend_unavailable(
                        "CUDA execution provider is not available",
                    ));
                }
                log::info!("🚀 Using CUDA execution provider");
                session_builder
                    .with_execution_providers([cuda_provider.build().error_on_failure()])
                    .map_err(|e| {
                        LesionSegError::backend_unavailable(format!(
                            "Failed to set CUDA execution provider: {e}"
                        ))
                    })?
            },
            BackendKind::OnnxCoreMl => {
                let coreml_provider = CoreMLExecutionProvider::default();
                if !OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                    log::warn!("🚫 CoreML execution provider is not available");
                    #[cfg(not(target_os = "macos"))]
                    log::debug!("  - Expected: CoreML is only available on macOS");
                    return Err(LesionSegError::backend_unavailable(
                        "CoreML execution provider is not available",
                    ));
                }
                log::info!("🍎 Using CoreML execution provider");
                session_builder
                    .with_execution_providers([CoreMLExecutionProvider::default()
                        .with_subgraphs(true)
                        .build()
                        .error_on_failure()])
                    .map_err(|e| {
                        LesionSegError::backend_unavailable(format!(
                            "Failed to set CoreML execution provider: {e}"
                        ))
                    })?
            },
            BackendKind::Tract => {
                return Err(LesionSegError::internal(
                    "ONNX backend cannot serve the tract:cpu kind",
                ));
            },
        };

        // Calculate optimal threading if auto-detect (0)
        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(4)
        };

        let session = session_builder
            .with_intra_threads(intra_threads)
            .map_err(|e| {
                LesionSegError::backend_unavailable(format!("Failed to set intra threads: {e}"))
            })?
            .commit_from_memory(model)
            .map_err(|e| {
                LesionSegError::backend_unavailable(format!(
                    "Failed to create session from model data: {e}"
                ))
            })?;

        log::debug!("✅ ONNX Runtime session created successfully");
        log::debug!("  - Provider: {}", self.kind);
        log::debug!("  - Threading: {intra_threads} intra-op threads");
        log::debug!("  - Contract: {} -> {}", contract.input_name, contract.output_name);
        #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for logging display
        let size_mb = model.len() as f64 / (1024.0 * 1024.0);
        log::debug!("  - Model size: {size_mb:.2} MB");

        // Prefer the contract's input name, otherwise the model's only input
        let input_name = if session.inputs.iter().any(|i| i.name == contract.input_name) {
            contract.input_name.clone()
        } else {
            let first = session.inputs.first().ok_or_else(|| {
                LesionSegError::backend_unavailable("Model declares no inputs")
            })?;
            log::debug!(
                "  - Input '{}' not found, using '{}'",
                contract.input_name,
                first.name
            );
            first.name.clone()
        };

        self.session = Some(session);
        self.input_name = Some(input_name);
        self.output_name = Some(contract.output_name.clone());
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "📊 Model loading complete: {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(
        &mut self,
        model: &[u8],
        contract: &ModelContract,
        config: &SegmentationConfig,
    ) -> Result<Duration> {
        if self.initialized {
            return Ok(Duration::ZERO);
        }
        self.load_model(model, contract, config)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(LesionSegError::inference("Backend not initialized"));
        }

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| LesionSegError::inference("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("🚀 Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            LesionSegError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        let input_name = self
            .input_name
            .as_deref()
            .ok_or_else(|| LesionSegError::inference("ONNX input name not resolved"))?;
        let outputs = session
            .run(ort::inputs![input_name => input_value])
            .map_err(|e| LesionSegError::inference(format!("ONNX inference failed: {e}")))?;

        // Prefer the contract's output name, otherwise the first output
        let key = match self.output_name.as_deref() {
            Some(name) if outputs.contains_key(name) => name.to_string(),
            _ => {
                let first = outputs
                    .keys()
                    .next()
                    .ok_or_else(|| LesionSegError::inference("No output tensors found"))?;
                log::debug!("  📋 Using positional output access (first output: {first})");
                first.to_string()
            },
        };

        let output_tensor = outputs
            .get(key.as_str())
            .ok_or_else(|| LesionSegError::inference(format!("Output tensor '{key}' not found")))?
            .try_extract_array::<f32>()
            .map_err(|e| {
                LesionSegError::inference(format!("Failed to extract output tensor: {e}"))
            })?;

        let output_shape = output_tensor.shape().to_vec();
        let &[n, c, h, w] = output_shape.as_slice() else {
            return Err(LesionSegError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };

        let output_array =
            Array4::from_shape_vec((n, c, h, w), output_tensor.iter().copied().collect())
                .map_err(|e| {
                    LesionSegError::inference(format!("Failed to reshape output tensor: {e}"))
                })?;

        log::debug!(
            "📊 Inference complete: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(output_array)
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
