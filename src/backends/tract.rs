//! Tract backend implementation for lesion segmentation models
//!
//! Pure Rust CPU inference. It needs no native runtime, which makes it the
//! last entry of the default fallback chain.

use crate::config::{BackendKind, SegmentationConfig};
use crate::error::{LesionSegError, Result};
use crate::inference::InferenceBackend;
use crate::models::ModelContract;
use log;
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Tract backend for running lesion segmentation models using pure Rust inference
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
    input_shape: Option<(usize, usize, usize, usize)>,
    initialized: bool,
}

impl TractBackend {
    /// Create a new uninitialized Tract backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and initialize the model using Tract
    fn load_model(&mut self, model: &[u8], contract: &ModelContract) -> Result<Duration> {
        let model_load_start = Instant::now();

        log::info!("🚀 Initializing Tract Backend");
        log::info!("📦 Backend: Tract (Pure Rust)");
        #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for logging display
        let size_mb = model.len() as f64 / (1024.0 * 1024.0);
        log::info!("📏 Model size: {size_mb:.2} MB");

        let (n, c, h, w) = contract.input_shape;

        // Pin the input fact so models exported with symbolic dims still optimize
        let runnable = onnx()
            .model_for_read(&mut std::io::Cursor::new(model))
            .map_err(|e| {
                LesionSegError::backend_unavailable(format!("Failed to load ONNX model: {e}"))
            })?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(n, c, h, w)))
            .map_err(|e| {
                LesionSegError::backend_unavailable(format!("Failed to set input fact: {e}"))
            })?
            .into_optimized()
            .map_err(|e| {
                LesionSegError::backend_unavailable(format!("Failed to optimize model: {e}"))
            })?
            .into_runnable()
            .map_err(|e| {
                LesionSegError::backend_unavailable(format!(
                    "Failed to create runnable model: {e}"
                ))
            })?;

        self.model = Some(runnable);
        self.input_shape = Some(contract.input_shape);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(
        &mut self,
        model: &[u8],
        contract: &ModelContract,
        _config: &SegmentationConfig,
    ) -> Result<Duration> {
        if self.initialized {
            return Ok(Duration::ZERO);
        }
        self.load_model(model, contract)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| LesionSegError::inference("Tract model not initialized"))?;

        if let Some(expected) = self.input_shape {
            if input.dim() != expected {
                return Err(LesionSegError::inference(format!(
                    "Input shape {:?} does not match model input {:?}",
                    input.dim(),
                    expected
                )));
            }
        }

        log::debug!("🔮 Running Tract inference");
        log::debug!("  - Input tensor: {:?}", input.shape());

        let inference_start = Instant::now();

        // Go through a flat slice so the tract tensor never depends on our ndarray version
        let standard = input.as_standard_layout();
        let flat = standard
            .as_slice()
            .ok_or_else(|| LesionSegError::internal("Input tensor is not contiguous"))?;
        let input_tensor = Tensor::from_shape(input.shape(), flat).map_err(|e| {
            LesionSegError::inference(format!("Failed to build input tensor: {e}"))
        })?;

        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| LesionSegError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| LesionSegError::inference("No output tensor found"))?
            .into_arc_tensor();

        let &[n, c, h, w] = output_tensor.shape() else {
            return Err(LesionSegError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_tensor.rank()
            )));
        };

        let output_data = output_tensor.as_slice::<f32>().map_err(|e| {
            LesionSegError::inference(format!("Failed to read output tensor: {e}"))
        })?;

        let output_array = Array4::from_shape_vec((n, c, h, w), output_data.to_vec())
            .map_err(|e| {
                LesionSegError::inference(format!("Failed to reshape output tensor: {e}"))
            })?;

        log::debug!(
            "✅ Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );
        log::debug!("  - Output tensor: {:?}", output_array.shape());

        Ok(output_array)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Tract
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
