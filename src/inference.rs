//! Inference backend abstraction and factory

use crate::{
    config::{BackendKind, SegmentationConfig},
    error::{LesionSegError, Result},
    models::ModelContract,
};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for inference backends
///
/// A backend is constructed cheaply and does all fallible work in
/// [`initialize`](InferenceBackend::initialize). Backends must be `Send` so a
/// session can move calls onto a blocking worker thread.
pub trait InferenceBackend: Send {
    /// Load the model and prepare the backend for inference
    ///
    /// Returns the time spent loading the model.
    ///
    /// # Errors
    /// - Requested execution provider is unavailable on this machine
    /// - Model bytes cannot be parsed or do not match the contract
    fn initialize(
        &mut self,
        model: &[u8],
        contract: &ModelContract,
        config: &SegmentationConfig,
    ) -> Result<Duration>;

    /// Run inference on a `[1, 3, H, W]` tensor and return `[1, 1, H, W]` logits
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures or malformed output
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}

/// Factory for creating inference backends
///
/// The session asks the factory for each kind in the fallback chain, which
/// lets tests substitute mock backends for the real engines.
pub trait BackendFactory: Send + Sync {
    /// Create a new, uninitialized backend of the given kind
    ///
    /// # Errors
    /// - Backend kind not compiled into this build
    fn create_backend(&self, kind: BackendKind) -> Result<Box<dyn InferenceBackend>>;

    /// Backend kinds this factory can construct
    fn available_backends(&self) -> Vec<BackendKind> {
        BackendKind::default_priority()
    }
}

/// Factory for the ONNX Runtime and Tract backends compiled into this build
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, kind: BackendKind) -> Result<Box<dyn InferenceBackend>> {
        match kind {
            #[cfg(feature = "onnx")]
            BackendKind::OnnxCuda | BackendKind::OnnxCoreMl | BackendKind::OnnxCpu => {
                Ok(Box::new(crate::backends::OnnxBackend::new(kind)))
            },
            #[cfg(feature = "tract")]
            BackendKind::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(LesionSegError::backend_unavailable(format!(
                "{other} support is not compiled into this build"
            ))),
        }
    }
}
