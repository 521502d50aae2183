//! Test utilities and mock backends for testing inference functionality
//!
//! This module provides mock implementations of the `InferenceBackend` trait
//! to enable testing the session and processor without model files or
//! external runtimes like ONNX Runtime or Tract.

use crate::{
    config::{BackendKind, SegmentationConfig},
    error::{LesionSegError, Result},
    inference::{BackendFactory, InferenceBackend},
    models::ModelContract,
};
use image::{DynamicImage, ImageBuffer, Rgba};
use instant::Duration;
use ndarray::Array4;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// How a mock backend behaves
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Fail `initialize` with `BackendUnavailable`
    pub fail_init: bool,
    /// Fail every `infer` call with `InferenceFailure`
    pub fail_inference: bool,
    /// Constant logit written to every output pixel
    pub logit: f32,
    /// Sleep this long inside the first `slow_calls` inference calls
    pub delay: Option<std::time::Duration>,
    pub slow_calls: usize,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            fail_init: false,
            fail_inference: false,
            logit: 0.0,
            delay: None,
            slow_calls: usize::MAX,
        }
    }
}

impl MockBehavior {
    #[must_use]
    pub fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_inference() -> Self {
        Self {
            fail_inference: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_logit(logit: f32) -> Self {
        Self {
            logit,
            ..Self::default()
        }
    }
}

/// Mock backend producing constant logits of the contract's output shape
#[derive(Debug)]
pub struct MockBackend {
    kind: BackendKind,
    behavior: MockBehavior,
    output_shape: Option<(usize, usize, usize, usize)>,
    call_history: Arc<Mutex<Vec<String>>>,
    infer_calls: Arc<AtomicUsize>,
}

impl MockBackend {
    #[must_use]
    pub fn new(kind: BackendKind, behavior: MockBehavior) -> Self {
        Self {
            kind,
            behavior,
            output_shape: None,
            call_history: Arc::new(Mutex::new(Vec::new())),
            infer_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get the call history for verification in tests
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    /// Shared handle to the call history, readable after the backend moved into a session
    #[must_use]
    pub fn call_history_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(format!("{}:{method}", self.kind));
        }
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(
        &mut self,
        _model: &[u8],
        contract: &ModelContract,
        _config: &SegmentationConfig,
    ) -> Result<Duration> {
        self.record_call("initialize");
        if self.behavior.fail_init {
            return Err(LesionSegError::backend_unavailable(format!(
                "mock {} failed to initialize",
                self.kind
            )));
        }
        self.output_shape = Some(contract.output_shape);
        Ok(Duration::from_millis(1))
    }

    fn infer(&mut self, _input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");
        let shape = self
            .output_shape
            .ok_or_else(|| LesionSegError::inference("Backend not initialized"))?;

        let call = self.infer_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.behavior.delay {
            if call < self.behavior.slow_calls {
                std::thread::sleep(delay);
            }
        }

        if self.behavior.fail_inference {
            return Err(LesionSegError::inference("mock inference failure"));
        }
        Ok(Array4::from_elem(shape, self.behavior.logit))
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_initialized(&self) -> bool {
        self.output_shape.is_some()
    }
}

/// Mock factory with per-kind behavior; unknown kinds cannot be constructed
#[derive(Debug, Default, Clone)]
pub struct MockBackendFactory {
    behaviors: HashMap<BackendKind, MockBehavior>,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockBackendFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, kind: BackendKind, behavior: MockBehavior) -> Self {
        self.behaviors.insert(kind, behavior);
        self
    }

    /// Every call made by any backend this factory created, in order
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(&self, kind: BackendKind) -> Result<Box<dyn InferenceBackend>> {
        let behavior = self.behaviors.get(&kind).cloned().ok_or_else(|| {
            LesionSegError::backend_unavailable(format!("mock factory has no {kind}"))
        })?;
        let mut backend = MockBackend::new(kind, behavior);
        backend.call_history = Arc::clone(&self.call_history);
        Ok(Box::new(backend))
    }

    fn available_backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.behaviors.contains_key(kind))
            .collect()
    }
}

/// Test helper functions
pub mod test_helpers {
    use super::*;

    /// Create a test image with a horizontal gradient
    pub fn create_test_image(width: u32, height: u32) -> DynamicImage {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        DynamicImage::ImageRgba8(img)
    }

    /// Small-resolution config so tests stay fast
    pub fn create_test_config(size: u32, backends: Vec<BackendKind>) -> SegmentationConfig {
        SegmentationConfig::builder()
            .input_size(size)
            .backends(backends)
            .build()
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_backend_initialization() {
        let mut backend = MockBackend::new(BackendKind::Tract, MockBehavior::default());
        let config = test_helpers::create_test_config(8, vec![BackendKind::Tract]);
        assert!(!backend.is_initialized());

        backend.initialize(&[], config.contract(), &config).unwrap();
        assert!(backend.is_initialized());
        assert_eq!(backend.get_call_history(), vec!["tract:cpu:initialize"]);
    }

    #[test]
    fn test_mock_backend_inference_uses_contract_shape() {
        let mut backend = MockBackend::new(BackendKind::OnnxCpu, MockBehavior::with_logit(3.0));
        let config = test_helpers::create_test_config(8, vec![BackendKind::OnnxCpu]);
        backend.initialize(&[], config.contract(), &config).unwrap();

        let output = backend.infer(&Array4::zeros((1, 3, 8, 8))).unwrap();
        assert_eq!(output.dim(), (1, 1, 8, 8));
        assert!(output.iter().all(|v| *v == 3.0));
    }

    #[test]
    fn test_mock_backend_failure_scenarios() {
        let config = test_helpers::create_test_config(8, vec![BackendKind::OnnxCpu]);

        let mut backend = MockBackend::new(BackendKind::OnnxCpu, MockBehavior::failing_init());
        assert!(backend.initialize(&[], config.contract(), &config).is_err());

        let mut backend =
            MockBackend::new(BackendKind::OnnxCpu, MockBehavior::failing_inference());
        backend.initialize(&[], config.contract(), &config).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 8, 8))).is_err());
    }

    #[test]
    fn test_mock_backend_factory() {
        let factory = MockBackendFactory::new()
            .with(BackendKind::Tract, MockBehavior::default())
            .with(BackendKind::OnnxCuda, MockBehavior::failing_init());

        assert_eq!(
            factory.available_backends(),
            vec![BackendKind::OnnxCuda, BackendKind::Tract]
        );
        assert!(factory.create_backend(BackendKind::Tract).is_ok());
        assert!(factory.create_backend(BackendKind::OnnxCpu).is_err());
    }
}
