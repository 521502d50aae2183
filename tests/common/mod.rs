//! Shared fixtures for integration tests
//!
//! A scripted backend whose logits are a function of the pixel position, a
//! factory that records which kinds were asked for, and an in-memory fetcher
//! that can be taken offline.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use lesionseg::{
    AssetFetcher, BackendFactory, BackendKind, FetchedAsset, InferenceBackend, LesionSegError,
    ModelContract, Result, SegmentationConfig,
};
use ndarray::Array4;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Logit for output pixel `(x, y)`
pub type LogitFn = Arc<dyn Fn(usize, usize) -> f32 + Send + Sync>;

/// Behavior of one scripted backend kind
#[derive(Clone)]
pub struct Script {
    pub fail_init: bool,
    pub fail_inference: bool,
    pub logits: LogitFn,
}

impl Script {
    pub fn constant(logit: f32) -> Self {
        Self {
            fail_init: false,
            fail_inference: false,
            logits: Arc::new(move |_, _| logit),
        }
    }

    pub fn from_fn<F>(logits: F) -> Self
    where
        F: Fn(usize, usize) -> f32 + Send + Sync + 'static,
    {
        Self {
            logits: Arc::new(logits),
            ..Self::constant(0.0)
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fail_init: true,
            ..Self::constant(0.0)
        }
    }

    pub fn broken_inference() -> Self {
        Self {
            fail_inference: true,
            ..Self::constant(0.0)
        }
    }
}

struct ScriptedBackend {
    kind: BackendKind,
    script: Script,
    output_shape: Option<(usize, usize, usize, usize)>,
    infer_calls: Arc<AtomicUsize>,
}

impl InferenceBackend for ScriptedBackend {
    fn initialize(
        &mut self,
        _model: &[u8],
        contract: &ModelContract,
        _config: &SegmentationConfig,
    ) -> Result<instant::Duration> {
        if self.script.fail_init {
            return Err(LesionSegError::backend_unavailable(format!(
                "{} is not supported here",
                self.kind
            )));
        }
        self.output_shape = Some(contract.output_shape);
        Ok(instant::Duration::from_millis(2))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.infer_calls.fetch_add(1, Ordering::SeqCst);
        let shape = self
            .output_shape
            .ok_or_else(|| LesionSegError::inference("not initialized"))?;
        if self.script.fail_inference {
            return Err(LesionSegError::inference("device lost"));
        }
        assert_eq!(input.shape()[1], 3, "backend expects three colour planes");

        let logits = &self.script.logits;
        Ok(Array4::from_shape_fn(shape, |(_, _, y, x)| logits(x, y)))
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_initialized(&self) -> bool {
        self.output_shape.is_some()
    }
}

/// Factory handing out scripted backends and recording every request
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    scripts: HashMap<BackendKind, Script>,
    requested: Arc<Mutex<Vec<BackendKind>>>,
    infer_calls: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: BackendKind, script: Script) -> Self {
        self.scripts.insert(kind, script);
        self
    }

    /// Kinds the session asked for, in order
    pub fn requested(&self) -> Vec<BackendKind> {
        self.requested.lock().unwrap().clone()
    }

    /// Inference calls across all backends, warm-up included
    pub fn infer_calls(&self) -> usize {
        self.infer_calls.load(Ordering::SeqCst)
    }
}

impl BackendFactory for ScriptedFactory {
    fn create_backend(&self, kind: BackendKind) -> Result<Box<dyn InferenceBackend>> {
        self.requested.lock().unwrap().push(kind);
        let script = self
            .scripts
            .get(&kind)
            .cloned()
            .ok_or_else(|| LesionSegError::backend_unavailable(format!("{kind} not compiled in")))?;
        Ok(Box::new(ScriptedBackend {
            kind,
            script,
            output_shape: None,
            infer_calls: Arc::clone(&self.infer_calls),
        }))
    }
}

/// In-memory fetcher keyed by URL
#[derive(Default)]
pub struct MemoryFetcher {
    responses: Mutex<HashMap<String, FetchedAsset>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(self, url: &str, bytes: &[u8]) -> Self {
        self.set(url, FetchedAsset::ok(bytes.to_vec()));
        self
    }

    pub fn serve_status(self, url: &str, status: u16) -> Self {
        self.set(
            url,
            FetchedAsset {
                status,
                bytes: Vec::new(),
            },
        );
        self
    }

    pub fn set(&self, url: &str, asset: FetchedAsset) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), asset);
    }

    /// Every later fetch fails with a transport error
    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(LesionSegError::asset_fetch(url, "network unreachable"));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(FetchedAsset {
                status: 404,
                bytes: Vec::new(),
            }))
    }
}

/// Skin-toned test photo with a darker blob in the middle
pub fn lesion_photo(width: u32, height: u32) -> DynamicImage {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let radius = width.min(height) as f32 / 4.0;
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
        if d < radius {
            Rgb([96, 56, 40])
        } else {
            Rgb([224, 172, 150])
        }
    }))
}

/// Default 256x256 configuration restricted to the given backends
pub fn config_with(backends: Vec<BackendKind>) -> SegmentationConfig {
    SegmentationConfig::builder()
        .backends(backends)
        .build()
        .unwrap()
}
