//! Lesion segmentation processor
//!
//! [`SegmentationProcessor`] is the session-state object behind every
//! front end. It owns the backend session, the current threshold, the last
//! probability map and the overlay currently on display. A cycle only
//! commits its results once every fallible step has succeeded, so a failed
//! cycle leaves the previous prediction and view untouched.

use crate::{
    cache::AssetCache,
    config::{validate_threshold, BackendKind, SegmentationConfig},
    download::AssetFetcher,
    error::{LesionSegError, Result},
    inference::{BackendFactory, DefaultBackendFactory},
    services::{ImageIOService, MaskRenderer, PngEncoder, DEFAULT_EXPORT_FILE_NAME},
    session::Session,
    tracing_config::spans,
    types::{MaskStats, ProbabilityMap},
    utils::ImagePreprocessor,
};
use image::{DynamicImage, RgbaImage};
use instant::Duration;
use log::{debug, info};
use std::path::{Path, PathBuf};
use tracing::{info as trace_info, instrument, Instrument};

/// Lifecycle of the inference backend
#[derive(Debug)]
pub enum BackendState {
    /// No model has been loaded yet
    Uninitialized,
    /// A backend loaded the model and serves every inference call
    Ready(Session),
    /// Initialization failed; inference stays disabled for this processor
    Disabled(String),
}

/// Session-state object for interactive lesion segmentation
pub struct SegmentationProcessor {
    config: SegmentationConfig,
    backend_factory: Box<dyn BackendFactory>,
    state: BackendState,
    threshold: f32,
    probability_map: Option<ProbabilityMap>,
    view: Option<RgbaImage>,
    last_latency: Option<Duration>,
}

impl std::fmt::Debug for SegmentationProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationProcessor")
            .field("state", &self.state)
            .field("threshold", &self.threshold)
            .field("has_prediction", &self.probability_map.is_some())
            .field("last_latency", &self.last_latency)
            .finish_non_exhaustive()
    }
}

impl SegmentationProcessor {
    /// Create a processor using the compiled-in backends
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: SegmentationConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    /// Create a processor with a custom backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_factory(
        config: SegmentationConfig,
        backend_factory: Box<dyn BackendFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            threshold: config.threshold,
            config,
            backend_factory,
            state: BackendState::Uninitialized,
            probability_map: None,
            view: None,
            last_latency: None,
        })
    }

    /// Select a backend and load the model from bytes
    ///
    /// Calling this again after a successful initialization is a no-op.
    ///
    /// # Errors
    /// - `BackendUnavailable` if no configured backend could load the model,
    ///   or if an earlier initialization already failed
    pub fn initialize(&mut self, model: &[u8]) -> Result<BackendKind> {
        match &self.state {
            BackendState::Ready(session) => return Ok(session.kind()),
            BackendState::Disabled(reason) => {
                return Err(LesionSegError::backend_unavailable(reason.clone()));
            },
            BackendState::Uninitialized => {},
        }

        info!("Initializing lesion segmentation processor");
        debug!("Backend priority: {:?}", self.config.backends);

        let result = spans::model_loading(model.len(), self.config.backends.len()).in_scope(|| {
            Session::initialize_first_available(
                self.backend_factory.as_ref(),
                &self.config.backends,
                model,
                self.config.contract(),
                &self.config,
            )
        });

        match result {
            Ok(session) => {
                let kind = session.kind();
                info!("Active backend: {kind}");
                self.state = BackendState::Ready(session);
                Ok(kind)
            },
            Err(e) => {
                log::error!("Inference disabled: {e}");
                self.state = BackendState::Disabled(e.to_string());
                Err(e)
            },
        }
    }

    /// Load the configured model through the asset cache, then initialize
    ///
    /// # Errors
    /// - `AssetFetchFailure` if the model is neither cached nor fetchable;
    ///   the processor is disabled afterwards
    /// - `BackendUnavailable` without fetching if an earlier initialization failed
    /// - Any error from [`initialize`](Self::initialize)
    #[instrument(skip(self, cache, fetcher), fields(generation = %cache.generation()))]
    pub async fn initialize_from_cache(
        &mut self,
        cache: &AssetCache,
        fetcher: &dyn AssetFetcher,
    ) -> Result<BackendKind> {
        match &self.state {
            BackendState::Ready(session) => return Ok(session.kind()),
            BackendState::Disabled(reason) => {
                return Err(LesionSegError::backend_unavailable(reason.clone()));
            },
            BackendState::Uninitialized => {},
        }

        let url = self.config.model.request_url();
        trace_info!(model = %url, "Loading model through asset cache");

        let model = match cache.fetch(fetcher, &url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Model could not be loaded: {e}");
                self.state = BackendState::Disabled(e.to_string());
                return Err(e);
            },
        };

        self.initialize(&model)
    }

    #[must_use]
    pub fn state(&self) -> &BackendState {
        &self.state
    }

    /// Backend selected at initialization
    #[must_use]
    pub fn active_backend(&self) -> Option<BackendKind> {
        match &self.state {
            BackendState::Ready(session) => Some(session.kind()),
            _ => None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Run a full cycle on an image and retain the resulting probability map
    ///
    /// On success the overlay is re-rendered at the current threshold.
    ///
    /// # Errors
    /// - `BackendUnavailable` if the processor is not initialized or disabled
    /// - `InvalidImage` for degenerate images
    /// - `InferenceFailure` / `InferenceTimeout` from the backend call
    pub async fn process_image(&mut self, image: &DynamicImage) -> Result<&ProbabilityMap> {
        let session = match &self.state {
            BackendState::Ready(session) => session,
            BackendState::Disabled(reason) => {
                return Err(LesionSegError::backend_unavailable(reason.clone()));
            },
            BackendState::Uninitialized => {
                return Err(LesionSegError::backend_unavailable(
                    "processor has not been initialized",
                ));
            },
        };

        let input_tensor = {
            let _span = spans::preprocessing(
                (image.width(), image.height()),
                (
                    self.config.preprocessing.width(),
                    self.config.preprocessing.height(),
                ),
            )
            .entered();
            ImagePreprocessor::encode(image, &self.config.preprocessing)?
        };

        let (_, _, height, width) = session.contract().input_shape;
        let inference_span = spans::inference(session.kind().id(), (width, height));
        let output = session.run(&input_tensor).instrument(inference_span).await?;

        let map = ProbabilityMap::from_logits(&output.logits)?;
        let view = MaskRenderer::render_overlay(&map, self.threshold, &self.config.overlay);

        trace_info!(
            latency_ms = output.latency.as_millis() as u64,
            coverage = MaskRenderer::stats(&map, self.threshold).coverage(),
            "Prediction updated"
        );

        self.view = Some(view);
        self.last_latency = Some(output.latency);
        Ok(&*self.probability_map.insert(map))
    }

    /// Decode encoded image bytes and process them
    ///
    /// # Errors
    /// - `InvalidImage` if the bytes cannot be decoded
    /// - Any error from [`process_image`](Self::process_image)
    pub async fn process_bytes(&mut self, bytes: &[u8]) -> Result<&ProbabilityMap> {
        let image = ImageIOService::decode_bytes(bytes)?;
        self.process_image(&image).await
    }

    /// Load an image file and process it
    ///
    /// # Errors
    /// - `Io` / `InvalidImage` if the file cannot be read or decoded
    /// - Any error from [`process_image`](Self::process_image)
    pub async fn process_file<P: AsRef<Path>>(&mut self, path: P) -> Result<&ProbabilityMap> {
        let image = ImageIOService::load_image(path)?;
        self.process_image(&image).await
    }

    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Change the threshold and re-render the view from the retained map
    ///
    /// Inference is not re-run.
    ///
    /// # Errors
    /// - `InvalidConfig` if the threshold is not within `[0, 1]`
    pub fn set_threshold(&mut self, threshold: f32) -> Result<()> {
        validate_threshold(threshold)?;
        self.threshold = threshold;
        if let Some(map) = &self.probability_map {
            self.view = Some(MaskRenderer::render_overlay(
                map,
                threshold,
                &self.config.overlay,
            ));
        }
        Ok(())
    }

    /// Overlay currently on display
    #[must_use]
    pub fn overlay(&self) -> Option<&RgbaImage> {
        self.view.as_ref()
    }

    /// Retained probability map from the last successful cycle
    #[must_use]
    pub fn probability_map(&self) -> Option<&ProbabilityMap> {
        self.probability_map.as_ref()
    }

    /// Timed-call latency of the last successful cycle
    #[must_use]
    pub fn last_latency(&self) -> Option<Duration> {
        self.last_latency
    }

    /// Render the overlay at an explicit threshold without changing state
    ///
    /// # Errors
    /// - `InvalidConfig` for an out-of-range threshold
    /// - `NoPrediction` before the first successful cycle
    pub fn render_overlay(&self, threshold: f32) -> Result<RgbaImage> {
        validate_threshold(threshold)?;
        let map = self.require_map()?;
        Ok(MaskRenderer::render_overlay(map, threshold, &self.config.overlay))
    }

    /// Binary export mask at the current threshold, encoded as PNG
    ///
    /// The view keeps showing the overlay.
    ///
    /// # Errors
    /// - `NoPrediction` before the first successful cycle
    pub fn export_mask_png(&self) -> Result<Vec<u8>> {
        let map = self.require_map()?;
        PngEncoder::encode(&MaskRenderer::render_export(map, self.threshold))
    }

    /// Write the export mask as `mask_256.png` into `dir`
    ///
    /// # Errors
    /// - `NoPrediction` before the first successful cycle
    /// - Write failures
    pub fn export_mask_to<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let path = dir.as_ref().join(DEFAULT_EXPORT_FILE_NAME);
        let map = self.require_map()?;
        PngEncoder::write(&MaskRenderer::render_export(map, self.threshold), &path)?;
        info!("Exported mask to {}", path.display());
        Ok(path)
    }

    /// Overlay blended onto `base` resized to the map resolution
    ///
    /// # Errors
    /// - `NoPrediction` before the first successful cycle
    /// - `InvalidImage` for a degenerate base image
    pub fn composite(&self, base: &DynamicImage) -> Result<RgbaImage> {
        let map = self.require_map()?;
        crate::utils::TensorValidator::validate_image_dimensions(base.width(), base.height())?;
        Ok(MaskRenderer::render_composite(
            base,
            map,
            self.threshold,
            &self.config.overlay,
        ))
    }

    /// Lesion coverage at the current threshold
    ///
    /// # Errors
    /// - `NoPrediction` before the first successful cycle
    pub fn stats(&self) -> Result<MaskStats> {
        Ok(MaskRenderer::stats(self.require_map()?, self.threshold))
    }

    fn require_map(&self) -> Result<&ProbabilityMap> {
        self.probability_map
            .as_ref()
            .ok_or(LesionSegError::NoPrediction)
    }
}
