#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Lesion Segmentation Library
//!
//! Skin-lesion segmentation on dermoscopic images with ONNX Runtime and Tract
//! backends. A single-class model predicts per-pixel lesion logits; the
//! library turns them into probabilities, renders a translucent overlay at an
//! adjustable threshold and exports a binary mask.
//!
//! ## Features
//!
//! - **Tensor encoding**: bilinear resample to the model input and ImageNet
//!   normalization into an NCHW `f32` tensor
//! - **Backend fallback**: an ordered list of backends (`onnx:cuda`,
//!   `onnx:coreml`, `onnx:cpu`, `tract:cpu`); the first one that loads the
//!   model serves every inference call
//! - **Mask rendering**: overlay, composite and opaque black/white export
//! - **Asset cache**: versioned cache generations with cache-first fetching
//!   and fallback to older generations when offline
//! - **CLI Integration**: optional command-line interface (`cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lesionseg::{
//!     AssetCache, AssetManifest, BackendKind, CacheGeneration, DefaultFetcher,
//!     SegmentationConfig, SegmentationProcessor,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SegmentationConfig::builder()
//!     .backends(vec![BackendKind::OnnxCpu, BackendKind::Tract])
//!     .threshold(0.5)
//!     .build()?;
//!
//! let manifest = AssetManifest::new("my-app").with_asset(config.model.request_url());
//! let cache = AssetCache::new(CacheGeneration::from_manifest(&manifest))?;
//! let fetcher = DefaultFetcher::new()?;
//! // Older generations survive a failed install and serve as offline fallbacks
//! if cache.refresh(&fetcher, &manifest).await.is_err() {
//!     eprintln!("working from older cached assets");
//! }
//!
//! let mut processor = SegmentationProcessor::new(config)?;
//! processor.initialize_from_cache(&cache, &fetcher).await?;
//! processor.process_file("lesion.jpg").await?;
//!
//! processor.set_threshold(0.35)?;
//! let mask_path = processor.export_mask_to(".")?;
//! println!("coverage {:.1}%", processor.stats()?.coverage() * 100.0);
//! # let _ = mask_path;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA and `CoreML` providers
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): Command-line interface and progress reporting
//! - `tracing-json`, `tracing-files`: extra subscriber outputs for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! lesionseg = { version = "0.1", default-features = false, features = ["onnx", "tract"] }
//! ```

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod services;
pub mod session;
pub mod tracing_config;
pub mod types;
pub mod utils;

use tokio::io::AsyncRead;

// Public API exports
pub use backends::*;
pub use cache::{format_size, AssetCache, AssetManifest, CacheGeneration, CachedGenerationInfo};
pub use config::{BackendKind, OverlayStyle, SegmentationConfig};
pub use download::{AssetFetcher, DefaultFetcher, FetchedAsset, FileFetcher, HttpFetcher};
pub use error::{LesionSegError, Result};
pub use inference::{BackendFactory, DefaultBackendFactory, InferenceBackend};
pub use models::{ModelAsset, ModelContract, ModelLocation, PreprocessingConfig};
pub use processor::{BackendState, SegmentationProcessor};
pub use services::{ImageIOService, MaskRenderer, PngEncoder};
pub use session::Session;
pub use types::{sigmoid, InferenceOutput, MaskStats, ProbabilityMap};
pub use utils::{ImagePreprocessor, TensorValidator};

#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
pub use tracing_config::{events, spans, TracingConfig, TracingFormat, TracingOutput};

/// Segment a single image with a model already held in memory
///
/// Builds a throwaway [`SegmentationProcessor`]; keep a processor around
/// instead when segmenting several images with the same model.
///
/// # Examples
/// ```rust,no_run
/// use lesionseg::{segment_image, SegmentationConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let model = std::fs::read("lesion_256_fp16.onnx")?;
/// let image = image::open("lesion.jpg")?;
/// let map = segment_image(&model, &image, SegmentationConfig::default()).await?;
/// assert_eq!(map.dimensions(), (256, 256));
/// # Ok(())
/// # }
/// ```
pub async fn segment_image(
    model: &[u8],
    image: &image::DynamicImage,
    config: SegmentationConfig,
) -> Result<ProbabilityMap> {
    let mut processor = SegmentationProcessor::new(config)?;
    processor.initialize(model)?;
    processor.process_image(image).await.cloned()
}

/// Segment an encoded image read from an async stream
pub async fn segment_from_reader<R: AsyncRead + Unpin>(
    model: &[u8],
    mut reader: R,
    config: SegmentationConfig,
) -> Result<ProbabilityMap> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer)
        .await
        .map_err(|e| LesionSegError::invalid_image(format!("Failed to read from stream: {e}")))?;

    let image = ImageIOService::decode_bytes(&buffer)?;
    segment_image(model, &image, config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_segment_from_reader_rejects_garbage() {
        let reader = std::io::Cursor::new(b"not an image".to_vec());
        let err = segment_from_reader(b"model", reader, SegmentationConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LesionSegError::InvalidImage(_)));
    }

    #[tokio::test]
    async fn test_segment_image_without_backends_is_unavailable() {
        let config = SegmentationConfig {
            backends: Vec::new(),
            ..SegmentationConfig::default()
        };
        let image = image::DynamicImage::new_rgb8(8, 8);
        let err = segment_image(b"model", &image, config).await.unwrap_err();
        assert!(matches!(err, LesionSegError::BackendUnavailable(_)));
    }
}
