//! Lesion segmentation CLI
//!
//! Loads the model through the asset cache, segments one image and writes the
//! overlay, composite and binary mask next to each other.

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, AssetCache, AssetManifest, CacheGeneration},
    config::{BackendKind, SegmentationConfig},
    download::DefaultFetcher,
    processor::SegmentationProcessor,
    services::{ImageIOService, PngEncoder, COMPOSITE_FILE_NAME, OVERLAY_FILE_NAME},
    tracing_config::{init_cli_tracing, spans},
};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Skin-lesion segmentation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "lesionseg")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Dermoscopic image to segment
    #[arg(value_name = "INPUT", required_unless_present_any = &["show_backends", "clear_cache", "show_cache"])]
    pub input: Option<PathBuf>,

    /// Model path or URL [default: lesion_256_fp16.onnx]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model version, appended as `?v=` to bypass stale caches
    #[arg(long)]
    pub model_version: Option<String>,

    /// Comma separated backend priority (e.g. onnx:cuda,onnx:cpu,tract)
    #[arg(short, long)]
    pub backends: Option<String>,

    /// Lesion probability threshold in [0, 1] [default: 0.5]
    #[arg(short, long)]
    pub threshold: Option<f32>,

    /// Directory receiving overlay.png, composite.png and mask_256.png
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Inference timeout in milliseconds [default: none]
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Extra attempts after a timed out inference call [default: 0]
    #[arg(long)]
    pub timeout_retries: Option<u32>,

    /// Skip the warm-up inference
    #[arg(long)]
    pub no_warmup: bool,

    /// Intra-op threads for ONNX Runtime (0 = auto)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Use custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// JSON configuration file; command line flags take precedence
    #[arg(short, long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Show backend availability and exit
    #[arg(long)]
    pub show_backends: bool,

    /// List cache generations and exit
    #[arg(long)]
    pub show_cache: bool,

    /// Remove every cache generation and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session_id = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    if cli.show_backends {
        show_backend_diagnostics();
        return Ok(());
    }

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let manifest = CliConfigBuilder::manifest(&config);
    let cache = open_cache(cli.cache_dir.as_deref(), CacheGeneration::from_manifest(&manifest))?;

    if cli.show_cache {
        return show_cache(&cache);
    }

    if cli.clear_cache {
        let removed = cache.clear().context("Failed to clear cache")?;
        println!("🗑️  Removed {} cache generation(s)", removed.len());
        for name in removed {
            println!("  • {name}");
        }
        return Ok(());
    }

    let input = cli
        .input
        .as_deref()
        .context("An input image is required")?;

    let span = spans::session(&session_id, &config.model.request_url());
    segment(&cli, input, config, &manifest, &cache)
        .instrument(span)
        .await
}

async fn segment(
    cli: &Cli,
    input: &Path,
    config: SegmentationConfig,
    manifest: &AssetManifest,
    cache: &AssetCache,
) -> Result<()> {
    info!(input = %input.display(), model = %config.model.request_url(), "Starting lesion segmentation");
    debug!(backends = ?config.backends, generation = %cache.generation(), "Configuration");

    let fetcher = DefaultFetcher::new()
        .context("Failed to create asset fetcher")?
        .with_progress(true);

    match cache.refresh(&fetcher, manifest).await {
        Ok(removed) if !removed.is_empty() => {
            info!(count = removed.len(), "Removed outdated cache generations");
        },
        Ok(_) => {},
        Err(e) => warn!(error = %e, "Cache install failed, keeping older generations"),
    }

    let mut processor =
        SegmentationProcessor::new(config).context("Failed to create segmentation processor")?;
    let backend = processor
        .initialize_from_cache(cache, &fetcher)
        .await
        .context("Failed to load the segmentation model")?;

    let image = ImageIOService::load_image(input)
        .with_context(|| format!("Failed to load {}", input.display()))?;

    let start_time = Instant::now();
    processor
        .process_image(&image)
        .await
        .context("Segmentation failed")?;
    let total_time = start_time.elapsed();

    write_outputs(&processor, &image, &cli.output_dir)?;

    let stats = processor.stats()?;
    let latency = processor.last_latency().unwrap_or(total_time);
    println!("🧠 Backend:   {backend} ({})", backend.description());
    println!("⏱️  Latency:   {:.1} ms", latency.as_secs_f64() * 1000.0);
    println!(
        "🩺 Coverage:  {:.2}% ({} / {} px at t={:.2})",
        stats.coverage() * 100.0,
        stats.lesion_pixels,
        stats.total_pixels,
        stats.threshold
    );
    println!("📁 Outputs:   {}", cli.output_dir.display());

    Ok(())
}

fn open_cache(cache_dir: Option<&Path>, generation: CacheGeneration) -> Result<AssetCache> {
    match cache_dir {
        Some(dir) => AssetCache::with_custom_cache_dir(dir, generation)
            .with_context(|| format!("Failed to open cache at {}", dir.display())),
        None => AssetCache::new(generation).context("Failed to open asset cache"),
    }
}

fn write_outputs(processor: &SegmentationProcessor, image: &image::DynamicImage, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let overlay = processor.overlay().context("No overlay was rendered")?;
    PngEncoder::write(overlay, dir.join(OVERLAY_FILE_NAME)).context("Failed to write overlay")?;

    let composite = processor.composite(image)?;
    PngEncoder::write(&composite, dir.join(COMPOSITE_FILE_NAME))
        .context("Failed to write composite")?;

    let mask_path = processor
        .export_mask_to(dir)
        .context("Failed to export mask")?;
    debug!(path = %mask_path.display(), "Mask exported");
    Ok(())
}

fn show_backend_diagnostics() {
    println!("🔍 Backend Diagnostics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    println!("\n🚀 Backends (default priority order):");
    for kind in BackendKind::ALL {
        let status = if !kind.is_compiled_in() {
            "⛔ Not compiled in"
        } else if backend_available(kind) {
            "✅ Available"
        } else {
            "❌ Not Available"
        };
        println!("  • {}: {} - {}", kind.id(), status, kind.description());
    }

    println!("\n💡 Usage Examples:");
    println!("  --backends onnx:cuda,onnx:cpu   # GPU first, ONNX CPU as fallback");
    println!("  --backends tract                # Pure Rust backend only");
}

fn backend_available(kind: BackendKind) -> bool {
    match kind {
        #[cfg(feature = "onnx")]
        BackendKind::OnnxCuda | BackendKind::OnnxCoreMl | BackendKind::OnnxCpu => {
            crate::backends::OnnxBackend::provider_available(kind)
        },
        BackendKind::Tract => cfg!(feature = "tract"),
        #[allow(unreachable_patterns)]
        _ => false,
    }
}

fn show_cache(cache: &AssetCache) -> Result<()> {
    let generations = cache
        .list_generations()
        .context("Failed to list cache generations")?;

    println!("📦 Asset Cache: {}", cache.root().display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if generations.is_empty() {
        println!("No cached generations found.");
        return Ok(());
    }

    for generation in generations {
        let marker = if generation.is_current { " (current)" } else { "" };
        println!("📁 {}{}", generation.name, marker);
        println!(
            "  └─ {} asset(s), {}",
            generation.entries,
            format_size(generation.size_bytes)
        );
    }
    Ok(())
}
