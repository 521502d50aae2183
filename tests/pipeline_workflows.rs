//! End-to-end segmentation workflows with scripted backends
//!
//! These tests drive the processor the way the CLI does, without model files
//! or native runtimes.

mod common;

use common::{config_with, lesion_photo, MemoryFetcher, Script, ScriptedFactory};
use image::Rgba;
use lesionseg::{
    AssetCache, AssetManifest, BackendKind, BackendState, CacheGeneration, FetchedAsset,
    LesionSegError, PngEncoder, SegmentationProcessor, Session,
};
use ndarray::Array4;
use tempfile::TempDir;

const MODEL_URL: &str = "lesion_256_fp16.onnx";

fn ready_processor(factory: ScriptedFactory, backends: Vec<BackendKind>) -> SegmentationProcessor {
    let mut processor =
        SegmentationProcessor::with_factory(config_with(backends), Box::new(factory)).unwrap();
    processor.initialize(b"model").unwrap();
    processor
}

#[tokio::test]
async fn test_uniform_zero_logits_at_and_below_half() {
    let factory = ScriptedFactory::new().with(BackendKind::Tract, Script::constant(0.0));
    let mut processor = ready_processor(factory, vec![BackendKind::Tract]);

    processor.process_image(&lesion_photo(640, 480)).await.unwrap();

    // sigmoid(0) = 0.5 is not strictly above 0.5
    let overlay = processor.overlay().unwrap();
    assert_eq!(overlay.dimensions(), (256, 256));
    assert!(overlay.pixels().all(|p| p[3] == 0));
    assert_eq!(processor.stats().unwrap().lesion_pixels, 0);

    processor.set_threshold(0.49).unwrap();
    let overlay = processor.overlay().unwrap();
    assert!(overlay.pixels().all(|p| *p == Rgba([255, 0, 0, 128])));
    assert!((processor.stats().unwrap().coverage() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_all_lesion_export_is_opaque_white() {
    let factory = ScriptedFactory::new().with(BackendKind::OnnxCpu, Script::constant(8.0));
    let mut processor = ready_processor(factory, vec![BackendKind::OnnxCpu]);
    processor.process_image(&lesion_photo(300, 200)).await.unwrap();

    let png = processor.export_mask_png().unwrap();
    let mask = image::load_from_memory(&png).unwrap().to_rgba8();

    assert_eq!(mask.dimensions(), (256, 256));
    assert!(mask.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
}

#[tokio::test]
async fn test_fallback_chain_selects_first_working_backend() {
    let kinds = vec![BackendKind::OnnxCuda, BackendKind::OnnxCoreMl, BackendKind::Tract];
    let factory = ScriptedFactory::new()
        .with(BackendKind::OnnxCuda, Script::unavailable())
        .with(BackendKind::OnnxCoreMl, Script::unavailable())
        .with(BackendKind::Tract, Script::constant(-1.0));
    let config = config_with(kinds.clone());

    let session =
        Session::initialize_first_available(&factory, &kinds, b"model", config.contract(), &config)
            .unwrap();
    assert_eq!(session.kind(), BackendKind::Tract);
    assert_eq!(factory.requested(), kinds);

    let output = session.run(&Array4::zeros((1, 3, 256, 256))).await.unwrap();
    assert_eq!(output.logits.shape(), &[1, 1, 256, 256]);
    assert!(output.warmup_latency.is_some());
}

#[tokio::test]
async fn test_fallback_skips_kinds_the_factory_cannot_build() {
    // Only tract is "compiled in"; every ONNX kind fails at construction
    let factory = ScriptedFactory::new().with(BackendKind::Tract, Script::constant(0.0));
    let processor = ready_processor(factory.clone(), BackendKind::ALL.to_vec());

    assert_eq!(processor.active_backend(), Some(BackendKind::Tract));
    assert_eq!(factory.requested(), BackendKind::ALL.to_vec());
}

#[tokio::test]
async fn test_threshold_slider_reuses_probability_map() {
    // Left half lesion, right half background
    let factory = ScriptedFactory::new().with(
        BackendKind::OnnxCpu,
        Script::from_fn(|x, _| if x < 128 { 4.0 } else { -4.0 }),
    );
    let mut processor = ready_processor(factory.clone(), vec![BackendKind::OnnxCpu]);
    processor.process_image(&lesion_photo(256, 256)).await.unwrap();
    let calls_after_cycle = factory.infer_calls();

    assert!((processor.stats().unwrap().coverage() - 0.5).abs() < 1e-9);

    // sigmoid(4) ~ 0.982, so a 0.99 threshold clears the whole mask
    processor.set_threshold(0.99).unwrap();
    assert_eq!(processor.stats().unwrap().lesion_pixels, 0);
    assert!(processor.overlay().unwrap().pixels().all(|p| p[3] == 0));

    processor.set_threshold(0.1).unwrap();
    let overlay = processor.overlay().unwrap();
    assert_eq!(overlay.get_pixel(10, 10)[3], 128);
    assert_eq!(overlay.get_pixel(200, 10)[3], 0);

    assert_eq!(factory.infer_calls(), calls_after_cycle);
}

#[tokio::test]
async fn test_overlay_rendering_is_idempotent() {
    let factory = ScriptedFactory::new().with(
        BackendKind::Tract,
        Script::from_fn(|x, y| (x as f32 - y as f32) / 32.0),
    );
    let mut processor = ready_processor(factory, vec![BackendKind::Tract]);
    processor.process_image(&lesion_photo(256, 256)).await.unwrap();

    let first = processor.render_overlay(0.42).unwrap();
    let second = processor.render_overlay(0.42).unwrap();
    assert_eq!(first, second);

    processor.set_threshold(0.42).unwrap();
    assert_eq!(processor.overlay().unwrap(), &first);
}

#[tokio::test]
async fn test_export_leaves_overlay_on_display() {
    let factory = ScriptedFactory::new().with(BackendKind::Tract, Script::constant(2.0));
    let mut processor = ready_processor(factory, vec![BackendKind::Tract]);
    processor.process_image(&lesion_photo(128, 128)).await.unwrap();
    let before = processor.overlay().unwrap().clone();

    let dir = TempDir::new().unwrap();
    let path = processor.export_mask_to(dir.path()).unwrap();

    assert_eq!(path.file_name().unwrap(), "mask_256.png");
    assert!(path.exists());
    assert_eq!(processor.overlay().unwrap(), &before);
    assert_eq!(before.get_pixel(0, 0)[3], 128);
}

#[tokio::test]
async fn test_warmup_runs_once_per_cycle() {
    let factory = ScriptedFactory::new().with(BackendKind::Tract, Script::constant(0.0));
    let mut processor = ready_processor(factory.clone(), vec![BackendKind::Tract]);
    processor.process_image(&lesion_photo(64, 64)).await.unwrap();
    assert_eq!(factory.infer_calls(), 2);

    let factory = ScriptedFactory::new().with(BackendKind::Tract, Script::constant(0.0));
    let mut config = config_with(vec![BackendKind::Tract]);
    config.warmup = false;
    let mut processor =
        SegmentationProcessor::with_factory(config, Box::new(factory.clone())).unwrap();
    processor.initialize(b"model").unwrap();
    processor.process_image(&lesion_photo(64, 64)).await.unwrap();
    assert_eq!(factory.infer_calls(), 1);
}

#[tokio::test]
async fn test_model_from_cache_to_mask_file() {
    let cache_dir = TempDir::new().unwrap();
    let cache =
        AssetCache::with_custom_cache_dir(cache_dir.path(), CacheGeneration::named("v1").unwrap())
            .unwrap();
    let fetcher = MemoryFetcher::new().serve(MODEL_URL, b"onnx-bytes");

    let factory = ScriptedFactory::new().with(BackendKind::OnnxCpu, Script::constant(3.0));
    let mut processor = SegmentationProcessor::with_factory(
        config_with(vec![BackendKind::OnnxCpu]),
        Box::new(factory),
    )
    .unwrap();

    let backend = processor.initialize_from_cache(&cache, &fetcher).await.unwrap();
    assert_eq!(backend, BackendKind::OnnxCpu);
    assert!(cache.contains(MODEL_URL));

    let work = TempDir::new().unwrap();
    let input = work.path().join("lesion.png");
    PngEncoder::write(&lesion_photo(320, 240).to_rgba8(), &input).unwrap();

    let map = processor.process_file(&input).await.unwrap();
    assert_eq!(map.dimensions(), (256, 256));

    let mask_path = processor.export_mask_to(work.path()).unwrap();
    let mask = image::open(mask_path).unwrap().to_rgba8();
    assert!(mask.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
}

#[tokio::test]
async fn test_model_fetch_failure_disables_processor() {
    let cache_dir = TempDir::new().unwrap();
    let cache =
        AssetCache::with_custom_cache_dir(cache_dir.path(), CacheGeneration::named("v1").unwrap())
            .unwrap();
    let fetcher = MemoryFetcher::new().serve_status(MODEL_URL, 503);

    let factory = ScriptedFactory::new().with(BackendKind::Tract, Script::constant(0.0));
    let mut processor =
        SegmentationProcessor::with_factory(config_with(vec![BackendKind::Tract]), Box::new(factory))
            .unwrap();

    let err = processor.initialize_from_cache(&cache, &fetcher).await.unwrap_err();
    assert!(matches!(err, LesionSegError::AssetFetchFailure { .. }));
    assert!(matches!(processor.state(), BackendState::Disabled(_)));
    assert!(!cache.contains(MODEL_URL));

    let err = processor.process_image(&lesion_photo(32, 32)).await.unwrap_err();
    assert!(matches!(err, LesionSegError::BackendUnavailable(_)));
    assert!(processor.overlay().is_none());

    // Retrying does not touch the network and keeps the first reason
    fetcher.set(MODEL_URL, FetchedAsset::ok(b"onnx-bytes".to_vec()));
    let calls = fetcher.calls();
    let err = processor.initialize_from_cache(&cache, &fetcher).await.unwrap_err();
    assert!(matches!(err, LesionSegError::BackendUnavailable(_)));
    assert!(err.to_string().contains("503"));
    assert_eq!(fetcher.calls(), calls);
    match processor.state() {
        BackendState::Disabled(reason) => assert!(reason.contains("503")),
        other => panic!("unexpected state: {other:?}"),
    }
}

#[tokio::test]
async fn test_offline_upgrade_still_loads_model_from_older_generation() {
    let cache_dir = TempDir::new().unwrap();
    let fetcher = MemoryFetcher::new().serve(MODEL_URL, b"onnx-bytes");

    let old_manifest = AssetManifest::new("lesionseg-v1").with_asset(MODEL_URL);
    let old = AssetCache::with_custom_cache_dir(
        cache_dir.path(),
        CacheGeneration::from_manifest(&old_manifest),
    )
    .unwrap();
    old.refresh(&fetcher, &old_manifest).await.unwrap();

    // A newer build starts without network access
    let new_manifest = AssetManifest::new("lesionseg-v2").with_asset(MODEL_URL);
    let new = AssetCache::with_custom_cache_dir(
        cache_dir.path(),
        CacheGeneration::from_manifest(&new_manifest),
    )
    .unwrap();
    fetcher.go_offline();

    let err = new.refresh(&fetcher, &new_manifest).await.unwrap_err();
    assert!(matches!(err, LesionSegError::AssetFetchFailure { .. }));
    assert!(old.contains(MODEL_URL), "older generation must survive a failed install");

    let factory = ScriptedFactory::new().with(BackendKind::Tract, Script::constant(3.0));
    let mut processor =
        SegmentationProcessor::with_factory(config_with(vec![BackendKind::Tract]), Box::new(factory))
            .unwrap();
    let backend = processor.initialize_from_cache(&new, &fetcher).await.unwrap();
    assert_eq!(backend, BackendKind::Tract);
    processor.process_image(&lesion_photo(64, 64)).await.unwrap();
    assert_eq!(processor.stats().unwrap().lesion_pixels, 256 * 256);
}
