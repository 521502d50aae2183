//! Conversion of CLI arguments into a segmentation configuration

use crate::cli::main_impl::Cli;
use crate::{
    cache::AssetManifest,
    config::{BackendKind, SegmentationConfig},
    models::{ModelAsset, ModelLocation},
};
use anyhow::{Context, Result};
use std::time::Duration;

/// Name recorded in the asset manifest of the CLI
pub(crate) const MANIFEST_NAME: &str = "lesionseg-cli";

/// Merge CLI flags over an optional JSON configuration file
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the configuration; flags given on the command line win over the file
    pub(crate) fn from_cli(cli: &Cli) -> Result<SegmentationConfig> {
        let mut config = match &cli.config {
            Some(path) => SegmentationConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => SegmentationConfig::default(),
        };

        if let Some(model) = &cli.model {
            let contract = config.model.contract.clone();
            config.model = ModelAsset::new(ModelLocation::parse(model)).with_contract(contract);
        }
        if let Some(version) = &cli.model_version {
            config.model.version = Some(version.clone());
        }
        if let Some(backends) = &cli.backends {
            config.backends = BackendKind::parse_list(backends).context("Invalid --backends")?;
        }
        if let Some(threshold) = cli.threshold {
            config.threshold = threshold;
        }
        if let Some(timeout_ms) = cli.timeout_ms {
            config.inference_timeout = Some(Duration::from_millis(timeout_ms));
        }
        if let Some(retries) = cli.timeout_retries {
            config.timeout_retries = retries;
        }
        if cli.no_warmup {
            config.warmup = false;
        }
        if let Some(threads) = cli.threads {
            config.intra_threads = threads;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Manifest listing the assets this configuration needs
    pub(crate) fn manifest(config: &SegmentationConfig) -> AssetManifest {
        AssetManifest::new(MANIFEST_NAME).with_asset(config.model.request_url())
    }
}
